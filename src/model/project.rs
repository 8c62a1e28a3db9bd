//! Knitting projects.

use super::{patch_field, require_non_empty, required_text, Draft, Model, Patch, RecordMeta};
use super::{Calculation, Note, Photo, PROJECT_ID};
use crate::error::{Result, StoreError};
use crate::query::{Query, SortOrder};
use crate::schema::knit::PROJECTS;
use crate::types::{Fields, Row, Value, CREATED_AT_COLUMN, UPDATED_AT_COLUMN};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Planned,
    InProgress,
    Completed,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Planned => "planned",
            ProjectStatus::InProgress => "in_progress",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planned" => Some(ProjectStatus::Planned),
            "in_progress" => Some(ProjectStatus::InProgress),
            "completed" => Some(ProjectStatus::Completed),
            "archived" => Some(ProjectStatus::Archived),
            _ => None,
        }
    }

    /// Progress implied by the status when none is recorded.
    pub fn implied_progress(&self) -> f64 {
        match self {
            ProjectStatus::Planned => 0.0,
            ProjectStatus::InProgress => 70.0,
            ProjectStatus::Completed | ProjectStatus::Archived => 100.0,
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ProjectStatus> for Value {
    fn from(status: ProjectStatus) -> Self {
        Value::from(status.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Project {
    pub meta: RecordMeta,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub progress: Option<f64>,
    pub yarn_type: Option<String>,
    pub needle_size: Option<String>,
    pub density: Option<String>,
    pub tags: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_favorite: bool,
}

impl Project {
    /// Recorded progress, or the one implied by the status.
    pub fn effective_progress(&self) -> f64 {
        self.progress
            .unwrap_or_else(|| self.status.implied_progress())
    }

    pub fn calculations(&self) -> Query<Calculation> {
        Query::all().where_eq(PROJECT_ID, &self.meta.id)
    }

    pub fn notes(&self) -> Query<Note> {
        Query::all().where_eq(PROJECT_ID, &self.meta.id)
    }

    pub fn photos(&self) -> Query<Photo> {
        Query::all().where_eq(PROJECT_ID, &self.meta.id)
    }
}

fn read_date(row: &Row, column: &str) -> Result<Option<NaiveDate>> {
    match row.text(column) {
        None => Ok(None),
        Some(text) => NaiveDate::parse_from_str(&text, DATE_FORMAT)
            .map(Some)
            .map_err(|e| {
                StoreError::CorruptData(format!("row {} has bad date in '{}': {}", row.id, column, e))
            }),
    }
}

fn date_value(date: Option<NaiveDate>) -> Value {
    Value::from(date.map(|d| d.format(DATE_FORMAT).to_string()))
}

impl Model for Project {
    const TABLE: &'static str = PROJECTS;

    fn from_row(row: &Row) -> Result<Self> {
        let status = required_text(row, "status")?;
        let status = ProjectStatus::parse(&status).ok_or_else(|| {
            StoreError::CorruptData(format!("row {} has unknown status '{}'", row.id, status))
        })?;

        Ok(Self {
            meta: RecordMeta::from_row(row),
            name: required_text(row, "name")?,
            description: row.text("description"),
            status,
            progress: row.number("progress"),
            yarn_type: row.text("yarn_type"),
            needle_size: row.text("needle_size"),
            density: row.text("density"),
            tags: row.text("tags"),
            start_date: read_date(row, "start_date")?,
            end_date: read_date(row, "end_date")?,
            is_favorite: row.flag("is_favorite").unwrap_or(false),
        })
    }

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }
}

fn check_progress(progress: Option<f64>) -> Result<()> {
    match progress {
        Some(p) if !(0.0..=100.0).contains(&p) => Err(StoreError::validation(
            "progress",
            format!("must be between 0 and 100, got {}", p),
        )),
        _ => Ok(()),
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub progress: Option<f64>,
    pub yarn_type: Option<String>,
    pub needle_size: Option<String>,
    pub density: Option<String>,
    pub tags: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_favorite: bool,
}

impl NewProject {
    pub fn new(name: &str, status: ProjectStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            ..Default::default()
        }
    }
}

impl Draft for NewProject {
    type Model = Project;

    fn validate(&self) -> Result<()> {
        require_non_empty("name", &self.name)?;
        check_progress(self.progress)
    }

    fn into_fields(self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("name".into(), Value::from(self.name));
        fields.insert("description".into(), Value::from(self.description));
        fields.insert("status".into(), Value::from(self.status));
        fields.insert("progress".into(), Value::from(self.progress));
        fields.insert("yarn_type".into(), Value::from(self.yarn_type));
        fields.insert("needle_size".into(), Value::from(self.needle_size));
        fields.insert("density".into(), Value::from(self.density));
        fields.insert("tags".into(), Value::from(self.tags));
        fields.insert("start_date".into(), date_value(self.start_date));
        fields.insert("end_date".into(), date_value(self.end_date));
        fields.insert("is_favorite".into(), Value::Bool(self.is_favorite));
        fields
    }
}

/// Partial project update. `Some(None)` clears an optional field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<ProjectStatus>,
    pub progress: Option<Option<f64>>,
    pub yarn_type: Option<Option<String>>,
    pub needle_size: Option<Option<String>>,
    pub density: Option<Option<String>>,
    pub tags: Option<Option<String>>,
    pub start_date: Option<Option<NaiveDate>>,
    pub end_date: Option<Option<NaiveDate>>,
    pub is_favorite: Option<bool>,
}

impl Patch for ProjectPatch {
    type Model = Project;

    fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            require_non_empty("name", name)?;
        }
        check_progress(self.progress.flatten())
    }

    fn apply(self, fields: &mut Fields) {
        patch_field(fields, "name", self.name);
        patch_field(fields, "description", self.description);
        patch_field(fields, "status", self.status);
        patch_field(fields, "progress", self.progress);
        patch_field(fields, "yarn_type", self.yarn_type);
        patch_field(fields, "needle_size", self.needle_size);
        patch_field(fields, "density", self.density);
        patch_field(fields, "tags", self.tags);
        patch_field(fields, "start_date", self.start_date.map(date_value));
        patch_field(fields, "end_date", self.end_date.map(date_value));
        patch_field(fields, "is_favorite", self.is_favorite);
    }
}

/// Orderings offered by the project list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProjectSort {
    #[default]
    RecentlyUpdated,
    Newest,
    Oldest,
    Name,
}

impl ProjectSort {
    pub fn query(self) -> Query<Project> {
        let (column, order) = match self {
            ProjectSort::RecentlyUpdated => (UPDATED_AT_COLUMN, SortOrder::Desc),
            ProjectSort::Newest => (CREATED_AT_COLUMN, SortOrder::Desc),
            ProjectSort::Oldest => (CREATED_AT_COLUMN, SortOrder::Asc),
            ProjectSort::Name => ("name", SortOrder::Asc),
        };
        Query::all().sort_by(column, order)
    }
}

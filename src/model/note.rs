use super::{patch_field, required_text, Draft, Model, Patch, RecordMeta};
use super::{Project, PROJECT_ID};
use crate::error::{Result, StoreError};
use crate::query::Query;
use crate::schema::knit::NOTES;
use crate::types::{Fields, Row, RowId, Value, ID_COLUMN};

/// Free-text note on a project.
#[derive(Clone, Debug, PartialEq)]
pub struct Note {
    pub meta: RecordMeta,
    pub project_id: RowId,
    pub title: String,
    pub content: String,
}

impl Note {
    pub fn project(&self) -> Query<Project> {
        Query::all().where_eq(ID_COLUMN, &self.project_id)
    }
}

impl Model for Note {
    const TABLE: &'static str = NOTES;

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            meta: RecordMeta::from_row(row),
            project_id: RowId::from(required_text(row, PROJECT_ID)?),
            title: required_text(row, "title")?,
            content: required_text(row, "content")?,
        })
    }

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewNote {
    pub title: String,
    pub content: String,
}

impl NewNote {
    pub fn new(title: &str, content: &str) -> Self {
        Self {
            title: title.to_string(),
            content: content.to_string(),
        }
    }
}

fn check_note(title: Option<&str>, content: Option<&str>) -> Result<()> {
    // An untitled, empty note carries nothing worth keeping.
    if let (Some(title), Some(content)) = (title, content) {
        if title.trim().is_empty() && content.trim().is_empty() {
            return Err(StoreError::validation("content", "note is empty"));
        }
    }
    Ok(())
}

impl Draft for NewNote {
    type Model = Note;

    fn validate(&self) -> Result<()> {
        check_note(Some(&self.title), Some(&self.content))
    }

    fn into_fields(self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("title".into(), Value::from(self.title));
        fields.insert("content".into(), Value::from(self.content));
        fields
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
}

impl Patch for NotePatch {
    type Model = Note;

    fn validate(&self) -> Result<()> {
        check_note(self.title.as_deref(), self.content.as_deref())
    }

    fn apply(self, fields: &mut Fields) {
        patch_field(fields, "title", self.title);
        patch_field(fields, "content", self.content);
    }

    fn validate_merged(fields: &Fields) -> Result<()> {
        let text = |column: &str| fields.get(column).and_then(Value::as_text).unwrap_or("");
        check_note(Some(text("title")), Some(text("content")))
    }
}

//! Typed records over table rows.
//!
//! Each entity implements [`Model`] to read itself from a [`Row`]. Creation
//! goes through a [`Draft`], partial updates through a [`Patch`]. Both are
//! only accepted by [`crate::Writer`], so writes always happen inside a
//! transaction.

mod calculation;
mod note;
mod photo;
mod project;
mod structured;

pub use calculation::{Calculation, CalculationPatch, NewCalculation};
pub use note::{NewNote, Note, NotePatch};
pub use photo::{NewPhoto, Photo, PhotoPatch};
pub use project::{NewProject, Project, ProjectPatch, ProjectSort, ProjectStatus};
pub use structured::{MapValue, StructuredMap};

use crate::error::{Result, StoreError};
use crate::types::{Fields, Row, RowId, Timestamp, Value};

/// Foreign-key column every project child carries.
pub const PROJECT_ID: &str = "project_id";

/// Store-managed fields shared by every record.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordMeta {
    pub id: RowId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl RecordMeta {
    pub(crate) fn from_row(row: &Row) -> Self {
        Self {
            id: row.id.clone(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// A typed record bound to one table.
pub trait Model: Sized + Send + 'static {
    const TABLE: &'static str;

    fn from_row(row: &Row) -> Result<Self>;

    fn meta(&self) -> &RecordMeta;

    fn id(&self) -> &RowId {
        &self.meta().id
    }
}

/// Fields for a new record.
pub trait Draft {
    type Model: Model;

    /// Reject bad input before anything is buffered.
    fn validate(&self) -> Result<()>;

    fn into_fields(self) -> Fields;

    /// Bind a child draft to its owning project.
    fn attach(self, project_id: &RowId) -> Attached<Self>
    where
        Self: Sized,
    {
        Attached {
            project_id: project_id.clone(),
            draft: self,
        }
    }
}

/// A partial update. Unset fields are left untouched.
pub trait Patch {
    type Model: Model;

    fn validate(&self) -> Result<()>;

    fn apply(self, fields: &mut Fields);

    /// Rules that span fields, checked on the row after [`Patch::apply`].
    fn validate_merged(_fields: &Fields) -> Result<()> {
        Ok(())
    }
}

/// A draft plus the project it belongs to.
#[derive(Clone, Debug)]
pub struct Attached<D> {
    project_id: RowId,
    draft: D,
}

impl<D: Draft> Draft for Attached<D> {
    type Model = D::Model;

    fn validate(&self) -> Result<()> {
        self.draft.validate()
    }

    fn into_fields(self) -> Fields {
        let mut fields = self.draft.into_fields();
        fields.insert(PROJECT_ID.to_string(), Value::from(&self.project_id));
        fields
    }
}

pub(crate) fn required_text(row: &Row, column: &str) -> Result<String> {
    row.text(column).ok_or_else(|| {
        StoreError::CorruptData(format!("row {} has no text in '{}'", row.id, column))
    })
}

/// Write `value` into `fields` when the patch supplied it.
pub(crate) fn patch_field<V: Into<Value>>(fields: &mut Fields, column: &str, value: Option<V>) {
    if let Some(value) = value {
        fields.insert(column.to_string(), value.into());
    }
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StoreError::validation(field, "must not be empty"));
    }
    Ok(())
}

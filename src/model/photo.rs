use super::{patch_field, require_non_empty, required_text, Draft, Model, Patch, RecordMeta};
use super::{Project, PROJECT_ID};
use crate::error::Result;
use crate::query::Query;
use crate::schema::knit::PHOTOS;
use crate::types::{Fields, Row, RowId, Value, ID_COLUMN};

/// A photo attached to a project. The store keeps the URI only.
#[derive(Clone, Debug, PartialEq)]
pub struct Photo {
    pub meta: RecordMeta,
    pub project_id: RowId,
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
}

impl Photo {
    pub fn project(&self) -> Query<Project> {
        Query::all().where_eq(ID_COLUMN, &self.project_id)
    }
}

impl Model for Photo {
    const TABLE: &'static str = PHOTOS;

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            meta: RecordMeta::from_row(row),
            project_id: RowId::from(required_text(row, PROJECT_ID)?),
            uri: required_text(row, "uri")?,
            name: required_text(row, "name")?,
            description: row.text("description"),
        })
    }

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewPhoto {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
}

impl NewPhoto {
    pub fn new(uri: &str, name: &str) -> Self {
        Self {
            uri: uri.to_string(),
            name: name.to_string(),
            description: None,
        }
    }
}

impl Draft for NewPhoto {
    type Model = Photo;

    fn validate(&self) -> Result<()> {
        require_non_empty("uri", &self.uri)
    }

    fn into_fields(self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("uri".into(), Value::from(self.uri));
        fields.insert("name".into(), Value::from(self.name));
        fields.insert("description".into(), Value::from(self.description));
        fields
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhotoPatch {
    pub uri: Option<String>,
    pub name: Option<String>,
    pub description: Option<Option<String>>,
}

impl Patch for PhotoPatch {
    type Model = Photo;

    fn validate(&self) -> Result<()> {
        match &self.uri {
            Some(uri) => require_non_empty("uri", uri),
            None => Ok(()),
        }
    }

    fn apply(self, fields: &mut Fields) {
        patch_field(fields, "uri", self.uri);
        patch_field(fields, "name", self.name);
        patch_field(fields, "description", self.description);
    }
}

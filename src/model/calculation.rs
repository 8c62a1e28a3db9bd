//! Saved calculator results.

use super::{patch_field, require_non_empty, required_text, Draft, Model, Patch, RecordMeta};
use super::{Project, StructuredMap, PROJECT_ID};
use crate::error::Result;
use crate::query::Query;
use crate::schema::knit::CALCULATIONS;
use crate::types::{Fields, Row, RowId, Value, ID_COLUMN};

#[derive(Clone, Debug, PartialEq)]
pub struct Calculation {
    pub meta: RecordMeta,
    pub project_id: RowId,
    /// Which calculator produced this, e.g. `"yarn"`.
    pub calculator_type: String,
    pub calculator_title: String,
    pub input_values: StructuredMap,
    pub results: StructuredMap,
    pub notes: Option<String>,
}

impl Calculation {
    pub fn project(&self) -> Query<Project> {
        Query::all().where_eq(ID_COLUMN, &self.project_id)
    }
}

impl Model for Calculation {
    const TABLE: &'static str = CALCULATIONS;

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            meta: RecordMeta::from_row(row),
            project_id: RowId::from(required_text(row, PROJECT_ID)?),
            calculator_type: required_text(row, "calculator_type")?,
            calculator_title: required_text(row, "calculator_title")?,
            input_values: StructuredMap::decode(&row.text("input_values").unwrap_or_default()),
            results: StructuredMap::decode(&row.text("results").unwrap_or_default()),
            notes: row.text("notes"),
        })
    }

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewCalculation {
    pub calculator_type: String,
    pub calculator_title: String,
    pub input_values: StructuredMap,
    pub results: StructuredMap,
    pub notes: Option<String>,
}

impl NewCalculation {
    pub fn new(calculator_type: &str, calculator_title: &str) -> Self {
        Self {
            calculator_type: calculator_type.to_string(),
            calculator_title: calculator_title.to_string(),
            ..Default::default()
        }
    }
}

impl Draft for NewCalculation {
    type Model = Calculation;

    fn validate(&self) -> Result<()> {
        require_non_empty("calculator_type", &self.calculator_type)
    }

    fn into_fields(self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("calculator_type".into(), Value::from(self.calculator_type));
        fields.insert("calculator_title".into(), Value::from(self.calculator_title));
        fields.insert("input_values".into(), Value::from(self.input_values.encode()));
        fields.insert("results".into(), Value::from(self.results.encode()));
        fields.insert("notes".into(), Value::from(self.notes));
        fields
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CalculationPatch {
    pub calculator_title: Option<String>,
    pub input_values: Option<StructuredMap>,
    pub results: Option<StructuredMap>,
    pub notes: Option<Option<String>>,
}

impl Patch for CalculationPatch {
    type Model = Calculation;

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn apply(self, fields: &mut Fields) {
        patch_field(fields, "calculator_title", self.calculator_title);
        patch_field(fields, "input_values", self.input_values.map(|m| m.encode()));
        patch_field(fields, "results", self.results.map(|m| m.encode()));
        patch_field(fields, "notes", self.notes);
    }
}

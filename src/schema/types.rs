//! Table and column declarations.

use crate::error::{Result, StoreError};
use crate::types::{Value, CREATED_AT_COLUMN, ID_COLUMN, UPDATED_AT_COLUMN};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Primitive column type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Number,
    Boolean,
}

impl ColumnType {
    /// Whether a non-null value fits this column.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ColumnType::String, Value::Text(_))
                | (ColumnType::Number, Value::Number(_))
                | (ColumnType::Boolean, Value::Bool(_))
        )
    }
}

/// Definition of a single column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub kind: ColumnType,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub indexed: bool,
    /// Parent table when this column is a foreign key.
    #[serde(default)]
    pub references: Option<String>,
    /// Value written into existing rows when the column is added by a migration.
    #[serde(default)]
    pub default: Option<Value>,
}

impl ColumnSchema {
    fn new(name: &str, kind: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            optional: false,
            indexed: false,
            references: None,
            default: None,
        }
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, ColumnType::String)
    }

    pub fn number(name: &str) -> Self {
        Self::new(name, ColumnType::Number)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, ColumnType::Boolean)
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Mark as a foreign key into `table`. Foreign keys are always indexed.
    pub fn references(mut self, table: &str) -> Self {
        self.references = Some(table.to_string());
        self.indexed = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Check a value against type and nullability.
    pub fn check(&self, table: &str, value: &Value) -> Result<()> {
        if value.is_null() {
            if self.optional {
                return Ok(());
            }
            return Err(StoreError::Schema(format!(
                "column '{}.{}' is not optional",
                table, self.name
            )));
        }
        if !self.kind.accepts(value) {
            return Err(StoreError::Schema(format!(
                "column '{}.{}' expects {:?}, got {:?}",
                table, self.name, self.kind, value
            )));
        }
        Ok(())
    }
}

/// Definition of a table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: &str, columns: Vec<ColumnSchema>) -> Self {
        Self {
            name: name.to_string(),
            columns,
        }
    }

    /// Look up a declared column.
    pub fn column(&self, name: &str) -> Result<&ColumnSchema> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| StoreError::Schema(format!("unknown column '{}.{}'", self.name, name)))
    }

    /// Whether `name` is a declared or implicit column.
    pub fn has_column(&self, name: &str) -> bool {
        is_implicit(name) || self.columns.iter().any(|c| c.name == name)
    }

    /// Fail fast on a column a query or write refers to.
    pub fn require_column(&self, name: &str) -> Result<()> {
        if self.has_column(name) {
            Ok(())
        } else {
            Err(StoreError::Schema(format!(
                "unknown column '{}.{}'",
                self.name, name
            )))
        }
    }

    pub fn is_indexed(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name && c.indexed)
    }

    /// Foreign-key columns and the table they reference.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .filter_map(|c| c.references.as_deref().map(|parent| (c.name.as_str(), parent)))
    }
}

/// Whether the store manages this column for every table.
pub fn is_implicit(column: &str) -> bool {
    matches!(column, ID_COLUMN | CREATED_AT_COLUMN | UPDATED_AT_COLUMN)
}

/// The complete schema at one version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppSchema {
    pub version: u32,
    pub tables: Vec<TableSchema>,
}

impl AppSchema {
    pub fn new(version: u32, tables: Vec<TableSchema>) -> Result<Self> {
        if version == 0 {
            return Err(StoreError::Schema("schema version must be at least 1".into()));
        }
        for (i, table) in tables.iter().enumerate() {
            if tables[..i].iter().any(|t| t.name == table.name) {
                return Err(StoreError::Schema(format!(
                    "table '{}' declared twice",
                    table.name
                )));
            }
            for (j, column) in table.columns.iter().enumerate() {
                if is_implicit(&column.name) || table.columns[..j].iter().any(|c| c.name == column.name) {
                    return Err(StoreError::Schema(format!(
                        "column '{}.{}' declared twice or shadows an implicit column",
                        table.name, column.name
                    )));
                }
            }
        }
        Ok(Self { version, tables })
    }

    pub fn table(&self, name: &str) -> Result<&TableSchema> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| StoreError::Schema(format!("unknown table '{}'", name)))
    }

    /// Tables holding a foreign key into `parent`, with the column name.
    pub fn children_of<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.tables.iter().flat_map(move |t| {
            t.foreign_keys()
                .filter(move |(_, p)| *p == parent)
                .map(move |(column, _)| (t.name.as_str(), column))
        })
    }

    /// SHA-256 over the canonical JSON form, used to detect registry drift.
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        hex::encode(hasher.finalize())
    }
}

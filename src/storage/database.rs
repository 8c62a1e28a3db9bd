//! In-memory database state rebuilt from the batch log.

use super::log::{Frame, StorageOp};
use super::table::Table;
use crate::error::{Result, StoreError};
use crate::schema::TableSchema;
use crate::types::{Row, RowId};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Before and after images of one row touched by a commit.
#[derive(Clone, Debug)]
pub struct RowChange {
    pub table: String,
    pub before: Option<Row>,
    pub after: Option<Row>,
}

/// Everything a single commit changed.
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    pub seq: u64,
    pub rows: Vec<RowChange>,
    pub schema_changed: bool,
}

impl ChangeSet {
    pub fn touches(&self, table: &str) -> bool {
        self.schema_changed || self.rows.iter().any(|c| c.table == table)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && !self.schema_changed
    }
}

/// Current tables plus version metadata.
#[derive(Default)]
pub struct Database {
    version: Option<u32>,
    fingerprint: Option<String>,
    seeded: bool,
    tables: BTreeMap<String, Table>,
}

impl Database {
    /// Rebuild state by replaying committed frames in order.
    pub fn replay(frames: &[Frame]) -> Self {
        let mut db = Self::default();
        for frame in frames {
            db.apply(&frame.ops);
        }
        db
    }

    /// Schema version stored with the data; `None` for a brand-new file.
    pub fn version(&self) -> Option<u32> {
        self.version
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Whether sample data was ever written to this file.
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::Schema(format!("table '{}' does not exist in storage", name)))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn get(&self, table: &str, id: &RowId) -> Option<&Row> {
        self.tables.get(table).and_then(|t| t.get(id))
    }

    /// Validate a batch against the current state without changing anything.
    ///
    /// After this succeeds, [`Database::apply`] on the same batch cannot fail.
    pub fn check(&self, ops: &[StorageOp]) -> Result<()> {
        let mut schemas: BTreeMap<&str, TableSchema> = self
            .tables
            .iter()
            .map(|(name, t)| (name.as_str(), t.schema().clone()))
            .collect();
        let mut present: HashMap<(&str, &RowId), bool> = HashMap::new();
        let mut version = self.version;

        for op in ops {
            match op {
                StorageOp::SetVersion { version: next, .. } => {
                    if let Some(current) = version {
                        if *next < current {
                            return Err(StoreError::Migration(format!(
                                "schema version cannot go back from {} to {}",
                                current, next
                            )));
                        }
                    }
                    version = Some(*next);
                }
                StorageOp::MarkSeeded => {}
                StorageOp::CreateTable(schema) => {
                    if schemas.contains_key(schema.name.as_str()) {
                        return Err(StoreError::Migration(format!(
                            "table '{}' already exists",
                            schema.name
                        )));
                    }
                    schemas.insert(schema.name.as_str(), schema.clone());
                }
                StorageOp::AddColumns { table, columns } => {
                    let schema = schemas.get_mut(table.as_str()).ok_or_else(|| {
                        StoreError::Migration(format!(
                            "cannot add columns to missing table '{}'",
                            table
                        ))
                    })?;
                    for column in columns {
                        if schema.has_column(&column.name) {
                            return Err(StoreError::Migration(format!(
                                "column '{}.{}' already exists",
                                table, column.name
                            )));
                        }
                        if !column.optional && column.default.is_none() {
                            return Err(StoreError::Migration(format!(
                                "column '{}.{}' must be optional or have a default",
                                table, column.name
                            )));
                        }
                        schema.columns.push(column.clone());
                    }
                }
                StorageOp::Put { table, row } => {
                    let schema = schemas.get(table.as_str()).ok_or_else(|| {
                        StoreError::Schema(format!("table '{}' does not exist in storage", table))
                    })?;
                    for name in row.fields.keys() {
                        schema.column(name)?;
                    }
                    for column in &schema.columns {
                        column.check(table, &row.get(&column.name))?;
                    }
                    present.insert((table.as_str(), &row.id), true);
                }
                StorageOp::Remove { table, id } => {
                    let exists = present
                        .get(&(table.as_str(), id))
                        .copied()
                        .unwrap_or_else(|| self.get(table, id).is_some());
                    if !exists {
                        return Err(StoreError::not_found(table.as_str(), id));
                    }
                    present.insert((table.as_str(), id), false);
                }
            }
        }
        Ok(())
    }

    /// Apply a batch and report what changed.
    pub fn apply(&mut self, ops: &[StorageOp]) -> ChangeSet {
        let mut changes = ChangeSet::default();

        for op in ops {
            match op {
                StorageOp::SetVersion {
                    version,
                    fingerprint,
                } => {
                    self.version = Some(*version);
                    self.fingerprint = Some(fingerprint.clone());
                }
                StorageOp::MarkSeeded => self.seeded = true,
                StorageOp::CreateTable(schema) => {
                    self.tables
                        .insert(schema.name.clone(), Table::new(schema.clone()));
                    changes.schema_changed = true;
                }
                StorageOp::AddColumns { table, columns } => match self.tables.get_mut(table) {
                    Some(t) => {
                        t.add_columns(columns);
                        changes.schema_changed = true;
                    }
                    None => warn!(table = %table, "skipping columns for missing table"),
                },
                StorageOp::Put { table, row } => match self.tables.get_mut(table) {
                    Some(t) => {
                        let before = t.put(row.clone());
                        changes.rows.push(RowChange {
                            table: table.clone(),
                            before,
                            after: Some(row.clone()),
                        });
                    }
                    None => warn!(table = %table, id = %row.id, "skipping row for missing table"),
                },
                StorageOp::Remove { table, id } => {
                    let before = self.tables.get_mut(table).and_then(|t| t.remove(id));
                    if before.is_some() {
                        changes.rows.push(RowChange {
                            table: table.clone(),
                            before,
                            after: None,
                        });
                    }
                }
            }
        }

        changes
    }

    /// Operations that recreate the current state from an empty file.
    pub fn snapshot_ops(&self) -> Vec<StorageOp> {
        let mut ops = Vec::new();
        if let (Some(version), Some(fingerprint)) = (self.version, &self.fingerprint) {
            ops.push(StorageOp::SetVersion {
                version,
                fingerprint: fingerprint.clone(),
            });
        }
        if self.seeded {
            ops.push(StorageOp::MarkSeeded);
        }
        for table in self.tables.values() {
            ops.push(StorageOp::CreateTable(table.schema().clone()));
        }
        for (name, table) in &self.tables {
            for row in table.rows() {
                ops.push(StorageOp::Put {
                    table: name.clone(),
                    row: row.clone(),
                });
            }
        }
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSchema;
    use crate::types::{Fields, Timestamp, Value};

    fn create() -> StorageOp {
        StorageOp::CreateTable(TableSchema::new(
            "items",
            vec![
                ColumnSchema::string("name"),
                ColumnSchema::number("qty").optional(),
            ],
        ))
    }

    fn item(id: &str, name: Value) -> StorageOp {
        let mut fields = Fields::new();
        fields.insert("name".into(), name);
        StorageOp::Put {
            table: "items".into(),
            row: Row {
                id: RowId::from(id),
                created_at: Timestamp(1),
                updated_at: Timestamp(1),
                deleted: false,
                fields,
            },
        }
    }

    #[test]
    fn test_check_sees_tables_created_in_same_batch() {
        let db = Database::default();
        let batch = vec![create(), item("a", Value::from("wool"))];
        db.check(&batch).unwrap();
    }

    #[test]
    fn test_check_rejects_bad_rows() {
        let mut db = Database::default();
        db.apply(&[create()]);

        assert!(matches!(
            db.check(&[item("a", Value::Null)]),
            Err(StoreError::Schema(_))
        ));
        assert!(matches!(
            db.check(&[item("a", Value::Number(1.0))]),
            Err(StoreError::Schema(_))
        ));

        let mut unknown = item("a", Value::from("x"));
        if let StorageOp::Put { row, .. } = &mut unknown {
            row.fields.insert("colour".into(), Value::from("red"));
        }
        assert!(matches!(db.check(&[unknown]), Err(StoreError::Schema(_))));
    }

    #[test]
    fn test_check_remove_tracks_batch() {
        let mut db = Database::default();
        db.apply(&[create()]);

        let remove = StorageOp::Remove {
            table: "items".into(),
            id: RowId::from("a"),
        };
        assert!(matches!(
            db.check(&[remove.clone()]),
            Err(StoreError::NotFound { .. })
        ));
        db.check(&[item("a", Value::from("x")), remove.clone()]).unwrap();
        assert!(db
            .check(&[item("a", Value::from("x")), remove.clone(), remove])
            .is_err());
    }

    #[test]
    fn test_version_cannot_decrease() {
        let mut db = Database::default();
        db.apply(&[StorageOp::SetVersion {
            version: 3,
            fingerprint: "x".into(),
        }]);
        let back = StorageOp::SetVersion {
            version: 2,
            fingerprint: "y".into(),
        };
        assert!(matches!(db.check(&[back]), Err(StoreError::Migration(_))));
    }

    #[test]
    fn test_apply_reports_changes() {
        let mut db = Database::default();
        db.apply(&[create()]);
        let changes = db.apply(&[item("a", Value::from("x"))]);
        assert_eq!(changes.rows.len(), 1);
        assert!(changes.rows[0].before.is_none());
        assert!(changes.touches("items"));
        assert!(!changes.touches("other"));

        let changes = db.apply(&[item("a", Value::from("y"))]);
        assert_eq!(
            changes.rows[0].before.as_ref().unwrap().get("name"),
            Value::from("x")
        );
    }

    #[test]
    fn test_snapshot_ops_roundtrip() {
        let mut db = Database::default();
        db.apply(&[
            StorageOp::SetVersion {
                version: 1,
                fingerprint: "f".into(),
            },
            create(),
            item("a", Value::from("x")),
            item("b", Value::from("y")),
        ]);

        let mut copy = Database::default();
        copy.apply(&db.snapshot_ops());
        assert_eq!(copy.version(), Some(1));
        assert_eq!(copy.table("items").unwrap().len(), 2);
    }
}

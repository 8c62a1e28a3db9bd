//! Migration declarations.
//!
//! Migrations are declared as a list of version steps. Declaration order is
//! not trusted: [`Migrations::new`] sorts by target version and rejects
//! duplicates before anything is planned.

use super::types::{AppSchema, ColumnSchema, TableSchema};
use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// One change applied while moving to a new version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MigrationStep {
    CreateTable(TableSchema),
    AddColumns {
        table: String,
        columns: Vec<ColumnSchema>,
    },
}

impl MigrationStep {
    pub fn describe(&self) -> String {
        match self {
            MigrationStep::CreateTable(table) => format!("create table '{}'", table.name),
            MigrationStep::AddColumns { table, columns } => {
                let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
                format!("add columns [{}] to '{}'", names.join(", "), table)
            }
        }
    }
}

/// All steps that bring the schema to `to_version`.
#[derive(Clone, Debug, PartialEq)]
pub struct Migration {
    pub to_version: u32,
    pub steps: Vec<MigrationStep>,
}

impl Migration {
    pub fn to_version(version: u32) -> Self {
        Self {
            to_version: version,
            steps: Vec::new(),
        }
    }

    pub fn create_table(mut self, table: TableSchema) -> Self {
        self.steps.push(MigrationStep::CreateTable(table));
        self
    }

    pub fn add_columns(mut self, table: &str, columns: Vec<ColumnSchema>) -> Self {
        self.steps.push(MigrationStep::AddColumns {
            table: table.to_string(),
            columns,
        });
        self
    }
}

/// Validated, ascending list of migrations.
#[derive(Clone, Debug, Default)]
pub struct Migrations {
    ordered: Vec<Migration>,
}

impl Migrations {
    pub fn new(mut migrations: Vec<Migration>) -> Result<Self> {
        migrations.sort_by_key(|m| m.to_version);

        for pair in migrations.windows(2) {
            if pair[0].to_version == pair[1].to_version {
                return Err(StoreError::Migration(format!(
                    "migration to version {} declared twice",
                    pair[0].to_version
                )));
            }
        }

        for migration in &migrations {
            if migration.to_version < 2 {
                return Err(StoreError::Migration(format!(
                    "migration target {} is not above the base version 1",
                    migration.to_version
                )));
            }
            for step in &migration.steps {
                if let MigrationStep::AddColumns { table, columns } = step {
                    for column in columns {
                        if !column.optional && column.default.is_none() {
                            return Err(StoreError::Migration(format!(
                                "column '{}.{}' added in version {} must be optional or have a default",
                                table, column.name, migration.to_version
                            )));
                        }
                    }
                }
            }
        }

        Ok(Self {
            ordered: migrations,
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.ordered.iter()
    }

    pub fn max_version(&self) -> Option<u32> {
        self.ordered.last().map(|m| m.to_version)
    }

    /// Reject migrations that target versions past the registry.
    pub fn validate_against(&self, schema: &AppSchema) -> Result<()> {
        match self.max_version() {
            Some(max) if max > schema.version => Err(StoreError::Migration(format!(
                "migration to version {} is newer than schema version {}",
                max, schema.version
            ))),
            _ => Ok(()),
        }
    }

    /// Migrations needed to move from `from` to `to`, ascending.
    ///
    /// Every intermediate version must be covered; a gap means the database
    /// cannot be upgraded safely.
    pub fn plan(&self, from: u32, to: u32) -> Result<Vec<&Migration>> {
        if from > to {
            return Err(StoreError::Migration(format!(
                "database version {} is newer than schema version {}",
                from, to
            )));
        }

        let planned: Vec<&Migration> = self
            .ordered
            .iter()
            .filter(|m| m.to_version > from && m.to_version <= to)
            .collect();

        let mut expected = from + 1;
        for migration in &planned {
            if migration.to_version != expected {
                return Err(StoreError::Migration(format!(
                    "no migration declared for version {} (upgrading {} -> {})",
                    expected, from, to
                )));
            }
            expected += 1;
        }
        if expected != to + 1 {
            return Err(StoreError::Migration(format!(
                "no migration declared for version {} (upgrading {} -> {})",
                expected, from, to
            )));
        }

        Ok(planned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_flag(version: u32) -> Migration {
        Migration::to_version(version)
            .add_columns("t", vec![ColumnSchema::boolean(&format!("f{}", version)).optional()])
    }

    #[test]
    fn test_declared_order_is_not_trusted() {
        let migrations = Migrations::new(vec![add_flag(4), add_flag(2), add_flag(3)]).unwrap();
        let versions: Vec<u32> = migrations.iter().map(|m| m.to_version).collect();
        assert_eq!(versions, vec![2, 3, 4]);
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let result = Migrations::new(vec![add_flag(2), add_flag(2)]);
        assert!(matches!(result, Err(StoreError::Migration(_))));
    }

    #[test]
    fn test_required_column_without_default_rejected() {
        let migration = Migration::to_version(2).add_columns("t", vec![ColumnSchema::string("x")]);
        assert!(Migrations::new(vec![migration]).is_err());

        let with_default = Migration::to_version(2)
            .add_columns("t", vec![ColumnSchema::string("x").default_value("")]);
        assert!(Migrations::new(vec![with_default]).is_ok());
    }

    #[test]
    fn test_plan_ranges() {
        let migrations = Migrations::new(vec![add_flag(3), add_flag(2), add_flag(4)]).unwrap();

        let all: Vec<u32> = migrations.plan(1, 4).unwrap().iter().map(|m| m.to_version).collect();
        assert_eq!(all, vec![2, 3, 4]);

        let tail: Vec<u32> = migrations.plan(3, 4).unwrap().iter().map(|m| m.to_version).collect();
        assert_eq!(tail, vec![4]);

        assert!(migrations.plan(4, 4).unwrap().is_empty());
        assert!(migrations.plan(5, 4).is_err());
    }

    #[test]
    fn test_plan_detects_gaps() {
        let migrations = Migrations::new(vec![add_flag(2), add_flag(4)]).unwrap();
        assert!(matches!(migrations.plan(1, 4), Err(StoreError::Migration(_))));
        assert!(matches!(migrations.plan(1, 5), Err(StoreError::Migration(_))));
    }
}

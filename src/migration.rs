//! Migration engine.
//!
//! Brings the database file to the registry's schema version before the
//! store accepts any other call. Everything a single upgrade does, including
//! the version bump, is written as one batch, so a crash mid-upgrade leaves
//! the previous version intact and the upgrade simply runs again.

use crate::error::{Result, StoreError};
use crate::schema::{MigrationStep, Registry, TableSchema};
use crate::storage::{BatchLog, Database, StorageOp};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// What a migration run did.
#[derive(Clone, Debug, PartialEq)]
pub struct MigrationReport {
    /// Version found on disk; `None` for a new database.
    pub from: Option<u32>,
    pub to: u32,
    /// Steps applied, in order.
    pub applied: Vec<MigrationStep>,
    /// Registry tables storage lacked and that were created outright.
    pub created_missing: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.from == Some(self.to) && self.applied.is_empty() && self.created_missing.is_empty()
    }
}

/// Ops to write plus the report describing them.
pub struct MigrationPlan {
    pub ops: Vec<StorageOp>,
    pub report: MigrationReport,
}

pub struct Migrator<'a> {
    registry: &'a Registry,
}

impl<'a> Migrator<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Work out what must be written to reach the registry version.
    pub fn plan(&self, db: &Database) -> Result<MigrationPlan> {
        let schema = &self.registry.schema;
        let fingerprint = schema.fingerprint();

        let Some(from) = db.version() else {
            if db.tables().next().is_some() {
                return Err(StoreError::Migration(
                    "database has tables but no schema version".into(),
                ));
            }
            let mut ops: Vec<StorageOp> = schema
                .tables
                .iter()
                .cloned()
                .map(StorageOp::CreateTable)
                .collect();
            ops.push(StorageOp::SetVersion {
                version: schema.version,
                fingerprint,
            });
            return Ok(MigrationPlan {
                ops,
                report: MigrationReport {
                    from: None,
                    to: schema.version,
                    applied: Vec::new(),
                    created_missing: Vec::new(),
                },
            });
        };

        let mut tables: BTreeMap<String, TableSchema> = db
            .tables()
            .map(|t| (t.schema().name.clone(), t.schema().clone()))
            .collect();
        let mut ops = Vec::new();
        let mut applied = Vec::new();

        for migration in self.registry.migrations.plan(from, schema.version)? {
            for step in &migration.steps {
                debug!(to_version = migration.to_version, step = %step.describe(), "planning migration step");
                match step {
                    MigrationStep::CreateTable(table) => {
                        tables.insert(table.name.clone(), table.clone());
                        ops.push(StorageOp::CreateTable(table.clone()));
                    }
                    MigrationStep::AddColumns { table, columns } => {
                        let target = tables.get_mut(table).ok_or_else(|| {
                            StoreError::Migration(format!(
                                "version {} adds columns to missing table '{}'",
                                migration.to_version, table
                            ))
                        })?;
                        target.columns.extend(columns.iter().cloned());
                        ops.push(StorageOp::AddColumns {
                            table: table.clone(),
                            columns: columns.clone(),
                        });
                    }
                }
                applied.push(step.clone());
            }
        }

        let mut created_missing = Vec::new();
        for table in &schema.tables {
            match tables.get(&table.name) {
                None => {
                    warn!(table = %table.name, "creating table missing from storage");
                    created_missing.push(table.name.clone());
                    ops.push(StorageOp::CreateTable(table.clone()));
                }
                Some(stored) => {
                    for column in &table.columns {
                        if !stored.has_column(&column.name) {
                            return Err(StoreError::Migration(format!(
                                "column '{}.{}' is declared but no migration adds it",
                                table.name, column.name
                            )));
                        }
                    }
                }
            }
        }

        let fingerprint_changed = db.fingerprint() != Some(fingerprint.as_str());
        if !ops.is_empty() || from != schema.version || fingerprint_changed {
            if fingerprint_changed && from == schema.version && ops.is_empty() {
                warn!(
                    version = from,
                    "schema definition changed without a version bump"
                );
            }
            ops.push(StorageOp::SetVersion {
                version: schema.version,
                fingerprint,
            });
        }

        Ok(MigrationPlan {
            ops,
            report: MigrationReport {
                from: Some(from),
                to: schema.version,
                applied,
                created_missing,
            },
        })
    }

    /// Plan and apply. The whole upgrade is one atomic batch.
    pub fn migrate(&self, db: &mut Database, log: &BatchLog) -> Result<MigrationReport> {
        let plan = self.plan(db)?;
        if plan.ops.is_empty() {
            debug!(version = ?db.version(), "schema is current");
            return Ok(plan.report);
        }

        db.check(&plan.ops).map_err(|e| match e {
            StoreError::Io(_) => e,
            other => StoreError::Migration(other.to_string()),
        })?;
        log.append(&plan.ops)?;
        db.apply(&plan.ops);

        info!(
            from = ?plan.report.from,
            to = plan.report.to,
            steps = plan.report.applied.len(),
            "schema migrated"
        );
        Ok(plan.report)
    }
}

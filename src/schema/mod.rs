//! Schema registry.
//!
//! Declares the tables and typed columns of the current schema version
//! together with the migrations that lead to it. Storage initialization uses
//! the registry to create missing tables; the query engine uses it to reject
//! unknown columns before touching storage.

pub mod knit;
mod migration;
mod types;

pub use migration::{Migration, MigrationStep, Migrations};
pub use types::{is_implicit, AppSchema, ColumnSchema, ColumnType, TableSchema};

use crate::error::Result;

/// A schema paired with the migrations that reach it.
#[derive(Clone, Debug)]
pub struct Registry {
    pub schema: AppSchema,
    pub migrations: Migrations,
}

impl Registry {
    pub fn new(schema: AppSchema, migrations: Migrations) -> Result<Self> {
        migrations.validate_against(&schema)?;
        Ok(Self { schema, migrations })
    }
}

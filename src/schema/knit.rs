//! The knitting app's schema and its version history.

use super::migration::{Migration, Migrations};
use super::types::{AppSchema, ColumnSchema, TableSchema};
use super::Registry;
use crate::error::Result;

pub const PROJECTS: &str = "projects";
pub const CALCULATIONS: &str = "calculations";
pub const NOTES: &str = "notes";
pub const PHOTOS: &str = "photos";

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 4;

fn projects_v1_columns() -> Vec<ColumnSchema> {
    vec![
        ColumnSchema::string("name"),
        ColumnSchema::string("description").optional(),
        ColumnSchema::string("status").indexed(),
        ColumnSchema::string("yarn_type").optional(),
        ColumnSchema::string("needle_size").optional(),
        ColumnSchema::string("density").optional(),
        ColumnSchema::string("tags").optional(),
        ColumnSchema::string("start_date").optional(),
        ColumnSchema::string("end_date").optional(),
    ]
}

fn projects_v2_columns() -> Vec<ColumnSchema> {
    vec![
        ColumnSchema::number("progress").optional(),
        ColumnSchema::boolean("is_favorite").default_value(false),
    ]
}

fn calculations_table() -> TableSchema {
    TableSchema::new(
        CALCULATIONS,
        vec![
            ColumnSchema::string("project_id").references(PROJECTS),
            ColumnSchema::string("calculator_type").indexed(),
            ColumnSchema::string("calculator_title"),
            ColumnSchema::string("input_values"),
            ColumnSchema::string("results"),
            ColumnSchema::string("notes").optional(),
        ],
    )
}

fn notes_table() -> TableSchema {
    TableSchema::new(
        NOTES,
        vec![
            ColumnSchema::string("project_id").references(PROJECTS),
            ColumnSchema::string("title"),
            ColumnSchema::string("content"),
        ],
    )
}

fn photos_table() -> TableSchema {
    TableSchema::new(
        PHOTOS,
        vec![
            ColumnSchema::string("project_id").references(PROJECTS),
            ColumnSchema::string("uri"),
            ColumnSchema::string("name"),
            ColumnSchema::string("description").optional(),
        ],
    )
}

/// The schema as first shipped.
pub fn schema_v1() -> Result<AppSchema> {
    AppSchema::new(
        1,
        vec![
            TableSchema::new(PROJECTS, projects_v1_columns()),
            calculations_table(),
        ],
    )
}

/// The current schema.
pub fn app_schema() -> Result<AppSchema> {
    let mut projects = projects_v1_columns();
    projects.extend(projects_v2_columns());

    AppSchema::new(
        SCHEMA_VERSION,
        vec![
            TableSchema::new(PROJECTS, projects),
            calculations_table(),
            notes_table(),
            photos_table(),
        ],
    )
}

pub fn migrations() -> Result<Migrations> {
    Migrations::new(vec![
        Migration::to_version(2).add_columns(PROJECTS, projects_v2_columns()),
        Migration::to_version(3).create_table(notes_table()),
        Migration::to_version(4).create_table(photos_table()),
    ])
}

/// Registry used by [`crate::Store::open_or_create`].
pub fn registry() -> Result<Registry> {
    Registry::new(app_schema()?, migrations()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::migration::MigrationStep;

    /// Folding the migrations over v1 must reproduce the declared current schema.
    #[test]
    fn test_migrations_reproduce_current_schema() {
        let mut tables = schema_v1().unwrap().tables;
        for migration in migrations().unwrap().iter() {
            for step in &migration.steps {
                match step {
                    MigrationStep::CreateTable(table) => tables.push(table.clone()),
                    MigrationStep::AddColumns { table, columns } => {
                        let target = tables.iter_mut().find(|t| &t.name == table).unwrap();
                        target.columns.extend(columns.iter().cloned());
                    }
                }
            }
        }

        let current = app_schema().unwrap();
        assert_eq!(tables, current.tables);
    }

    #[test]
    fn test_children_are_indexed_foreign_keys() {
        let schema = app_schema().unwrap();
        let mut children: Vec<_> = schema.children_of(PROJECTS).collect();
        children.sort();
        assert_eq!(
            children,
            vec![
                (CALCULATIONS, "project_id"),
                (NOTES, "project_id"),
                (PHOTOS, "project_id"),
            ]
        );
        for (table, column) in children {
            assert!(schema.table(table).unwrap().is_indexed(column));
        }
    }

    #[test]
    fn test_registry_is_consistent() {
        let registry = registry().unwrap();
        assert_eq!(registry.schema.version, SCHEMA_VERSION);
        assert_eq!(registry.migrations.max_version(), Some(SCHEMA_VERSION));
    }
}

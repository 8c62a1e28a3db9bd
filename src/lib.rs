//! # Knit Store
//!
//! An offline, embedded data store for knitting projects, their saved
//! calculator results, notes and photos.
//!
//! ## Core Concepts
//!
//! - **Schema registry**: typed tables at a numbered version
//! - **Migrations**: declared upgrade steps, applied once and atomically at open
//! - **Models**: typed records with drafts for creation and patches for updates
//! - **Queries**: equality predicates, sort and limit over indexed tables
//! - **Live queries**: subscriptions that get a new snapshot after each relevant commit
//! - **Transactions**: serialized, all-or-nothing batches of writes
//!
//! ## Example
//!
//! ```ignore
//! use knit_store::{NewCalculation, NewProject, ProjectStatus, Store, StoreConfig, StructuredMap};
//!
//! let store = Store::open_or_create(StoreConfig::at("./knit-store"))?;
//!
//! let project = store.create_project(NewProject::new("Светр", ProjectStatus::InProgress))?;
//! assert_eq!(project.effective_progress(), 70.0);
//!
//! let live = store.observe_calculations(&project.meta.id)?;
//! store.add_calculation_to_project(
//!     &project.meta.id,
//!     NewCalculation {
//!         results: StructuredMap::new().with("yarnNeeded", 450),
//!         ..NewCalculation::new("yarn", "Yarn amount")
//!     },
//! )?;
//! ```

mod api;
pub mod error;
pub mod migration;
pub mod model;
pub mod query;
pub mod schema;
pub mod seed;
pub mod storage;
pub mod store;
pub mod subscriptions;
pub mod transaction;
pub mod types;

// Re-exports
pub use error::{Result, StoreError};
pub use migration::{MigrationReport, Migrator};
pub use model::{
    Attached, Calculation, CalculationPatch, Draft, MapValue, Model, NewCalculation, NewNote,
    NewPhoto, NewProject, Note, NotePatch, Patch, Photo, PhotoPatch, Project, ProjectPatch,
    ProjectSort, ProjectStatus, RecordMeta, StructuredMap,
};
pub use query::{Collection, Predicate, Query, SortOrder};
pub use schema::{AppSchema, ColumnSchema, ColumnType, Migration, MigrationStep, Migrations, Registry, TableSchema};
pub use store::{CompactionSummary, Store, StoreConfig};
pub use subscriptions::{DropReason, LiveQuery, SubscriptionId};
pub use transaction::Writer;
pub use types::*;

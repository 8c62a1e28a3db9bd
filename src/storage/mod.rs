//! File-backed storage.
//!
//! All committed state lives in a single database file (see [`BatchLog`])
//! and is mirrored in memory by [`Database`], which owns the tables and
//! their secondary indexes.

mod database;
mod log;
mod table;

pub use database::{ChangeSet, Database, RowChange};
pub use log::{BatchLog, Frame, StorageOp};
pub use table::{IndexKey, Table};

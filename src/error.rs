//! Error types for the knitting store.

use crate::subscriptions::DropReason;
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Not found: {table}/{id}")]
    NotFound { table: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Corrupt data: {0}")]
    CorruptData(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Subscription closed")]
    SubscriptionClosed,

    #[error("Subscription dropped: {0:?}")]
    SubscriptionDropped(DropReason),
}

impl StoreError {
    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn not_found(table: impl Into<String>, id: impl ToString) -> Self {
        StoreError::NotFound {
            table: table.into(),
            id: id.to_string(),
        }
    }

    /// Whether the failure came from the storage layer and the operation may be retried.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_)
                | StoreError::Corruption(_)
                | StoreError::ChecksumMismatch { .. }
                | StoreError::Serialization(_)
                | StoreError::Deserialization(_)
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record or operation not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored row could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A previous writer panicked while holding the connection.
    #[error("storage lock poisoned")]
    LockPoisoned,
}

impl From<offsync_types::Error> for StorageError {
    fn from(e: offsync_types::Error) -> Self {
        Self::InvalidData(e.to_string())
    }
}

impl From<uuid::Error> for StorageError {
    fn from(e: uuid::Error) -> Self {
        Self::InvalidData(format!("invalid id: {e}"))
    }
}

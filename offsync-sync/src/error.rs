//! Error types for the sync layer.

use offsync_store::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A sync pass is already running.
    #[error("a sync pass is already in progress")]
    AlreadyInProgress,

    /// Connectivity is not Online.
    #[error("offline")]
    Offline,

    /// Local store failure. Fatal to the triggering mutation.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Transport failure outside of per-operation handling (e.g. pull).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The pass exceeded its time budget.
    #[error("sync pass timed out")]
    Timeout,

    /// No operation with that id.
    #[error("operation not found: {0}")]
    OperationNotFound(String),

    /// The requested mutation or action is not valid in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The scheduler is gone.
    #[error("channel closed")]
    ChannelClosed,

    /// A blocking store task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Failure of a single transport call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Network error, timeout, throttling or 5xx. Worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The server refused the request (4xx other than conflict, timeout or
    /// throttling).
    #[error("rejected ({status}): {reason}")]
    Rejected { status: u16, reason: String },
}

impl TransportError {
    /// Returns true if the failure may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

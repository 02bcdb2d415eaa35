//! Core type definitions for offsync.
//!
//! This crate defines the data model shared by the client sync engine and the
//! reconciliation server:
//! - Entity, owner and operation identifiers (UUID v7)
//! - Hybrid Logical Clock timestamps used for last-writer-wins
//! - Synchronizable records and queued operations
//! - Wire messages exchanged with the reconciliation endpoint
//!
//! Domain fields of a record are opaque JSON; only `id`, `owner_id`,
//! `version` and `updated_at` carry protocol meaning.

mod ids;
mod operation;
pub mod protocol;
mod record;
mod timestamp;

pub use ids::{EntityId, OperationId, OwnerId};
pub use operation::{FailureKind, Operation, OperationKind, OperationState, Outcome};
pub use protocol::{ChangeSet, ErrorBody, OperationEnvelope, SubmitResponse};
pub use record::{merge_payload, Record};
pub use timestamp::{HybridClock, HybridTimestamp};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

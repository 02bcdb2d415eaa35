//! Wire messages exchanged with the reconciliation endpoint.
//!
//! The protocol is a plain request/response model:
//! 1. The client submits one [`OperationEnvelope`] per queued operation.
//! 2. The endpoint answers with a [`SubmitResponse`]: the applied record, a
//!    conflict carrying the authoritative record, or a not-found marker.
//! 3. The client periodically pulls a [`ChangeSet`] of records changed since
//!    its checkpoint.

use crate::{EntityId, HybridTimestamp, Operation, OperationId, OperationKind, Record};
use serde::{Deserialize, Serialize};

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u32 = 1;

/// Header carrying the caller's owner id.
pub const OWNER_HEADER: &str = "x-offsync-owner";

/// The part of an [`Operation`] the server needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEnvelope {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub entity_type: String,
    pub entity_id: EntityId,
    pub payload: serde_json::Value,
    pub base_version: u64,
    pub origin_timestamp: HybridTimestamp,
}

impl From<&Operation> for OperationEnvelope {
    fn from(op: &Operation) -> Self {
        Self {
            operation_id: op.id,
            kind: op.kind,
            entity_type: op.entity_type.clone(),
            entity_id: op.entity_id,
            payload: op.payload.clone(),
            base_version: op.base_version,
            origin_timestamp: op.origin_timestamp,
        }
    }
}

impl OperationEnvelope {
    /// Returns true if `other` is a replay of the same mutation.
    pub fn same_mutation(&self, other: &Self) -> bool {
        self.operation_id == other.operation_id
            && self.kind == other.kind
            && self.entity_id == other.entity_id
            && self.payload == other.payload
    }
}

/// Endpoint answer to a submitted operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitResponse {
    /// The mutation was applied; `record` carries the new authoritative
    /// version and timestamp.
    Applied { record: Record },
    /// The record was removed (or was already gone).
    Deleted { entity_id: EntityId },
    /// The submitted baseline is stale; `server_record` is the current state.
    Conflict { server_record: Record },
    /// An update targeted a record that does not exist.
    NotFound { entity_id: EntityId },
}

impl SubmitResponse {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Deleted { .. } => "deleted",
            Self::Conflict { .. } => "conflict",
            Self::NotFound { .. } => "not_found",
        }
    }
}

/// Records changed since a checkpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Records with `updated_at` greater than the requested checkpoint.
    pub records: Vec<Record>,
    /// Entities deleted after the requested checkpoint.
    #[serde(default)]
    pub deleted: Vec<EntityId>,
    /// Server timestamp to use as the next checkpoint.
    pub checkpoint: HybridTimestamp,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl ErrorBody {
    /// Creates an error body.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

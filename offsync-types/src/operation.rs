//! Queued mutations.
//!
//! An [`Operation`] is one local mutation waiting for (or having completed)
//! reconciliation with the server. Operations on the same entity are totally
//! ordered by their enqueue sequence `seq`; operations on different entities
//! are independent.

use crate::{EntityId, HybridTimestamp, OperationId, OwnerId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declares a string-mapped enum with `as_str` and `FromStr`, used for the
/// SQLite columns holding these values.
macro_rules! str_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Stable text form used in storage.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = crate::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(crate::Error::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// What a mutation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

str_enum!(OperationKind, "operation kind", {
    Create => "create",
    Update => "update",
    Delete => "delete",
});

/// Lifecycle of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    /// Waiting to be dispatched.
    Pending,
    /// Selected by the running sync pass.
    InFlight,
    /// Reconciled with the server. Terminal.
    Synced,
    /// Gave up. Terminal until a manual retry.
    Failed,
}

str_enum!(OperationState, "operation state", {
    Pending => "pending",
    InFlight => "in_flight",
    Synced => "synced",
    Failed => "failed",
});

impl OperationState {
    /// Returns true for states the engine will not move on its own.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Synced | Self::Failed)
    }
}

/// Why an operation ended up Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Transient failures hit the attempt cap.
    Exhausted,
    /// The server refused the mutation (validation or ownership).
    Rejected,
}

str_enum!(FailureKind, "failure kind", {
    Exhausted => "exhausted",
    Rejected => "rejected",
});

/// How a Synced operation was reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The server applied the mutation.
    Accepted,
    /// The server's newer record replaced the mutation.
    ServerWins,
    /// The mutation won and was requeued against the current baseline.
    ClientWins { requeued_as: OperationId },
    /// The record had been deleted on the server.
    Removed,
}

/// One queued mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Idempotency key.
    pub id: OperationId,
    /// Enqueue sequence, assigned by the operation log. Per-entity order.
    pub seq: u64,
    pub kind: OperationKind,
    pub entity_type: String,
    pub entity_id: EntityId,
    pub owner_id: OwnerId,
    /// Full or partial record snapshot at enqueue time.
    pub payload: serde_json::Value,
    /// Version the client believed current when the mutation was made.
    pub base_version: u64,
    pub origin_timestamp: HybridTimestamp,
    pub state: OperationState,
    pub attempt: u32,
    pub last_error: Option<String>,
    pub failure: Option<FailureKind>,
    pub outcome: Option<Outcome>,
}

impl Operation {
    /// Creates a Pending operation. `seq` is assigned on append.
    pub fn new(
        kind: OperationKind,
        entity_type: impl Into<String>,
        entity_id: EntityId,
        owner_id: OwnerId,
        payload: serde_json::Value,
        base_version: u64,
        origin_timestamp: HybridTimestamp,
    ) -> Self {
        Self {
            id: OperationId::new(),
            seq: 0,
            kind,
            entity_type: entity_type.into(),
            entity_id,
            owner_id,
            payload,
            base_version,
            origin_timestamp,
            state: OperationState::Pending,
            attempt: 0,
            last_error: None,
            failure: None,
            outcome: None,
        }
    }

    /// Builds the replacement for an operation that won a conflict: same
    /// payload, origin and position, fresh id, baseline moved to the server's
    /// current version.
    pub fn rebased(&self, base_version: u64) -> Self {
        Self {
            id: OperationId::new(),
            base_version,
            state: OperationState::Pending,
            attempt: 0,
            last_error: None,
            failure: None,
            outcome: None,
            ..self.clone()
        }
    }

    /// Returns true if the operation may still be dispatched by the engine.
    pub fn is_pending(&self) -> bool {
        self.state == OperationState::Pending
    }
}

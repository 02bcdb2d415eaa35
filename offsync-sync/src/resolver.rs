//! Conflict resolution.
//!
//! [`resolve`] is a pure function of the submitted operation and the
//! endpoint's answer. The engine turns its decision into store writes.
//!
//! Conflicts use last-writer-wins over hybrid logical timestamps: the server
//! record wins only when its `updated_at` is strictly later than the
//! operation's `origin_timestamp`. Ties go to the client.

use offsync_types::{HybridTimestamp, Operation, OperationKind, Record, SubmitResponse};

/// What to do with a submitted operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The mutation was applied. Carries the authoritative record, or `None`
    /// for a deletion.
    Accept(Option<Record>),
    /// The server's newer record replaces the local one; the operation is
    /// dropped.
    ServerWins(Record),
    /// The client's mutation is later; requeue it against `baseline`.
    ClientWins { baseline: u64 },
    /// The record no longer exists on the server.
    Removed,
}

impl Resolution {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accept(_) => "accept",
            Self::ServerWins(_) => "server_wins",
            Self::ClientWins { .. } => "client_wins",
            Self::Removed => "removed",
        }
    }
}

/// Returns true if a server write at `server_ts` beats a local mutation made
/// at `origin`.
pub fn server_wins(server_ts: HybridTimestamp, origin: HybridTimestamp) -> bool {
    server_ts > origin
}

/// Decides the outcome of one submitted operation.
pub fn resolve(op: &Operation, reply: &SubmitResponse) -> Resolution {
    match reply {
        SubmitResponse::Applied { record } => Resolution::Accept(Some(record.clone())),

        SubmitResponse::Deleted { .. } => match op.kind {
            OperationKind::Delete => Resolution::Accept(None),
            OperationKind::Create | OperationKind::Update => Resolution::Removed,
        },

        SubmitResponse::NotFound { .. } => match op.kind {
            // Already gone.
            OperationKind::Delete => Resolution::Accept(None),
            OperationKind::Create | OperationKind::Update => Resolution::Removed,
        },

        SubmitResponse::Conflict { server_record } => {
            // A conflict that does not move the baseline forward cannot be
            // retried usefully; take the server's state.
            if server_record.version <= op.base_version
                || server_wins(server_record.updated_at, op.origin_timestamp)
            {
                Resolution::ServerWins(server_record.clone())
            } else {
                Resolution::ClientWins {
                    baseline: server_record.version,
                }
            }
        }
    }
}

//! SQLite storage layer for offsync.
//!
//! Provides the client's durable local state:
//!
//! - **Records**: current state of every synchronizable entity, keyed by
//!   entity id and grouped by entity type
//! - **Operation log**: ordered queue of local mutations awaiting
//!   reconciliation, keyed by operation id
//! - **Checkpoints**: one pull checkpoint per owner
//!
//! # Atomicity
//!
//! Every multi-step change goes through a [`WriteBatch`] committed in a single
//! SQLite transaction. A local record write and the operation describing it
//! are always committed together, so a crash can never leave a record without
//! its queued operation (or the reverse).

mod batch;
mod error;
mod local_store;
mod operation_log;

pub use batch::{CommitSummary, StoreWrite, WriteBatch};
pub use error::{StorageError, StorageResult};
pub use local_store::LocalStore;
pub use operation_log::{OperationFilter, OperationPatch};

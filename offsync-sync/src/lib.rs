//! Offline operation log sync engine for offsync.
//!
//! Local mutations are written optimistically to the [`LocalStore`] together
//! with a queued [`Operation`]. The engine later drains the queue against a
//! reconciliation endpoint, resolving conflicts with optimistic concurrency
//! and last-writer-wins over hybrid logical timestamps.
//!
//! # Components
//!
//! - **Resolver**: pure decision per submitted operation (Accept, ServerWins,
//!   ClientWins, Removed)
//! - **Engine**: single-flight sync passes, per-entity ordering, batching,
//!   retry bookkeeping
//! - **Retry**: backoff table and cancellable retry timers
//! - **Scheduler**: runs passes on reconnect, timer, manual request and
//!   debounced local writes
//! - **Connectivity**: platform signal plus bounded-timeout active probes
//! - **Pull**: atomic overlay of server changes since a checkpoint
//! - **Status**: observer registration for sync progress
//! - **Transport**: the endpoint seam, with an HTTP implementation and a mock
//!
//! # Example
//!
//! ```no_run
//! use offsync_store::LocalStore;
//! use offsync_sync::http::{HttpTransport, HttpTransportConfig};
//! use offsync_sync::{SyncConfig, SyncContext};
//! use offsync_types::{EntityId, OperationKind, OwnerId};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LocalStore::open("offsync.db")?;
//! let transport = Arc::new(HttpTransport::new(HttpTransportConfig::default())?);
//! let ctx = SyncContext::open(store, transport, OwnerId::new(), SyncConfig::default(), true)?;
//! ctx.start();
//!
//! ctx.enqueue_mutation(
//!     OperationKind::Create,
//!     "application",
//!     EntityId::new(),
//!     serde_json::json!({"company": "Acme"}),
//! )?;
//!
//! ctx.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! [`LocalStore`]: offsync_store::LocalStore
//! [`Operation`]: offsync_types::Operation

mod config;
mod connectivity;
mod context;
mod engine;
mod error;
pub mod http;
mod pull;
pub mod resolver;
mod retry;
mod scheduler;
mod status;
pub mod transport;

pub use config::SyncConfig;
pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use context::SyncContext;
pub use engine::{plan_batches, Batch, BatchPlan, Chain, FailureNotice, PassReport, SyncEngine};
pub use error::{SyncError, SyncResult, TransportError};
pub use pull::PullReport;
pub use resolver::{resolve, server_wins, Resolution};
pub use retry::{backoff_delay, RetryScheduler};
pub use scheduler::{SchedulerHandle, SyncScheduler, Trigger};
pub use status::{StatusBroadcaster, Subscription, SyncState, SyncStatus};
pub use transport::SyncTransport;

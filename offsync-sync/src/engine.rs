//! Sync engine: drains the operation log against the reconciliation endpoint.
//!
//! A pass selects a snapshot of eligible Pending operations, groups them into
//! per-entity chains packed into bounded batches, and dispatches each batch.
//! Chains of distinct entities run concurrently; operations of one entity run
//! strictly in enqueue order, each waiting for the previous one to resolve.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult, TransportError};
use crate::pull::{self, PullReport};
use crate::resolver::{resolve, Resolution};
use crate::retry::{backoff_delay, RetryScheduler};
use crate::status::{StatusBroadcaster, SyncState, SyncStatus};
use crate::transport::SyncTransport;
use futures::stream::{self, StreamExt};
use offsync_store::{
    LocalStore, OperationFilter, OperationPatch, StorageResult, StoreWrite, WriteBatch,
};
use offsync_types::{
    EntityId, FailureKind, HybridClock, Operation, OperationId, OperationState, Outcome, OwnerId,
    Record, SubmitResponse,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Operations of one entity, in enqueue order.
pub type Chain = Vec<Operation>;

/// One dispatch batch: whole per-entity chains, at most `batch_size`
/// operations in total.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub chains: Vec<Chain>,
}

impl Batch {
    /// Number of operations in the batch.
    pub fn len(&self) -> usize {
        self.chains.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

/// Output of [`plan_batches`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchPlan {
    pub batches: Vec<Batch>,
    /// Chain tails beyond `batch_size`, left for the next pass.
    pub deferred: Vec<Operation>,
}

impl BatchPlan {
    /// Operations scheduled for dispatch.
    pub fn total(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }
}

/// Groups operations (in enqueue order) into batches of at most `batch_size`.
///
/// Operations of one entity always land in the same batch, in order. A chain
/// longer than `batch_size` is cut to `batch_size` and the tail is deferred.
pub fn plan_batches(ops: Vec<Operation>, batch_size: usize) -> BatchPlan {
    let batch_size = batch_size.max(1);

    let mut order: Vec<EntityId> = Vec::new();
    let mut chains: HashMap<EntityId, Chain> = HashMap::new();
    for op in ops {
        let chain = chains.entry(op.entity_id).or_insert_with(|| {
            order.push(op.entity_id);
            Vec::new()
        });
        chain.push(op);
    }

    let mut plan = BatchPlan::default();
    let mut current = Batch::default();
    for entity_id in order {
        let Some(mut chain) = chains.remove(&entity_id) else {
            continue;
        };
        if chain.len() > batch_size {
            plan.deferred.extend(chain.split_off(batch_size));
        }
        if current.len() + chain.len() > batch_size {
            plan.batches.push(std::mem::take(&mut current));
        }
        current.chains.push(chain);
    }
    if !current.is_empty() {
        plan.batches.push(current);
    }
    plan
}

/// A terminal failure surfaced to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureNotice {
    pub operation_id: OperationId,
    pub entity_id: EntityId,
    pub kind: FailureKind,
    pub error: String,
}

/// What one sync pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    /// Operations selected for dispatch.
    pub selected: usize,
    /// Operations now Synced, whatever the resolution.
    pub synced: usize,
    pub server_wins: usize,
    pub client_wins: usize,
    /// Operations returned to Pending after a transient failure.
    pub retried: usize,
    /// Operations that became Failed.
    pub failed: usize,
    /// Chain tails left for the next pass.
    pub deferred: usize,
    /// Retry delays scheduled, in the order the failures happened.
    pub retry_delays: Vec<Duration>,
    pub failures: Vec<FailureNotice>,
}

impl PassReport {
    /// Returns true if a follow-up pass has work it can do right away.
    pub fn wants_rerun(&self) -> bool {
        self.deferred > 0 || self.client_wins > 0
    }

    fn final_status(&self) -> SyncStatus {
        if self.retried > 0 || self.failed > 0 {
            SyncStatus::PartialFailure
        } else {
            SyncStatus::Success
        }
    }

    fn merge(&mut self, other: PassReport) {
        self.synced += other.synced;
        self.server_wins += other.server_wins;
        self.client_wins += other.client_wins;
        self.retried += other.retried;
        self.failed += other.failed;
        self.retry_delays.extend(other.retry_delays);
        self.failures.extend(other.failures);
    }
}

/// Drains the operation log. One instance per [`SyncContext`](crate::SyncContext).
pub struct SyncEngine {
    store: LocalStore,
    transport: Arc<dyn SyncTransport>,
    connectivity: Arc<ConnectivityMonitor>,
    status: StatusBroadcaster,
    retries: RetryScheduler,
    clock: Arc<HybridClock>,
    config: SyncConfig,
    pass_guard: Mutex<()>,
    pull_guard: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        store: LocalStore,
        transport: Arc<dyn SyncTransport>,
        connectivity: Arc<ConnectivityMonitor>,
        status: StatusBroadcaster,
        clock: Arc<HybridClock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            transport,
            connectivity,
            status,
            retries: RetryScheduler::new(),
            clock,
            config,
            pass_guard: Mutex::new(()),
            pull_guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn retries(&self) -> &RetryScheduler {
        &self.retries
    }

    pub fn status(&self) -> &StatusBroadcaster {
        &self.status
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    /// Returns true while a pass is running.
    pub fn is_syncing(&self) -> bool {
        self.pass_guard.try_lock().is_err()
    }

    async fn blocking<T, F>(&self, f: F) -> SyncResult<T>
    where
        F: FnOnce(&LocalStore) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }

    // ── Sync pass ────────────────────────────────────────────────

    /// Runs one sync pass.
    ///
    /// Fails with [`SyncError::AlreadyInProgress`] when another pass holds the
    /// guard and with [`SyncError::Offline`] unless connectivity is Online.
    /// Neither case emits a status change.
    pub async fn run_sync_pass(&self) -> SyncResult<PassReport> {
        let _guard = self
            .pass_guard
            .try_lock()
            .map_err(|_| SyncError::AlreadyInProgress)?;

        if !self.connectivity.is_online() {
            debug!("Sync pass skipped: {:?}", self.connectivity.state());
            return Err(SyncError::Offline);
        }

        match tokio::time::timeout(self.config.pass_timeout(), self.drain()).await {
            Ok(Ok(report)) => {
                let error = (report.retried > 0 || report.failed > 0).then(|| {
                    format!("{} failed, {} retrying", report.failed, report.retried)
                });
                info!(
                    selected = report.selected,
                    synced = report.synced,
                    retried = report.retried,
                    failed = report.failed,
                    deferred = report.deferred,
                    "Sync pass complete"
                );
                self.status.emit(SyncState::finished(
                    report.final_status(),
                    report.selected,
                    error,
                ));
                Ok(report)
            }
            Ok(Err(e)) => {
                warn!("Sync pass failed: {}", e);
                self.abandon_in_flight().await;
                self.emit_error(e.to_string());
                Err(e)
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.pass_timeout_ms,
                    "Sync pass timed out"
                );
                self.abandon_in_flight().await;
                self.emit_error(SyncError::Timeout.to_string());
                Err(SyncError::Timeout)
            }
        }
    }

    fn emit_error(&self, error: String) {
        let latest = self.status.latest();
        self.status.emit(SyncState {
            status: SyncStatus::Error,
            completed: latest.completed,
            total: latest.total,
            error: Some(error),
        });
    }

    async fn abandon_in_flight(&self) {
        if let Err(e) = self.blocking(|store| store.recover_in_flight()).await {
            warn!("Failed to reset in-flight operations: {}", e);
        }
    }

    async fn drain(&self) -> SyncResult<PassReport> {
        let candidates = self.select_candidates().await?;
        let plan = plan_batches(candidates, self.config.batch_size);
        let total = plan.total();

        let mut report = PassReport {
            selected: total,
            deferred: plan.deferred.len(),
            ..PassReport::default()
        };
        self.status.emit(SyncState::syncing(0, total));

        let mut completed = 0;
        for batch in plan.batches {
            let size = batch.len();
            let ids: Vec<OperationId> =
                batch.chains.iter().flatten().map(|op| op.id).collect();
            self.blocking(move |store| {
                store.update_operations(&ids, &OperationPatch::state(OperationState::InFlight))
            })
            .await?;

            let results: Vec<SyncResult<PassReport>> = stream::iter(batch.chains)
                .map(|chain| self.run_chain(chain))
                .buffer_unordered(self.config.max_concurrent_dispatch.max(1))
                .collect()
                .await;
            for result in results {
                report.merge(result?);
            }

            completed += size;
            debug!(completed, total, "Batch complete");
            self.status.emit(SyncState::syncing(completed, total));
        }

        Ok(report)
    }

    /// Snapshot of dispatchable operations in enqueue order.
    ///
    /// An entity contributes the longest prefix of its unsynced operations
    /// that are Pending, under the attempt cap and not backing off. An entity
    /// whose oldest unsynced operation is not dispatchable contributes nothing.
    async fn select_candidates(&self) -> SyncResult<Vec<Operation>> {
        let unsynced = self
            .blocking(|store| store.list_operations(&OperationFilter::unsynced()))
            .await?;

        let mut blocked: HashSet<EntityId> = HashSet::new();
        let mut selected = Vec::new();
        for op in unsynced {
            if blocked.contains(&op.entity_id) {
                continue;
            }
            let eligible = op.is_pending()
                && op.attempt < self.config.max_attempts
                && self.retries.is_ready(&op.id);
            if eligible {
                selected.push(op);
            } else {
                blocked.insert(op.entity_id);
            }
        }
        Ok(selected)
    }

    /// Dispatches one chain sequentially, stopping at the first operation
    /// that does not settle the entity.
    async fn run_chain(&self, chain: Chain) -> SyncResult<PassReport> {
        let mut report = PassReport::default();
        let mut ops = chain.into_iter();

        while let Some(op) = ops.next() {
            // Earlier links may have rebased this operation.
            let id = op.id;
            let Some(op) = self.blocking(move |store| store.get_operation(&id)).await? else {
                continue;
            };
            if self.dispatch(op, &mut report).await? {
                continue;
            }

            let rest: Vec<OperationId> = ops.map(|op| op.id).collect();
            if !rest.is_empty() {
                self.blocking(move |store| {
                    store.update_operations(&rest, &OperationPatch::state(OperationState::Pending))
                })
                .await?;
            }
            break;
        }
        Ok(report)
    }

    /// Submits one operation and records the outcome. Returns true if the
    /// entity's chain may continue.
    async fn dispatch(&self, op: Operation, report: &mut PassReport) -> SyncResult<bool> {
        debug!(
            operation = %op.id,
            entity = %op.entity_id,
            kind = %op.kind,
            base_version = op.base_version,
            attempt = op.attempt,
            "Dispatching operation"
        );

        match self.transport.submit_operation(&op).await {
            Ok(reply) => self.settle(op, reply, report).await,
            Err(TransportError::Transient(reason)) => {
                self.record_transient(op, reason, report).await?;
                Ok(false)
            }
            Err(TransportError::Rejected { status, reason }) => {
                let error = format!("rejected ({status}): {reason}");
                warn!(operation = %op.id, entity = %op.entity_id, "Operation {}", error);
                let patch = OperationPatch::failed(FailureKind::Rejected, op.attempt, error.clone());
                let id = op.id;
                self.blocking(move |store| store.update_operation(&id, &patch)).await?;
                self.retries.cancel(&op.id);
                report.failed += 1;
                report.failures.push(FailureNotice {
                    operation_id: op.id,
                    entity_id: op.entity_id,
                    kind: FailureKind::Rejected,
                    error,
                });
                Ok(false)
            }
        }
    }

    async fn record_transient(
        &self,
        op: Operation,
        reason: String,
        report: &mut PassReport,
    ) -> SyncResult<()> {
        let attempt = op.attempt + 1;
        if attempt >= self.config.max_attempts {
            warn!(
                operation = %op.id,
                entity = %op.entity_id,
                attempt,
                "Operation exhausted its retries: {}", reason
            );
            let patch = OperationPatch::failed(FailureKind::Exhausted, attempt, reason.clone());
            let id = op.id;
            self.blocking(move |store| store.update_operation(&id, &patch)).await?;
            self.retries.cancel(&op.id);
            report.failed += 1;
            report.failures.push(FailureNotice {
                operation_id: op.id,
                entity_id: op.entity_id,
                kind: FailureKind::Exhausted,
                error: reason,
            });
            return Ok(());
        }

        // Failure n waits table[n - 1]; the last entry is unused when
        // max_attempts equals the table length.
        let delay = backoff_delay(&self.config.backoff_ms, attempt - 1);
        debug!(
            operation = %op.id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Transient failure, retrying later: {}", reason
        );
        let patch = OperationPatch::retry_later(attempt, reason);
        let id = op.id;
        self.blocking(move |store| store.update_operation(&id, &patch)).await?;
        self.retries.schedule(op.id, delay);
        report.retried += 1;
        report.retry_delays.push(delay);
        Ok(())
    }

    /// Applies the resolver's decision in one store transaction.
    async fn settle(
        &self,
        op: Operation,
        reply: SubmitResponse,
        report: &mut PassReport,
    ) -> SyncResult<bool> {
        let resolution = resolve(&op, &reply);
        debug!(
            operation = %op.id,
            reply = reply.label(),
            decision = resolution.label(),
            "Resolved operation"
        );

        let mut batch = WriteBatch::new();
        let continue_chain = match resolution {
            Resolution::Accept(Some(record)) => {
                let version = record.version;
                batch
                    .push(StoreWrite::UpdateOperation(
                        op.id,
                        OperationPatch::synced(Outcome::Accepted),
                    ))
                    .push(StoreWrite::ApplyServerRecord(self.synced_copy(record)))
                    .push(StoreWrite::RebaseAfter {
                        entity_id: op.entity_id,
                        after_seq: op.seq,
                        base_version: version,
                    });
                true
            }
            Resolution::Accept(None) => {
                batch.push(StoreWrite::UpdateOperation(
                    op.id,
                    OperationPatch::synced(Outcome::Accepted),
                ));
                true
            }
            Resolution::ServerWins(record) => {
                report.server_wins += 1;
                batch
                    .push(StoreWrite::UpdateOperation(
                        op.id,
                        OperationPatch::synced(Outcome::ServerWins),
                    ))
                    .push(StoreWrite::ApplyServerRecord(self.synced_copy(record)));
                true
            }
            Resolution::ClientWins { baseline } => {
                report.client_wins += 1;
                if let SubmitResponse::Conflict { server_record } = &reply {
                    self.clock.observe(&server_record.updated_at);
                }
                let replacement = op.rebased(baseline);
                info!(
                    operation = %op.id,
                    requeued_as = %replacement.id,
                    baseline,
                    "Client wins, requeued against current version"
                );
                batch
                    .push(StoreWrite::UpdateOperation(
                        op.id,
                        OperationPatch::synced(Outcome::ClientWins {
                            requeued_as: replacement.id,
                        }),
                    ))
                    .push(StoreWrite::AppendOperation(replacement));
                false
            }
            Resolution::Removed => {
                batch
                    .push(StoreWrite::UpdateOperation(
                        op.id,
                        OperationPatch::synced(Outcome::Removed),
                    ))
                    .push(StoreWrite::RemoveDeleted(op.entity_id));
                true
            }
        };

        self.blocking(move |store| store.commit(batch)).await?;
        self.retries.cancel(&op.id);
        report.synced += 1;
        Ok(continue_chain)
    }

    /// Stamps a server record as confirmed by this round-trip.
    fn synced_copy(&self, mut record: Record) -> Record {
        record.last_synced_at = Some(self.clock.observe(&record.updated_at));
        record
    }

    // ── Pull ─────────────────────────────────────────────────────

    /// Fetches server changes for `owner_id` since its checkpoint and overlays
    /// them on the local store in one transaction.
    pub async fn pull(&self, owner_id: OwnerId) -> SyncResult<PullReport> {
        let _guard = self.pull_guard.lock().await;
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        let since = self
            .blocking(move |store| store.checkpoint(&owner_id))
            .await?;
        let changes = self.transport.fetch_changes(&owner_id, since).await?;
        let mut overlay = pull::overlay(owner_id, since, changes, &self.clock);
        let writes = std::mem::take(&mut overlay.writes);
        let summary = self.blocking(move |store| store.commit(writes)).await?;
        let report = PullReport::new(since, &overlay, &summary);
        info!(
            fetched = report.fetched,
            deleted = report.deleted,
            applied = report.applied,
            skipped = report.skipped,
            checkpoint = %report.checkpoint,
            "Pull complete"
        );
        Ok(report)
    }

    // ── Operation log maintenance ────────────────────────────────

    /// Resets a Failed (or backing-off) operation so the next pass picks it up.
    pub async fn manual_retry(&self, id: OperationId) -> SyncResult<Operation> {
        let op = self.require(id).await?;
        if matches!(op.state, OperationState::Synced | OperationState::InFlight) {
            return Err(SyncError::InvalidOperation(format!(
                "operation {id} is {} and cannot be retried",
                op.state
            )));
        }
        self.retries.cancel(&id);
        let op = self
            .blocking(move |store| store.update_operation(&id, &OperationPatch::reset()))
            .await?;
        info!(operation = %id, "Operation readmitted by manual retry");
        Ok(op)
    }

    /// Removes a Pending or Failed operation from the log. Once the entity has
    /// nothing left queued, its optimistic local state is given up and the
    /// next pull restores the server copy.
    pub async fn discard_operation(&self, id: OperationId) -> SyncResult<Operation> {
        let op = self.require(id).await?;
        if matches!(op.state, OperationState::Synced | OperationState::InFlight) {
            return Err(SyncError::InvalidOperation(format!(
                "operation {id} is {} and cannot be discarded",
                op.state
            )));
        }
        self.retries.cancel(&id);
        let batch = WriteBatch::new()
            .with(StoreWrite::RemoveOperation(id))
            .with(StoreWrite::RevertUnsynced {
                entity_id: op.entity_id,
                owner_id: op.owner_id,
            });
        self.blocking(move |store| store.commit(batch)).await?;
        info!(operation = %id, entity = %op.entity_id, "Operation discarded");
        Ok(op)
    }

    async fn require(&self, id: OperationId) -> SyncResult<Operation> {
        self.blocking(move |store| store.get_operation(&id))
            .await?
            .ok_or_else(|| SyncError::OperationNotFound(id.to_string()))
    }
}

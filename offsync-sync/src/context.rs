//! The entry point handed to the UI/state layer.
//!
//! A [`SyncContext`] is constructed once per process and owns the local
//! store, the engine, connectivity and status fan-out. It is passed to the
//! components that need it rather than living in a global.

use crate::config::SyncConfig;
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::engine::{PassReport, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::pull::PullReport;
use crate::scheduler::{SchedulerHandle, SyncScheduler};
use crate::status::{StatusBroadcaster, SyncState, Subscription};
use crate::transport::SyncTransport;
use offsync_store::{LocalStore, OperationFilter, StoreWrite, WriteBatch};
use offsync_types::{
    EntityId, HybridClock, Operation, OperationId, OperationKind, OperationState, OwnerId, Record,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Background {
    scheduler: SchedulerHandle,
    probe: JoinHandle<()>,
}

/// Offline-first sync context for one owner.
pub struct SyncContext {
    owner_id: OwnerId,
    store: LocalStore,
    engine: Arc<SyncEngine>,
    connectivity: Arc<ConnectivityMonitor>,
    status: StatusBroadcaster,
    clock: Arc<HybridClock>,
    enqueue_lock: Mutex<()>,
    background: Mutex<Option<Background>>,
}

impl SyncContext {
    /// Builds a context over an opened store. Operations left InFlight by a
    /// previous process are returned to Pending.
    pub fn open(
        store: LocalStore,
        transport: Arc<dyn SyncTransport>,
        owner_id: OwnerId,
        config: SyncConfig,
        platform_online: bool,
    ) -> SyncResult<Self> {
        store.recover_in_flight()?;

        let clock = Arc::new(HybridClock::new());
        let status = StatusBroadcaster::new();
        let connectivity = Arc::new(ConnectivityMonitor::new(
            Arc::clone(&transport),
            platform_online,
            config.probe_timeout(),
        ));
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            transport,
            Arc::clone(&connectivity),
            status.clone(),
            Arc::clone(&clock),
            config,
        ));

        Ok(Self {
            owner_id,
            store,
            engine,
            connectivity,
            status,
            clock,
            enqueue_lock: Mutex::new(()),
            background: Mutex::new(None),
        })
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity.state()
    }

    fn background(&self) -> MutexGuard<'_, Option<Background>> {
        self.background.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawns the scheduler and the connectivity probe loop. Idempotent.
    pub fn start(&self) {
        let mut background = self.background();
        if background.is_some() {
            return;
        }
        let scheduler = SyncScheduler::spawn(Arc::clone(&self.engine), self.owner_id);
        let probe = self
            .connectivity
            .spawn_probe_loop(self.engine.config().probe_interval());
        *background = Some(Background { scheduler, probe });
        info!(owner = %self.owner_id, "Sync context started");
    }

    /// Stops background tasks and cancels retry timers. Queued operations
    /// stay in the store.
    pub async fn shutdown(&self) {
        let background = self.background().take();
        if let Some(background) = background {
            background.probe.abort();
            background.scheduler.shutdown().await;
        }
        self.engine.retries().cancel_all();
        info!(owner = %self.owner_id, "Sync context stopped");
    }

    // ── Local mutations ──────────────────────────────────────────

    /// Applies a mutation to the local store and queues it for sync.
    ///
    /// The optimistic record write and the queued operation are committed in
    /// one transaction before this returns; any storage failure is returned
    /// here. Update payloads are merged into the record's top-level fields.
    pub fn enqueue_mutation(
        &self,
        kind: OperationKind,
        entity_type: &str,
        entity_id: EntityId,
        payload: serde_json::Value,
    ) -> SyncResult<Operation> {
        let _serial = self.enqueue_lock.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.clock.now();
        let existing = self.store.read(&entity_id)?;

        let mut batch = WriteBatch::new();
        let base_version = match kind {
            OperationKind::Create => {
                if existing.is_some() {
                    return Err(SyncError::InvalidOperation(format!(
                        "{entity_type} {entity_id} already exists"
                    )));
                }
                let record =
                    Record::new(entity_id, entity_type, self.owner_id, payload.clone(), now);
                batch.push(StoreWrite::PutRecord(record));
                0
            }
            OperationKind::Update => {
                let mut record = self.existing(existing, entity_type, entity_id)?;
                record.apply_payload(&payload, now);
                let version = record.version;
                batch.push(StoreWrite::PutRecord(record));
                version
            }
            OperationKind::Delete => {
                let record = self.existing(existing, entity_type, entity_id)?;
                batch.push(StoreWrite::DeleteRecord(entity_id));
                record.version
            }
        };

        batch.push(StoreWrite::AppendOperation(Operation::new(
            kind,
            entity_type,
            entity_id,
            self.owner_id,
            payload,
            base_version,
            now,
        )));
        let op = self
            .store
            .commit(batch)?
            .appended
            .pop()
            .ok_or_else(|| SyncError::InvalidOperation("operation was not appended".into()))?;
        debug!(operation = %op.id, entity = %entity_id, kind = %kind, seq = op.seq, "Enqueued mutation");

        if let Some(background) = self.background().as_ref() {
            if let Err(e) = background.scheduler.notify_local_write() {
                warn!("Failed to notify scheduler of local write: {}", e);
            }
        }
        Ok(op)
    }

    fn existing(
        &self,
        existing: Option<Record>,
        entity_type: &str,
        entity_id: EntityId,
    ) -> SyncResult<Record> {
        let record = existing.ok_or_else(|| {
            SyncError::InvalidOperation(format!("{entity_type} {entity_id} does not exist"))
        })?;
        if record.entity_type != entity_type || record.owner_id != self.owner_id {
            return Err(SyncError::InvalidOperation(format!(
                "{entity_id} is not a {entity_type} owned by {}",
                self.owner_id
            )));
        }
        Ok(record)
    }

    pub fn read(&self, entity_id: &EntityId) -> SyncResult<Option<Record>> {
        Ok(self.store.read(entity_id)?)
    }

    pub fn list_records(&self, entity_type: &str) -> SyncResult<Vec<Record>> {
        Ok(self.store.list_records(entity_type)?)
    }

    // ── Sync status ──────────────────────────────────────────────

    /// Registers a status listener. Drop or unsubscribe the returned handle to
    /// stop delivery.
    pub fn subscribe_sync_state<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        self.status.subscribe(listener)
    }

    pub fn sync_state(&self) -> SyncState {
        self.status.latest()
    }

    /// Failed operations still awaiting a manual retry or discard.
    pub fn failed_operations(&self) -> SyncResult<Vec<Operation>> {
        Ok(self
            .store
            .list_operations(&OperationFilter::with_state(OperationState::Failed))?)
    }

    /// Operations not yet Synced.
    pub fn unsynced_operations(&self) -> SyncResult<Vec<Operation>> {
        Ok(self.store.list_operations(&OperationFilter::unsynced())?)
    }

    // ── Sync control ─────────────────────────────────────────────

    /// Forwards a platform reachability signal to the connectivity monitor.
    pub fn set_platform_online(&self, online: bool) {
        self.connectivity.set_platform_online(online);
    }

    /// Asks the scheduler for a pass. Fails if the context is not started.
    pub fn request_sync(&self) -> SyncResult<()> {
        match self.background().as_ref() {
            Some(background) => background.scheduler.request_sync(),
            None => Err(SyncError::ChannelClosed),
        }
    }

    /// Runs a pass now, bypassing the scheduler.
    pub async fn run_sync_pass(&self) -> SyncResult<PassReport> {
        self.engine.run_sync_pass().await
    }

    /// Pulls server changes for this context's owner.
    pub async fn pull(&self) -> SyncResult<PullReport> {
        self.engine.pull(self.owner_id).await
    }

    /// Resets a Failed operation to Pending with zero attempts and requests a
    /// pass when the scheduler is running.
    pub async fn manual_retry(&self, id: OperationId) -> SyncResult<Operation> {
        let op = self.engine.manual_retry(id).await?;
        if self.background().is_some() {
            self.request_sync()?;
        }
        Ok(op)
    }

    /// Removes a Pending or Failed operation. When it was the entity's last
    /// queued mutation the optimistic local state is dropped, and a running
    /// scheduler is asked for a pass so the server copy is pulled back.
    pub async fn discard_operation(&self, id: OperationId) -> SyncResult<Operation> {
        let op = self.engine.discard_operation(id).await?;
        if self.background().is_some() {
            self.request_sync()?;
        }
        Ok(op)
    }

    /// Deletes Synced operations from the log.
    pub fn prune_synced_operations(&self) -> SyncResult<usize> {
        Ok(self.store.prune_synced()?)
    }
}

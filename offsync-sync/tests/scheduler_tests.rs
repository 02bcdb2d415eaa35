use offsync_store::LocalStore;
use offsync_sync::transport::mock::MockTransport;
use offsync_sync::{
    Connectivity, SyncConfig, SyncContext, SyncError, SyncState, SyncStatus, TransportError,
};
use offsync_types::{EntityId, OperationKind, OperationState, OwnerId};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn fast_config() -> SyncConfig {
    SyncConfig {
        debounce_ms: 100,
        periodic_interval_ms: 60_000,
        probe_interval_ms: 60_000,
        probe_timeout_ms: 1_000,
        backoff_ms: vec![50],
        ..SyncConfig::default()
    }
}

fn context(transport: &MockTransport, platform_online: bool) -> SyncContext {
    context_with(transport, platform_online, fast_config())
}

fn context_with(transport: &MockTransport, platform_online: bool, config: SyncConfig) -> SyncContext {
    SyncContext::open(
        LocalStore::open_in_memory().unwrap(),
        Arc::new(transport.clone()),
        OwnerId::new(),
        config,
        platform_online,
    )
    .unwrap()
}

fn create(ctx: &SyncContext) -> offsync_types::Operation {
    ctx.enqueue_mutation(
        OperationKind::Create,
        "application",
        EntityId::new(),
        serde_json::json!({"company": "Acme"}),
    )
    .unwrap()
}

/// Polls `condition` every 10ms for up to five seconds.
async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn all_synced(ctx: &SyncContext) -> bool {
    ctx.unsynced_operations().unwrap().is_empty()
}

// ── Triggers ─────────────────────────────────────────────────────

#[tokio::test]
async fn going_online_triggers_a_pass() {
    let transport = MockTransport::new();
    let ctx = context(&transport, false);
    let op = create(&ctx);
    ctx.start();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(transport.dispatched().is_empty());
    assert_eq!(ctx.connectivity(), Connectivity::Offline);

    ctx.set_platform_online(true);
    assert!(eventually(|| all_synced(&ctx)).await);
    assert_eq!(transport.dispatched()[0].id, op.id);

    ctx.shutdown().await;
}

#[tokio::test]
async fn manual_request_runs_a_pass() {
    let transport = MockTransport::new();
    let config = SyncConfig {
        debounce_ms: 60_000,
        ..fast_config()
    };
    let ctx = context_with(&transport, true, config);
    ctx.start();
    assert!(eventually(|| ctx.connectivity() == Connectivity::Online).await);

    let op = create(&ctx);
    ctx.request_sync().unwrap();
    assert!(eventually(|| all_synced(&ctx)).await);
    assert_eq!(transport.dispatched().last().unwrap().id, op.id);

    ctx.shutdown().await;
}

#[tokio::test]
async fn burst_of_local_writes_is_coalesced() {
    let transport = MockTransport::new();
    let ctx = context(&transport, true);
    ctx.start();
    assert!(eventually(|| ctx.sync_state().status == SyncStatus::Success).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let passes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&passes);
    let _subscription = ctx.subscribe_sync_state(move |state: &SyncState| {
        if state.status == SyncStatus::Syncing && state.completed == 0 {
            sink.lock().unwrap().push(state.total);
        }
    });

    for _ in 0..5 {
        create(&ctx);
    }
    assert!(eventually(|| all_synced(&ctx)).await);

    assert_eq!(*passes.lock().unwrap(), vec![5]);
    assert_eq!(transport.dispatched().len(), 5);

    ctx.shutdown().await;
}

#[tokio::test]
async fn due_retry_triggers_another_pass() {
    let transport = MockTransport::new();
    transport.push_response(Err(TransportError::Transient("503".into())));
    let ctx = context(&transport, true);
    let op = create(&ctx);
    ctx.start();

    assert!(eventually(|| all_synced(&ctx)).await);
    assert_eq!(transport.dispatched().len(), 2);
    assert_eq!(ctx.engine().retries().remaining(&op.id), None);

    ctx.shutdown().await;
}

// ── Connectivity gate ────────────────────────────────────────────

#[tokio::test]
async fn failed_probe_keeps_operations_queued() {
    let transport = MockTransport::new();
    transport.set_probe(Some(TransportError::Transient("connection refused".into())));
    let ctx = context(&transport, true);
    let op = create(&ctx);
    ctx.start();

    assert!(eventually(|| ctx.connectivity() == Connectivity::Offline).await);
    ctx.request_sync().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(transport.dispatched().is_empty());
    assert_eq!(ctx.sync_state(), SyncState::idle());
    let unsynced = ctx.unsynced_operations().unwrap();
    assert_eq!(unsynced[0].id, op.id);
    assert_eq!(unsynced[0].state, OperationState::Pending);

    ctx.shutdown().await;
}

// ── Lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn request_before_start_is_refused() {
    let ctx = context(&MockTransport::new(), true);
    assert!(matches!(ctx.request_sync(), Err(SyncError::ChannelClosed)));
}

#[tokio::test]
async fn shutdown_stops_scheduling_and_keeps_the_queue() {
    let transport = MockTransport::new();
    let ctx = context(&transport, false);
    ctx.start();
    ctx.start();
    ctx.shutdown().await;

    create(&ctx);
    ctx.set_platform_online(true);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(transport.dispatched().is_empty());
    assert_eq!(ctx.unsynced_operations().unwrap().len(), 1);
    assert!(matches!(ctx.request_sync(), Err(SyncError::ChannelClosed)));
}

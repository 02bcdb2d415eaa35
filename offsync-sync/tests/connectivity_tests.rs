use offsync_sync::transport::mock::MockTransport;
use offsync_sync::{Connectivity, ConnectivityMonitor, TransportError};
use std::sync::Arc;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

fn monitor(transport: &MockTransport, platform_online: bool) -> Arc<ConnectivityMonitor> {
    Arc::new(ConnectivityMonitor::new(
        Arc::new(transport.clone()),
        platform_online,
        PROBE_TIMEOUT,
    ))
}

// ── Initial state ────────────────────────────────────────────────

#[test]
fn starts_offline_when_platform_is_offline() {
    let monitor = monitor(&MockTransport::new(), false);
    assert_eq!(monitor.state(), Connectivity::Offline);
}

#[test]
fn starts_verifying_when_platform_is_online() {
    let monitor = monitor(&MockTransport::new(), true);
    assert_eq!(monitor.state(), Connectivity::Verifying);
    assert!(!monitor.is_online());
}

// ── Probing ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn successful_probe_goes_online() {
    let monitor = monitor(&MockTransport::new(), true);
    assert_eq!(monitor.verify().await, Connectivity::Online);
    assert!(monitor.is_online());
}

#[tokio::test(start_paused = true)]
async fn failed_probe_goes_offline_despite_platform_flag() {
    let transport = MockTransport::new();
    transport.set_probe(Some(TransportError::Transient("connection refused".into())));
    let monitor = monitor(&transport, true);

    assert_eq!(monitor.verify().await, Connectivity::Offline);
}

#[tokio::test(start_paused = true)]
async fn probe_timeout_goes_offline() {
    let transport = MockTransport::new();
    transport.set_probe_delay(Some(Duration::from_secs(30)));
    let monitor = monitor(&transport, true);

    let started = tokio::time::Instant::now();
    assert_eq!(monitor.verify().await, Connectivity::Offline);
    assert_eq!(started.elapsed(), PROBE_TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn probe_just_under_timeout_is_online() {
    let transport = MockTransport::new();
    transport.set_probe_delay(Some(Duration::from_millis(4_900)));
    let monitor = monitor(&transport, true);

    assert_eq!(monitor.verify().await, Connectivity::Online);
}

#[tokio::test(start_paused = true)]
async fn verify_without_platform_skips_probe() {
    let transport = MockTransport::new();
    transport.set_probe_delay(Some(Duration::from_secs(60)));
    let monitor = monitor(&transport, false);

    let started = tokio::time::Instant::now();
    assert_eq!(monitor.verify().await, Connectivity::Offline);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

// ── Platform signals ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn platform_offline_downgrades_immediately() {
    let monitor = monitor(&MockTransport::new(), true);
    monitor.verify().await;
    assert!(monitor.is_online());

    monitor.set_platform_online(false);
    assert_eq!(monitor.state(), Connectivity::Offline);
}

#[tokio::test(start_paused = true)]
async fn platform_online_moves_to_verifying() {
    let monitor = monitor(&MockTransport::new(), false);
    let mut rx = monitor.subscribe();

    monitor.set_platform_online(true);
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), Connectivity::Verifying);
}

#[tokio::test(start_paused = true)]
async fn reprobe_while_online_does_not_flap() {
    let monitor = monitor(&MockTransport::new(), true);
    monitor.verify().await;
    let mut rx = monitor.subscribe();

    monitor.verify().await;
    assert!(!rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), Connectivity::Online);
}

// ── Probe loop ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn probe_loop_tracks_endpoint_health() {
    let transport = MockTransport::new();
    let monitor = monitor(&transport, true);
    let mut rx = monitor.subscribe();
    let task = monitor.spawn_probe_loop(Duration::from_secs(30));

    rx.wait_for(|state| *state == Connectivity::Online).await.unwrap();

    transport.set_probe(Some(TransportError::Transient("503".into())));
    rx.wait_for(|state| *state == Connectivity::Offline).await.unwrap();

    transport.set_probe(None);
    rx.wait_for(|state| *state == Connectivity::Online).await.unwrap();

    task.abort();
}

#[tokio::test(start_paused = true)]
async fn platform_reconnect_wakes_probe_loop() {
    let transport = MockTransport::new();
    let monitor = monitor(&transport, false);
    let mut rx = monitor.subscribe();
    let task = monitor.spawn_probe_loop(Duration::from_secs(3_600));
    tokio::task::yield_now().await;

    let started = tokio::time::Instant::now();
    monitor.set_platform_online(true);
    rx.wait_for(|state| *state == Connectivity::Online).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3_600));

    task.abort();
}

use offsync_sync::{StatusBroadcaster, SyncState, SyncStatus};
use std::sync::{Arc, Mutex};

fn recorder(broadcaster: &StatusBroadcaster) -> (offsync_sync::Subscription, Arc<Mutex<Vec<SyncState>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = broadcaster.subscribe(move |state| sink.lock().unwrap().push(state.clone()));
    (subscription, seen)
}

// ── Snapshots ────────────────────────────────────────────────────

#[test]
fn starts_idle() {
    let broadcaster = StatusBroadcaster::new();
    assert_eq!(broadcaster.latest(), SyncState::idle());
}

#[test]
fn finished_reports_full_progress() {
    let state = SyncState::finished(SyncStatus::PartialFailure, 7, Some("1 failed".into()));
    assert_eq!(state.completed, 7);
    assert_eq!(state.total, 7);
    assert_eq!(state.error.as_deref(), Some("1 failed"));
}

#[test]
fn state_serializes_snake_case() {
    let json = serde_json::to_value(SyncState::syncing(1, 2)).unwrap();
    assert_eq!(json["status"], "syncing");
    assert!(json.get("error").is_none());
}

// ── Delivery ─────────────────────────────────────────────────────

#[test]
fn listeners_receive_emitted_states_in_order() {
    let broadcaster = StatusBroadcaster::new();
    let (_subscription, seen) = recorder(&broadcaster);

    broadcaster.emit(SyncState::syncing(0, 2));
    broadcaster.emit(SyncState::syncing(2, 2));
    broadcaster.emit(SyncState::finished(SyncStatus::Success, 2, None));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen.windows(2).all(|w| w[0].completed <= w[1].completed));
    assert_eq!(seen[2].status, SyncStatus::Success);
    assert_eq!(broadcaster.latest().status, SyncStatus::Success);
}

#[test]
fn multiple_listeners_all_receive() {
    let broadcaster = StatusBroadcaster::new();
    let (_a, seen_a) = recorder(&broadcaster);
    let (_b, seen_b) = recorder(&broadcaster);

    broadcaster.emit(SyncState::syncing(0, 1));
    assert_eq!(seen_a.lock().unwrap().len(), 1);
    assert_eq!(seen_b.lock().unwrap().len(), 1);
    assert_eq!(broadcaster.listener_count(), 2);
}

// ── Unsubscribe ──────────────────────────────────────────────────

#[test]
fn unsubscribe_stops_delivery() {
    let broadcaster = StatusBroadcaster::new();
    let (subscription, seen) = recorder(&broadcaster);

    broadcaster.emit(SyncState::syncing(0, 1));
    subscription.unsubscribe();
    broadcaster.emit(SyncState::syncing(1, 1));

    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(broadcaster.listener_count(), 0);
}

#[test]
fn dropping_subscription_unsubscribes() {
    let broadcaster = StatusBroadcaster::new();
    {
        let (_subscription, _seen) = recorder(&broadcaster);
        assert_eq!(broadcaster.listener_count(), 1);
    }
    assert_eq!(broadcaster.listener_count(), 0);
}

#[test]
fn subscription_outliving_broadcaster_is_harmless() {
    let broadcaster = StatusBroadcaster::new();
    let (subscription, _seen) = recorder(&broadcaster);
    drop(broadcaster);
    subscription.unsubscribe();
}

#[tokio::test]
async fn watch_sees_latest_state() {
    let broadcaster = StatusBroadcaster::new();
    let mut rx = broadcaster.watch();

    broadcaster.emit(SyncState::syncing(3, 5));
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow().completed, 3);
}

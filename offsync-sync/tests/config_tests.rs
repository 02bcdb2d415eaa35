use offsync_sync::SyncConfig;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[test]
fn defaults() {
    let config = SyncConfig::default();
    assert_eq!(config.batch_size, 50);
    assert_eq!(config.max_attempts, 5);
    assert_eq!(config.backoff_ms, vec![1_000, 2_000, 4_000, 8_000, 16_000]);
    assert_eq!(config.debounce(), Duration::from_millis(500));
    assert_eq!(config.periodic_interval(), Duration::from_secs(300));
    assert_eq!(config.probe_interval(), Duration::from_secs(30));
    assert_eq!(config.probe_timeout(), Duration::from_secs(5));
    assert!(config.pull_after_push);
}

#[test]
fn partial_json_keeps_remaining_defaults() {
    let config = assert_ok!(SyncConfig::from_json(r#"{"batch_size": 10, "debounce_ms": 0}"#));
    assert_eq!(config.batch_size, 10);
    assert_eq!(config.debounce(), Duration::ZERO);
    assert_eq!(config.max_attempts, 5);
    assert_eq!(config.pass_timeout(), SyncConfig::default().pass_timeout());
}

#[test]
fn empty_object_is_default() {
    assert_eq!(SyncConfig::from_json("{}").unwrap(), SyncConfig::default());
}

#[test]
fn malformed_json_is_an_error() {
    assert_err!(SyncConfig::from_json(r#"{"batch_size": "many"}"#));
}

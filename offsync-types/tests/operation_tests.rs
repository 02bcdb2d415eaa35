use offsync_types::{
    merge_payload, EntityId, FailureKind, HybridTimestamp, Operation, OperationId,
    OperationKind, OperationState, Outcome, OwnerId, Record,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::str::FromStr;

fn make_op(kind: OperationKind) -> Operation {
    Operation::new(
        kind,
        "application",
        EntityId::new(),
        OwnerId::new(),
        json!({"company": "Acme"}),
        3,
        HybridTimestamp::new(1_000, 0),
    )
}

// ── Operation ────────────────────────────────────────────────────

#[test]
fn new_operation_is_pending() {
    let op = make_op(OperationKind::Update);
    assert_eq!(op.state, OperationState::Pending);
    assert_eq!(op.attempt, 0);
    assert_eq!(op.seq, 0);
    assert!(op.last_error.is_none());
    assert!(op.failure.is_none());
    assert!(op.outcome.is_none());
    assert!(op.is_pending());
}

#[test]
fn rebased_keeps_payload_origin_and_position() {
    let mut op = make_op(OperationKind::Update);
    op.seq = 17;
    op.state = OperationState::InFlight;
    op.attempt = 2;
    op.last_error = Some("timeout".into());

    let rebased = op.rebased(9);
    assert_ne!(rebased.id, op.id);
    assert_eq!(rebased.seq, 17);
    assert_eq!(rebased.base_version, 9);
    assert_eq!(rebased.payload, op.payload);
    assert_eq!(rebased.origin_timestamp, op.origin_timestamp);
    assert_eq!(rebased.entity_id, op.entity_id);
    assert_eq!(rebased.state, OperationState::Pending);
    assert_eq!(rebased.attempt, 0);
    assert!(rebased.last_error.is_none());
}

#[test]
fn terminal_states() {
    assert!(OperationState::Synced.is_terminal());
    assert!(OperationState::Failed.is_terminal());
    assert!(!OperationState::Pending.is_terminal());
    assert!(!OperationState::InFlight.is_terminal());
}

// ── Text forms ───────────────────────────────────────────────────

#[test]
fn kind_text_roundtrip() {
    for kind in [OperationKind::Create, OperationKind::Update, OperationKind::Delete] {
        assert_eq!(OperationKind::from_str(kind.as_str()).unwrap(), kind);
    }
    assert!(OperationKind::from_str("upsert").is_err());
}

#[test]
fn state_text_roundtrip() {
    for state in [
        OperationState::Pending,
        OperationState::InFlight,
        OperationState::Synced,
        OperationState::Failed,
    ] {
        assert_eq!(OperationState::from_str(&state.to_string()).unwrap(), state);
    }
    assert_eq!(OperationState::InFlight.as_str(), "in_flight");
}

#[test]
fn failure_kind_text_roundtrip() {
    assert_eq!(FailureKind::from_str("exhausted").unwrap(), FailureKind::Exhausted);
    assert_eq!(FailureKind::from_str("rejected").unwrap(), FailureKind::Rejected);
    let err = FailureKind::from_str("boom").unwrap_err();
    assert!(err.to_string().contains("failure kind"));
}

#[test]
fn outcome_json_is_tagged() {
    let requeued_as = OperationId::new();
    let json = serde_json::to_value(Outcome::ClientWins { requeued_as }).unwrap();
    assert_eq!(json["outcome"], "client_wins");
    assert_eq!(json["requeued_as"], requeued_as.to_string());

    let parsed: Outcome = serde_json::from_str(r#"{"outcome":"server_wins"}"#).unwrap();
    assert_eq!(parsed, Outcome::ServerWins);
}

// ── Record ───────────────────────────────────────────────────────

#[test]
fn new_record_is_unsynced_at_version_zero() {
    let record = Record::new(
        EntityId::new(),
        "application",
        OwnerId::new(),
        json!({"role": "engineer"}),
        HybridTimestamp::new(10, 0),
    );
    assert_eq!(record.version, 0);
    assert!(!record.is_synced());
}

#[test]
fn apply_payload_merges_top_level_fields() {
    let mut record = Record::new(
        EntityId::new(),
        "application",
        OwnerId::new(),
        json!({"company": "Acme", "status": "applied"}),
        HybridTimestamp::new(10, 0),
    );
    record.apply_payload(&json!({"status": "interview"}), HybridTimestamp::new(20, 0));
    assert_eq!(record.data, json!({"company": "Acme", "status": "interview"}));
    assert_eq!(record.updated_at, HybridTimestamp::new(20, 0));
}

#[test]
fn merge_payload_non_object_replaces() {
    let mut target = json!({"a": 1});
    merge_payload(&mut target, &json!([1, 2]));
    assert_eq!(target, json!([1, 2]));
}

#[test]
fn record_json_omits_missing_last_synced() {
    let record = Record::new(
        EntityId::new(),
        "application",
        OwnerId::new(),
        json!({}),
        HybridTimestamp::new(10, 0),
    );
    let json = serde_json::to_value(&record).unwrap();
    assert!(json.get("last_synced_at").is_none());
    let parsed: Record = serde_json::from_value(json).unwrap();
    assert_eq!(parsed, record);
}

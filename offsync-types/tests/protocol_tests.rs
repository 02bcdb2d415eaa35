use offsync_types::protocol::{OWNER_HEADER, PROTOCOL_VERSION};
use offsync_types::{
    ChangeSet, EntityId, ErrorBody, HybridTimestamp, Operation, OperationEnvelope,
    OperationKind, OwnerId, Record, SubmitResponse,
};
use serde_json::json;

fn make_op() -> Operation {
    Operation::new(
        OperationKind::Create,
        "application",
        EntityId::new(),
        OwnerId::new(),
        json!({"company": "Initech"}),
        0,
        HybridTimestamp::new(500, 1),
    )
}

#[test]
fn protocol_constants() {
    assert_eq!(PROTOCOL_VERSION, 1);
    assert_eq!(OWNER_HEADER, "x-offsync-owner");
}

// ── OperationEnvelope ────────────────────────────────────────────

#[test]
fn envelope_copies_operation_fields() {
    let op = make_op();
    let envelope = OperationEnvelope::from(&op);
    assert_eq!(envelope.operation_id, op.id);
    assert_eq!(envelope.kind, OperationKind::Create);
    assert_eq!(envelope.entity_id, op.entity_id);
    assert_eq!(envelope.payload, op.payload);
    assert_eq!(envelope.base_version, 0);
    assert_eq!(envelope.origin_timestamp, op.origin_timestamp);
}

#[test]
fn same_mutation_ignores_baseline_but_not_payload() {
    let op = make_op();
    let a = OperationEnvelope::from(&op);
    let mut b = a.clone();
    b.base_version = 4;
    assert!(a.same_mutation(&b));

    b.payload = json!({"company": "Globex"});
    assert!(!a.same_mutation(&b));
}

// ── SubmitResponse ───────────────────────────────────────────────

#[test]
fn submit_response_tags() {
    let record = Record::new(
        EntityId::new(),
        "application",
        OwnerId::new(),
        json!({}),
        HybridTimestamp::new(1, 0),
    );
    let conflict = SubmitResponse::Conflict { server_record: record.clone() };
    let json = serde_json::to_value(&conflict).unwrap();
    assert_eq!(json["status"], "conflict");
    assert_eq!(conflict.label(), "conflict");

    let parsed: SubmitResponse = serde_json::from_value(json).unwrap();
    assert_eq!(parsed, conflict);

    let deleted = SubmitResponse::Deleted { entity_id: record.id };
    assert_eq!(serde_json::to_value(&deleted).unwrap()["status"], "deleted");
}

// ── ChangeSet / ErrorBody ────────────────────────────────────────

#[test]
fn change_set_deleted_defaults_to_empty() {
    let parsed: ChangeSet =
        serde_json::from_str(r#"{"records":[],"checkpoint":{"wall_time":5,"logical":0}}"#)
            .unwrap();
    assert!(parsed.deleted.is_empty());
    assert_eq!(parsed.checkpoint, HybridTimestamp::new(5, 0));
}

#[test]
fn error_body_new() {
    let body = ErrorBody::new("forbidden", "record belongs to another owner");
    assert_eq!(body.code, "forbidden");
    assert!(body.message.contains("another owner"));
}

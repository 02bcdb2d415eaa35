use offsync_store::{LocalStore, OperationFilter, StoreWrite, WriteBatch};
use offsync_types::{
    EntityId, HybridTimestamp, Operation, OperationKind, OperationState, OwnerId, Record,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn make_record(owner: OwnerId, version: u64, wall: u64) -> Record {
    let mut record = Record::new(
        EntityId::new(),
        "application",
        owner,
        json!({"company": "Acme", "stage": "applied"}),
        HybridTimestamp::new(wall, 0),
    );
    record.version = version;
    record
}

fn make_op(record: &Record, kind: OperationKind) -> Operation {
    Operation::new(
        kind,
        record.entity_type.clone(),
        record.id,
        record.owner_id,
        record.data.clone(),
        record.version,
        record.updated_at,
    )
}

// ── Records ──────────────────────────────────────────────────────

#[test]
fn write_and_read_record() {
    let store = LocalStore::open_in_memory().unwrap();
    let record = make_record(OwnerId::new(), 3, 1_000);

    store.write(&record).unwrap();
    assert_eq!(store.read(&record.id).unwrap(), Some(record));
}

#[test]
fn read_missing_record_is_none() {
    let store = LocalStore::open_in_memory().unwrap();
    assert!(store.read(&EntityId::new()).unwrap().is_none());
}

#[test]
fn write_overwrites_existing() {
    let store = LocalStore::open_in_memory().unwrap();
    let mut record = make_record(OwnerId::new(), 1, 1_000);
    store.write(&record).unwrap();

    record.data = json!({"company": "Globex"});
    record.last_synced_at = Some(HybridTimestamp::new(2_000, 1));
    store.write(&record).unwrap();

    let read = store.read(&record.id).unwrap().unwrap();
    assert_eq!(read.data, json!({"company": "Globex"}));
    assert_eq!(read.last_synced_at, Some(HybridTimestamp::new(2_000, 1)));
}

#[test]
fn delete_record() {
    let store = LocalStore::open_in_memory().unwrap();
    let record = make_record(OwnerId::new(), 1, 1_000);
    store.write(&record).unwrap();

    assert!(store.delete(&record.id).unwrap());
    assert!(!store.delete(&record.id).unwrap());
    assert!(store.read(&record.id).unwrap().is_none());
}

#[test]
fn list_records_by_type() {
    let store = LocalStore::open_in_memory().unwrap();
    let owner = OwnerId::new();
    let a = make_record(owner, 1, 1_000);
    let b = make_record(owner, 1, 1_001);
    let mut note = make_record(owner, 1, 1_002);
    note.entity_type = "note".into();

    store.write(&a).unwrap();
    store.write(&b).unwrap();
    store.write(&note).unwrap();

    assert_eq!(store.list_records("application").unwrap().len(), 2);
    assert_eq!(store.list_records("note").unwrap(), vec![note]);
    assert!(store.list_records("contact").unwrap().is_empty());
}

// ── apply_server_record ──────────────────────────────────────────

#[test]
fn apply_server_record_inserts_when_absent() {
    let store = LocalStore::open_in_memory().unwrap();
    let record = make_record(OwnerId::new(), 4, 1_000);

    assert!(store.apply_server_record(&record).unwrap());
    assert_eq!(store.read(&record.id).unwrap(), Some(record));
}

#[test]
fn apply_server_record_is_idempotent() {
    let store = LocalStore::open_in_memory().unwrap();
    let record = make_record(OwnerId::new(), 4, 1_000);

    store.apply_server_record(&record).unwrap();
    store.apply_server_record(&record).unwrap();
    assert_eq!(store.read(&record.id).unwrap(), Some(record));
}

#[test]
fn apply_server_record_never_regresses_version() {
    let store = LocalStore::open_in_memory().unwrap();
    let newer = make_record(OwnerId::new(), 5, 2_000);
    store.write(&newer).unwrap();

    let mut older = newer.clone();
    older.version = 3;
    older.data = json!({"company": "stale"});

    assert!(!store.apply_server_record(&older).unwrap());
    assert_eq!(store.read(&newer.id).unwrap(), Some(newer));
}

#[test]
fn apply_server_record_keeps_queued_local_data() {
    let store = LocalStore::open_in_memory().unwrap();
    let mut local = make_record(OwnerId::new(), 2, 1_000);
    local.data = json!({"company": "Acme", "stage": "interview"});
    store.write(&local).unwrap();
    store.append_operation(make_op(&local, OperationKind::Update)).unwrap();

    let mut server = local.clone();
    server.version = 3;
    server.data = json!({"company": "Acme", "stage": "applied"});
    server.last_synced_at = Some(HybridTimestamp::new(5_000, 0));

    assert!(store.apply_server_record(&server).unwrap());
    let read = store.read(&local.id).unwrap().unwrap();
    assert_eq!(read.version, 3);
    assert_eq!(read.last_synced_at, Some(HybridTimestamp::new(5_000, 0)));
    assert_eq!(read.data, json!({"company": "Acme", "stage": "interview"}));
}

// ── Operation log ────────────────────────────────────────────────

#[test]
fn append_assigns_increasing_seq() {
    let store = LocalStore::open_in_memory().unwrap();
    let record = make_record(OwnerId::new(), 0, 1_000);

    let first = store.append_operation(make_op(&record, OperationKind::Create)).unwrap();
    let second = store.append_operation(make_op(&record, OperationKind::Update)).unwrap();
    let third = store.append_operation(make_op(&record, OperationKind::Delete)).unwrap();

    assert!(first.seq > 0);
    assert!(first.seq < second.seq);
    assert!(second.seq < third.seq);
}

#[test]
fn get_operation_roundtrip() {
    let store = LocalStore::open_in_memory().unwrap();
    let record = make_record(OwnerId::new(), 0, 1_000);
    let op = store.append_operation(make_op(&record, OperationKind::Create)).unwrap();

    assert_eq!(store.get_operation(&op.id).unwrap(), Some(op));
}

#[test]
fn remove_operation() {
    let store = LocalStore::open_in_memory().unwrap();
    let record = make_record(OwnerId::new(), 0, 1_000);
    let op = store.append_operation(make_op(&record, OperationKind::Create)).unwrap();

    assert!(store.remove_operation(&op.id).unwrap());
    assert!(!store.remove_operation(&op.id).unwrap());
    assert!(store.get_operation(&op.id).unwrap().is_none());
}

#[test]
fn recover_in_flight_resets_to_pending() {
    let store = LocalStore::open_in_memory().unwrap();
    let record = make_record(OwnerId::new(), 0, 1_000);
    let op = store.append_operation(make_op(&record, OperationKind::Create)).unwrap();
    store
        .update_operation(&op.id, &offsync_store::OperationPatch::state(OperationState::InFlight))
        .unwrap();

    assert_eq!(store.recover_in_flight().unwrap(), 1);
    assert_eq!(
        store.get_operation(&op.id).unwrap().unwrap().state,
        OperationState::Pending
    );
    assert_eq!(store.recover_in_flight().unwrap(), 0);
}

#[test]
fn prune_synced_removes_only_synced() {
    let store = LocalStore::open_in_memory().unwrap();
    let record = make_record(OwnerId::new(), 0, 1_000);
    let done = store.append_operation(make_op(&record, OperationKind::Create)).unwrap();
    let queued = store.append_operation(make_op(&record, OperationKind::Update)).unwrap();
    store
        .update_operation(
            &done.id,
            &offsync_store::OperationPatch::synced(offsync_types::Outcome::Accepted),
        )
        .unwrap();

    assert_eq!(store.prune_synced().unwrap(), 1);
    let remaining = store.list_operations(&OperationFilter::all()).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, queued.id);
}

// ── Checkpoints ──────────────────────────────────────────────────

#[test]
fn checkpoint_absent_by_default() {
    let store = LocalStore::open_in_memory().unwrap();
    assert!(store.checkpoint(&OwnerId::new()).unwrap().is_none());
}

#[test]
fn checkpoint_is_per_owner() {
    let store = LocalStore::open_in_memory().unwrap();
    let alice = OwnerId::new();
    let bob = OwnerId::new();

    store
        .commit(WriteBatch::new().with(StoreWrite::SetCheckpoint(alice, HybridTimestamp::new(10, 1))))
        .unwrap();
    store
        .commit(WriteBatch::new().with(StoreWrite::SetCheckpoint(alice, HybridTimestamp::new(20, 0))))
        .unwrap();

    assert_eq!(store.checkpoint(&alice).unwrap(), Some(HybridTimestamp::new(20, 0)));
    assert!(store.checkpoint(&bob).unwrap().is_none());
}

// ── Durability ───────────────────────────────────────────────────

#[test]
fn reopen_preserves_records_operations_and_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.db");
    let owner = OwnerId::new();
    let record = make_record(owner, 0, 1_000);

    let op_id = {
        let store = LocalStore::open(&path).unwrap();
        let summary = store
            .commit(
                WriteBatch::new()
                    .with(StoreWrite::PutRecord(record.clone()))
                    .with(StoreWrite::AppendOperation(make_op(&record, OperationKind::Create)))
                    .with(StoreWrite::SetCheckpoint(owner, HybridTimestamp::new(500, 2))),
            )
            .unwrap();
        summary.appended[0].id
    };

    let store = LocalStore::open(&path).unwrap();
    assert_eq!(store.read(&record.id).unwrap(), Some(record));
    assert!(store.get_operation(&op_id).unwrap().is_some());
    assert_eq!(store.checkpoint(&owner).unwrap(), Some(HybridTimestamp::new(500, 2)));
}

#[test]
fn reopen_continues_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.db");
    let record = make_record(OwnerId::new(), 0, 1_000);

    let first = {
        let store = LocalStore::open(&path).unwrap();
        store.append_operation(make_op(&record, OperationKind::Create)).unwrap()
    };

    let store = LocalStore::open(&path).unwrap();
    let second = store.append_operation(make_op(&record, OperationKind::Update)).unwrap();
    assert!(second.seq > first.seq);
}

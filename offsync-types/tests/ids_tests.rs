use offsync_types::{EntityId, OperationId, OwnerId};
use std::collections::HashSet;
use std::str::FromStr;

// ── EntityId ──────────────────────────────────────────────────────

#[test]
fn entity_id_new_is_unique() {
    assert_ne!(EntityId::new(), EntityId::new());
}

#[test]
fn entity_id_from_uuid_roundtrip() {
    let uuid = uuid::Uuid::now_v7();
    assert_eq!(EntityId::from_uuid(uuid).as_uuid(), uuid);
}

#[test]
fn entity_id_display_and_parse() {
    let id = EntityId::new();
    assert_eq!(EntityId::parse(&id.to_string()).unwrap(), id);
    assert_eq!(EntityId::from_str(&id.to_string()).unwrap(), id);
}

#[test]
fn entity_id_parse_invalid() {
    assert!(EntityId::parse("not-a-uuid").is_err());
}

#[test]
fn entity_ids_are_time_ordered() {
    let a = EntityId::new();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let b = EntityId::new();
    assert!(a < b);
}

#[test]
fn entity_id_serializes_as_plain_string() {
    let id = EntityId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
}

// ── OwnerId ───────────────────────────────────────────────────────

#[test]
fn owner_id_roundtrip() {
    let owner = OwnerId::new();
    assert_eq!(OwnerId::parse(&owner.to_string()).unwrap(), owner);
    assert!(OwnerId::parse("garbage").is_err());
}

#[test]
fn owner_id_hash_and_eq() {
    let owner = OwnerId::new();
    let mut set = HashSet::new();
    set.insert(owner);
    set.insert(owner);
    assert_eq!(set.len(), 1);
}

// ── OperationId ───────────────────────────────────────────────────

#[test]
fn operation_id_roundtrip() {
    let id = OperationId::new();
    assert_eq!(OperationId::from_str(&id.to_string()).unwrap(), id);
}

#[test]
fn operation_id_default_is_unique() {
    assert_ne!(OperationId::default(), OperationId::default());
}

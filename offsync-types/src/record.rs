//! Synchronizable records.

use crate::{EntityId, HybridTimestamp, OwnerId};
use serde::{Deserialize, Serialize};

/// One synchronizable entity.
///
/// `version` is authoritative only on the server. A client keeps the last
/// version it learned from the server and uses it as the baseline of its next
/// mutation; it never increments it itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Client-generated, immutable identifier.
    pub id: EntityId,
    /// Collection the record belongs to (e.g. "application").
    pub entity_type: String,
    /// Owning user.
    pub owner_id: OwnerId,
    /// Domain fields. Opaque to the sync core.
    pub data: serde_json::Value,
    /// Server version; 0 until the first accepted write.
    pub version: u64,
    /// Logical timestamp of the last write.
    pub updated_at: HybridTimestamp,
    /// Set only after a confirmed round-trip with the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<HybridTimestamp>,
}

impl Record {
    /// Creates a never-synced record at version 0.
    pub fn new(
        id: EntityId,
        entity_type: impl Into<String>,
        owner_id: OwnerId,
        data: serde_json::Value,
        updated_at: HybridTimestamp,
    ) -> Self {
        Self {
            id,
            entity_type: entity_type.into(),
            owner_id,
            data,
            version: 0,
            updated_at,
            last_synced_at: None,
        }
    }

    /// Returns true once the record has made at least one confirmed round-trip.
    pub fn is_synced(&self) -> bool {
        self.last_synced_at.is_some()
    }

    /// Applies a (possibly partial) payload on top of the current data.
    pub fn apply_payload(&mut self, payload: &serde_json::Value, at: HybridTimestamp) {
        merge_payload(&mut self.data, payload);
        self.updated_at = at;
    }
}

/// Shallow-merges `patch` into `target`.
///
/// Top-level object fields of `patch` replace the same fields of `target`;
/// fields absent from `patch` are kept. A non-object patch replaces `target`
/// entirely.
pub fn merge_payload(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(target_obj), Some(patch_obj)) => {
            for (key, value) in patch_obj {
                target_obj.insert(key.clone(), value.clone());
            }
        }
        _ => *target = patch.clone(),
    }
}

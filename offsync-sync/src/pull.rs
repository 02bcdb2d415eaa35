//! Pull path: overlays server changes onto the local store.
//!
//! A fetched [`ChangeSet`] becomes one [`WriteBatch`] holding every changed
//! record, every deletion and the new checkpoint, so the store either moves to
//! the new checkpoint completely or not at all.

use offsync_store::{CommitSummary, StoreWrite, WriteBatch};
use offsync_types::{ChangeSet, HybridClock, HybridTimestamp, OwnerId};

/// Store writes derived from one change set.
pub(crate) struct Overlay {
    pub writes: WriteBatch,
    pub checkpoint: HybridTimestamp,
    pub fetched: usize,
    pub deleted: usize,
}

/// Builds the overlay batch. Records are stamped as synced at the local clock
/// after observing their server timestamp. The checkpoint never moves
/// backwards.
pub(crate) fn overlay(
    owner_id: OwnerId,
    since: Option<HybridTimestamp>,
    changes: ChangeSet,
    clock: &HybridClock,
) -> Overlay {
    let fetched = changes.records.len();
    let deleted = changes.deleted.len();
    let checkpoint = since.map_or(changes.checkpoint, |since| since.max(changes.checkpoint));

    let mut writes = WriteBatch::new();
    for mut record in changes.records {
        record.last_synced_at = Some(clock.observe(&record.updated_at));
        writes.push(StoreWrite::ApplyPulledRecord(record));
    }
    for entity_id in changes.deleted {
        writes.push(StoreWrite::RemoveDeleted(entity_id));
    }
    writes.push(StoreWrite::SetCheckpoint(owner_id, checkpoint));

    Overlay {
        writes,
        checkpoint,
        fetched,
        deleted,
    }
}

/// What one pull did.
#[derive(Debug, Clone, PartialEq)]
pub struct PullReport {
    /// Checkpoint the pull started from.
    pub since: Option<HybridTimestamp>,
    /// Checkpoint stored by the pull.
    pub checkpoint: HybridTimestamp,
    /// Changed records received.
    pub fetched: usize,
    /// Deletions received.
    pub deleted: usize,
    /// Records and deletions written locally.
    pub applied: usize,
    /// Records and deletions left alone because the entity has queued
    /// mutations or a newer local version.
    pub skipped: usize,
}

impl PullReport {
    pub(crate) fn new(
        since: Option<HybridTimestamp>,
        overlay: &Overlay,
        summary: &CommitSummary,
    ) -> Self {
        Self {
            since,
            checkpoint: overlay.checkpoint,
            fetched: overlay.fetched,
            deleted: overlay.deleted,
            applied: summary.applied,
            skipped: summary.skipped,
        }
    }
}

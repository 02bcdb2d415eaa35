//! Atomic write batches.

use crate::operation_log::OperationPatch;
use offsync_types::{EntityId, HybridTimestamp, Operation, OperationId, OwnerId, Record};

/// One step of a [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum StoreWrite {
    /// Optimistic local write of a record.
    PutRecord(Record),
    /// Optimistic local removal of a record.
    DeleteRecord(EntityId),
    /// Server-authoritative record from a resolved operation.
    ///
    /// Never regresses a newer local version. While other unsynced operations
    /// for the entity remain queued, only `version` and `last_synced_at`
    /// advance and the local data is kept.
    ApplyServerRecord(Record),
    /// Server record from a pull. Skipped entirely while the entity has
    /// unsynced operations; those will reconcile it.
    ApplyPulledRecord(Record),
    /// Server-side deletion. Skipped while the entity has unsynced operations.
    RemoveDeleted(EntityId),
    /// Appends an operation. `seq == 0` assigns the next sequence number; a
    /// non-zero `seq` is kept (requeued operations keep their position).
    AppendOperation(Operation),
    /// Patches an existing operation.
    UpdateOperation(OperationId, OperationPatch),
    /// Moves the baseline of every unsynced operation of `entity_id` queued
    /// after `after_seq` to `base_version`.
    RebaseAfter {
        entity_id: EntityId,
        after_seq: u64,
        base_version: u64,
    },
    /// Stores the pull checkpoint of an owner.
    SetCheckpoint(OwnerId, HybridTimestamp),
    /// Removes an operation from the log.
    RemoveOperation(OperationId),
    /// Gives up the optimistic local state of an entity once no unsynced
    /// operation for it remains. A record the server never confirmed is
    /// removed, and the owner's checkpoint is cleared so the next pull
    /// refetches the server copy skipped while mutations were queued.
    RevertUnsynced {
        entity_id: EntityId,
        owner_id: OwnerId,
    },
}

/// An ordered list of writes committed in one transaction.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    writes: Vec<StoreWrite>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a write.
    pub fn push(&mut self, write: StoreWrite) -> &mut Self {
        self.writes.push(write);
        self
    }

    /// Builder form of [`push`](Self::push).
    #[must_use]
    pub fn with(mut self, write: StoreWrite) -> Self {
        self.writes.push(write);
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub(crate) fn into_writes(self) -> Vec<StoreWrite> {
        self.writes
    }
}

impl FromIterator<StoreWrite> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = StoreWrite>>(iter: I) -> Self {
        Self {
            writes: iter.into_iter().collect(),
        }
    }
}

/// What a committed batch did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitSummary {
    /// Operations appended, with their assigned sequence numbers.
    pub appended: Vec<Operation>,
    /// Server records or deletions written.
    pub applied: usize,
    /// Server records or deletions skipped (stale, or entity has queued
    /// mutations).
    pub skipped: usize,
    /// Operations whose baseline was moved.
    pub rebased: usize,
}

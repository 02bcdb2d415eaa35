//! The local store: records, operation log and checkpoints in one SQLite file.

use crate::batch::{CommitSummary, StoreWrite, WriteBatch};
use crate::error::{StorageError, StorageResult};
use crate::operation_log::{self, OperationFilter, OperationPatch};
use offsync_types::{EntityId, HybridTimestamp, Operation, OperationId, OwnerId, Record};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Durable local state of one client.
///
/// Writes are serialized through a single connection; each public method (and
/// each [`WriteBatch`]) is one transaction, durable before it returns.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        let _mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        info!("Opened local store at {}", path.as_ref().display());
        Self::with_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS records (
                entity_id TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                data TEXT NOT NULL,
                version INTEGER NOT NULL,
                updated_wall INTEGER NOT NULL,
                updated_logical INTEGER NOT NULL,
                synced_wall INTEGER,
                synced_logical INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_records_type ON records(entity_type);

            CREATE TABLE IF NOT EXISTS operations (
                op_id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                kind TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                base_version INTEGER NOT NULL,
                origin_wall INTEGER NOT NULL,
                origin_logical INTEGER NOT NULL,
                state TEXT NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                failure TEXT,
                outcome TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_operations_entity ON operations(entity_id, seq);
            CREATE INDEX IF NOT EXISTS idx_operations_state ON operations(state, seq);

            CREATE TABLE IF NOT EXISTS checkpoints (
                owner_id TEXT PRIMARY KEY,
                wall INTEGER NOT NULL,
                logical INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );

            INSERT OR IGNORE INTO meta (key, value) VALUES ('op_seq', 0);
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    // ── Records ──────────────────────────────────────────────────

    /// Writes a record as-is.
    pub fn write(&self, record: &Record) -> StorageResult<()> {
        let conn = self.lock()?;
        put_record(&conn, record)
    }

    /// Reads a record.
    pub fn read(&self, entity_id: &EntityId) -> StorageResult<Option<Record>> {
        let conn = self.lock()?;
        read_record(&conn, entity_id)
    }

    /// Removes a record. Returns false if it did not exist.
    pub fn delete(&self, entity_id: &EntityId) -> StorageResult<bool> {
        let conn = self.lock()?;
        delete_record(&conn, entity_id)
    }

    /// Lists the records of one entity type.
    pub fn list_records(&self, entity_type: &str) -> StorageResult<Vec<Record>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE entity_type = ?1 ORDER BY entity_id"
        ))?;
        let rows = stmt.query_map(params![entity_type], RecordRow::from_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?.decode()?);
        }
        Ok(result)
    }

    /// Idempotent put of a server-authoritative record. See
    /// [`StoreWrite::ApplyServerRecord`] for the rules. Returns true if
    /// anything was written.
    pub fn apply_server_record(&self, record: &Record) -> StorageResult<bool> {
        let summary = self.commit(WriteBatch::new().with(StoreWrite::ApplyServerRecord(record.clone())))?;
        Ok(summary.applied > 0)
    }

    // ── Operation log ────────────────────────────────────────────

    /// Appends an operation, returning it with its assigned sequence number.
    pub fn append_operation(&self, op: Operation) -> StorageResult<Operation> {
        let mut summary = self.commit(WriteBatch::new().with(StoreWrite::AppendOperation(op)))?;
        summary
            .appended
            .pop()
            .ok_or_else(|| StorageError::InvalidData("append produced no operation".into()))
    }

    /// Reads one operation.
    pub fn get_operation(&self, id: &OperationId) -> StorageResult<Option<Operation>> {
        let conn = self.lock()?;
        operation_log::read_operation(&conn, id)
    }

    /// Lists operations matching a filter, in enqueue order.
    pub fn list_operations(&self, filter: &OperationFilter) -> StorageResult<Vec<Operation>> {
        let conn = self.lock()?;
        operation_log::query_operations(&conn, filter)
    }

    /// Patches one operation, returning its new state.
    pub fn update_operation(
        &self,
        id: &OperationId,
        patch: &OperationPatch,
    ) -> StorageResult<Operation> {
        let conn = self.lock()?;
        operation_log::patch_operation(&conn, id, patch)
    }

    /// Patches several operations in one transaction.
    pub fn update_operations(
        &self,
        ids: &[OperationId],
        patch: &OperationPatch,
    ) -> StorageResult<()> {
        let batch: WriteBatch = ids
            .iter()
            .map(|id| StoreWrite::UpdateOperation(*id, patch.clone()))
            .collect();
        self.commit(batch).map(|_| ())
    }

    /// Removes an operation from the log. Returns false if it did not exist.
    pub fn remove_operation(&self, id: &OperationId) -> StorageResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM operations WHERE op_id = ?1",
            params![id.to_string()],
        )?;
        Ok(removed > 0)
    }

    /// Returns operations left InFlight by an interrupted pass to Pending.
    pub fn recover_in_flight(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let recovered = conn.execute(
            "UPDATE operations SET state = 'pending' WHERE state = 'in_flight'",
            [],
        )?;
        if recovered > 0 {
            info!("Recovered {} in-flight operations", recovered);
        }
        Ok(recovered)
    }

    /// Deletes Synced operations. Returns how many were removed.
    pub fn prune_synced(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let pruned = conn.execute("DELETE FROM operations WHERE state = 'synced'", [])?;
        debug!("Pruned {} synced operations", pruned);
        Ok(pruned)
    }

    // ── Checkpoints ──────────────────────────────────────────────

    /// Returns the pull checkpoint of an owner.
    pub fn checkpoint(&self, owner_id: &OwnerId) -> StorageResult<Option<HybridTimestamp>> {
        let conn = self.lock()?;
        let row: Option<(i64, i64)> = conn
            .query_row(
                "SELECT wall, logical FROM checkpoints WHERE owner_id = ?1",
                params![owner_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.map(|(wall, logical)| HybridTimestamp::new(wall as u64, logical as u32)))
    }

    // ── Batches ──────────────────────────────────────────────────

    /// Commits a batch atomically. Either every write lands or none does.
    pub fn commit(&self, batch: WriteBatch) -> StorageResult<CommitSummary> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut summary = CommitSummary::default();

        for write in batch.into_writes() {
            match write {
                StoreWrite::PutRecord(record) => put_record(&tx, &record)?,
                StoreWrite::DeleteRecord(entity_id) => {
                    delete_record(&tx, &entity_id)?;
                }
                StoreWrite::ApplyServerRecord(record) => {
                    if apply_server_record(&tx, &record)? {
                        summary.applied += 1;
                    } else {
                        summary.skipped += 1;
                    }
                }
                StoreWrite::ApplyPulledRecord(record) => {
                    if operation_log::count_unsynced(&tx, &record.id)? > 0 {
                        debug!("Skipping pulled record {} with queued mutations", record.id);
                        summary.skipped += 1;
                    } else if apply_server_record(&tx, &record)? {
                        summary.applied += 1;
                    } else {
                        summary.skipped += 1;
                    }
                }
                StoreWrite::RemoveDeleted(entity_id) => {
                    if operation_log::count_unsynced(&tx, &entity_id)? > 0 {
                        debug!("Keeping deleted record {} with queued mutations", entity_id);
                        summary.skipped += 1;
                    } else {
                        delete_record(&tx, &entity_id)?;
                        summary.applied += 1;
                    }
                }
                StoreWrite::AppendOperation(mut op) => {
                    if op.seq == 0 {
                        op.seq = operation_log::next_seq(&tx)?;
                    }
                    operation_log::insert_operation(&tx, &op)?;
                    summary.appended.push(op);
                }
                StoreWrite::UpdateOperation(id, patch) => {
                    operation_log::patch_operation(&tx, &id, &patch)?;
                }
                StoreWrite::RebaseAfter {
                    entity_id,
                    after_seq,
                    base_version,
                } => {
                    summary.rebased +=
                        operation_log::rebase_after(&tx, &entity_id, after_seq, base_version)?;
                }
                StoreWrite::SetCheckpoint(owner_id, checkpoint) => {
                    tx.execute(
                        "INSERT INTO checkpoints (owner_id, wall, logical) VALUES (?1, ?2, ?3) \
                         ON CONFLICT(owner_id) DO UPDATE SET wall = excluded.wall, logical = excluded.logical",
                        params![
                            owner_id.to_string(),
                            checkpoint.wall_time() as i64,
                            checkpoint.logical() as i64,
                        ],
                    )?;
                }
                StoreWrite::RemoveOperation(id) => {
                    tx.execute(
                        "DELETE FROM operations WHERE op_id = ?1",
                        params![id.to_string()],
                    )?;
                }
                StoreWrite::RevertUnsynced {
                    entity_id,
                    owner_id,
                } => {
                    if operation_log::count_unsynced(&tx, &entity_id)? > 0 {
                        continue;
                    }
                    if read_record(&tx, &entity_id)?.is_some_and(|record| record.version == 0) {
                        delete_record(&tx, &entity_id)?;
                    }
                    tx.execute(
                        "DELETE FROM checkpoints WHERE owner_id = ?1",
                        params![owner_id.to_string()],
                    )?;
                    debug!("Reverted optimistic state of {}", entity_id);
                    summary.applied += 1;
                }
            }
        }

        tx.commit()?;
        Ok(summary)
    }
}

const RECORD_COLUMNS: &str = "entity_id, entity_type, owner_id, data, version, updated_wall, \
     updated_logical, synced_wall, synced_logical";

/// Raw column values of a `records` row.
struct RecordRow {
    entity_id: String,
    entity_type: String,
    owner_id: String,
    data: String,
    version: i64,
    updated_wall: i64,
    updated_logical: i64,
    synced_wall: Option<i64>,
    synced_logical: Option<i64>,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entity_id: row.get(0)?,
            entity_type: row.get(1)?,
            owner_id: row.get(2)?,
            data: row.get(3)?,
            version: row.get(4)?,
            updated_wall: row.get(5)?,
            updated_logical: row.get(6)?,
            synced_wall: row.get(7)?,
            synced_logical: row.get(8)?,
        })
    }

    fn decode(self) -> StorageResult<Record> {
        Ok(Record {
            id: EntityId::from_str(&self.entity_id)?,
            entity_type: self.entity_type,
            owner_id: OwnerId::from_str(&self.owner_id)?,
            data: serde_json::from_str(&self.data)?,
            version: self.version as u64,
            updated_at: HybridTimestamp::new(self.updated_wall as u64, self.updated_logical as u32),
            last_synced_at: self
                .synced_wall
                .map(|wall| HybridTimestamp::new(wall as u64, self.synced_logical.unwrap_or(0) as u32)),
        })
    }
}

fn read_record(conn: &Connection, entity_id: &EntityId) -> StorageResult<Option<Record>> {
    let row = conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM records WHERE entity_id = ?1"),
            params![entity_id.to_string()],
            RecordRow::from_row,
        )
        .optional()?;
    row.map(RecordRow::decode).transpose()
}

fn put_record(conn: &Connection, record: &Record) -> StorageResult<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO records ({RECORD_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ),
        params![
            record.id.to_string(),
            record.entity_type,
            record.owner_id.to_string(),
            serde_json::to_string(&record.data)?,
            record.version as i64,
            record.updated_at.wall_time() as i64,
            record.updated_at.logical() as i64,
            record.last_synced_at.map(|ts| ts.wall_time() as i64),
            record.last_synced_at.map(|ts| ts.logical() as i64),
        ],
    )?;
    Ok(())
}

fn delete_record(conn: &Connection, entity_id: &EntityId) -> StorageResult<bool> {
    let removed = conn.execute(
        "DELETE FROM records WHERE entity_id = ?1",
        params![entity_id.to_string()],
    )?;
    Ok(removed > 0)
}

/// Applies a server record. Returns false when nothing was written.
fn apply_server_record(conn: &Connection, incoming: &Record) -> StorageResult<bool> {
    let local = read_record(conn, &incoming.id)?;

    if let Some(local) = &local {
        if local.version > incoming.version {
            debug!(
                "Ignoring stale server record {} (local v{} > v{})",
                incoming.id, local.version, incoming.version
            );
            return Ok(false);
        }
    }

    if operation_log::count_unsynced(conn, &incoming.id)? > 0 {
        // Later local mutations are still queued: keep their optimistic data
        // and only advance the baseline.
        let Some(mut local) = local else {
            return Ok(false);
        };
        local.version = incoming.version;
        local.last_synced_at = incoming.last_synced_at;
        put_record(conn, &local)?;
        return Ok(true);
    }

    put_record(conn, incoming)?;
    Ok(true)
}

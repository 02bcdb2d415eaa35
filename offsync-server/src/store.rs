//! Authoritative server state: records, tombstones and the audit log.
//!
//! Every submission runs in one SQLite transaction under the store mutex.
//! The version check is a compare-and-swap (`UPDATE ... WHERE version = ?`),
//! so two updates against the same baseline can never both succeed.

use crate::error::{ServerError, ServerResult};
use offsync_types::{
    merge_payload, ChangeSet, EntityId, HybridClock, HybridTimestamp, OperationEnvelope,
    OperationId, OperationKind, OwnerId, Record, SubmitResponse,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Result of applying one envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub response: SubmitResponse,
    /// True when the operation id had already been applied and the stored
    /// response was returned unchanged.
    pub replayed: bool,
}

/// SQLite-backed authoritative store.
pub struct ServerStore {
    conn: Mutex<Connection>,
    clock: HybridClock,
}

impl ServerStore {
    pub fn open(path: impl AsRef<Path>) -> ServerResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        let _mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        info!("Opened server store at {}", path.as_ref().display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> ServerResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> ServerResult<Self> {
        init_schema(&conn)?;
        // Never issue a timestamp at or below one already handed out.
        let floor = latest_timestamp(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock: HybridClock::starting_at(floor),
        })
    }

    fn lock(&self) -> ServerResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ServerError::LockPoisoned)
    }

    /// Applies one operation for `owner_id`.
    pub fn apply(
        &self,
        owner_id: &OwnerId,
        envelope: &OperationEnvelope,
    ) -> ServerResult<Submission> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if let Some(prior) = audit_entry(&tx, &envelope.operation_id)? {
            if prior.owner_id != *owner_id || !prior.envelope.same_mutation(envelope) {
                return Err(ServerError::Validation(format!(
                    "operation id {} was already used for a different mutation",
                    envelope.operation_id
                )));
            }
            debug!(operation = %envelope.operation_id, "Replaying recorded response");
            return Ok(Submission {
                response: prior.response,
                replayed: true,
            });
        }

        let response = match envelope.kind {
            OperationKind::Create => self.create(&tx, owner_id, envelope)?,
            OperationKind::Update => self.update(&tx, owner_id, envelope)?,
            OperationKind::Delete => self.delete(&tx, owner_id, envelope)?,
        };

        if matches!(
            response,
            SubmitResponse::Applied { .. } | SubmitResponse::Deleted { .. }
        ) {
            record_audit(&tx, owner_id, envelope, &response)?;
        }
        tx.commit()?;

        Ok(Submission {
            response,
            replayed: false,
        })
    }

    fn create(
        &self,
        tx: &Transaction<'_>,
        owner_id: &OwnerId,
        envelope: &OperationEnvelope,
    ) -> ServerResult<SubmitResponse> {
        // A Create on an existing id goes through the same baseline check as
        // an Update, so a requeued Create lands once it carries the current
        // version.
        if let Some(current) = read_record(tx, &envelope.entity_id)? {
            return self.compare_and_swap(tx, owner_id, current, envelope);
        }

        let mut record = Record::new(
            envelope.entity_id,
            envelope.entity_type.clone(),
            *owner_id,
            envelope.payload.clone(),
            self.clock.observe(&envelope.origin_timestamp),
        );
        record.version = 1;
        insert_record(tx, &record)?;
        tx.execute(
            "DELETE FROM tombstones WHERE entity_id = ?1",
            params![record.id.to_string()],
        )?;
        Ok(SubmitResponse::Applied { record })
    }

    fn update(
        &self,
        tx: &Transaction<'_>,
        owner_id: &OwnerId,
        envelope: &OperationEnvelope,
    ) -> ServerResult<SubmitResponse> {
        let Some(current) = read_record(tx, &envelope.entity_id)? else {
            return Ok(SubmitResponse::NotFound {
                entity_id: envelope.entity_id,
            });
        };
        self.compare_and_swap(tx, owner_id, current, envelope)
    }

    /// Applies `envelope` onto `current` if its baseline is still the stored
    /// version, otherwise reports the conflict.
    fn compare_and_swap(
        &self,
        tx: &Transaction<'_>,
        owner_id: &OwnerId,
        current: Record,
        envelope: &OperationEnvelope,
    ) -> ServerResult<SubmitResponse> {
        ensure_owner(&current, owner_id)?;
        if current.entity_type != envelope.entity_type {
            return Err(ServerError::Validation(format!(
                "{} is a {}, not a {}",
                current.id, current.entity_type, envelope.entity_type
            )));
        }
        if current.version != envelope.base_version {
            return Ok(SubmitResponse::Conflict {
                server_record: current,
            });
        }

        let mut next = current;
        merge_payload(&mut next.data, &envelope.payload);
        next.version += 1;
        next.updated_at = self.clock.observe(&envelope.origin_timestamp);

        let swapped = tx.execute(
            "UPDATE records SET data = ?1, version = ?2, updated_wall = ?3, updated_logical = ?4 \
             WHERE entity_id = ?5 AND version = ?6",
            params![
                serde_json::to_string(&next.data)?,
                next.version as i64,
                next.updated_at.wall_time() as i64,
                next.updated_at.logical() as i64,
                next.id.to_string(),
                envelope.base_version as i64,
            ],
        )?;
        if swapped == 0 {
            return match read_record(tx, &envelope.entity_id)? {
                Some(server_record) => Ok(SubmitResponse::Conflict { server_record }),
                None => Ok(SubmitResponse::NotFound {
                    entity_id: envelope.entity_id,
                }),
            };
        }
        Ok(SubmitResponse::Applied { record: next })
    }

    fn delete(
        &self,
        tx: &Transaction<'_>,
        owner_id: &OwnerId,
        envelope: &OperationEnvelope,
    ) -> ServerResult<SubmitResponse> {
        let entity_id = envelope.entity_id;
        if let Some(current) = read_record(tx, &entity_id)? {
            ensure_owner(&current, owner_id)?;
            let deleted_at = self.clock.observe(&envelope.origin_timestamp);
            tx.execute(
                "DELETE FROM records WHERE entity_id = ?1",
                params![entity_id.to_string()],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO tombstones (entity_id, owner_id, deleted_wall, deleted_logical) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    entity_id.to_string(),
                    owner_id.to_string(),
                    deleted_at.wall_time() as i64,
                    deleted_at.logical() as i64,
                ],
            )?;
        }
        Ok(SubmitResponse::Deleted { entity_id })
    }

    /// Records of `owner_id` written after `since`, deletions after `since`,
    /// and the checkpoint to resume from.
    pub fn changes(
        &self,
        owner_id: &OwnerId,
        since: Option<HybridTimestamp>,
    ) -> ServerResult<ChangeSet> {
        let conn = self.lock()?;
        let since = since.unwrap_or(HybridTimestamp::ZERO);
        let owner = owner_id.to_string();
        let wall = since.wall_time() as i64;
        let logical = since.logical() as i64;

        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE owner_id = ?1 \
             AND (updated_wall > ?2 OR (updated_wall = ?2 AND updated_logical > ?3)) \
             ORDER BY updated_wall, updated_logical"
        ))?;
        let rows = stmt.query_map(params![owner, wall, logical], RecordRow::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.decode()?);
        }

        let mut stmt = conn.prepare(
            "SELECT entity_id FROM tombstones WHERE owner_id = ?1 \
             AND (deleted_wall > ?2 OR (deleted_wall = ?2 AND deleted_logical > ?3)) \
             ORDER BY deleted_wall, deleted_logical",
        )?;
        let rows = stmt.query_map(params![owner, wall, logical], |row| row.get::<_, String>(0))?;
        let mut deleted = Vec::new();
        for row in rows {
            deleted.push(parse::<EntityId>(&row?)?);
        }

        // Writes happen under the same lock, so anything later gets a greater
        // timestamp than the clock's current value.
        let checkpoint = self.clock.peek().max(since);
        Ok(ChangeSet {
            records,
            deleted,
            checkpoint,
        })
    }

    pub fn record(&self, entity_id: &EntityId) -> ServerResult<Option<Record>> {
        let conn = self.lock()?;
        read_record(&conn, entity_id)
    }

    /// Number of applied operations in the audit log.
    pub fn audit_len(&self) -> ServerResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn init_schema(conn: &Connection) -> ServerResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
            entity_id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            data TEXT NOT NULL,
            version INTEGER NOT NULL,
            updated_wall INTEGER NOT NULL,
            updated_logical INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_records_owner
            ON records(owner_id, updated_wall, updated_logical);

        CREATE TABLE IF NOT EXISTS tombstones (
            entity_id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            deleted_wall INTEGER NOT NULL,
            deleted_logical INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            operation_id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            envelope TEXT NOT NULL,
            response TEXT NOT NULL,
            received_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn latest_timestamp(conn: &Connection) -> ServerResult<HybridTimestamp> {
    let mut latest = HybridTimestamp::ZERO;
    for sql in [
        "SELECT updated_wall, updated_logical FROM records \
         ORDER BY updated_wall DESC, updated_logical DESC LIMIT 1",
        "SELECT deleted_wall, deleted_logical FROM tombstones \
         ORDER BY deleted_wall DESC, deleted_logical DESC LIMIT 1",
    ] {
        let found = conn
            .query_row(sql, [], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))
            .optional()?;
        if let Some((wall, logical)) = found {
            latest = latest.max(HybridTimestamp::new(wall as u64, logical as u32));
        }
    }
    Ok(latest)
}

fn ensure_owner(record: &Record, owner_id: &OwnerId) -> ServerResult<()> {
    if record.owner_id != *owner_id {
        return Err(ServerError::Forbidden(format!(
            "{} belongs to another owner",
            record.id
        )));
    }
    Ok(())
}

fn parse<T>(value: &str) -> ServerResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e| ServerError::InvalidData(format!("{value}: {e}")))
}

// ── Records ──────────────────────────────────────────────────────

const RECORD_COLUMNS: &str =
    "entity_id, entity_type, owner_id, data, version, updated_wall, updated_logical";

struct RecordRow {
    entity_id: String,
    entity_type: String,
    owner_id: String,
    data: String,
    version: i64,
    updated_wall: i64,
    updated_logical: i64,
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
        })
    }

    fn decode(self) -> ServerResult<Record> {
        let mut record = Record::new(
            parse(&self.entity_id)?,
            self.entity_type,
            parse(&self.owner_id)?,
            serde_json::from_str(&self.data)?,
            HybridTimestamp::new(self.updated_wall as u64, self.updated_logical as u32),
        );
        record.version = self.version as u64;
        Ok(record)
    }
}

fn read_record(conn: &Connection, entity_id: &EntityId) -> ServerResult<Option<Record>> {
    let row = conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM records WHERE entity_id = ?1"),
            params![entity_id.to_string()],
            RecordRow::from_row,
        )
        .optional()?;
    row.map(RecordRow::decode).transpose()
}

fn insert_record(conn: &Connection, record: &Record) -> ServerResult<()> {
    conn.execute(
        &format!("INSERT INTO records ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        params![
            record.id.to_string(),
            record.entity_type,
            record.owner_id.to_string(),
            serde_json::to_string(&record.data)?,
            record.version as i64,
            record.updated_at.wall_time() as i64,
            record.updated_at.logical() as i64,
        ],
    )?;
    Ok(())
}

// ── Audit log ────────────────────────────────────────────────────

struct AuditEntry {
    owner_id: OwnerId,
    envelope: OperationEnvelope,
    response: SubmitResponse,
}

fn audit_entry(conn: &Connection, id: &OperationId) -> ServerResult<Option<AuditEntry>> {
    let row = conn
        .query_row(
            "SELECT owner_id, envelope, response FROM audit_log WHERE operation_id = ?1",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;
    let Some((owner_id, envelope, response)) = row else {
        return Ok(None);
    };
    Ok(Some(AuditEntry {
        owner_id: parse(&owner_id)?,
        envelope: serde_json::from_str(&envelope)?,
        response: serde_json::from_str(&response)?,
    }))
}

fn record_audit(
    conn: &Connection,
    owner_id: &OwnerId,
    envelope: &OperationEnvelope,
    response: &SubmitResponse,
) -> ServerResult<()> {
    conn.execute(
        "INSERT INTO audit_log (operation_id, owner_id, envelope, response, received_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            envelope.operation_id.to_string(),
            owner_id.to_string(),
            serde_json::to_string(envelope)?,
            serde_json::to_string(response)?,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

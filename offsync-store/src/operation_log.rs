//! Operation log rows, filters and patches.

use crate::error::{StorageError, StorageResult};
use offsync_types::{
    EntityId, FailureKind, HybridTimestamp, Operation, OperationId, OperationKind,
    OperationState, Outcome, OwnerId,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::str::FromStr;

/// Selects operations from the log. Results are always ordered by `seq`.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    /// Matching states; empty means any state.
    pub states: Vec<OperationState>,
    /// Restricts to one entity.
    pub entity_id: Option<EntityId>,
    /// Keeps only operations with `attempt < attempt_below`.
    pub attempt_below: Option<u32>,
}

impl OperationFilter {
    /// Every operation.
    pub fn all() -> Self {
        Self::default()
    }

    /// Operations in one state.
    pub fn with_state(state: OperationState) -> Self {
        Self {
            states: vec![state],
            ..Self::default()
        }
    }

    /// Operations that are not yet Synced.
    pub fn unsynced() -> Self {
        Self {
            states: vec![
                OperationState::Pending,
                OperationState::InFlight,
                OperationState::Failed,
            ],
            ..Self::default()
        }
    }

    /// Restricts the filter to one entity.
    #[must_use]
    pub fn for_entity(mut self, entity_id: EntityId) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    /// Keeps only operations below an attempt count.
    #[must_use]
    pub fn attempt_below(mut self, max: u32) -> Self {
        self.attempt_below = Some(max);
        self
    }
}

/// Partial update of an operation. `None` leaves a field unchanged; the
/// nested `Option`s allow clearing nullable fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationPatch {
    pub state: Option<OperationState>,
    pub attempt: Option<u32>,
    pub last_error: Option<Option<String>>,
    pub failure: Option<Option<FailureKind>>,
    pub outcome: Option<Option<Outcome>>,
    pub base_version: Option<u64>,
}

impl OperationPatch {
    /// Patch that only changes the state.
    pub fn state(state: OperationState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Marks the operation Synced with the given outcome.
    pub fn synced(outcome: Outcome) -> Self {
        Self {
            state: Some(OperationState::Synced),
            last_error: Some(None),
            failure: Some(None),
            outcome: Some(Some(outcome)),
            ..Self::default()
        }
    }

    /// Marks the operation Failed.
    pub fn failed(kind: FailureKind, attempt: u32, error: impl Into<String>) -> Self {
        Self {
            state: Some(OperationState::Failed),
            attempt: Some(attempt),
            last_error: Some(Some(error.into())),
            failure: Some(Some(kind)),
            ..Self::default()
        }
    }

    /// Returns the operation to Pending after a transient failure.
    pub fn retry_later(attempt: u32, error: impl Into<String>) -> Self {
        Self {
            state: Some(OperationState::Pending),
            attempt: Some(attempt),
            last_error: Some(Some(error.into())),
            ..Self::default()
        }
    }

    /// Resets attempts and failure bookkeeping and readmits to Pending.
    pub fn reset() -> Self {
        Self {
            state: Some(OperationState::Pending),
            attempt: Some(0),
            last_error: Some(None),
            failure: Some(None),
            ..Self::default()
        }
    }

    pub(crate) fn apply_to(&self, op: &mut Operation) {
        if let Some(state) = self.state {
            op.state = state;
        }
        if let Some(attempt) = self.attempt {
            op.attempt = attempt;
        }
        if let Some(last_error) = &self.last_error {
            op.last_error = last_error.clone();
        }
        if let Some(failure) = self.failure {
            op.failure = failure;
        }
        if let Some(outcome) = self.outcome {
            op.outcome = outcome;
        }
        if let Some(base_version) = self.base_version {
            op.base_version = base_version;
        }
    }
}

const OPERATION_COLUMNS: &str = "op_id, seq, kind, entity_type, entity_id, owner_id, payload, \
     base_version, origin_wall, origin_logical, state, attempt, last_error, failure, outcome";

/// Raw column values of an `operations` row.
struct OperationRow {
    op_id: String,
    seq: i64,
    kind: String,
    entity_type: String,
    entity_id: String,
    owner_id: String,
    payload: String,
    base_version: i64,
    origin_wall: i64,
    origin_logical: i64,
    state: String,
    attempt: i64,
    last_error: Option<String>,
    failure: Option<String>,
    outcome: Option<String>,
}

impl OperationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            op_id: row.get(0)?,
            seq: row.get(1)?,
            kind: row.get(2)?,
            entity_type: row.get(3)?,
            entity_id: row.get(4)?,
            owner_id: row.get(5)?,
            payload: row.get(6)?,
            base_version: row.get(7)?,
            origin_wall: row.get(8)?,
            origin_logical: row.get(9)?,
            state: row.get(10)?,
            attempt: row.get(11)?,
            last_error: row.get(12)?,
            failure: row.get(13)?,
            outcome: row.get(14)?,
        })
    }

    fn decode(self) -> StorageResult<Operation> {
        Ok(Operation {
            id: OperationId::from_str(&self.op_id)?,
            seq: self.seq as u64,
            kind: OperationKind::from_str(&self.kind)?,
            entity_type: self.entity_type,
            entity_id: EntityId::from_str(&self.entity_id)?,
            owner_id: OwnerId::from_str(&self.owner_id)?,
            payload: serde_json::from_str(&self.payload)?,
            base_version: self.base_version as u64,
            origin_timestamp: HybridTimestamp::new(
                self.origin_wall as u64,
                self.origin_logical as u32,
            ),
            state: OperationState::from_str(&self.state)?,
            attempt: self.attempt as u32,
            last_error: self.last_error,
            failure: self.failure.as_deref().map(FailureKind::from_str).transpose()?,
            outcome: self
                .outcome
                .as_deref()
                .map(serde_json::from_str::<Outcome>)
                .transpose()?,
        })
    }
}

/// Reserves the next enqueue sequence number.
pub(crate) fn next_seq(conn: &Connection) -> StorageResult<u64> {
    conn.execute(
        "UPDATE meta SET value = value + 1 WHERE key = 'op_seq'",
        [],
    )?;
    let seq: i64 = conn.query_row(
        "SELECT value FROM meta WHERE key = 'op_seq'",
        [],
        |row| row.get(0),
    )?;
    Ok(seq as u64)
}

pub(crate) fn insert_operation(conn: &Connection, op: &Operation) -> StorageResult<()> {
    let outcome = op.outcome.map(|o| serde_json::to_string(&o)).transpose()?;
    conn.execute(
        &format!(
            "INSERT INTO operations ({OPERATION_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
        ),
        params![
            op.id.to_string(),
            op.seq as i64,
            op.kind.as_str(),
            op.entity_type,
            op.entity_id.to_string(),
            op.owner_id.to_string(),
            serde_json::to_string(&op.payload)?,
            op.base_version as i64,
            op.origin_timestamp.wall_time() as i64,
            op.origin_timestamp.logical() as i64,
            op.state.as_str(),
            op.attempt as i64,
            op.last_error,
            op.failure.map(|f| f.as_str()),
            outcome,
        ],
    )?;
    Ok(())
}

/// Rewrites the mutable columns of an existing operation.
pub(crate) fn write_operation(conn: &Connection, op: &Operation) -> StorageResult<()> {
    let outcome = op.outcome.map(|o| serde_json::to_string(&o)).transpose()?;
    let changed = conn.execute(
        "UPDATE operations SET state = ?2, attempt = ?3, last_error = ?4, failure = ?5, \
         outcome = ?6, base_version = ?7 WHERE op_id = ?1",
        params![
            op.id.to_string(),
            op.state.as_str(),
            op.attempt as i64,
            op.last_error,
            op.failure.map(|f| f.as_str()),
            outcome,
            op.base_version as i64,
        ],
    )?;
    if changed == 0 {
        return Err(StorageError::NotFound(format!("operation {}", op.id)));
    }
    Ok(())
}

pub(crate) fn read_operation(conn: &Connection, id: &OperationId) -> StorageResult<Option<Operation>> {
    let row = conn
        .query_row(
            &format!("SELECT {OPERATION_COLUMNS} FROM operations WHERE op_id = ?1"),
            params![id.to_string()],
            OperationRow::from_row,
        )
        .optional()?;
    row.map(OperationRow::decode).transpose()
}

pub(crate) fn patch_operation(
    conn: &Connection,
    id: &OperationId,
    patch: &OperationPatch,
) -> StorageResult<Operation> {
    let mut op = read_operation(conn, id)?
        .ok_or_else(|| StorageError::NotFound(format!("operation {id}")))?;
    patch.apply_to(&mut op);
    write_operation(conn, &op)?;
    Ok(op)
}

pub(crate) fn query_operations(
    conn: &Connection,
    filter: &OperationFilter,
) -> StorageResult<Vec<Operation>> {
    let mut clauses = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if !filter.states.is_empty() {
        let mut marks = Vec::with_capacity(filter.states.len());
        for state in &filter.states {
            values.push(Value::Text(state.as_str().to_string()));
            marks.push(format!("?{}", values.len()));
        }
        clauses.push(format!("state IN ({})", marks.join(", ")));
    }
    if let Some(entity_id) = filter.entity_id {
        values.push(Value::Text(entity_id.to_string()));
        clauses.push(format!("entity_id = ?{}", values.len()));
    }
    if let Some(max) = filter.attempt_below {
        values.push(Value::Integer(i64::from(max)));
        clauses.push(format!("attempt < ?{}", values.len()));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {OPERATION_COLUMNS} FROM operations {where_clause} ORDER BY seq ASC, rowid ASC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), OperationRow::from_row)?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row?.decode()?);
    }
    Ok(result)
}

/// Counts Pending and InFlight operations of an entity.
pub(crate) fn count_unsynced(conn: &Connection, entity_id: &EntityId) -> StorageResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM operations WHERE entity_id = ?1 AND state IN ('pending', 'in_flight')",
        params![entity_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

pub(crate) fn rebase_after(
    conn: &Connection,
    entity_id: &EntityId,
    after_seq: u64,
    base_version: u64,
) -> StorageResult<usize> {
    let changed = conn.execute(
        "UPDATE operations SET base_version = ?3 \
         WHERE entity_id = ?1 AND seq > ?2 AND state IN ('pending', 'in_flight', 'failed')",
        params![entity_id.to_string(), after_seq as i64, base_version as i64],
    )?;
    Ok(changed)
}

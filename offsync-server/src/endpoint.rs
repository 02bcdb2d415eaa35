//! Reconciliation endpoint: validates envelopes and runs them against the
//! store off the async runtime.

use crate::error::{ServerError, ServerResult};
use crate::store::ServerStore;
use offsync_types::{ChangeSet, HybridTimestamp, OperationEnvelope, OperationKind, OwnerId, SubmitResponse};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ReconciliationEndpoint {
    store: Arc<ServerStore>,
}

impl ReconciliationEndpoint {
    pub fn new(store: ServerStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> &ServerStore {
        &self.store
    }

    /// Applies one operation on behalf of `owner_id`.
    pub async fn submit(
        &self,
        owner_id: OwnerId,
        envelope: OperationEnvelope,
    ) -> ServerResult<SubmitResponse> {
        validate(&envelope)?;
        let store = Arc::clone(&self.store);
        let submission = tokio::task::spawn_blocking(move || {
            store
                .apply(&owner_id, &envelope)
                .map(|submission| (submission, envelope))
        })
        .await
        .map_err(|e| ServerError::Task(e.to_string()))?;

        let (submission, envelope) = submission?;
        if submission.replayed {
            info!(operation = %envelope.operation_id, "Duplicate operation replayed");
        } else {
            debug!(
                operation = %envelope.operation_id,
                entity = %envelope.entity_id,
                kind = %envelope.kind,
                base_version = envelope.base_version,
                result = submission.response.label(),
                "Operation reconciled"
            );
        }
        Ok(submission.response)
    }

    /// Changes of `owner_id` after `since`.
    pub async fn changes(
        &self,
        owner_id: OwnerId,
        since: Option<HybridTimestamp>,
    ) -> ServerResult<ChangeSet> {
        let store = Arc::clone(&self.store);
        let changes = tokio::task::spawn_blocking(move || store.changes(&owner_id, since))
            .await
            .map_err(|e| ServerError::Task(e.to_string()))??;
        debug!(
            owner = %owner_id,
            records = changes.records.len(),
            deleted = changes.deleted.len(),
            checkpoint = %changes.checkpoint,
            "Served changes"
        );
        Ok(changes)
    }
}

fn validate(envelope: &OperationEnvelope) -> ServerResult<()> {
    if envelope.entity_type.trim().is_empty() {
        return Err(ServerError::Validation("entity_type must not be empty".into()));
    }
    let needs_object = matches!(envelope.kind, OperationKind::Create | OperationKind::Update);
    if needs_object && !envelope.payload.is_object() {
        return Err(ServerError::Validation(format!(
            "{} payload must be a JSON object",
            envelope.kind
        )));
    }
    Ok(())
}

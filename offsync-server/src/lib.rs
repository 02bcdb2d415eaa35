//! Remote reconciliation endpoint for offsync clients.
//!
//! Holds the authoritative copy of every record. Clients submit one operation
//! at a time; the endpoint applies it when the client's baseline version is
//! current and answers with a conflict carrying the current record when it is
//! not. Clients pull changes since their checkpoint.

mod endpoint;
mod error;
mod store;

pub use endpoint::ReconciliationEndpoint;
pub use error::{ServerError, ServerResult};
pub use store::{ServerStore, Submission};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use offsync_types::protocol::{OWNER_HEADER, PROTOCOL_VERSION};
use offsync_types::{ChangeSet, HybridTimestamp, OperationEnvelope, OwnerId, SubmitResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub protocol_version: u32,
}

#[derive(Deserialize, Debug)]
struct ChangesQuery {
    since: Option<String>,
}

fn owner_from(headers: &HeaderMap) -> ServerResult<OwnerId> {
    let value = headers
        .get(OWNER_HEADER)
        .ok_or_else(|| ServerError::Unauthorized(format!("missing {OWNER_HEADER} header")))?;
    value
        .to_str()
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ServerError::Unauthorized(format!("invalid {OWNER_HEADER} header")))
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        protocol_version: PROTOCOL_VERSION,
    })
}

async fn submit_handler(
    State(endpoint): State<Arc<ReconciliationEndpoint>>,
    headers: HeaderMap,
    Json(envelope): Json<OperationEnvelope>,
) -> ServerResult<(StatusCode, Json<SubmitResponse>)> {
    let owner_id = owner_from(&headers)?;
    let response = endpoint.submit(owner_id, envelope).await?;
    let status = match response {
        SubmitResponse::Conflict { .. } => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    };
    Ok((status, Json(response)))
}

async fn changes_handler(
    State(endpoint): State<Arc<ReconciliationEndpoint>>,
    headers: HeaderMap,
    Query(query): Query<ChangesQuery>,
) -> ServerResult<Json<ChangeSet>> {
    let owner_id = owner_from(&headers)?;
    let since = query
        .since
        .as_deref()
        .map(str::parse::<HybridTimestamp>)
        .transpose()?;
    Ok(Json(endpoint.changes(owner_id, since).await?))
}

/// Build the HTTP API router around a reconciliation endpoint.
pub fn build_router(endpoint: Arc<ReconciliationEndpoint>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/operations", post(submit_handler))
        .route("/api/v1/changes", get(changes_handler))
        .with_state(endpoint)
}

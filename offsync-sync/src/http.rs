//! HTTP transport against an offsync reconciliation server.
//!
//! Status mapping:
//! - 200 and 409 carry a [`SubmitResponse`] body
//! - other 4xx become [`TransportError::Rejected`]
//! - 5xx, network errors, timeouts and undecodable bodies become
//!   [`TransportError::Transient`]

use crate::error::{SyncError, SyncResult, TransportError};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use offsync_types::protocol::OWNER_HEADER;
use offsync_types::{
    ChangeSet, ErrorBody, HybridTimestamp, Operation, OperationEnvelope, OwnerId, SubmitResponse,
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// HTTP transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpTransportConfig {
    /// Server root, e.g. `http://127.0.0.1:4100`.
    pub base_url: String,
    /// Per-request timeout (ms).
    pub request_timeout_ms: u64,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4100".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

/// [`SyncTransport`] over the server's `/api/v1` routes.
pub struct HttpTransport {
    config: HttpTransportConfig,
    client: Client,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

fn network_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Transient(format!("request timed out: {e}"))
    } else {
        TransportError::Transient(format!("network error: {e}"))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    response
        .json::<T>()
        .await
        .map_err(|e| TransportError::Transient(format!("invalid response body: {e}")))
}

/// Maps a non-success status to a transport error.
async fn status_error(response: Response) -> TransportError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let reason = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or(text);

    // Timeouts and throttling are retried like server errors.
    let retryable = matches!(
        status,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
    );
    if status.is_client_error() && !retryable {
        TransportError::Rejected {
            status: status.as_u16(),
            reason,
        }
    } else {
        TransportError::Transient(format!("status {}: {}", status.as_u16(), reason))
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn submit_operation(&self, op: &Operation) -> Result<SubmitResponse, TransportError> {
        let envelope = OperationEnvelope::from(op);
        let response = self
            .client
            .post(self.url("operations"))
            .header(OWNER_HEADER, op.owner_id.to_string())
            .json(&envelope)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        debug!(operation = %op.id, status = status.as_u16(), "Submitted operation");
        if status.is_success() || status == StatusCode::CONFLICT {
            decode(response).await
        } else {
            Err(status_error(response).await)
        }
    }

    async fn fetch_changes(
        &self,
        owner_id: &OwnerId,
        since: Option<HybridTimestamp>,
    ) -> Result<ChangeSet, TransportError> {
        let mut request = self
            .client
            .get(self.url("changes"))
            .header(OWNER_HEADER, owner_id.to_string());
        if let Some(since) = since {
            request = request.query(&[("since", since.to_string())]);
        }

        let response = request.send().await.map_err(network_error)?;
        if response.status().is_success() {
            decode(response).await
        } else {
            Err(status_error(response).await)
        }
    }

    async fn probe(&self) -> Result<(), TransportError> {
        let response = self
            .client
            .get(self.url("health"))
            .send()
            .await
            .map_err(network_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Transient(format!(
                "health check returned {}",
                response.status().as_u16()
            )))
        }
    }
}

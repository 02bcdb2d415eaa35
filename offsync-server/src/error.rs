//! Error types for the reconciliation server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use offsync_types::ErrorBody;
use thiserror::Error;
use tracing::error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The caller does not own the record.
    #[error("{0}")]
    Forbidden(String),

    /// The request is malformed or reuses an operation id.
    #[error("{0}")]
    Validation(String),

    /// The owner header is missing or unparsable.
    #[error("{0}")]
    Unauthorized(String),

    /// A stored row could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("server store lock poisoned")]
    LockPoisoned,

    #[error("background task failed: {0}")]
    Task(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Database(_)
            | Self::Serialization(_)
            | Self::InvalidData(_)
            | Self::LockPoisoned
            | Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Forbidden(_) => "forbidden",
            Self::Validation(_) => "validation",
            Self::Unauthorized(_) => "unauthorized",
            _ => "internal",
        }
    }
}

impl From<offsync_types::Error> for ServerError {
    fn from(e: offsync_types::Error) -> Self {
        Self::Validation(e.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(ErrorBody::new(self.code(), self.to_string()))).into_response()
    }
}

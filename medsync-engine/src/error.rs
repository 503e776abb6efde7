//! Error types for medsync-engine
//!
//! Two layers: `SyncError` is the engine-internal taxonomy that drives retry
//! and job-state decisions; `ApiError` is the HTTP-facing error for the
//! control surface. Record- and page-level errors never cross the job
//! boundary; only terminal job failures and storage exhaustion surface to
//! the API as status text.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Engine error taxonomy
///
/// The variant determines the handling policy, not the message:
/// - `Transient`: retry with bounded backoff
/// - `RateLimited`: cooldown honoring the source hint, unbounded retries
/// - `PermanentRecord`: skip one record or page, log, continue
/// - `PermanentJob`: consecutive-failure budget exhausted, job fails
/// - `ResourceExhausted`: storage threshold crossed, job pauses
/// - `WriteConflict`: batch-level retry inside the batcher only
#[derive(Debug, Error)]
pub enum SyncError {
    /// Timeout, 5xx, connection reset; retryable with backoff
    #[error("Transient error: {0}")]
    Transient(String),

    /// 429/503 with an optional retry-after hint from the source
    #[error("Rate limited by source")]
    RateLimited { retry_after: Option<Duration> },

    /// One record or page is unusable; the stream continues past it
    #[error("Permanent record/page error: {0}")]
    PermanentRecord(String),

    /// The job cannot make progress; surfaced to operators
    #[error("Permanent job error: {0}")]
    PermanentJob(String),

    /// Managed storage is over budget; self-resolving via the governor
    #[error("Storage exhausted: {0}")]
    ResourceExhausted(String),

    /// Write conflict (deadlock / SQLITE_BUSY) during a batch commit
    #[error("Write conflict: {0}")]
    WriteConflict(String),

    /// Database error outside the conflict path
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error on spool or temp files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether the same operation may be retried after a backoff delay
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transient(_) | SyncError::RateLimited { .. } | SyncError::WriteConflict(_)
        )
    }

    /// Whether this error fails the current page only, not the job
    pub fn is_page_scoped(&self) -> bool {
        matches!(self, SyncError::PermanentRecord(_))
    }

    /// Short status text for operators; never a stack trace
    pub fn status_text(&self) -> String {
        self.to_string()
    }
}

/// API error type for the control surface
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., job already running for this source
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// medsync-common error
    #[error("Common error: {0}")]
    Common(#[from] medsync_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

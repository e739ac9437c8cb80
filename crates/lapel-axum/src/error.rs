//! HTTP error type and status mappings.
//!
//! Every handler failure becomes a small JSON body with a stable shape;
//! raw internals never reach the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use lapel_pipeline::registry::AttachError;

/// Handler-facing error type.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Missing or wrong token.
    #[error("authentication failed")]
    Unauthorized,

    /// Resource not found (session, download token).
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Session admission refused.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Upload larger than the configured ceiling.
    #[error("payload too large")]
    PayloadTooLarge,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            HttpError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            HttpError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            HttpError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            HttpError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            HttpError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            HttpError::Internal(message) => {
                tracing::error!(error = %message, "internal handler error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: message,
            status: status.as_u16(),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<AttachError> for HttpError {
    fn from(err: AttachError) -> Self {
        match err {
            AttachError::Conflict => HttpError::Conflict(err.to_string()),
            AttachError::InvalidSessionId => HttpError::BadRequest(err.to_string()),
        }
    }
}

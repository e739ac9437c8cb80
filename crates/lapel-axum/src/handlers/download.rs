//! `GET /download/{token}` — the playback fallback artifact.
//!
//! Tokens are single-use and expiry-bound: the first fetch consumes the
//! handle and deletes the file; anything after that is a 404.

use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};

use crate::error::HttpError;
use crate::state::AppState;

pub async fn fetch(
    State(ctx): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, HttpError> {
    match ctx.downloads.consume(&token).await {
        Some(artifact) => {
            tracing::info!(%token, bytes = artifact.bytes.len(), "download consumed");
            Ok(([(CONTENT_TYPE, artifact.content_type)], artifact.bytes).into_response())
        }
        None => Err(HttpError::NotFound("unknown or expired download".to_string())),
    }
}

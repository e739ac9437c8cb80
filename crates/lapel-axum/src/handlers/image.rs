//! `POST /image?session=<id>` — out-of-band image intake.
//!
//! Accepts the still either as a raw `application/octet-stream` body or as
//! the first file part of a multipart form. The bytes are sniffed (JPEG,
//! PNG, WebP), written under the session's temp directory, and bound to
//! the session's visual context through the controller's input queue — a
//! new upload atomically replaces the previous one.

use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lapel_core::image::sniff_format;
use lapel_core::session::ImageContext;
use lapel_pipeline::controller::SessionInput;

use crate::auth::authorized;
use crate::error::HttpError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub session: String,
    pub token: Option<String>,
    pub filename: Option<String>,
}

/// Response body, mirroring the channel's `image_received` frame.
#[derive(Debug, Serialize)]
pub struct ImageReceivedResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub filename: String,
}

pub async fn upload(
    State(ctx): State<AppState>,
    Query(query): Query<ImageQuery>,
    request: Request,
) -> Result<Json<ImageReceivedResponse>, HttpError> {
    if !authorized(&ctx.settings, request.headers(), query.token.as_deref()) {
        return Err(HttpError::Unauthorized);
    }

    let Some(input_tx) = ctx.registry.input_sender(&query.session).await else {
        return Err(HttpError::NotFound(format!("no session {:?}", query.session)));
    };

    let (upload_name, bytes) = read_image_body(&ctx, &query, request).await?;
    if bytes.is_empty() {
        return Err(HttpError::BadRequest("empty image payload".to_string()));
    }
    let Some(mime) = sniff_format(&bytes) else {
        return Err(HttpError::BadRequest(
            "unsupported image format (expected JPEG, PNG, or WebP)".to_string(),
        ));
    };

    let _ = input_tx.send(SessionInput::ImageUploadStarted).await;

    let filename = sanitize_filename(upload_name.as_deref().unwrap_or("capture.jpg"));
    let images_dir = ctx.registry.session_dir(&query.session).join("images");
    let stored_path = images_dir.join(format!("{}-{filename}", Uuid::new_v4().simple()));

    let write = async {
        tokio::fs::create_dir_all(&images_dir).await?;
        tokio::fs::write(&stored_path, &bytes).await
    };
    if let Err(err) = write.await {
        tracing::error!(error = %err, "image write failed");
        let _ = input_tx.send(SessionInput::ImageUploadFailed).await;
        return Err(HttpError::Internal(err.to_string()));
    }

    let context = ImageContext::new(filename.clone(), stored_path, mime, bytes.len() as u64);
    if input_tx
        .send(SessionInput::ImageStored(context))
        .await
        .is_err()
    {
        return Err(HttpError::NotFound(format!(
            "session {:?} is shutting down",
            query.session
        )));
    }

    tracing::info!(session = %query.session, %filename, bytes = bytes.len(), "image bound to session");
    Ok(Json(ImageReceivedResponse {
        kind: "image_received",
        filename,
    }))
}

/// Pull the image bytes out of either body shape.
async fn read_image_body(
    ctx: &AppState,
    query: &ImageQuery,
    request: Request,
) -> Result<(Option<String>, Vec<u8>), HttpError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    if is_multipart {
        let state = ();
        let mut multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|err| HttpError::BadRequest(err.to_string()))?;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| HttpError::BadRequest(err.to_string()))?
        {
            let file_name = field.file_name().map(ToString::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|_| HttpError::PayloadTooLarge)?;
            if !bytes.is_empty() {
                return Ok((file_name.or_else(|| query.filename.clone()), bytes.to_vec()));
            }
        }
        return Err(HttpError::BadRequest("multipart had no file part".to_string()));
    }

    let bytes = axum::body::to_bytes(request.into_body(), ctx.settings.max_image_bytes)
        .await
        .map_err(|_| HttpError::PayloadTooLarge)?;
    Ok((query.filename.clone(), bytes.to_vec()))
}

/// Keep stored filenames to one boring path component.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.').to_string();
    if trimmed.is_empty() {
        "capture.jpg".to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_are_flattened_to_one_component() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_filename("photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_filename("..."), "capture.jpg");
        assert_eq!(sanitize_filename("a b.png"), "a_b.png");
    }
}

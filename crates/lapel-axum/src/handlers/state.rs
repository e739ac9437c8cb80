//! `GET /state?session=<id>` — server-authoritative session snapshot.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use lapel_core::session::SessionSnapshot;

use crate::error::HttpError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    pub session: String,
}

pub async fn get(
    State(ctx): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Result<Json<SessionSnapshot>, HttpError> {
    match ctx.registry.snapshot(&query.session).await {
        Some(snapshot) => Ok(Json(snapshot)),
        None => Err(HttpError::NotFound(format!(
            "no session {:?}",
            query.session
        ))),
    }
}

//! `GET /health` — liveness and collaborator inventory. No auth.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    /// Seconds since startup.
    pub uptime: f64,
    /// Configured collaborator engines, STT/LLM/TTS order.
    pub models: Vec<String>,
}

pub async fn get(State(ctx): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        uptime: ctx.uptime_secs(),
        models: ctx.engine_names.clone(),
    })
}

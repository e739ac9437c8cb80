//! Route definitions and router construction.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Create the router with the full HTTP + WebSocket surface.
pub fn create_router(ctx: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let image_limit = DefaultBodyLimit::max(ctx.settings.max_image_bytes);

    Router::new()
        .route("/health", get(handlers::health::get))
        .route("/state", get(handlers::state::get))
        .route(
            "/image",
            post(handlers::image::upload).layer(image_limit),
        )
        .route("/download/{token}", get(handlers::download::fetch))
        .route("/ws", get(ws::attach))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

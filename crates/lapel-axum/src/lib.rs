//! Axum adapter for the lapel orchestrator.
//!
//! Hosts the duplex WebSocket channel (`GET /ws`) and the narrow HTTP
//! surface: `GET /health`, `GET /state`, `POST /image`, and the playback
//! fallback `GET /download/{token}`. Handlers stay thin — they
//! authenticate, translate, and delegate to the pipeline crate through the
//! shared [`ServerContext`].

#![deny(unused_crate_dependencies)]

// Silence unused dev-dependency warnings: these back the integration tests
// in tests/, not the in-crate unit tests.
#[cfg(test)]
use async_trait as _;
#[cfg(test)]
use http_body_util as _;
#[cfg(test)]
use serde_json as _;
#[cfg(test)]
use tempfile as _;
#[cfg(test)]
use tower as _;

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod ws;

pub use bootstrap::{bootstrap, bootstrap_with_engines, serve, ServerContext};
pub use error::HttpError;
pub use routes::create_router;
pub use state::AppState;

//! Shared application state type.

use std::sync::Arc;

use crate::bootstrap::ServerContext;

/// Application state shared across all handlers: an Arc-wrapped
/// [`ServerContext`] containing the settings, the session registry, and
/// the download store.
pub type AppState = Arc<ServerContext>;

//! Shared-token authentication.
//!
//! The device presents the configured token either as a bearer header or
//! as a `token` query parameter (the ESP32 HTTP stack cannot always set
//! headers on a WebSocket upgrade).

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use lapel_core::settings::Settings;

/// Check a presented credential against the configured token.
#[must_use]
pub fn authorized(settings: &Settings, headers: &HeaderMap, query_token: Option<&str>) -> bool {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match bearer.or(query_token) {
        Some(presented) => presented == settings.ws_token,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::HeaderValue;

    fn settings() -> Settings {
        Settings::with_defaults("sekrit", "/tmp/lapel-test")
    }

    #[test]
    fn bearer_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer sekrit"));
        assert!(authorized(&settings(), &headers, None));
    }

    #[test]
    fn query_token_is_accepted() {
        assert!(authorized(&settings(), &HeaderMap::new(), Some("sekrit")));
    }

    #[test]
    fn wrong_or_missing_token_fails() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert!(!authorized(&settings(), &headers, None));
        assert!(!authorized(&settings(), &HeaderMap::new(), Some("nope")));
        assert!(!authorized(&settings(), &HeaderMap::new(), None));
    }
}

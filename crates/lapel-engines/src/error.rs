//! Engine-internal errors and the mapping onto port errors.

use std::time::Duration;

use lapel_core::ports::PortError;

/// Errors specific to constructing or talking to an HTTP engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// Map a transport failure onto the port contract.
pub(crate) fn map_transport(err: &reqwest::Error, timeout: Duration) -> PortError {
    if err.is_timeout() {
        PortError::Timeout(timeout)
    } else {
        PortError::Unavailable(err.to_string())
    }
}

/// Reject 4xx as caller errors, 5xx as service failures.
pub(crate) fn check_status(response: &reqwest::Response) -> Result<(), PortError> {
    let status = response.status();
    if status.is_client_error() {
        return Err(PortError::Rejected(format!("HTTP {status}")));
    }
    if status.is_server_error() {
        return Err(PortError::Unavailable(format!("HTTP {status}")));
    }
    Ok(())
}

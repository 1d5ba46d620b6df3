//! Client error types.

use thiserror::Error;

/// Terminal client failures. Transient disconnects are retried and never
/// surface here.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The WebSocket base URL could not be used.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The server refused the connection (HTTP 4xx on upgrade, or a
    /// rejection close code). Retrying cannot help.
    #[error("Connection rejected: {0}")]
    Rejected(String),

    /// Every reconnect attempt failed.
    #[error("Gave up after {attempts} reconnect attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

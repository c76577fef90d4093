//! Streamwatch error types.
//!
//! # Error Classification
//!
//! Errors fall into two groups:
//!
//! - **Recoverable in place**: `MalformedFrame` and `RequestFailed` are
//!   absorbed by the session that produced them (the frame is dropped, or
//!   the session is marked unusable). They never reach the supervisor as
//!   fatal conditions.
//! - **Establishment failures**: `TransportUnreachable`, `HandshakeTimeout`,
//!   `AuthRejected` and `PeerClosed` end one connection attempt. The
//!   reconnect policy turns a run of them into `RetriesExhausted`, which the
//!   supervisor degrades to the fallback path or a skipped tick.
//!
//! Only `Config` is allowed to terminate the process, and only at startup.

use thiserror::Error;

/// Streamwatch errors.
#[derive(Error, Debug)]
pub enum WatchdogError {
    /// TCP reachability probe failed; no handshake was attempted.
    #[error("Control endpoint unreachable: {0}")]
    TransportUnreachable(String),

    /// Connected, but the session never reached `Identified` in time.
    #[error("Handshake timed out after {0} ms")]
    HandshakeTimeout(u64),

    /// Peer closed the connection or replied with an error during identify.
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// Unexpected close while the session was identified.
    #[error("Peer closed connection: {0}")]
    PeerClosed(String),

    /// Frame could not be parsed or had an unexpected shape.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Request could not be sent; the session is no longer usable.
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Operation is not valid in the session's current state.
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Every establishment attempt failed.
    #[error("Gave up after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        last: Box<WatchdogError>,
    },

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Streamwatch operations
pub type Result<T> = std::result::Result<T, WatchdogError>;

impl From<toml::de::Error> for WatchdogError {
    fn from(err: toml::de::Error) -> Self {
        WatchdogError::Config(format!("Failed to parse config: {err}"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for WatchdogError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        WatchdogError::WebSocket(err.to_string())
    }
}

//! Error types for the boda-link engine.
//!
//! Everything fallible in the crate returns [`Result`]. The variants follow
//! the engine's error taxonomy: transient transport problems are recovered
//! internally and only ever surface as health changes, while terminal-ride
//! conditions carry enough context for the caller to show "this ride has
//! ended" without inspecting message strings.

use thiserror::Error;

/// Result type for boda-link operations.
pub type Result<T> = std::result::Result<T, BodaLinkError>;

/// Errors that can occur in the boda-link engine.
#[derive(Debug, Error, Clone)]
pub enum BodaLinkError {
    /// Transient network failure (DNS, TCP, TLS, interrupted transfer).
    /// Recovered internally via the reconnect scheduler.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// WebSocket-level failure (handshake, frame, close).
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// The server or peer violated the message protocol.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// An operation did not complete within its configured timeout.
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// The connection closed while an operation was still pending.
    /// Callers should retry after the next successful reconnect.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The server refused a join because the ride is in a terminal state.
    /// Never retried automatically.
    #[error("Ride is closed (status: {status})")]
    RideClosed {
        /// Terminal status reported by the server (e.g. "completed").
        status: String,
    },

    /// The authoritative store has no record of the ride. Definitive.
    #[error("Ride not found: {0}")]
    RideNotFound(String),

    /// JSON encode/decode failure.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Invalid client configuration (bad URL, missing credentials, ...).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Bug guard. Should not occur during normal operation.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl BodaLinkError {
    /// Whether the reconnect scheduler may recover from this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BodaLinkError::NetworkError(_)
                | BodaLinkError::WebSocketError(_)
                | BodaLinkError::TimeoutError(_)
                | BodaLinkError::ConnectionLost(_)
        )
    }

    /// Whether this error definitively ends the ride it refers to.
    pub fn is_terminal_for_ride(&self) -> bool {
        matches!(
            self,
            BodaLinkError::RideClosed { .. } | BodaLinkError::RideNotFound(_)
        )
    }
}

impl From<serde_json::Error> for BodaLinkError {
    fn from(e: serde_json::Error) -> Self {
        BodaLinkError::SerializationError(e.to_string())
    }
}

impl From<reqwest::Error> for BodaLinkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BodaLinkError::TimeoutError(e.to_string())
        } else {
            BodaLinkError::NetworkError(e.to_string())
        }
    }
}

impl From<std::io::Error> for BodaLinkError {
    fn from(e: std::io::Error) -> Self {
        BodaLinkError::NetworkError(e.to_string())
    }
}

//! Transport error types.

use std::time::Duration;
use thiserror::Error;

/// Transport error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Network-level connect failure
    #[error("Connection error: {0}")]
    Connect(String),

    /// Broker answered the handshake with a refusal
    #[error("Connection rejected by broker: {0}")]
    Rejected(String),

    /// Handshake did not complete in time
    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// No live connection
    #[error("Not connected to broker")]
    NotConnected,

    /// Publish could not be handed to the broker
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Publish sent but not acknowledged in time
    #[error("No acknowledgment within {0:?}")]
    AckTimeout(Duration),
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;

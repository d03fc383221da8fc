//! Delivery error types.

use edgeq_store::StoreError;
use edgeq_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Delivery error type.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Store error
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Connect or publish failed for network or broker reasons
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Publish sent but never acknowledged
    #[error("No acknowledgment within {0:?}")]
    AckTimeout(Duration),
}

impl From<TransportError> for DeliveryError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::AckTimeout(timeout) => Self::AckTimeout(timeout),
            other => Self::Connectivity(other.to_string()),
        }
    }
}

/// Result type alias using DeliveryError.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

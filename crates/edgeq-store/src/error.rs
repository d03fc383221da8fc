//! Store error types.

use thiserror::Error;

/// Storage error type.
///
/// Surfaced synchronously to the caller of the failing operation. Never fatal
/// to the process: the caller decides whether to retry.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error (unreachable, corrupt, or full medium)
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Handle unusable
    #[error("Connection error: {0}")]
    Connection(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Record does not exist (already purged, or never appended)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True when the error reports a record that no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

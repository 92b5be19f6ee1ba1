//! Common error types for Roster

use thiserror::Error;

/// Common result type for Roster operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by every engine operation
///
/// `Storage` is the only retryable variant: every mutating operation is
/// idempotent given identical input, so a caller may replay it.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing required input (never retried automatically)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced class, session, student or record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation collides with existing state (e.g. make-up on a regular session date)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backend failure (wraps sqlx::Error)
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether replaying the failed operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}

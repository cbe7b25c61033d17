//! Client error types

use shared::ParseStatusError;
use thiserror::Error;

/// Failure talking to the order service
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure: refused connection, timeout, broken body
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Request rejected as malformed (4xx)
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Request conflicts with server state, e.g. paying a paid order
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Server-side failure (5xx)
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether replaying the same request later may succeed. Rejections of
    /// the request itself are never retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Http(_) | ClientError::Server { .. } | ClientError::Unreachable(_)
        )
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Failure of the on-device database
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row failed validation on the way out
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl From<ParseStatusError> for StoreError {
    fn from(e: ParseStatusError) -> Self {
        StoreError::InvalidRow(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

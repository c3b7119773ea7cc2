//! Error types for LiveDesk

use thiserror::Error;

/// Errors surfaced by the chat store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing database cannot be reached at all
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A statement failed for a reason other than connectivity
    #[error("Store query failed: {0}")]
    Query(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => StoreError::Unavailable(err.to_string()),
            _ => StoreError::Query(err.to_string()),
        }
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

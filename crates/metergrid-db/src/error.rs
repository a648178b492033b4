//! # Store Error Types
//!
//! Error types for durable local store operations.
//!
//! ## Error Flow
//! ```text
//! SQLite error (sqlx::Error)
//!      │
//!      ▼
//! StoreError (this module)  ← adds context and categorization
//!      │
//!      ▼
//! SyncError (metergrid-sync) ← wrapped for the facade's callers
//! ```

use thiserror::Error;

/// Durable local store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend could not be opened or initialized.
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    /// A read or write against the backend failed.
    #[error("Store query failed: {0}")]
    QueryFailed(String),

    /// A stored value could not be decoded.
    #[error("Corrupt store value under key '{key}': {reason}")]
    CorruptValue { key: String, reason: String },

    /// A record or queue entry addressed by id does not exist.
    #[error("{entity} not found in local store: {id}")]
    NotFound { entity: String, id: String },
}

impl StoreError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::ConnectionFailed(err.to_string())
            }
            other => StoreError::QueryFailed(other.to_string()),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

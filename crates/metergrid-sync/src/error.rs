//! # Sync Error Types
//!
//! Error taxonomy for the sync layer.
//!
//! ## Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  Connectivity   absorbed into the offline path, never thrown        │
//! │                 upward (Unreachable, Timeout)                       │
//! │  Remote         the service rejected a well-formed request;         │
//! │                 propagated on the online path                       │
//! │  Invalid input  InvalidArgument, InvalidConfig - caller bugs        │
//! │  Bookkeeping    AlreadyResolved, NotFound, SyncInProgress           │
//! │  Wrapped        Store / Core / Serialization                        │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Conflicts are NOT errors; they travel as data through the engine's
//! normal return path.

use thiserror::Error;

use metergrid_core::CoreError;
use metergrid_db::StoreError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all failure modes of the sync layer.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // Connectivity Errors
    // =========================================================================
    /// The remote service could not be reached at the network level.
    #[error("Remote service unreachable: {0}")]
    Unreachable(String),

    /// A bounded remote call did not complete in time.
    #[error("Remote call timed out after {0} seconds")]
    Timeout(u64),

    // =========================================================================
    // Remote Service Errors
    // =========================================================================
    /// The remote service returned an error response.
    #[error("Remote service error: {message}")]
    Remote {
        status: Option<u16>,
        message: String,
    },

    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// A required argument was missing or malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A record addressed by id is not in the local cache.
    #[error("{entity} not found: {id}")]
    RecordNotFound { entity: String, id: String },

    // =========================================================================
    // Conflict Bookkeeping Errors
    // =========================================================================
    /// Resolution is terminal; a resolved conflict cannot be re-resolved.
    #[error("Conflict {id} is already resolved")]
    AlreadyResolved { id: String },

    /// No conflict exists under the given id.
    #[error("Conflict not found: {0}")]
    ConflictNotFound(String),

    // =========================================================================
    // Engine Errors
    // =========================================================================
    /// A sync pass is already in flight; passes are serialized.
    #[error("A sync pass is already running")]
    SyncInProgress,

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// Durable local store failure.
    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    /// Domain rule violation.
    #[error("Domain error: {0}")]
    Core(#[from] CoreError),

    /// Payload (de)serialization failure.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured timeout; callers that
            // need the exact bound construct Timeout directly.
            SyncError::Timeout(0)
        } else if err.is_connect() {
            SyncError::Unreachable(err.to_string())
        } else {
            SyncError::Remote {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// True when the operation may succeed on a later attempt.
    ///
    /// Network-level failures and server-side errors are retryable; caller
    /// bugs and client-side rejections are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Unreachable(_) | SyncError::Timeout(_) => true,
            SyncError::Remote { status, .. } => match status {
                Some(code) => *code >= 500 || *code == 429,
                None => true,
            },
            _ => false,
        }
    }

    /// True when the failure means the remote service is unavailable
    /// rather than rejecting the request.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SyncError::Unreachable(_) | SyncError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(SyncError::Unreachable("refused".into()).is_retryable());
        assert!(SyncError::Timeout(5).is_retryable());
        assert!(SyncError::Remote {
            status: Some(503),
            message: "unavailable".into()
        }
        .is_retryable());

        assert!(!SyncError::Remote {
            status: Some(400),
            message: "bad request".into()
        }
        .is_retryable());
        assert!(!SyncError::InvalidArgument("missing resolved_data".into()).is_retryable());
        assert!(!SyncError::AlreadyResolved { id: "c1".into() }.is_retryable());
    }

    #[test]
    fn remote_error_display_carries_the_service_message() {
        let err = SyncError::Remote {
            status: Some(404),
            message: "no such record".into(),
        };
        assert_eq!(err.to_string(), "Remote service error: no such record");
    }
}

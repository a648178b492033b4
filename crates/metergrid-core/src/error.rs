//! # Error Types
//!
//! Domain-specific error types for metergrid-core.
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (serial number, id, status)
//! 3. Errors are enum variants, never bare strings

use thiserror::Error;

use crate::types::MeterStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors: business rule violations and domain logic failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A meter status transition the state machine does not permit.
    #[error("Invalid meter status transition: {from} -> {to}")]
    InvalidTransition { from: MeterStatus, to: MeterStatus },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors, raised before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Value must be positive.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// Invalid format (e.g. malformed timestamp).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_context() {
        let err = CoreError::InvalidTransition {
            from: MeterStatus::InStock,
            to: MeterStatus::Sold,
        };
        assert_eq!(
            err.to_string(),
            "Invalid meter status transition: in-stock -> sold"
        );
    }

    #[test]
    fn validation_converts_to_core_error() {
        let err: CoreError = ValidationError::Required {
            field: "serial_number".into(),
        }
        .into();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}

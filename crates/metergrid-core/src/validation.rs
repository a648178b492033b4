//! # Validation
//!
//! Input checks run by the Inventory facade before a mutation is applied or
//! queued. Early validation keeps malformed payloads out of the pending
//! queue, where they would fail on every replay.

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::MeterStatus;

/// Checks that a required text field is present and non-blank.
pub fn require_text(field: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Checks that a count or amount is not negative.
pub fn require_non_negative(field: &str, value: i64) -> CoreResult<()> {
    if value < 0 {
        return Err(ValidationError::Negative {
            field: field.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Checks a meter status transition against the state machine.
pub fn check_transition(from: MeterStatus, to: MeterStatus) -> CoreResult<()> {
    if !from.can_transition_to(to) {
        return Err(CoreError::InvalidTransition { from, to });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_rejected() {
        assert!(require_text("name", "  ").is_err());
        assert!(require_text("name", "EM-310").is_ok());
    }

    #[test]
    fn negative_amounts_are_rejected() {
        assert!(require_non_negative("stock_quantity", -1).is_err());
        assert!(require_non_negative("stock_quantity", 0).is_ok());
    }

    #[test]
    fn transition_check_wraps_state_machine() {
        assert!(check_transition(MeterStatus::InStock, MeterStatus::Allocated).is_ok());
        let err = check_transition(MeterStatus::InStock, MeterStatus::Sold).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }
}

//! Validation errors for value object construction.

use thiserror::Error;

/// Errors that occur while constructing or mutating domain values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Field '{field}' cannot be empty")]
    EmptyField { field: String },

    #[error("Field '{field}' has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("Field '{field}' must not precede '{other}'")]
    OrderViolation { field: String, other: String },
}

impl ValidationError {
    /// Creates an empty field validation error.
    pub fn empty_field(field: impl Into<String>) -> Self {
        ValidationError::EmptyField {
            field: field.into(),
        }
    }

    /// Creates an invalid format validation error.
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an ordering violation error (e.g. period end before start).
    pub fn order_violation(field: impl Into<String>, other: impl Into<String>) -> Self {
        ValidationError::OrderViolation {
            field: field.into(),
            other: other.into(),
        }
    }
}

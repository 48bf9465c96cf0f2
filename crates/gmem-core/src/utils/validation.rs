//! Validation Utilities

use thiserror::Error;

/// Field-level validation failure
#[derive(Debug, Error, PartialEq)]
pub enum FieldError {
    #[error("field required: {0}")]
    Required(String),

    #[error("value out of range: {field} must be within [0, 1], got {value}")]
    OutOfRange { field: String, value: f64 },

    #[error("invalid {field}: {message}")]
    Invalid { field: String, message: String },
}

impl FieldError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Reject empty or whitespace-only strings
pub fn require_non_empty(field: &str, value: &str) -> Result<(), FieldError> {
    if value.trim().is_empty() {
        return Err(FieldError::Required(field.to_string()));
    }
    Ok(())
}

/// Require a finite value within [0, 1]
pub fn require_unit_interval(field: &str, value: f64) -> Result<(), FieldError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(FieldError::OutOfRange {
            field: field.to_string(),
            value,
        });
    }
    Ok(())
}

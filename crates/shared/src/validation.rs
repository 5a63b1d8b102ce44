//! Common validation utilities.

use validator::{ValidateEmail, ValidationError};

/// Upper bound on delivery attempts for a single queued email.
pub const MAX_DELIVERY_ATTEMPTS: i32 = 10;

/// Validates that a string is a syntactically valid email address.
pub fn validate_email_address(email: &str) -> Result<(), ValidationError> {
    if email.validate_email() {
        Ok(())
    } else {
        let mut err = ValidationError::new("email_format");
        err.message = Some("Invalid email address".into());
        Err(err)
    }
}

/// Validates that a max-attempts value is within 1..=MAX_DELIVERY_ATTEMPTS.
pub fn validate_max_attempts(max_attempts: i32) -> Result<(), ValidationError> {
    if (1..=MAX_DELIVERY_ATTEMPTS).contains(&max_attempts) {
        Ok(())
    } else {
        let mut err = ValidationError::new("max_attempts_range");
        err.message = Some(
            format!("Max attempts must be between 1 and {}", MAX_DELIVERY_ATTEMPTS).into(),
        );
        Err(err)
    }
}

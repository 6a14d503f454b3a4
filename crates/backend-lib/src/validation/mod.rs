// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Input validation for registration and confirmation issuance.

use crate::error::AuthError;
use regex::Regex;
use std::sync::LazyLock;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321 SMTP limit
const MAX_USERNAME_LENGTH: usize = 64;

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("static email regex")
});

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, AuthError>;

fn invalid(field: &'static str, reason: impl Into<String>) -> AuthError {
    AuthError::Validation {
        field,
        reason: reason.into(),
    }
}

/// Validate a numeric user identifier
pub fn validate_user_id(user_id: i64) -> ValidationResult<i64> {
    if user_id <= 0 {
        return Err(invalid("user_id", "user id must be a positive integer"));
    }
    Ok(user_id)
}

/// Validate an email address
pub fn validate_email(email: &str) -> ValidationResult<&str> {
    if email.is_empty() {
        return Err(invalid("email", "email address cannot be empty"));
    }

    if email.len() > MAX_EMAIL_LENGTH {
        return Err(invalid(
            "email",
            format!("email address cannot exceed {MAX_EMAIL_LENGTH} characters"),
        ));
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err(invalid("email", "invalid email address format"));
    }

    Ok(email)
}

/// Validate a username used as a primary identifier. `;` is reserved for
/// OAuth2 identifiers.
pub fn validate_username(username: &str) -> ValidationResult<&str> {
    if username.is_empty() {
        return Err(invalid("username", "username cannot be empty"));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(invalid(
            "username",
            format!("username cannot exceed {MAX_USERNAME_LENGTH} characters"),
        ));
    }
    if username.chars().any(|c| c.is_whitespace() || c == ';') {
        return Err(invalid("username", "username contains invalid characters"));
    }
    Ok(username)
}

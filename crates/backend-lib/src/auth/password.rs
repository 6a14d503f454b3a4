// ============================
// authgate/src/auth/password.rs
// ============================
//! Password hashing and verification.
use crate::error::AuthError;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use zeroize::Zeroize;

/// Minimum password length
pub const MIN_PASSWORD_LENGTH: usize = 8;
/// Maximum password length, bounds hashing cost
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Password complexity requirements
#[derive(Debug, Clone)]
pub struct PasswordRequirements {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
}

impl Default for PasswordRequirements {
    fn default() -> Self {
        Self {
            min_length: MIN_PASSWORD_LENGTH,
            require_uppercase: false,
            require_lowercase: false,
            require_digit: false,
        }
    }
}

/// Hash a password using Argon2id
pub fn hash_password(plain: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| AuthError::PasswordHash(e.to_string()))?
        .to_string();
    Ok(hash)
}

/// Hash a password and zeroize the original
pub fn hash_password_secure(plain: &mut String) -> Result<String, AuthError> {
    let hash = hash_password(plain);
    plain.zeroize();
    hash
}

/// Verify a password against a PHC hash; malformed hashes never verify
pub fn verify_password(hash: &str, plain: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Check a password against the complexity requirements
pub fn validate_password_strength(
    password: &str,
    requirements: &PasswordRequirements,
) -> Result<(), AuthError> {
    let reason = if password.len() < requirements.min_length {
        format!("password must be at least {} characters", requirements.min_length)
    } else if password.len() > MAX_PASSWORD_LENGTH {
        format!("password must be at most {MAX_PASSWORD_LENGTH} characters")
    } else if requirements.require_uppercase && !password.chars().any(char::is_uppercase) {
        "password must contain an uppercase letter".to_string()
    } else if requirements.require_lowercase && !password.chars().any(char::is_lowercase) {
        "password must contain a lowercase letter".to_string()
    } else if requirements.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
        "password must contain a digit".to_string()
    } else {
        return Ok(());
    };

    Err(AuthError::Validation {
        field: "password",
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password(&hash, "correct horse"));
        assert!(!verify_password(&hash, "battery staple"));
        assert!(!verify_password("not a phc string", "correct horse"));
    }

    #[test]
    fn test_secure_hash_clears_input() {
        let mut plain = "correct horse".to_string();
        let hash = hash_password_secure(&mut plain).unwrap();
        assert!(plain.is_empty());
        assert!(verify_password(&hash, "correct horse"));
    }

    #[test]
    fn test_password_strength() {
        let default = PasswordRequirements::default();
        assert!(validate_password_strength("longenough", &default).is_ok());
        assert!(validate_password_strength("short", &default).is_err());
        assert!(validate_password_strength(&"x".repeat(200), &default).is_err());

        let strict = PasswordRequirements {
            require_uppercase: true,
            require_digit: true,
            ..PasswordRequirements::default()
        };
        assert!(validate_password_strength("alllowercase", &strict).is_err());
        assert!(validate_password_strength("Uppercase1", &strict).is_ok());
    }
}

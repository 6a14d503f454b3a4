// ============================
// crates/backend-lib/src/auth/token_generator.rs
// ============================
use crate::error::AuthError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
/** Secure token generation for confirmation codes
This module provides cryptographically secure token generation
backed by the operating system's entropy source. */
use rand::{rngs::OsRng, TryRngCore};
use zeroize::Zeroize;

/// Default token size in bytes (24 bytes encode to exactly 32 characters)
pub const DEFAULT_TOKEN_BYTES: usize = 24;

/** Generate a cryptographically secure random token
# Returns
A base64 URL-safe encoded string without padding */
pub fn generate_secure_token() -> Result<String, AuthError> {
    generate_secure_token_with_size(DEFAULT_TOKEN_BYTES)
}

/** Generate a cryptographically secure random token with specified size
# Arguments
* `bytes` - The size of the random token in bytes
# Returns
A base64 URL-safe encoded string without padding */
pub fn generate_secure_token_with_size(bytes: usize) -> Result<String, AuthError> {
    let mut buffer = vec![0u8; bytes];
    OsRng
        .try_fill_bytes(&mut buffer)
        .map_err(|e| AuthError::Entropy(e.to_string()))?;
    let token = URL_SAFE_NO_PAD.encode(&buffer);
    buffer.zeroize();
    Ok(token)
}

//! Session and invite token primitives
//!
//! Opaque bearer tokens: 32 random bytes, base64url-encoded, handed to the
//! client exactly once. Only the SHA-256 digest is stored, so a database
//! leak does not leak live sessions.
//!
//! This module contains ONLY pure functions. No HTTP framework
//! dependencies; middleware lives in yiba-server.

use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Token errors surfaced during validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Session or invite past its expiry instant
    Expired,
    /// Token string is not well formed
    Malformed,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Expired => write!(f, "Token expired"),
            TokenError::Malformed => write!(f, "Malformed token"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Generate a fresh opaque token (43 base64url characters, no padding)
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 digest of a token, hex-encoded (the only form stored at rest)
pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Basic shape check before hitting the database
///
/// Rejects obviously malformed bearer values so lookups only run for
/// plausible tokens.
pub fn check_token_shape(token: &str) -> Result<(), TokenError> {
    if token.len() < 32 || token.len() > 64 {
        return Err(TokenError::Malformed);
    }
    if !token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(TokenError::Malformed);
    }
    Ok(())
}

/// Check an expiry instant against now
pub fn check_expiry(
    expires_at: chrono::DateTime<chrono::Utc>,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(), TokenError> {
    if now >= expires_at {
        Err(TokenError::Expired)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_generated_tokens_unique_and_well_shaped() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(check_token_shape(&a).is_ok());
        assert_eq!(a.len(), 43); // 32 bytes base64url, no padding
    }

    #[test]
    fn test_digest_is_stable_hex() {
        let token = "abcdefghijklmnopqrstuvwxyz0123456789-_ABCDE";
        let d1 = token_digest(token);
        let d2 = token_digest(token);
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 64);
        assert!(d1.chars().all(|c| c.is_ascii_hexdigit()));

        // Different token, different digest
        assert_ne!(d1, token_digest("other-token-other-token-other-token-other"));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        assert_eq!(check_token_shape("short"), Err(TokenError::Malformed));
        assert_eq!(
            check_token_shape("has spaces has spaces has spaces has spaces"),
            Err(TokenError::Malformed)
        );
        let too_long = "a".repeat(65);
        assert_eq!(check_token_shape(&too_long), Err(TokenError::Malformed));
    }

    #[test]
    fn test_expiry_boundaries() {
        let now = Utc::now();
        assert!(check_expiry(now + Duration::seconds(1), now).is_ok());
        assert_eq!(check_expiry(now, now), Err(TokenError::Expired));
        assert_eq!(
            check_expiry(now - Duration::seconds(1), now),
            Err(TokenError::Expired)
        );
    }
}

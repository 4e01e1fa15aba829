//! HMAC-SHA256 payload signing.
//!
//! Signatures are computed over the exact serialized request body and
//! carried hex-encoded in the endpoint's configured header, so receivers
//! can verify origin and integrity independent of transport.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::DeliveryError;

type HmacSha256 = Hmac<Sha256>;

/// Signs a payload with HMAC-SHA256 and returns the lowercase hex digest.
///
/// # Errors
///
/// Returns [`DeliveryError::Signature`] if the key cannot be used.
pub fn sign_payload(payload: &[u8], secret: &str) -> Result<String, DeliveryError> {
    if secret.is_empty() {
        return Err(DeliveryError::signature("signing secret is empty"));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| DeliveryError::signature("invalid signing key"))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a hex-encoded HMAC-SHA256 signature against the payload.
///
/// Comparison is constant-time to avoid leaking the expected signature
/// through timing analysis.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    match sign_payload(payload, secret) {
        Ok(expected) => constant_time_eq(signature, &expected),
        Err(_) => false,
    }
}

/// Timing-safe string comparison.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (left, right) in a.bytes().zip(b.bytes()) {
        diff |= left ^ right;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_is_deterministic() {
        let first = sign_payload(b"payload", "secret").unwrap();
        let second = sign_payload(b"payload", "secret").unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 64); // SHA256 hex digest length
    }

    #[test]
    fn different_secrets_produce_different_signatures() {
        let first = sign_payload(b"payload", "secret-a").unwrap();
        let second = sign_payload(b"payload", "secret-b").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn empty_secret_rejected() {
        assert!(sign_payload(b"payload", "").is_err());
    }

    #[test]
    fn round_trip_verification() {
        let signature = sign_payload(b"body", "key").unwrap();
        assert!(verify_signature(b"body", &signature, "key"));
        assert!(!verify_signature(b"tampered", &signature, "key"));
        assert!(!verify_signature(b"body", &signature, "other-key"));
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}

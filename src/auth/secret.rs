//! Secret material: session secrets, their hashes, and verification codes.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Produces random secrets and verifies candidates against stored hashes.
///
/// Only the hash ever reaches persistence; the raw secret goes to the
/// client inside the opaque token and is never logged.
pub trait SecretHasher: Send + Sync {
    /// Fresh url-safe secret for a new session token.
    ///
    /// # Errors
    ///
    /// Returns an error if the system RNG fails.
    fn generate(&self) -> Result<String>;

    fn hash(&self, secret: &str) -> Vec<u8>;

    /// Constant-time comparison of a candidate secret against a stored hash.
    fn verify(&self, secret: &str, stored_hash: &[u8]) -> bool;
}

/// SHA-256 backed implementation. Session secrets carry 256 bits of
/// entropy, so a plain digest (no salt, no work factor) is the right
/// trade-off for per-request validation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256SecretHasher;

impl SecretHasher for Sha256SecretHasher {
    fn generate(&self) -> Result<String> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate session secret")?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    fn hash(&self, secret: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.finalize().to_vec()
    }

    fn verify(&self, secret: &str, stored_hash: &[u8]) -> bool {
        let candidate = self.hash(secret);
        candidate.ct_eq(stored_hash).into()
    }
}

/// Fixed-length numeric code for human entry (email verification, password
/// reset, account association).
#[must_use]
pub fn generate_verification_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Constant-time string equality for verification codes.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_are_distinct_and_urlsafe() {
        let hasher = Sha256SecretHasher;
        let first = hasher.generate().expect("rng");
        let second = hasher.generate().expect("rng");
        assert_ne!(first, second);
        assert!(URL_SAFE_NO_PAD.decode(first.as_bytes()).is_ok());
    }

    #[test]
    fn verify_accepts_the_original_secret() {
        let hasher = Sha256SecretHasher;
        let secret = hasher.generate().expect("rng");
        let hash = hasher.hash(&secret);
        assert!(hasher.verify(&secret, &hash));
    }

    #[test]
    fn verify_rejects_a_different_secret() {
        let hasher = Sha256SecretHasher;
        let hash = hasher.hash("secret-a");
        assert!(!hasher.verify("secret-b", &hash));
    }

    #[test]
    fn verification_codes_are_fixed_length_digits() {
        let code = generate_verification_code(8);
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(constant_time_eq("12345678", "12345678"));
        assert!(!constant_time_eq("12345678", "1234567"));
        assert!(!constant_time_eq("12345678", "12345679"));
    }
}

//! Password hashing contract and the Argon2id implementation.

use anyhow::{anyhow, Result};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use argon2::Argon2;

/// Hashing contract for primary-login passwords. Verification must not
/// leak whether the stored hash exists or merely mismatches.
pub trait PasswordHasher: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if hashing fails (salt generation, parameters).
    fn hash(&self, password: &str) -> Result<String>;

    fn verify(&self, password: &str, stored_hash: &str) -> bool;
}

/// Argon2id with the crate's default parameters (19 MiB, t=2, p=1).
#[derive(Clone, Copy, Debug, Default)]
pub struct Argon2PasswordHasher;

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| anyhow!("failed to hash password: {err}"))?;
        Ok(hash.to_string())
    }

    fn verify(&self, password: &str, stored_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hasher = Argon2PasswordHasher;
        let hash = hasher.hash("correct horse battery staple").expect("hash");
        assert!(hasher.verify("correct horse battery staple", &hash));
        assert!(!hasher.verify("wrong password", &hash));
    }

    #[test]
    fn verify_rejects_malformed_stored_hash() {
        let hasher = Argon2PasswordHasher;
        assert!(!hasher.verify("anything", "not-a-phc-string"));
    }
}

//! Password hashing primitive

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

/// Salted, constant-time secret hashing
pub trait SecretHasher: Send + Sync {
    /// Hash a secret into a self-describing digest
    ///
    /// # Errors
    /// Returns a description when hashing fails.
    fn hash(&self, secret: &str) -> Result<String, String>;

    /// Check a secret against a digest; malformed digests never verify
    fn verify(&self, secret: &str, digest: &str) -> bool;
}

/// Argon2id with the crate's default parameters
#[derive(Default, Clone)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl SecretHasher for Argon2Hasher {
    fn hash(&self, secret: &str) -> Result<String, String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| e.to_string())
    }

    fn verify(&self, secret: &str, digest: &str) -> bool {
        match PasswordHash::new(digest) {
            Ok(parsed) => self
                .argon2
                .verify_password(secret.as_bytes(), &parsed)
                .is_ok(),
            Err(err) => {
                tracing::warn!(error = %err, "stored password digest is malformed");
                false
            }
        }
    }
}

//! Password hashing with Argon2id.
//!
//! Stored hashes are PHC strings. Accounts created before the switch to a
//! salted KDF carry a bare hex SHA-256 digest; those still verify and are
//! reported as needing a rehash so the caller can upgrade them in place.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use sha2::{Digest, Sha256};

use super::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    Valid,
    /// Correct password stored under the legacy digest
    ValidNeedsRehash,
    Invalid,
}

impl PasswordCheck {
    pub fn is_valid(&self) -> bool {
        !matches!(self, PasswordCheck::Invalid)
    }
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(format!("hash error: {e}")))
}

pub fn verify_password(password: &str, stored: &str) -> Result<PasswordCheck, AuthError> {
    if is_legacy_digest(stored) {
        let digest = format!("{:x}", Sha256::digest(password.as_bytes()));
        return Ok(if constant_time_eq(digest.as_bytes(), stored.to_ascii_lowercase().as_bytes()) {
            PasswordCheck::ValidNeedsRehash
        } else {
            PasswordCheck::Invalid
        });
    }

    let parsed = PasswordHash::new(stored)
        .map_err(|e| AuthError::Hashing(format!("invalid hash format: {e}")))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(PasswordCheck::Valid),
        Err(argon2::password_hash::Error::Password) => Ok(PasswordCheck::Invalid),
        Err(e) => Err(AuthError::Hashing(format!("verify error: {e}"))),
    }
}

fn is_legacy_digest(stored: &str) -> bool {
    stored.len() == 64 && stored.chars().all(|c| c.is_ascii_hexdigit())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

//! Password Hashing
//! bcrypt digests: self-salted, one-way, constant-time verification.

use thiserror::Error;
use tracing::warn;

/// bcrypt only reads this many bytes of input; anything past it is ignored.
pub const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug, Error)]
pub enum HashingError {
    #[error("password exceeds {MAX_PASSWORD_BYTES} bytes")]
    TooLong,
    #[error("failed to hash password: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),
}

/// bcrypt hasher with a fixed work factor.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn hash(&self, plaintext: &str) -> Result<String, HashingError> {
        if plaintext.len() > MAX_PASSWORD_BYTES {
            return Err(HashingError::TooLong);
        }
        Ok(bcrypt::hash(plaintext, self.cost)?)
    }

    /// A digest that cannot be parsed verifies as `false`, and so does any
    /// plaintext too long to have been hashed.
    pub fn verify(&self, digest: &str, plaintext: &str) -> bool {
        if plaintext.len() > MAX_PASSWORD_BYTES {
            return false;
        }
        match bcrypt::verify(plaintext, digest) {
            Ok(valid) => valid,
            Err(e) => {
                warn!(error = %e, "Stored password digest is unreadable");
                false
            }
        }
    }
}

//! Credential store: salted bcrypt digests.

use bcrypt::{hash, verify, BcryptResult, DEFAULT_COST};

/// Lowest work factor bcrypt accepts.
pub const MIN_COST: u32 = 4;
/// Highest work factor bcrypt accepts.
pub const MAX_COST: u32 = 31;

/// Hashes and verifies passwords at a fixed bcrypt work factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_COST)
    }
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Produces a fresh salted digest of `plaintext`.
    ///
    /// # Errors
    ///
    /// Fails only when the configured cost is outside bcrypt's accepted range.
    pub fn hash(&self, plaintext: &str) -> BcryptResult<String> {
        hash(plaintext, self.cost)
    }

    /// Checks `plaintext` against a stored digest.
    ///
    /// A malformed digest never matches.
    pub fn verify(&self, plaintext: &str, digest: &str) -> bool {
        verify(plaintext, digest).unwrap_or(false)
    }
}

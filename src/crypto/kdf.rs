//! Password-based key derivation using Argon2id.
//!
//! Argon2id is a memory-hard KDF that protects against brute-force and
//! GPU-based attacks.  Parameters are configurable via `Argon2Params`
//! (loaded from `.strongbox.toml` or sensible defaults) and are stored
//! in every exported bundle so import re-derives with the same cost.

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroizing;

use super::random::random_array;
use crate::errors::{Result, StrongboxError};

/// Length of the salt in bytes (256 bits).
pub const SALT_LEN: usize = 32;

/// Length of the derived master key in bytes (256 bits).
pub const MASTER_KEY_LEN: usize = 32;

/// Minimum safe memory cost in KiB (8 MB).
pub const MIN_MEMORY_KIB: u32 = 8_192;

/// Upper bound accepted from a bundle header (1 GB).  Argon2 allocates the
/// whole block array up front, before the bundle can be authenticated.
pub const MAX_MEMORY_KIB: u32 = 1024 * 1024;

/// Upper bound on iterations accepted from a bundle header.
pub const MAX_ITERATIONS: u32 = 16;

/// Upper bound on lanes accepted from a bundle header.
pub const MAX_PARALLELISM: u32 = 16;

/// Configurable Argon2id parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    /// Memory cost in KiB (default: 65 536 = 64 MB).
    pub memory_kib: u32,
    /// Number of iterations (default: 3).
    pub iterations: u32,
    /// Parallelism lanes (default: 4).
    pub parallelism: u32,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl Argon2Params {
    /// The cheapest parameters `validate` accepts.  Meant for tests.
    pub fn minimum() -> Self {
        Self {
            memory_kib: MIN_MEMORY_KIB,
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Reject dangerously weak or unreasonably expensive settings.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_MEMORY_KIB..=MAX_MEMORY_KIB).contains(&self.memory_kib) {
            return Err(StrongboxError::KeyDerivationFailed(format!(
                "Argon2 memory_kib must be between {MIN_MEMORY_KIB} and {MAX_MEMORY_KIB} (got {})",
                self.memory_kib
            )));
        }
        if !(1..=MAX_ITERATIONS).contains(&self.iterations) {
            return Err(StrongboxError::KeyDerivationFailed(format!(
                "Argon2 iterations must be between 1 and {MAX_ITERATIONS} (got {})",
                self.iterations
            )));
        }
        if !(1..=MAX_PARALLELISM).contains(&self.parallelism) {
            return Err(StrongboxError::KeyDerivationFailed(format!(
                "Argon2 parallelism must be between 1 and {MAX_PARALLELISM} (got {})",
                self.parallelism
            )));
        }
        Ok(())
    }
}

/// Derive a 32-byte master key with explicit Argon2id parameters.
///
/// The same password + salt + params will always produce the same key.
pub fn derive_master_key(
    password: &[u8],
    salt: &[u8],
    argon2_params: &Argon2Params,
) -> Result<Zeroizing<[u8; MASTER_KEY_LEN]>> {
    argon2_params.validate()?;

    let params = Params::new(
        argon2_params.memory_kib,
        argon2_params.iterations,
        argon2_params.parallelism,
        Some(MASTER_KEY_LEN),
    )
    .map_err(|e| StrongboxError::KeyDerivationFailed(format!("invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; MASTER_KEY_LEN]);
    argon2
        .hash_password_into(password, salt, &mut key[..])
        .map_err(|e| StrongboxError::KeyDerivationFailed(format!("Argon2id hashing failed: {e}")))?;

    Ok(key)
}

/// Generate a cryptographically random 32-byte salt.
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    random_array()
}

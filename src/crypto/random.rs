//! Access to the operating system's CSPRNG.

use rand::rngs::OsRng;
use rand::TryRngCore;

use crate::errors::{Result, StrongboxError};

/// Fill `buf` with cryptographically secure random bytes.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| StrongboxError::RandomSourceFailed(e.to_string()))
}

/// Return `N` cryptographically secure random bytes.
pub fn random_array<const N: usize>() -> Result<[u8; N]> {
    let mut out = [0u8; N];
    fill_random(&mut out)?;
    Ok(out)
}

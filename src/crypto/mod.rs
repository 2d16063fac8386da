//! Cryptographic primitives for Strongbox.
//!
//! This module provides:
//! - OS randomness (`random`)
//! - AES-256-GCM / ChaCha20-Poly1305 / XChaCha20-Poly1305 encryption (`encryption`)
//! - Argon2id password-based key derivation (`kdf`)
//! - HKDF-based per-layer key expansion (`keys`)
//! - Cascading multi-layer symmetric keys (`cascade`)

pub mod cascade;
pub mod encryption;
pub mod kdf;
pub mod keys;
pub mod random;

// Re-export the most commonly used items so callers can write:
//   use crate::crypto::{CascadingSymmetricKey, Algorithm, ...};
pub use cascade::{CascadingSymmetricKey, KeyLayer};
pub use encryption::{decrypt, encrypt, Algorithm};
pub use kdf::{derive_master_key, generate_salt, Argon2Params};
pub use random::fill_random;

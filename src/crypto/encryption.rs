//! Authenticated encryption for the supported cipher algorithms.
//!
//! Each call to `encrypt` draws a fresh random nonce and prepends it to
//! the ciphertext.  `decrypt` splits the nonce back out before decrypting.
//!
//! Layout of the returned byte buffer:
//!   [ nonce | ciphertext + 16-byte auth tag ]
//!
//! The nonce is 12 bytes for AES-256-GCM and ChaCha20-Poly1305 and
//! 24 bytes for XChaCha20-Poly1305.

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};
use zeroize::Zeroizing;

use super::random::fill_random;
use crate::errors::{Result, StrongboxError};

/// Size of every symmetric key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Size of the authentication tag appended by every algorithm.
pub const TAG_LEN: usize = 16;

/// Largest nonce of any supported algorithm.
const MAX_NONCE_LEN: usize = 24;

/// A supported AEAD algorithm.  The discriminant is the wire id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Algorithm {
    Aes256Gcm = 1,
    ChaCha20Poly1305 = 2,
    XChaCha20Poly1305 = 3,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [
        Algorithm::Aes256Gcm,
        Algorithm::ChaCha20Poly1305,
        Algorithm::XChaCha20Poly1305,
    ];

    /// Identifier written into bundles.
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.id() == id)
            .ok_or(StrongboxError::UnknownAlgorithm(id))
    }

    /// Name used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "aes-256-gcm",
            Algorithm::ChaCha20Poly1305 => "chacha20-poly1305",
            Algorithm::XChaCha20Poly1305 => "xchacha20-poly1305",
        }
    }

    pub fn nonce_len(self) -> usize {
        match self {
            Algorithm::Aes256Gcm | Algorithm::ChaCha20Poly1305 => 12,
            Algorithm::XChaCha20Poly1305 => 24,
        }
    }

    /// Bytes added to a message by one encryption.
    pub fn overhead(self) -> usize {
        self.nonce_len() + TAG_LEN
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = StrongboxError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|a| a.name() == wanted)
            .ok_or_else(|| {
                StrongboxError::ConfigError(format!(
                    "unknown cipher '{s}'; expected one of aes-256-gcm, chacha20-poly1305, xchacha20-poly1305"
                ))
            })
    }
}

/// Encrypt `plaintext` with a 32-byte `key`, authenticating `aad` as well.
///
/// Returns the nonce prepended to the ciphertext (nonce || ciphertext).
pub fn encrypt(algorithm: Algorithm, key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let mut nonce_buf = [0u8; MAX_NONCE_LEN];
    let nonce = &mut nonce_buf[..algorithm.nonce_len()];
    fill_random(nonce)?;

    let ciphertext = match algorithm {
        Algorithm::Aes256Gcm => seal::<Aes256Gcm>(key, nonce, plaintext, aad),
        Algorithm::ChaCha20Poly1305 => seal::<ChaCha20Poly1305>(key, nonce, plaintext, aad),
        Algorithm::XChaCha20Poly1305 => seal::<XChaCha20Poly1305>(key, nonce, plaintext, aad),
    }?;

    // Prepend the nonce so the caller only needs to store one blob.
    let mut output = Vec::with_capacity(nonce.len() + ciphertext.len());
    output.extend_from_slice(nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Decrypt data that was produced by `encrypt` with the same algorithm,
/// key and associated data.
///
/// Any failure, including truncated input, is reported as an integrity
/// failure: no partially decrypted bytes are ever returned.
pub fn decrypt(
    algorithm: Algorithm,
    key: &[u8],
    ciphertext_with_nonce: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if ciphertext_with_nonce.len() < algorithm.overhead() {
        return Err(StrongboxError::IntegrityCheckFailed("cipher layer"));
    }

    let (nonce, ciphertext) = ciphertext_with_nonce.split_at(algorithm.nonce_len());

    let plaintext = match algorithm {
        Algorithm::Aes256Gcm => open::<Aes256Gcm>(key, nonce, ciphertext, aad),
        Algorithm::ChaCha20Poly1305 => open::<ChaCha20Poly1305>(key, nonce, ciphertext, aad),
        Algorithm::XChaCha20Poly1305 => open::<XChaCha20Poly1305>(key, nonce, ciphertext, aad),
    }?;

    Ok(Zeroizing::new(plaintext))
}

fn seal<C: KeyInit + Aead>(key: &[u8], nonce: &[u8], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(key)
        .map_err(|e| StrongboxError::InvalidKeyMaterial(format!("invalid key length: {e}")))?;
    cipher
        .encrypt(aes_gcm::aead::Nonce::<C>::from_slice(nonce), Payload { msg, aad })
        .map_err(|e| StrongboxError::EncryptionFailed(format!("encryption error: {e}")))
}

fn open<C: KeyInit + Aead>(key: &[u8], nonce: &[u8], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(key)
        .map_err(|_| StrongboxError::IntegrityCheckFailed("cipher layer"))?;
    cipher
        .decrypt(aes_gcm::aead::Nonce::<C>::from_slice(nonce), Payload { msg, aad })
        .map_err(|_| StrongboxError::IntegrityCheckFailed("cipher layer"))
}

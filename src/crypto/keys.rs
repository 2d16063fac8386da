//! Layer key expansion using HKDF-SHA256.
//!
//! A password-derived cascade needs one independent key and IV per layer.
//! Argon2id runs once to produce a master key; HKDF (RFC 5869) then
//! expands it with a per-layer `info` string so every layer gets
//! unrelated material.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::encryption::{Algorithm, KEY_LEN};
use crate::errors::{Result, StrongboxError};

/// Length of the per-layer initialization vector.
pub const IV_LEN: usize = 16;

/// Key and IV for one cascade layer, kept together so both are wiped.
pub struct LayerMaterial {
    pub key: Zeroizing<[u8; KEY_LEN]>,
    pub iv: [u8; IV_LEN],
}

/// Expand the master key into the key and IV for layer `index`.
///
/// `info` is `"strongbox-layer:<index>:<algorithm>"` so reordering or
/// swapping algorithms yields different keys.
pub fn derive_layer_material(
    master_key: &[u8],
    index: usize,
    algorithm: Algorithm,
) -> Result<LayerMaterial> {
    let info = format!("strongbox-layer:{index}:{}", algorithm.name());

    // The master key already has high entropy (it came from Argon2id),
    // so the extract step uses HKDF's default zero salt.
    let hk = Hkdf::<Sha256>::new(None, master_key);

    let mut okm = Zeroizing::new([0u8; KEY_LEN + IV_LEN]);
    hk.expand(info.as_bytes(), &mut okm[..])
        .map_err(|e| StrongboxError::KeyDerivationFailed(format!("HKDF expand failed: {e}")))?;

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&okm[..KEY_LEN]);
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&okm[KEY_LEN..]);

    Ok(LayerMaterial { key, iv })
}

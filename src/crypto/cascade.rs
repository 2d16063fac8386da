//! Cascading symmetric keys.
//!
//! A cascade is an ordered list of independent (algorithm, key, IV)
//! layers.  Encryption runs layer 0 first and feeds each layer's output
//! into the next; decryption walks the layers backwards.  Every layer is
//! an AEAD, so tampering with any byte of the final ciphertext makes the
//! whole cascade fail and no partial plaintext is surfaced.
//!
//! Each encryption draws fresh per-layer nonces (see `encryption`), so a
//! key may seal more than one message.  The layer IV, index and algorithm
//! id are authenticated as associated data alongside the caller's AAD.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::encryption::{self, Algorithm, KEY_LEN};
use super::kdf::{derive_master_key, Argon2Params};
use super::keys::{derive_layer_material, IV_LEN};
use super::random::random_array;
use crate::errors::{Result, StrongboxError};

/// Serialized size of one layer: id + key + IV.
const LAYER_RECORD_LEN: usize = 1 + KEY_LEN + IV_LEN;

/// One algorithm + key + IV triple.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyLayer {
    #[zeroize(skip)]
    algorithm: Algorithm,
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl KeyLayer {
    pub fn new(algorithm: Algorithm, key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self { algorithm, key, iv }
    }

    /// Fresh random key and IV for `algorithm`.
    pub fn generate(algorithm: Algorithm) -> Result<Self> {
        Ok(Self {
            algorithm,
            key: random_array()?,
            iv: random_array()?,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn associated_data(&self, index: usize, aad: &[u8]) -> Zeroizing<Vec<u8>> {
        let mut out = Vec::with_capacity(aad.len() + 4 + 1 + IV_LEN);
        out.extend_from_slice(aad);
        out.extend_from_slice(&(index as u32).to_le_bytes());
        out.push(self.algorithm.id());
        out.extend_from_slice(&self.iv);
        Zeroizing::new(out)
    }
}

/// An ordered composition of independent AEAD layers.
pub struct CascadingSymmetricKey {
    layers: Vec<KeyLayer>,
}

impl CascadingSymmetricKey {
    /// Generate a fresh key and IV for every algorithm, in order.
    ///
    /// Repeating an algorithm is allowed; each occurrence gets its own key.
    pub fn generate(algorithms: &[Algorithm]) -> Result<Self> {
        let layers = algorithms
            .iter()
            .map(|a| KeyLayer::generate(*a))
            .collect::<Result<Vec<_>>>()?;
        Self::from_layers(layers)
    }

    /// Derive a cascade from a password with Argon2id, expanding the master
    /// key into one layer per algorithm.
    pub fn derive(
        password: &[u8],
        salt: &[u8],
        params: &Argon2Params,
        algorithms: &[Algorithm],
    ) -> Result<Self> {
        if algorithms.is_empty() {
            return Err(StrongboxError::EmptyCascade);
        }

        let master = derive_master_key(password, salt, params)?;

        let mut layers = Vec::with_capacity(algorithms.len());
        for (index, algorithm) in algorithms.iter().enumerate() {
            let material = derive_layer_material(&master[..], index, *algorithm)?;
            layers.push(KeyLayer::new(*algorithm, *material.key, material.iv));
        }
        Self::from_layers(layers)
    }

    pub fn from_layers(layers: Vec<KeyLayer>) -> Result<Self> {
        if layers.is_empty() {
            return Err(StrongboxError::EmptyCascade);
        }
        Ok(Self { layers })
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn algorithms(&self) -> Vec<Algorithm> {
        self.layers.iter().map(KeyLayer::algorithm).collect()
    }

    /// Encrypt through every layer, first to last.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.encrypt_with_aad(plaintext, &[])
    }

    /// Encrypt through every layer, authenticating `aad` at each one.
    pub fn encrypt_with_aad(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut current: Option<Vec<u8>> = None;

        for (index, layer) in self.layers.iter().enumerate() {
            let input = current.as_deref().unwrap_or(plaintext);
            let layer_aad = layer.associated_data(index, aad);
            let sealed = encryption::encrypt(layer.algorithm, &layer.key, input, &layer_aad)?;
            current = Some(sealed);
        }

        // `from_layers` guarantees at least one layer ran.
        current.ok_or(StrongboxError::EmptyCascade)
    }

    /// Decrypt through every layer, last to first.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.decrypt_with_aad(ciphertext, &[])
    }

    /// Decrypt through every layer, checking `aad` at each one.
    ///
    /// Fails with `IntegrityCheckFailed` if any layer does not authenticate.
    pub fn decrypt_with_aad(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let mut current: Option<Zeroizing<Vec<u8>>> = None;

        for (index, layer) in self.layers.iter().enumerate().rev() {
            let input: &[u8] = current.as_deref().map_or(ciphertext, |v| v.as_slice());
            let layer_aad = layer.associated_data(index, aad);
            let opened = encryption::decrypt(layer.algorithm, &layer.key, input, &layer_aad)
                .map_err(|_| StrongboxError::IntegrityCheckFailed("cascade layer"))?;
            current = Some(opened);
        }

        current.ok_or(StrongboxError::EmptyCascade)
    }

    /// Serialize the layers as `[count u32][id u8, key, iv]...`.
    ///
    /// The result is raw key material; callers wrap it in a `SecureBuffer`
    /// immediately.
    pub fn to_exportable_form(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(4 + self.layers.len() * LAYER_RECORD_LEN));
        out.extend_from_slice(&(self.layers.len() as u32).to_le_bytes());
        for layer in &self.layers {
            out.push(layer.algorithm.id());
            out.extend_from_slice(&layer.key);
            out.extend_from_slice(&layer.iv);
        }
        out
    }

    /// Rebuild a cascade from `to_exportable_form` output.
    pub fn from_exportable_form(bytes: &[u8]) -> Result<Self> {
        let malformed = |why: &str| StrongboxError::InvalidKeyMaterial(format!("cascade key: {why}"));

        if bytes.len() < 4 {
            return Err(malformed("truncated layer count"));
        }
        let (count_bytes, records) = bytes.split_at(4);
        let mut count = [0u8; 4];
        count.copy_from_slice(count_bytes);
        let count = u32::from_le_bytes(count) as usize;

        if count == 0 {
            return Err(StrongboxError::EmptyCascade);
        }
        if records.len() != count.saturating_mul(LAYER_RECORD_LEN) {
            return Err(malformed("length does not match layer count"));
        }

        let layers = records
            .chunks_exact(LAYER_RECORD_LEN)
            .map(|record| {
                let algorithm = Algorithm::from_id(record[0])?;
                let mut key = [0u8; KEY_LEN];
                key.copy_from_slice(&record[1..1 + KEY_LEN]);
                let mut iv = [0u8; IV_LEN];
                iv.copy_from_slice(&record[1 + KEY_LEN..]);
                let layer = KeyLayer::new(algorithm, key, iv);
                key.zeroize();
                Ok(layer)
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_layers(layers)
    }
}

impl fmt::Debug for CascadingSymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CascadingSymmetricKey")
            .field("algorithms", &self.algorithms())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_algorithm_list_is_rejected() {
        assert!(matches!(
            CascadingSymmetricKey::generate(&[]),
            Err(StrongboxError::EmptyCascade)
        ));
    }

    #[test]
    fn each_layer_adds_its_overhead() {
        let algorithms = [Algorithm::Aes256Gcm, Algorithm::XChaCha20Poly1305];
        let key = CascadingSymmetricKey::generate(&algorithms).unwrap();
        let sealed = key.encrypt(b"abc").unwrap();
        let overhead: usize = algorithms.iter().map(|a| a.overhead()).sum();
        assert_eq!(sealed.len(), 3 + overhead);
    }

    #[test]
    fn layer_order_matters() {
        let forward = CascadingSymmetricKey::from_layers(vec![
            KeyLayer::new(Algorithm::Aes256Gcm, [1u8; KEY_LEN], [0u8; IV_LEN]),
            KeyLayer::new(Algorithm::ChaCha20Poly1305, [2u8; KEY_LEN], [0u8; IV_LEN]),
        ])
        .unwrap();
        let reversed = CascadingSymmetricKey::from_layers(vec![
            KeyLayer::new(Algorithm::ChaCha20Poly1305, [2u8; KEY_LEN], [0u8; IV_LEN]),
            KeyLayer::new(Algorithm::Aes256Gcm, [1u8; KEY_LEN], [0u8; IV_LEN]),
        ])
        .unwrap();

        let sealed = forward.encrypt(b"ordered").unwrap();
        assert!(reversed.decrypt(&sealed).is_err());
        assert_eq!(forward.decrypt(&sealed).unwrap().as_slice(), b"ordered");
    }

    #[test]
    fn exportable_form_rejects_bad_lengths() {
        let key = CascadingSymmetricKey::generate(&[Algorithm::Aes256Gcm]).unwrap();
        let form = key.to_exportable_form();
        assert_eq!(form.len(), 4 + LAYER_RECORD_LEN);

        assert!(CascadingSymmetricKey::from_exportable_form(&form[..form.len() - 1]).is_err());
        assert!(matches!(
            CascadingSymmetricKey::from_exportable_form(&0u32.to_le_bytes()),
            Err(StrongboxError::EmptyCascade)
        ));
    }

    #[test]
    fn debug_output_hides_key_bytes() {
        let key = CascadingSymmetricKey::from_layers(vec![KeyLayer::new(
            Algorithm::Aes256Gcm,
            [0xEEu8; KEY_LEN],
            [0u8; IV_LEN],
        )])
        .unwrap();
        let rendered = format!("{key:?}");
        assert!(rendered.contains("Aes256Gcm"));
        assert!(!rendered.contains("238"));
    }
}

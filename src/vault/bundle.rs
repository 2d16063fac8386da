//! Password-protected export and import of a whole vault.
//!
//! An export flattens every secret into one table, derives a cascade from
//! the password with Argon2id + HKDF, and encrypts the table once.  The
//! bundle layout is (all integers little-endian `u32`):
//!
//! ```text
//! [formatVersion][saltLen][salt][memoryKiB][iterations][parallelism]
//! [layerCount][algorithmId u8 x layerCount][ciphertextLen][ciphertext]
//! ```
//!
//! Everything before `ciphertextLen` is the header; it is authenticated as
//! associated data at every cascade layer, so editing the salt, the cost
//! parameters or the algorithm list is caught as tampering.

use std::fmt;

use crate::crypto::kdf::{generate_salt, Argon2Params};
use crate::crypto::{Algorithm, CascadingSymmetricKey};
use crate::errors::{Result, StrongboxError};

use super::codec::{decode_table, put_bytes, put_u32, Reader, TableWriter};
use super::secret::Secret;
use super::store::{SecretVault, VaultOptions};

/// Current bundle format version.
pub const FORMAT_VERSION: u32 = 1;

/// Accepted salt sizes when reading a bundle.
const MIN_SALT_LEN: usize = 16;
const MAX_SALT_LEN: usize = 64;

/// Most cascade layers a bundle may declare.
pub const MAX_LAYERS: usize = 16;

/// How an export derives and applies its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    pub argon2: Argon2Params,
    pub cascade: Vec<Algorithm>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            argon2: Argon2Params::default(),
            cascade: vec![Algorithm::Aes256Gcm, Algorithm::XChaCha20Poly1305],
        }
    }
}

/// An immutable, versioned, encrypted serialization of a vault.
#[derive(Clone, PartialEq, Eq)]
pub struct ExportedSecretVault {
    format_version: u32,
    salt: Vec<u8>,
    kdf: Argon2Params,
    algorithms: Vec<Algorithm>,
    ciphertext: Vec<u8>,
}

impl ExportedSecretVault {
    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn kdf_params(&self) -> Argon2Params {
        self.kdf
    }

    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    // ------------------------------------------------------------------
    // Wire format
    // ------------------------------------------------------------------

    fn header_bytes(&self) -> Result<Vec<u8>> {
        encode_header(self.format_version, &self.salt, &self.kdf, &self.algorithms)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = self.header_bytes()?;
        out.reserve_exact(4 + self.ciphertext.len());
        put_bytes(&mut out, &self.ciphertext)?;
        Ok(out)
    }

    /// Parse a bundle.  Unknown versions are rejected before anything else
    /// is read; trailing bytes are an error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes, "bundle");

        // 1. Version gate.
        let format_version = reader.u32()?;
        if format_version != FORMAT_VERSION {
            return Err(StrongboxError::UnsupportedBundleVersion {
                found: format_version,
                supported: FORMAT_VERSION,
            });
        }

        // 2. Salt.
        let salt = reader.bytes()?.to_vec();
        if !(MIN_SALT_LEN..=MAX_SALT_LEN).contains(&salt.len()) {
            return Err(reader.malformed("salt length out of range"));
        }

        // 3. KDF cost, bounded so a crafted bundle cannot demand unbounded work.
        let kdf = Argon2Params {
            memory_kib: reader.u32()?,
            iterations: reader.u32()?,
            parallelism: reader.u32()?,
        };
        kdf.validate()
            .map_err(|e| StrongboxError::InvalidBundleFormat(format!("bundle: {e}")))?;

        // 4. Cascade layout.
        let layer_count = reader.u32()? as usize;
        if layer_count == 0 {
            return Err(reader.malformed("no cascade layers"));
        }
        if layer_count > MAX_LAYERS {
            return Err(reader.malformed("too many cascade layers"));
        }
        let algorithms = reader
            .take(layer_count)?
            .iter()
            .map(|id| Algorithm::from_id(*id))
            .collect::<Result<Vec<_>>>()?;

        // 5. Ciphertext, which must end the input.
        let ciphertext = reader.bytes()?.to_vec();
        reader.finish()?;

        Ok(Self {
            format_version,
            salt,
            kdf,
            algorithms,
            ciphertext,
        })
    }

    // ------------------------------------------------------------------
    // Import
    // ------------------------------------------------------------------

    /// Decrypt into a new vault with default options.
    pub fn import(&self, password: &[u8]) -> Result<SecretVault> {
        self.import_with_options(password, VaultOptions::default())
    }

    /// Decrypt into a new vault.
    ///
    /// A wrong password and a tampered bundle both fail with
    /// `AuthenticationFailed`; nothing is decoded unless every cascade
    /// layer authenticates.
    pub fn import_with_options(&self, password: &[u8], options: VaultOptions) -> Result<SecretVault> {
        let header = self.header_bytes()?;
        let key = CascadingSymmetricKey::derive(password, &self.salt, &self.kdf, &self.algorithms)?;

        let table = key
            .decrypt_with_aad(&self.ciphertext, &header)
            .map_err(|e| {
                if e.is_tamper_or_wrong_credential() {
                    log::warn!(
                        "bundle import rejected: authentication failed (wrong password or tampered bundle)"
                    );
                    StrongboxError::AuthenticationFailed
                } else {
                    e
                }
            })?;
        drop(key);

        let secrets = decode_table(&table)?
            .into_iter()
            .map(|entry| {
                Secret::from_encoded(&entry.name, entry.kind, entry.created_at, &entry.payload)
            })
            .collect::<Result<Vec<_>>>()?;
        drop(table);

        let count = secrets.len();
        let vault = SecretVault::from_secrets(secrets, options)?;
        log::debug!("imported {count} secret(s) from bundle");
        Ok(vault)
    }
}

impl fmt::Debug for ExportedSecretVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedSecretVault")
            .field("format_version", &self.format_version)
            .field("kdf", &self.kdf)
            .field("algorithms", &self.algorithms)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

fn encode_header(
    version: u32,
    salt: &[u8],
    kdf: &Argon2Params,
    algorithms: &[Algorithm],
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(4 + 4 + salt.len() + 12 + 4 + algorithms.len());
    out.extend_from_slice(&version.to_le_bytes());
    put_bytes(&mut out, salt)?;
    out.extend_from_slice(&kdf.memory_kib.to_le_bytes());
    out.extend_from_slice(&kdf.iterations.to_le_bytes());
    out.extend_from_slice(&kdf.parallelism.to_le_bytes());
    put_u32(&mut out, algorithms.len())?;
    out.extend(algorithms.iter().map(|a| a.id()));
    Ok(out)
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

impl SecretVault {
    /// Encrypt every secret into a password-protected bundle.
    ///
    /// Lazy secrets are materialized first.  The table is built while the
    /// vault gate is held exclusively, so the bundle is a consistent
    /// snapshot; the plaintext table is wiped before this returns.
    pub fn export(&self, password: &[u8], options: &ExportOptions) -> Result<ExportedSecretVault> {
        // 1. Validate before doing any work.
        options.argon2.validate()?;
        if options.cascade.is_empty() {
            return Err(StrongboxError::EmptyCascade);
        }
        if options.cascade.len() > MAX_LAYERS {
            return Err(StrongboxError::ConfigError(format!(
                "a cascade may have at most {MAX_LAYERS} layers"
            )));
        }

        // 2. Run pending producers outside the gate; they may read the vault.
        let pending: Vec<_> = self
            .read()?
            .values()
            .filter(|s| !s.is_materialized())
            .cloned()
            .collect();
        for secret in &pending {
            secret.with_bytes(|_| ())?;
        }

        // 3. Snapshot the table under the exclusive gate.
        let (table, count) = {
            let map = self.write()?;
            let mut secrets: Vec<_> = map.values().collect();
            secrets.sort_by(|a, b| a.name().cmp(b.name()));

            let mut rows_len = 0;
            for secret in &secrets {
                let len = secret.with_bytes(|bytes| bytes.len())?;
                rows_len += TableWriter::row_len(secret.name(), len);
            }

            let mut writer = TableWriter::new(secrets.len(), rows_len)?;
            for secret in &secrets {
                secret.with_bytes(|bytes| {
                    writer.push(secret.name(), secret.kind(), secret.created_at(), bytes)
                })??;
            }
            (writer.finish(), secrets.len())
        };

        // 4. Derive a fresh cascade and encrypt the table once.
        let salt = generate_salt()?;
        let header = encode_header(FORMAT_VERSION, &salt, &options.argon2, &options.cascade)?;
        let key = CascadingSymmetricKey::derive(password, &salt, &options.argon2, &options.cascade)?;
        let ciphertext = key.encrypt_with_aad(&table, &header)?;
        drop(key);
        drop(table);

        log::debug!(
            "exported {count} secret(s) into a {}-byte bundle ({} layer(s))",
            ciphertext.len(),
            options.cascade.len()
        );

        Ok(ExportedSecretVault {
            format_version: FORMAT_VERSION,
            salt: salt.to_vec(),
            kdf: options.argon2,
            algorithms: options.cascade.clone(),
            ciphertext,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::secret::SecretKind;

    fn fast_options() -> ExportOptions {
        ExportOptions {
            argon2: Argon2Params::minimum(),
            ..ExportOptions::default()
        }
    }

    fn sample_vault() -> SecretVault {
        let vault = SecretVault::new();
        vault
            .add(Secret::text("db-password", "Tr0ub4dor&3").unwrap())
            .unwrap();
        vault.add(Secret::bytes("blob", &[0, 1, 2, 255]).unwrap()).unwrap();
        vault
    }

    #[test]
    fn header_fields_survive_serialization() {
        let bundle = sample_vault().export(b"pw", &fast_options()).unwrap();
        let bytes = bundle.to_bytes().unwrap();

        assert_eq!(&bytes[..4], &FORMAT_VERSION.to_le_bytes());
        let parsed = ExportedSecretVault::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, bundle);
        assert_eq!(parsed.algorithms(), fast_options().cascade.as_slice());
        assert_eq!(parsed.kdf_params(), Argon2Params::minimum());
    }

    #[test]
    fn unknown_version_is_rejected_explicitly() {
        let mut bytes = sample_vault()
            .export(b"pw", &fast_options())
            .unwrap()
            .to_bytes()
            .unwrap();
        bytes[..4].copy_from_slice(&2u32.to_le_bytes());

        assert!(matches!(
            ExportedSecretVault::from_bytes(&bytes),
            Err(StrongboxError::UnsupportedBundleVersion {
                found: 2,
                supported: 1
            })
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = sample_vault()
            .export(b"pw", &fast_options())
            .unwrap()
            .to_bytes()
            .unwrap();
        bytes.push(0);
        assert!(matches!(
            ExportedSecretVault::from_bytes(&bytes),
            Err(StrongboxError::InvalidBundleFormat(_))
        ));
    }

    #[test]
    fn excessive_kdf_cost_is_a_format_error() {
        let bundle = sample_vault().export(b"pw", &fast_options()).unwrap();
        let mut bytes = bundle.to_bytes().unwrap();
        // memory_kib follows version(4) + saltLen(4) + salt.
        let offset = 8 + bundle.salt().len();
        bytes[offset..offset + 4].copy_from_slice(&u32::MAX.to_le_bytes());

        assert!(matches!(
            ExportedSecretVault::from_bytes(&bytes),
            Err(StrongboxError::InvalidBundleFormat(_))
        ));
    }

    #[test]
    fn four_gib_sixty_four_pass_header_is_refused_before_derivation() {
        let bundle = sample_vault().export(b"pw", &fast_options()).unwrap();
        let mut bytes = bundle.to_bytes().unwrap();
        let offset = 8 + bundle.salt().len();
        bytes[offset..offset + 4].copy_from_slice(&(4 * 1024 * 1024u32).to_le_bytes());
        bytes[offset + 4..offset + 8].copy_from_slice(&64u32.to_le_bytes());

        assert!(matches!(
            ExportedSecretVault::from_bytes(&bytes),
            Err(StrongboxError::InvalidBundleFormat(_))
        ));
    }

    #[test]
    fn zero_layer_count_is_a_format_error() {
        let bundle = sample_vault().export(b"pw", &fast_options()).unwrap();
        let mut bytes = bundle.to_bytes().unwrap();
        // layerCount follows version, saltLen, salt and the three KDF fields.
        let offset = 8 + bundle.salt().len() + 12;
        bytes[offset..offset + 4].copy_from_slice(&0u32.to_le_bytes());

        assert!(matches!(
            ExportedSecretVault::from_bytes(&bytes),
            Err(StrongboxError::InvalidBundleFormat(_))
        ));
    }

    #[test]
    fn edited_header_fails_authentication() {
        let bundle = sample_vault().export(b"pw", &fast_options()).unwrap();
        let mut bytes = bundle.to_bytes().unwrap();
        // Flip a salt byte: still parses, but the derived key and AAD differ.
        bytes[8] ^= 0x01;

        let tampered = ExportedSecretVault::from_bytes(&bytes).unwrap();
        assert!(matches!(
            tampered.import(b"pw"),
            Err(StrongboxError::AuthenticationFailed)
        ));
    }

    #[test]
    fn lazy_secrets_are_materialized_by_export() {
        let vault = SecretVault::new();
        vault
            .add_lazy("late", SecretKind::Text, || {
                Ok(crate::vault::SecretValue::text("produced"))
            })
            .unwrap();

        let bundle = vault.export(b"pw", &fast_options()).unwrap();
        assert!(vault.get("late").unwrap().is_materialized());

        let restored = bundle.import(b"pw").unwrap();
        assert_eq!(
            restored.get("late").unwrap().reveal_string().unwrap().as_str(),
            "produced"
        );
    }

    #[test]
    fn empty_cascade_is_refused() {
        let options = ExportOptions {
            cascade: Vec::new(),
            ..fast_options()
        };
        assert!(matches!(
            SecretVault::new().export(b"pw", &options),
            Err(StrongboxError::EmptyCascade)
        ));
    }
}

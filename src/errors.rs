use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// All errors that can occur in Strongbox.
#[derive(Debug, Error)]
pub enum StrongboxError {
    // --- Gate errors ---
    #[error("Timed out after {0:?} waiting for exclusive access")]
    GateTimeout(Duration),

    #[error("Already held by this thread; reentrant access is not allowed")]
    ReentrantAcquire,

    // --- Integrity / authentication errors ---
    #[error("Authentication failed — wrong password or tampered bundle")]
    AuthenticationFailed,

    #[error("Integrity check failed for {0} — data was tampered with or corrupted")]
    IntegrityCheckFailed(&'static str),

    #[error("Secure buffer has been disposed")]
    BufferDisposed,

    // --- Crypto errors ---
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("System random source failed: {0}")]
    RandomSourceFailed(String),

    #[error("A cascading key needs at least one layer")]
    EmptyCascade,

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("Unknown cipher algorithm id {0}")]
    UnknownAlgorithm(u8),

    // --- Vault errors ---
    #[error("Secret '{0}' not found")]
    SecretNotFound(String),

    #[error("Secret '{0}' already exists")]
    SecretAlreadyExists(String),

    #[error("Secret '{name}' holds a {actual} value, not a {expected}")]
    SecretTypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Invalid secret name: {0}")]
    InvalidSecretName(String),

    #[error("Producer for secret '{name}' failed: {reason}")]
    ProducerFailed { name: String, reason: String },

    // --- Bundle errors ---
    #[error("Unsupported bundle format version {found} (this build reads version {supported})")]
    UnsupportedBundleVersion { found: u32, supported: u32 },

    #[error("Invalid bundle format: {0}")]
    InvalidBundleFormat(String),

    #[error("No bundle found at {0}")]
    BundleNotFound(PathBuf),

    #[error("A bundle already exists at {0}")]
    BundleAlreadyExists(PathBuf),

    // --- Config errors ---
    #[error("Config file error: {0}")]
    ConfigError(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization errors ---
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // --- CLI errors ---
    #[error("Command failed: {0}")]
    CommandFailed(String),
}

impl StrongboxError {
    /// Returns `true` for failures that mean "tampered data or wrong credential".
    ///
    /// Callers should treat these as security events, never retry them
    /// automatically, and log them without any key material.
    pub fn is_tamper_or_wrong_credential(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed | Self::IntegrityCheckFailed(_)
        )
    }

    /// Returns `true` if repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GateTimeout(_))
    }
}

/// Convenience type alias for Strongbox results.
pub type Result<T> = std::result::Result<T, StrongboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tamper_family_is_distinct_from_lookup_errors() {
        assert!(StrongboxError::AuthenticationFailed.is_tamper_or_wrong_credential());
        assert!(StrongboxError::IntegrityCheckFailed("secure buffer").is_tamper_or_wrong_credential());
        assert!(!StrongboxError::SecretNotFound("x".into()).is_tamper_or_wrong_credential());
        assert!(!StrongboxError::InvalidBundleFormat("x".into()).is_tamper_or_wrong_credential());
    }

    #[test]
    fn only_timeouts_are_retryable() {
        assert!(StrongboxError::GateTimeout(Duration::from_millis(5)).is_retryable());
        assert!(!StrongboxError::ReentrantAcquire.is_retryable());
        assert!(!StrongboxError::AuthenticationFailed.is_retryable());
    }
}

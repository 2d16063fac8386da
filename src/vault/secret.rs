//! Named, typed secrets held inside a `SecureBuffer`.
//!
//! A `Secret` is created either from a value (sealed immediately) or from a
//! producer closure that runs on first reveal.  Once a producer succeeds its
//! result is sealed and the closure is dropped; a failed producer stays in
//! place so the next reveal tries again.

use std::fmt;
use std::thread::{self, ThreadId};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::codec::{decode_text, decode_value, encode_value};
use crate::crypto::CascadingSymmetricKey;
use crate::errors::{Result, StrongboxError};
use crate::memory::SecureBuffer;

/// Longest accepted secret name.
pub const MAX_NAME_LEN: usize = 256;

/// Closure that materializes a lazy secret.
pub type Producer = Box<dyn Fn() -> Result<SecretValue> + Send + Sync>;

/// The shape of a secret's value.  The discriminant is the wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum SecretKind {
    Bytes = 0,
    Text = 1,
    Guid = 2,
    SymmetricKey = 3,
    Certificate = 4,
}

impl SecretKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(SecretKind::Bytes),
            1 => Ok(SecretKind::Text),
            2 => Ok(SecretKind::Guid),
            3 => Ok(SecretKind::SymmetricKey),
            4 => Ok(SecretKind::Certificate),
            other => Err(StrongboxError::InvalidBundleFormat(format!(
                "unknown secret kind tag {other}"
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SecretKind::Bytes => "bytes",
            SecretKind::Text => "text",
            SecretKind::Guid => "guid",
            SecretKind::SymmetricKey => "symmetric-key",
            SecretKind::Certificate => "certificate",
        }
    }
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An X.509 certificate in DER form with an optional PKCS#8 private key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Certificate {
    der: Vec<u8>,
    private_key_der: Option<Vec<u8>>,
}

impl Certificate {
    pub fn new(der: Vec<u8>, private_key_der: Option<Vec<u8>>) -> Self {
        Self {
            der,
            private_key_der,
        }
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn private_key_der(&self) -> Option<&[u8]> {
        self.private_key_der.as_deref()
    }

    pub fn has_private_key(&self) -> bool {
        self.private_key_der.is_some()
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("der_len", &self.der.len())
            .field("has_private_key", &self.has_private_key())
            .finish()
    }
}

/// A revealed, typed secret value.  Wiped when dropped.
pub enum SecretValue {
    Bytes(Zeroizing<Vec<u8>>),
    Text(Zeroizing<String>),
    Guid(Uuid),
    SymmetricKey(CascadingSymmetricKey),
    Certificate(Certificate),
}

impl SecretValue {
    pub fn text(value: impl Into<String>) -> Self {
        SecretValue::Text(Zeroizing::new(value.into()))
    }

    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        SecretValue::Bytes(Zeroizing::new(value.into()))
    }

    pub fn kind(&self) -> SecretKind {
        match self {
            SecretValue::Bytes(_) => SecretKind::Bytes,
            SecretValue::Text(_) => SecretKind::Text,
            SecretValue::Guid(_) => SecretKind::Guid,
            SecretValue::SymmetricKey(_) => SecretKind::SymmetricKey,
            SecretValue::Certificate(_) => SecretKind::Certificate,
        }
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretValue::{}(..)", self.kind())
    }
}

/// Lightweight metadata about a secret.  Never touches the value.
#[derive(Debug, Clone, Serialize)]
pub struct SecretMetadata {
    pub name: String,
    pub kind: SecretKind,
    pub created_at: DateTime<Utc>,
    /// `false` while a lazy secret's producer has not run yet.
    pub materialized: bool,
    /// Encoded length in bytes, once materialized.
    pub len: Option<usize>,
}

/// A named secret whose value only ever lives inside a `SecureBuffer`.
pub struct Secret {
    name: String,
    kind: SecretKind,
    created_at: DateTime<Utc>,
    value: OnceCell<SecureBuffer>,
    lazy: Mutex<LazyState>,
}

/// Producer bookkeeping for a lazy secret.
#[derive(Default)]
struct LazyState {
    producer: Option<Producer>,
    /// Thread currently running the producer.
    running_on: Option<ThreadId>,
    disposed: bool,
}

/// Clears `running_on` when the producer returns or unwinds.
struct RunningGuard<'a> {
    lazy: &'a Mutex<LazyState>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.lazy.lock().running_on = None;
    }
}

impl Secret {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Seal `value` under `name`.
    pub fn new(name: &str, value: SecretValue) -> Result<Self> {
        validate_secret_name(name)?;
        let kind = value.kind();
        let encoded = encode_value(&value)?;
        Self::from_encoded(name, kind, Utc::now(), &encoded)
    }

    pub fn text(name: &str, value: &str) -> Result<Self> {
        Self::from_encoded(name, SecretKind::Text, Utc::now(), value.as_bytes())
    }

    pub fn bytes(name: &str, value: &[u8]) -> Result<Self> {
        Self::from_encoded(name, SecretKind::Bytes, Utc::now(), value)
    }

    pub fn guid(name: &str, value: Uuid) -> Result<Self> {
        Self::new(name, SecretValue::Guid(value))
    }

    pub fn symmetric_key(name: &str, key: &CascadingSymmetricKey) -> Result<Self> {
        let form = key.to_exportable_form();
        Self::from_encoded(name, SecretKind::SymmetricKey, Utc::now(), &form)
    }

    pub fn certificate(name: &str, certificate: Certificate) -> Result<Self> {
        Self::new(name, SecretValue::Certificate(certificate))
    }

    /// A secret materialized by `producer` on first reveal.
    ///
    /// The producer must yield a value of `kind`.
    pub fn lazy<F>(name: &str, kind: SecretKind, producer: F) -> Result<Self>
    where
        F: Fn() -> Result<SecretValue> + Send + Sync + 'static,
    {
        validate_secret_name(name)?;
        Ok(Self {
            name: name.to_string(),
            kind,
            created_at: Utc::now(),
            value: OnceCell::new(),
            lazy: Mutex::new(LazyState {
                producer: Some(Box::new(producer)),
                ..LazyState::default()
            }),
        })
    }

    /// Rebuild a secret from already-encoded value bytes.
    pub(crate) fn from_encoded(
        name: &str,
        kind: SecretKind,
        created_at: DateTime<Utc>,
        encoded: &[u8],
    ) -> Result<Self> {
        validate_secret_name(name)?;
        let buffer = SecureBuffer::from_slice(encoded)?;
        Ok(Self {
            name: name.to_string(),
            kind,
            created_at,
            value: OnceCell::with_value(buffer),
            lazy: Mutex::new(LazyState::default()),
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SecretKind {
        self.kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the value has been sealed (always true for eager secrets).
    pub fn is_materialized(&self) -> bool {
        self.value.get().is_some()
    }

    pub fn metadata(&self) -> SecretMetadata {
        let buffer = self.value.get();
        SecretMetadata {
            name: self.name.clone(),
            kind: self.kind,
            created_at: self.created_at,
            materialized: buffer.is_some(),
            len: buffer.map(SecureBuffer::len),
        }
    }

    // ------------------------------------------------------------------
    // Reveal
    // ------------------------------------------------------------------

    /// Decrypt and decode the value into its typed form.
    pub fn reveal(&self) -> Result<SecretValue> {
        self.buffer()?
            .with_access(|bytes| decode_value(self.kind, bytes))?
    }

    /// Run `f` over the encoded value bytes without copying them out.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.buffer()?.with_access(f)
    }

    pub fn reveal_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.expect_kind(SecretKind::Bytes)?;
        self.with_bytes(|bytes| Zeroizing::new(bytes.to_vec()))
    }

    pub fn reveal_string(&self) -> Result<Zeroizing<String>> {
        self.expect_kind(SecretKind::Text)?;
        self.with_bytes(decode_text)?
    }

    pub fn reveal_guid(&self) -> Result<Uuid> {
        self.expect_kind(SecretKind::Guid)?;
        match self.reveal()? {
            SecretValue::Guid(guid) => Ok(guid),
            other => Err(self.mismatch(other.kind())),
        }
    }

    pub fn reveal_symmetric_key(&self) -> Result<CascadingSymmetricKey> {
        self.expect_kind(SecretKind::SymmetricKey)?;
        self.with_bytes(CascadingSymmetricKey::from_exportable_form)?
    }

    pub fn reveal_certificate(&self) -> Result<Certificate> {
        self.expect_kind(SecretKind::Certificate)?;
        match self.reveal()? {
            SecretValue::Certificate(cert) => Ok(cert),
            other => Err(self.mismatch(other.kind())),
        }
    }

    /// Constant-time comparison of the encoded value with `candidate`.
    pub fn matches(&self, candidate: &[u8]) -> Result<bool> {
        self.with_bytes(|bytes| bool::from(bytes.ct_eq(candidate)))
    }

    /// Wipe the sealed value and drop any pending producer.
    pub fn dispose(&self) -> Result<()> {
        {
            let mut lazy = self.lazy.lock();
            lazy.disposed = true;
            lazy.producer = None;
        }
        if let Some(buffer) = self.value.get() {
            buffer.dispose()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn buffer(&self) -> Result<&SecureBuffer> {
        if let Some(buffer) = self.value.get() {
            return Ok(buffer);
        }

        // A producer revealing its own secret would block on the cell forever.
        if self.lazy.lock().running_on == Some(thread::current().id()) {
            return Err(StrongboxError::ReentrantAcquire);
        }

        let buffer = self.value.get_or_try_init(|| self.produce())?;

        // `dispose` may have run between the producer returning and the
        // cell being filled.
        if self.lazy.lock().disposed {
            buffer.dispose()?;
            return Err(StrongboxError::BufferDisposed);
        }
        Ok(buffer)
    }

    /// Run the producer once and seal its result.
    ///
    /// The producer runs without the state lock held so it may read other
    /// secrets; the cell keeps other threads waiting meanwhile.
    fn produce(&self) -> Result<SecureBuffer> {
        let producer = {
            let mut lazy = self.lazy.lock();
            if lazy.disposed {
                return Err(StrongboxError::BufferDisposed);
            }
            let producer = lazy.producer.take().ok_or(StrongboxError::BufferDisposed)?;
            lazy.running_on = Some(thread::current().id());
            producer
        };

        let outcome = {
            let _running = RunningGuard { lazy: &self.lazy };
            producer()
        };

        let value = match outcome {
            Ok(value) if value.kind() == self.kind => value,
            Ok(value) => {
                self.restore(producer);
                return Err(self.mismatch(value.kind()));
            }
            Err(e) => {
                self.restore(producer);
                return Err(StrongboxError::ProducerFailed {
                    name: self.name.clone(),
                    reason: e.to_string(),
                });
            }
        };
        drop(producer);

        let encoded = encode_value(&value)?;
        drop(value);
        let buffer = SecureBuffer::from_slice(&encoded)?;

        if self.lazy.lock().disposed {
            return Err(StrongboxError::BufferDisposed);
        }
        log::debug!("lazy secret '{}' materialized", self.name);
        Ok(buffer)
    }

    /// Put a failed producer back for the next reveal, unless disposed.
    fn restore(&self, producer: Producer) {
        let mut lazy = self.lazy.lock();
        if !lazy.disposed {
            lazy.producer = Some(producer);
        }
    }

    fn expect_kind(&self, wanted: SecretKind) -> Result<()> {
        if self.kind != wanted {
            return Err(StrongboxError::SecretTypeMismatch {
                name: self.name.clone(),
                expected: wanted.name(),
                actual: self.kind.name(),
            });
        }
        Ok(())
    }

    fn mismatch(&self, actual: SecretKind) -> StrongboxError {
        StrongboxError::SecretTypeMismatch {
            name: self.name.clone(),
            expected: self.kind.name(),
            actual: actual.name(),
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("materialized", &self.is_materialized())
            .finish_non_exhaustive()
    }
}

/// Validate that a secret name is safe.
///
/// Allowed: ASCII letters, digits, underscores, hyphens, periods.
/// Must be non-empty and at most 256 characters.
pub fn validate_secret_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StrongboxError::InvalidSecretName(
            "secret name cannot be empty".into(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(StrongboxError::InvalidSecretName(format!(
            "secret name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
    {
        return Err(StrongboxError::InvalidSecretName(format!(
            "'{name}' contains invalid characters; only ASCII letters, digits, underscores, hyphens, and periods are allowed"
        )));
    }
    Ok(())
}

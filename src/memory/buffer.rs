//! Encrypted-at-rest, self-zeroing byte container.
//!
//! A `SecureBuffer` keeps its payload sealed with XChaCha20-Poly1305 under
//! an ephemeral per-buffer key that lives in locked memory.  Plaintext only
//! exists inside a `with_access` scope, decrypted into a locked scratch
//! region that is wiped before the buffer's gate is released, on every exit
//! path including panics.
//!
//! Sealed layout:
//!   [ 24-byte nonce | ciphertext | 16-byte tag ]
//!
//! The payload length is authenticated as associated data, so a length
//! mismatch is caught by the tag check as well as by the size check.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{Tag, XChaCha20Poly1305, XNonce};
use zeroize::{Zeroize, Zeroizing};

use super::locked::LockedBytes;
use crate::crypto::random::{fill_random, random_array};
use crate::errors::{Result, StrongboxError};
use crate::sync::{ConcurrencyGate, ExclusiveToken};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

fn length_aad(len: usize) -> [u8; 8] {
    (len as u64).to_le_bytes()
}

/// The guarded state: ephemeral key plus sealed payload.
struct Sealed {
    key: LockedBytes,
    ciphertext: Zeroizing<Vec<u8>>,
    len: usize,
}

impl Sealed {
    fn new(plaintext: &[u8]) -> Result<Self> {
        let mut key = LockedBytes::zeroed(KEY_LEN);
        fill_random(&mut key)?;
        let ciphertext = seal(&key, plaintext)?;
        Ok(Self {
            key,
            ciphertext,
            len: plaintext.len(),
        })
    }

    /// Decrypt into a fresh locked region.
    fn open(&self) -> Result<LockedBytes> {
        if self.ciphertext.len() != NONCE_LEN + self.len + TAG_LEN {
            return Err(StrongboxError::IntegrityCheckFailed("secure buffer"));
        }

        let cipher = XChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|_| StrongboxError::IntegrityCheckFailed("secure buffer"))?;

        let (nonce, rest) = self.ciphertext.split_at(NONCE_LEN);
        let (body, tag) = rest.split_at(self.len);

        let mut plaintext = LockedBytes::from_slice(body);
        cipher
            .decrypt_in_place_detached(
                XNonce::from_slice(nonce),
                &length_aad(self.len),
                &mut plaintext,
                Tag::from_slice(tag),
            )
            .map_err(|_| StrongboxError::IntegrityCheckFailed("secure buffer"))?;

        Ok(plaintext)
    }

    /// Re-seal new contents under the same key and a fresh nonce.
    fn reseal(&mut self, plaintext: &[u8]) -> Result<()> {
        self.ciphertext = seal(&self.key, plaintext)?;
        self.len = plaintext.len();
        Ok(())
    }

    fn destroy(&mut self) {
        self.key.wipe();
        self.ciphertext.zeroize();
        self.len = 0;
    }
}

fn seal(key: &[u8], plaintext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| StrongboxError::InvalidKeyMaterial(format!("secure buffer key: {e}")))?;
    let nonce: [u8; NONCE_LEN] = random_array()?;

    // Exact capacity: the plaintext copy is encrypted in place and never
    // moved by a reallocation.
    let mut out = Zeroizing::new(Vec::with_capacity(NONCE_LEN + plaintext.len() + TAG_LEN));
    out.extend_from_slice(&nonce);
    out.extend_from_slice(plaintext);

    let tag = cipher
        .encrypt_in_place_detached(
            XNonce::from_slice(&nonce),
            &length_aad(plaintext.len()),
            &mut out[NONCE_LEN..],
        )
        .map_err(|e| StrongboxError::EncryptionFailed(format!("secure buffer: {e}")))?;
    out.extend_from_slice(&tag);

    Ok(out)
}

/// Transient plaintext for one access scope.
struct PlaintextScope {
    bytes: LockedBytes,
}

impl Drop for PlaintextScope {
    fn drop(&mut self) {
        self.bytes.wipe();
        #[cfg(test)]
        probe::record(self.bytes.is_wiped());
    }
}

/// A self-zeroing, encrypted-at-rest container for sensitive bytes.
pub struct SecureBuffer {
    state: ConcurrencyGate<Sealed>,
    len: AtomicUsize,
    access_count: AtomicU64,
    disposed: AtomicBool,
}

impl SecureBuffer {
    /// Seal `plaintext` and wipe the caller's copy.
    pub fn new(plaintext: &mut [u8]) -> Result<Self> {
        let buffer = Self::from_slice(plaintext);
        plaintext.zeroize();
        buffer
    }

    /// Take ownership of `plaintext`, seal it and wipe the vector.
    pub fn from_vec(plaintext: Vec<u8>) -> Result<Self> {
        let plaintext = Zeroizing::new(plaintext);
        Self::from_slice(&plaintext)
    }

    /// Seal a copy of `plaintext`.  The caller keeps (and must wipe) its own.
    pub fn from_slice(plaintext: &[u8]) -> Result<Self> {
        let sealed = Sealed::new(plaintext)?;
        log::debug!("secure buffer created ({} bytes)", plaintext.len());
        Ok(Self {
            state: ConcurrencyGate::exclusive(sealed),
            len: AtomicUsize::new(plaintext.len()),
            access_count: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn empty() -> Result<Self> {
        Self::from_slice(&[])
    }

    /// Payload length in bytes.  Does not decrypt.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of completed decryptions.
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Run `f` over the decrypted payload.
    ///
    /// The plaintext is wiped before the gate is released, whether `f`
    /// returns, returns an error value, or panics.  A failed integrity
    /// check destroys the buffer; later calls get `BufferDisposed`.
    pub fn with_access<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let sealed = self.state.acquire_exclusive()?;
        self.run_scope(sealed, |bytes| f(bytes))
    }

    /// `with_access`, giving up with `GateTimeout` after `timeout`.
    pub fn try_with_access<R>(&self, timeout: Duration, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let sealed = self.state.try_acquire_exclusive(timeout)?;
        self.run_scope(sealed, |bytes| f(bytes))
    }

    /// Mutate the payload in place; the new contents are re-sealed under a
    /// fresh nonce.  The length cannot change; use `replace` for that.
    pub fn with_access_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let mut sealed = self.state.acquire_exclusive()?;
        let mut scope = self.open_scope(&mut sealed)?;

        let result = f(&mut scope.bytes);
        sealed.reseal(&scope.bytes)?;
        drop(scope);

        Ok(result)
    }

    /// Swap in a new payload and wipe the caller's copy.
    pub fn replace(&self, plaintext: &mut [u8]) -> Result<()> {
        let mut sealed = self.state.acquire_exclusive()?;
        if self.is_disposed() {
            plaintext.zeroize();
            return Err(StrongboxError::BufferDisposed);
        }

        let outcome = sealed.reseal(plaintext);
        plaintext.zeroize();
        outcome?;

        self.len.store(sealed.len, Ordering::Release);
        Ok(())
    }

    /// Wipe the key and ciphertext.  Idempotent.
    pub fn dispose(&self) -> Result<()> {
        let mut sealed = self.state.acquire_exclusive()?;
        self.destroy(&mut sealed);
        Ok(())
    }

    fn destroy(&self, sealed: &mut Sealed) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            sealed.destroy();
            self.len.store(0, Ordering::Release);
            log::debug!("secure buffer disposed");
        }
    }

    fn open_scope(&self, sealed: &mut ExclusiveToken<'_, Sealed>) -> Result<PlaintextScope> {
        if self.is_disposed() {
            return Err(StrongboxError::BufferDisposed);
        }

        match sealed.open() {
            Ok(bytes) => {
                self.access_count.fetch_add(1, Ordering::Relaxed);
                Ok(PlaintextScope { bytes })
            }
            Err(e) => {
                log::warn!("secure buffer failed its integrity check and was destroyed");
                self.destroy(sealed);
                Err(e)
            }
        }
    }

    fn run_scope<R>(
        &self,
        mut sealed: ExclusiveToken<'_, Sealed>,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R> {
        let scope = self.open_scope(&mut sealed)?;
        let result = f(&scope.bytes);
        // Wipe before `sealed` goes out of scope and releases the gate.
        drop(scope);
        Ok(result)
    }
}

impl fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureBuffer")
            .field("len", &self.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod probe {
    use std::cell::Cell;

    thread_local! {
        static LAST_SCOPE_WIPED: Cell<Option<bool>> = const { Cell::new(None) };
    }

    pub(crate) fn record(wiped: bool) {
        LAST_SCOPE_WIPED.with(|c| c.set(Some(wiped)));
    }

    /// Whether the most recent scope on this thread ended fully zeroed.
    pub(crate) fn take() -> Option<bool> {
        LAST_SCOPE_WIPED.with(|c| c.take())
    }
}

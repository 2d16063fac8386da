//! Heap byte regions that are pinned in RAM where the platform allows it.
//!
//! On Unix the region is `mlock`ed so it is never written to swap.  When
//! locking is unavailable (no privilege, `RLIMIT_MEMLOCK` exhausted, or a
//! non-Unix target) the region still gets wiped on drop; the weaker
//! guarantee is logged once per process.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use zeroize::Zeroize;

static DEGRADED_WARNING_SHOWN: AtomicBool = AtomicBool::new(false);

fn warn_degraded(reason: &str) {
    if !DEGRADED_WARNING_SHOWN.swap(true, Ordering::Relaxed) {
        log::warn!("memory locking unavailable ({reason}); secrets are wiped on release but may be swapped");
    }
}

#[cfg(unix)]
fn lock_region(region: &mut [u8]) -> bool {
    if region.is_empty() {
        return false;
    }
    // SAFETY: pointer and length describe a live allocation owned by the caller.
    let rc = unsafe { libc::mlock(region.as_ptr().cast::<libc::c_void>(), region.len()) };
    if rc == 0 {
        true
    } else {
        warn_degraded(&std::io::Error::last_os_error().to_string());
        false
    }
}

#[cfg(unix)]
fn unlock_region(region: &mut [u8]) {
    // SAFETY: the region was locked by `lock_region` and is still allocated.
    let rc = unsafe { libc::munlock(region.as_ptr().cast::<libc::c_void>(), region.len()) };
    if rc != 0 {
        log::debug!("munlock failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn lock_region(region: &mut [u8]) -> bool {
    if !region.is_empty() {
        warn_degraded("unsupported platform");
    }
    false
}

#[cfg(not(unix))]
fn unlock_region(_region: &mut [u8]) {}

/// A fixed-size byte region that is locked in memory and zeroed on drop.
///
/// The size never changes after construction, so the bytes are never
/// reallocated and left behind in freed memory.
pub struct LockedBytes {
    bytes: Box<[u8]>,
    locked: bool,
}

impl LockedBytes {
    /// Allocate `len` zero bytes.
    pub fn zeroed(len: usize) -> Self {
        let mut bytes = vec![0u8; len].into_boxed_slice();
        let locked = lock_region(&mut bytes);
        Self { bytes, locked }
    }

    /// Allocate a region holding a copy of `src`.
    pub fn from_slice(src: &[u8]) -> Self {
        let mut region = Self::zeroed(src.len());
        region.bytes.copy_from_slice(src);
        region
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the operating system agreed to pin this region.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Overwrite every byte with zero.
    pub fn wipe(&mut self) {
        self.bytes.zeroize();
    }

    pub fn is_wiped(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }
}

impl Deref for LockedBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for LockedBytes {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Zeroize for LockedBytes {
    fn zeroize(&mut self) {
        self.wipe();
    }
}

impl Drop for LockedBytes {
    fn drop(&mut self) {
        self.wipe();
        if self.locked {
            unlock_region(&mut self.bytes);
        }
    }
}

impl fmt::Debug for LockedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedBytes")
            .field("len", &self.bytes.len())
            .field("locked", &self.locked)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_slice_copies_and_wipe_zeroes() {
        let mut region = LockedBytes::from_slice(b"hunter2");
        assert_eq!(&*region, b"hunter2");
        assert!(!region.is_wiped());

        region.wipe();
        assert_eq!(region.len(), 7);
        assert!(region.is_wiped());
    }

    #[test]
    fn empty_region_is_never_locked() {
        let region = LockedBytes::zeroed(0);
        assert!(region.is_empty());
        assert!(!region.is_locked());
    }

    #[test]
    fn debug_output_hides_contents() {
        let region = LockedBytes::from_slice(b"top-secret");
        let rendered = format!("{region:?}");
        assert!(!rendered.contains("top-secret"));
        assert!(rendered.contains("len: 10"));
    }
}

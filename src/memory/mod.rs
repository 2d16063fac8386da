//! Memory hygiene for secret material: page-locked scratch regions and
//! the encrypted-at-rest `SecureBuffer`.

pub mod buffer;
pub mod locked;

pub use buffer::SecureBuffer;
pub use locked::LockedBytes;

//! Vault module: named secrets, the concurrent store and its bundles.
//!
//! This module provides:
//! - `Secret`, `SecretValue` and `SecretKind` (`secret`)
//! - Binary encoding of values and the export table (`codec`)
//! - The concurrent `SecretVault` (`store`)
//! - Password-protected `ExportedSecretVault` bundles (`bundle`)
//! - `PersistenceVehicle` implementations (`persistence`)

pub mod bundle;
pub mod codec;
pub mod persistence;
pub mod secret;
pub mod store;

// Re-export the most commonly used items.
pub use bundle::{ExportOptions, ExportedSecretVault, FORMAT_VERSION};
pub use persistence::{load_vault, save_vault, FileVehicle, MemoryVehicle, PersistenceVehicle};
pub use secret::{Certificate, Secret, SecretKind, SecretMetadata, SecretValue};
pub use store::{SecretVault, VaultOptions};

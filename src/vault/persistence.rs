//! Durable storage for exported bundles.
//!
//! A `PersistenceVehicle` only ever sees the opaque bytes of an
//! `ExportedSecretVault`; it knows nothing about secrets or keys.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::errors::{Result, StrongboxError};

use super::bundle::{ExportOptions, ExportedSecretVault};
use super::store::{SecretVault, VaultOptions};

/// Somewhere a bundle can be written to and read back from.
pub trait PersistenceVehicle {
    fn write(&self, bytes: &[u8]) -> Result<()>;

    /// Fails with `BundleNotFound` if nothing has been written yet.
    fn read(&self) -> Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// FileVehicle
// ---------------------------------------------------------------------------

/// Stores the bundle in a single file, replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct FileVehicle {
    path: PathBuf,
}

impl FileVehicle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn tmp_path(&self) -> PathBuf {
        let parent = self.path.parent().unwrap_or(Path::new("."));
        parent.join(format!(
            ".{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id()
        ))
    }
}

impl PersistenceVehicle for FileVehicle {
    /// Write to a temp file beside the target, then rename over it, so
    /// readers never see a half-written bundle.
    fn write(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.tmp_path();
        let outcome = write_owner_only(&tmp_path, bytes).and_then(|()| fs::rename(&tmp_path, &self.path));
        if outcome.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        outcome?;

        log::debug!("wrote {} byte bundle to {}", bytes.len(), self.path.display());
        Ok(())
    }

    fn read(&self) -> Result<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StrongboxError::BundleNotFound(self.path.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Create (or truncate) `path` with owner-only permissions and fill it.
fn write_owner_only(path: &Path, bytes: &[u8]) -> io::Result<()> {
    #[cfg(unix)]
    let mut file = {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?
    };

    #[cfg(not(unix))]
    let mut file = fs::File::create(path)?;

    file.write_all(bytes)?;
    file.sync_all()
}

// ---------------------------------------------------------------------------
// MemoryVehicle
// ---------------------------------------------------------------------------

/// Keeps the bundle in memory.  Useful for tests and for callers that
/// ship the bytes somewhere themselves.
#[derive(Debug, Default)]
pub struct MemoryVehicle {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryVehicle {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceVehicle for MemoryVehicle {
    fn write(&self, bytes: &[u8]) -> Result<()> {
        *self.bytes.lock() = Some(bytes.to_vec());
        Ok(())
    }

    fn read(&self) -> Result<Vec<u8>> {
        self.bytes
            .lock()
            .clone()
            .ok_or_else(|| StrongboxError::BundleNotFound(PathBuf::from("<memory>")))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Export `vault` and hand the bundle bytes to `vehicle`.
pub fn save_vault(
    vault: &SecretVault,
    password: &[u8],
    options: &ExportOptions,
    vehicle: &dyn PersistenceVehicle,
) -> Result<ExportedSecretVault> {
    let bundle = vault.export(password, options)?;
    vehicle.write(&bundle.to_bytes()?)?;
    Ok(bundle)
}

/// Read a bundle from `vehicle` and import it.
pub fn load_vault(
    vehicle: &dyn PersistenceVehicle,
    password: &[u8],
    options: VaultOptions,
) -> Result<SecretVault> {
    let bytes = vehicle.read()?;
    ExportedSecretVault::from_bytes(&bytes)?.import_with_options(password, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Argon2Params;
    use crate::vault::Secret;
    use tempfile::TempDir;

    fn fast_options() -> ExportOptions {
        ExportOptions {
            argon2: Argon2Params::minimum(),
            ..ExportOptions::default()
        }
    }

    #[test]
    fn file_vehicle_roundtrip_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let vehicle = FileVehicle::new(dir.path().join("nested/dir/vault.sbx"));

        vehicle.write(b"opaque").unwrap();
        assert_eq!(vehicle.read().unwrap(), b"opaque");

        vehicle.write(b"replaced").unwrap();
        assert_eq!(vehicle.read().unwrap(), b"replaced");
    }

    #[test]
    fn file_vehicle_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let vehicle = FileVehicle::new(dir.path().join("vault.sbx"));
        vehicle.write(b"x").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn file_vehicle_writes_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let vehicle = FileVehicle::new(dir.path().join("vault.sbx"));
        vehicle.write(b"x").unwrap();

        let mode = fs::metadata(vehicle.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn missing_file_is_bundle_not_found() {
        let dir = TempDir::new().unwrap();
        let vehicle = FileVehicle::new(dir.path().join("absent.sbx"));
        assert!(!vehicle.exists());
        assert!(matches!(
            vehicle.read(),
            Err(StrongboxError::BundleNotFound(_))
        ));
    }

    #[test]
    fn memory_vehicle_starts_empty() {
        let vehicle = MemoryVehicle::new();
        assert!(vehicle.read().is_err());
        vehicle.write(b"abc").unwrap();
        assert_eq!(vehicle.read().unwrap(), b"abc");
    }

    #[test]
    fn save_and_load_through_a_vehicle() {
        let vault = SecretVault::new();
        vault.add(Secret::text("api-token", "s3cr3t").unwrap()).unwrap();

        let vehicle = MemoryVehicle::new();
        save_vault(&vault, b"pw", &fast_options(), &vehicle).unwrap();

        // The vehicle never sees plaintext.
        let stored = vehicle.read().unwrap();
        assert!(!stored.windows(6).any(|w| w == b"s3cr3t"));

        let restored = load_vault(&vehicle, b"pw", VaultOptions::default()).unwrap();
        assert_eq!(
            restored.get("api-token").unwrap().reveal_string().unwrap().as_str(),
            "s3cr3t"
        );
    }
}

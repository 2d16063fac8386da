use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::{Algorithm, Argon2Params};
use crate::errors::{Result, StrongboxError};
use crate::vault::{ExportOptions, VaultOptions};

/// Project-level configuration, loaded from `.strongbox.toml`.
///
/// Every field has a sensible default so Strongbox works out-of-the-box
/// without any config file at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Bundle file (relative to the project root).
    #[serde(default = "default_bundle_path")]
    pub bundle_path: String,

    /// Argon2 memory cost in KiB (default: 64 MB).
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u32,

    /// Argon2 iteration count (default: 3).
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,

    /// Argon2 parallelism degree (default: 4).
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,

    /// Cipher layers applied on export, first to last.
    #[serde(default = "default_cascade")]
    pub cascade: Vec<String>,

    /// How many vault lookups may run at once.
    #[serde(default = "default_read_concurrency")]
    pub read_concurrency: usize,

    /// Give up on a busy vault after this many milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_timeout_ms: Option<u64>,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_bundle_path() -> String {
    ".strongbox/vault.sbx".to_string()
}

fn default_argon2_memory_kib() -> u32 {
    65_536 // 64 MB
}

fn default_argon2_iterations() -> u32 {
    3
}

fn default_argon2_parallelism() -> u32 {
    4
}

fn default_cascade() -> Vec<String> {
    vec![
        Algorithm::Aes256Gcm.name().to_string(),
        Algorithm::XChaCha20Poly1305.name().to_string(),
    ]
}

fn default_read_concurrency() -> usize {
    8
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            bundle_path: default_bundle_path(),
            argon2_memory_kib: default_argon2_memory_kib(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
            cascade: default_cascade(),
            read_concurrency: default_read_concurrency(),
            gate_timeout_ms: None,
        }
    }
}

impl Settings {
    /// Name of the config file we look for in the project root.
    pub const FILE_NAME: &'static str = ".strongbox.toml";

    /// Load settings from `<project_dir>/.strongbox.toml`.
    ///
    /// If the file does not exist, sensible defaults are returned.
    /// If the file exists but cannot be parsed, an error is returned.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            log::debug!("no {} found, using defaults", Self::FILE_NAME);
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            StrongboxError::ConfigError(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        Ok(settings)
    }

    /// Full path of the bundle file, e.g. `project_dir/.strongbox/vault.sbx`.
    pub fn bundle_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.bundle_path)
    }

    /// Convert the Argon2 settings into crypto-layer params.
    pub fn argon2_params(&self) -> Argon2Params {
        Argon2Params {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }

    /// Parse the configured cascade.  Unknown names are a `ConfigError`.
    pub fn algorithms(&self) -> Result<Vec<Algorithm>> {
        if self.cascade.is_empty() {
            return Err(StrongboxError::ConfigError(
                "cascade must list at least one cipher".into(),
            ));
        }
        self.cascade.iter().map(|name| name.parse()).collect()
    }

    pub fn export_options(&self) -> Result<ExportOptions> {
        let argon2 = self.argon2_params();
        argon2
            .validate()
            .map_err(|e| StrongboxError::ConfigError(e.to_string()))?;

        Ok(ExportOptions {
            argon2,
            cascade: self.algorithms()?,
        })
    }

    pub fn vault_options(&self) -> VaultOptions {
        VaultOptions {
            read_concurrency: self.read_concurrency.max(1),
            acquire_timeout: self.gate_timeout_ms.map(Duration::from_millis),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

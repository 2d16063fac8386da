//! CLI module: Clap argument parser, output helpers, and command implementations.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::Parser;
use zeroize::Zeroizing;

use crate::config::Settings;
use crate::errors::{Result, StrongboxError};
use crate::vault::{load_vault, save_vault, FileVehicle, SecretVault};

/// Minimum password length to prevent trivially weak passwords.
const MIN_PASSWORD_LEN: usize = 8;

/// Environment variable holding the bundle password (CI/CD).
pub const PASSWORD_ENV: &str = "STRONGBOX_PASSWORD";

/// Environment variable holding the replacement password for `rotate-password`.
pub const NEW_PASSWORD_ENV: &str = "STRONGBOX_NEW_PASSWORD";

/// Strongbox CLI: encrypted secret vault.
#[derive(Parser)]
#[command(
    name = "strongbox",
    about = "Encrypted secret vault with cascading ciphers",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Bundle file (default: bundle_path from .strongbox.toml)
    #[arg(short, long, global = true)]
    pub bundle: Option<String>,
}

/// How a `set` value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ValueKind {
    /// UTF-8 text
    Text,
    /// Base64-encoded bytes
    Bytes,
    /// A GUID (generated when no value is given)
    Guid,
}

/// All available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create a new, empty bundle
    Init,

    /// Set a secret (add or replace)
    Set {
        /// Secret name (e.g. db-password)
        name: String,
        /// Secret value (omit for interactive prompt)
        value: Option<String>,
        /// How to interpret the value
        #[arg(short, long, value_enum, default_value = "text")]
        kind: ValueKind,
    },

    /// Print a secret's value
    Get {
        /// Secret name
        name: String,
    },

    /// List all secrets
    List {
        /// Print metadata as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a secret
    Delete {
        /// Secret name
        name: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Generate a random cascading key and store it as a secret
    GenerateKey {
        /// Secret name for the new key
        name: String,
        /// Cipher layer, repeatable, first to last (default: cascade from config)
        #[arg(short, long = "cipher")]
        ciphers: Vec<String>,
    },

    /// Re-encrypt the bundle under a new password
    RotatePassword,
}

// ---------------------------------------------------------------------------
// Shared helpers used by multiple commands
// ---------------------------------------------------------------------------

/// Get the bundle password, trying in order:
/// 1. `STRONGBOX_PASSWORD` env var (CI/CD)
/// 2. Interactive prompt
///
/// Returns `Zeroizing<String>` so the password is wiped from memory on drop.
pub fn prompt_password() -> Result<Zeroizing<String>> {
    if let Some(pw) = password_from_env(PASSWORD_ENV) {
        return Ok(pw);
    }

    let pw = dialoguer::Password::new()
        .with_prompt("Enter vault password")
        .interact()
        .map_err(|e| StrongboxError::CommandFailed(format!("password prompt: {e}")))?;
    Ok(Zeroizing::new(pw))
}

/// Prompt for a new password with confirmation (used by `init` and
/// `rotate-password`).
///
/// `env_var` is checked first for scripted/CI usage.  Enforces a minimum
/// password length.
pub fn prompt_new_password(env_var: &str) -> Result<Zeroizing<String>> {
    if let Some(pw) = password_from_env(env_var) {
        if pw.len() < MIN_PASSWORD_LEN {
            return Err(StrongboxError::CommandFailed(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        return Ok(pw);
    }

    loop {
        let password = Zeroizing::new(
            dialoguer::Password::new()
                .with_prompt("Choose vault password")
                .with_confirmation(
                    "Confirm vault password",
                    "Passwords do not match, try again",
                )
                .interact()
                .map_err(|e| StrongboxError::CommandFailed(format!("password prompt: {e}")))?,
        );

        if password.len() < MIN_PASSWORD_LEN {
            output::warning(&format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters. Try again."
            ));
            continue;
        }

        return Ok(password);
    }
}

fn password_from_env(var: &str) -> Option<Zeroizing<String>> {
    std::env::var(var)
        .ok()
        .map(Zeroizing::new)
        .filter(|pw| !pw.is_empty())
}

/// Resolve the bundle file from `--bundle` or the project settings.
pub fn bundle_path(cli: &Cli, settings: &Settings) -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(match &cli.bundle {
        Some(path) => cwd.join(path),
        None => settings.bundle_path(&cwd),
    })
}

/// An unlocked bundle: settings, where it lives, its password and the
/// decrypted vault.
pub struct Session {
    pub settings: Settings,
    pub vehicle: FileVehicle,
    pub vault: SecretVault,
    password: Zeroizing<String>,
}

impl Session {
    /// Load settings, prompt for the password and import the bundle.
    pub fn open(cli: &Cli) -> Result<Self> {
        let settings = Settings::load(&std::env::current_dir()?)?;
        let vehicle = FileVehicle::new(bundle_path(cli, &settings)?);
        if !vehicle.exists() {
            return Err(StrongboxError::BundleNotFound(vehicle.path().to_path_buf()));
        }

        let password = prompt_password()?;
        let vault = load_vault(&vehicle, password.as_bytes(), settings.vault_options())?;

        Ok(Self {
            settings,
            vehicle,
            vault,
            password,
        })
    }

    /// Replace the password used by the next `save`.
    pub fn set_password(&mut self, password: Zeroizing<String>) {
        self.password = password;
    }

    /// Export the vault under the current password and write it atomically.
    pub fn save(&self) -> Result<()> {
        let options = self.settings.export_options()?;
        save_vault(&self.vault, self.password.as_bytes(), &options, &self.vehicle)?;
        Ok(())
    }
}

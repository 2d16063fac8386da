//! `strongbox init`: create a new, empty bundle.

use crate::cli::output;
use crate::cli::{bundle_path, prompt_new_password, Cli, PASSWORD_ENV};
use crate::config::Settings;
use crate::errors::{Result, StrongboxError};
use crate::vault::{save_vault, FileVehicle, SecretVault};

/// Execute the `init` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let settings = Settings::load(&cwd)?;

    // 1. Refuse to overwrite an existing bundle.
    let vehicle = FileVehicle::new(bundle_path(cli, &settings)?);
    if vehicle.exists() {
        output::tip("Use `strongbox set` to add secrets to the existing bundle.");
        return Err(StrongboxError::BundleAlreadyExists(
            vehicle.path().to_path_buf(),
        ));
    }

    // 2. Validate config before asking for anything.
    let options = settings.export_options()?;

    // 3. Prompt for a new password (with confirmation).
    let password = prompt_new_password(PASSWORD_ENV)?;

    // 4. Export an empty vault and write it.
    let vault = SecretVault::with_options(settings.vault_options());
    save_vault(&vault, password.as_bytes(), &options, &vehicle)?;

    let layers: Vec<&str> = options.cascade.iter().map(|a| a.name()).collect();
    output::success(&format!(
        "Bundle created at {} ({})",
        vehicle.path().display(),
        layers.join(" -> ")
    ));
    output::tip("Add a secret: strongbox set <NAME>");

    Ok(())
}

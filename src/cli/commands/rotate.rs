//! `strongbox rotate-password`: re-encrypt the bundle under a new password.
//!
//! Imports the bundle with the current password, then exports it again
//! with a fresh salt and a key derived from the new password.

use crate::cli::output;
use crate::cli::{prompt_new_password, Cli, Session, NEW_PASSWORD_ENV};
use crate::errors::Result;

/// Execute the `rotate-password` command.
pub fn execute(cli: &Cli) -> Result<()> {
    // 1. Open the bundle with the current password.
    output::info("Enter your current vault password.");
    let mut session = Session::open(cli)?;

    // 2. Prompt for the new password.
    output::info("Choose your new vault password.");
    let new_password = prompt_new_password(NEW_PASSWORD_ENV)?;

    // 3. Re-export under the new password (fresh salt) and write atomically.
    session.set_password(new_password);
    session.save()?;

    output::success(&format!(
        "Password rotated for {} ({} secrets re-encrypted)",
        session.vehicle.path().display(),
        session.vault.len()?
    ));

    Ok(())
}

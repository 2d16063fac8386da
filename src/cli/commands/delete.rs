//! `strongbox delete`: remove a secret from the bundle.

use dialoguer::Confirm;

use crate::cli::output;
use crate::cli::{Cli, Session};
use crate::errors::{Result, StrongboxError};

/// Execute the `delete` command.
pub fn execute(cli: &Cli, name: &str, force: bool) -> Result<()> {
    // Unless --force is set, ask for confirmation before deleting.
    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete secret '{name}'?"))
            .default(false)
            .interact()
            .map_err(|e| StrongboxError::CommandFailed(format!("confirm prompt: {e}")))?;

        if !confirmed {
            output::info("Cancelled.");
            return Ok(());
        }
    }

    // Open the bundle (requires password), delete, and save.
    let session = Session::open(cli)?;
    session.vault.remove(name)?;
    session.save()?;

    output::success(&format!("Deleted secret '{name}'"));

    Ok(())
}

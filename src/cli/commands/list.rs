//! `strongbox list`: display all secrets in a table or as JSON.

use crate::cli::output;
use crate::cli::{Cli, Session};
use crate::errors::{Result, StrongboxError};

/// Execute the `list` command.
pub fn execute(cli: &Cli, json: bool) -> Result<()> {
    let session = Session::open(cli)?;
    let secrets = session.vault.list()?;

    if json {
        let rendered = serde_json::to_string_pretty(&secrets)
            .map_err(|e| StrongboxError::SerializationError(format!("secret list: {e}")))?;
        println!("{rendered}");
        return Ok(());
    }

    output::info(&format!(
        "{} — {} secret(s)",
        session.vehicle.path().display(),
        secrets.len()
    ));
    output::print_secrets_table(&secrets);

    Ok(())
}

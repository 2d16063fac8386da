//! `strongbox generate-key`: create a random cascading key and store it.

use crate::cli::output;
use crate::cli::{Cli, Session};
use crate::crypto::{Algorithm, CascadingSymmetricKey};
use crate::errors::Result;
use crate::vault::Secret;

/// Execute the `generate-key` command.
pub fn execute(cli: &Cli, name: &str, ciphers: &[String]) -> Result<()> {
    let session = Session::open(cli)?;

    // 1. Resolve the layers: explicit --cipher flags win over config.
    let algorithms = if ciphers.is_empty() {
        session.settings.algorithms()?
    } else {
        ciphers
            .iter()
            .map(|c| c.parse())
            .collect::<Result<Vec<Algorithm>>>()?
    };

    // 2. Generate and store.  An existing name is a collision, never overwritten.
    let key = CascadingSymmetricKey::generate(&algorithms)?;
    session.vault.add(Secret::symmetric_key(name, &key)?)?;
    drop(key);
    session.save()?;

    let layers: Vec<&str> = algorithms.iter().map(|a| a.name()).collect();
    output::success(&format!(
        "Generated {}-layer key '{name}' ({})",
        algorithms.len(),
        layers.join(" -> ")
    ));

    Ok(())
}

//! `strongbox set`: add or replace a secret in the bundle.

use std::io::{self, IsTerminal, Read};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cli::output;
use crate::cli::{Cli, Session, ValueKind};
use crate::errors::{Result, StrongboxError};
use crate::vault::secret::validate_secret_name;
use crate::vault::Secret;

/// Execute the `set` command.
pub fn execute(cli: &Cli, name: &str, value: Option<&str>, kind: ValueKind) -> Result<()> {
    // Catch a bad name before prompting for anything.
    validate_secret_name(name)?;

    let raw = read_value(name, value, kind)?;
    let secret = build_secret(name, raw.as_ref().map(|s| s.as_str()), kind)?;

    // Open the bundle, set the secret, and save.
    let session = Session::open(cli)?;
    let replaced = session.vault.set(secret)?;
    session.save()?;

    let total = session.vault.len()?;
    if replaced {
        output::success(&format!("Secret '{name}' updated ({total} total)"));
    } else {
        output::success(&format!("Secret '{name}' added ({total} total)"));
    }

    Ok(())
}

/// Determine the raw value from one of three sources.  A GUID may be
/// omitted entirely, in which case a fresh one is generated.
fn read_value(name: &str, value: Option<&str>, kind: ValueKind) -> Result<Option<Zeroizing<String>>> {
    if let Some(v) = value {
        // Source 1: Inline value on the command line.
        if kind != ValueKind::Guid {
            output::warning("Value provided on command line — it may appear in shell history.");
        }
        return Ok(Some(Zeroizing::new(v.to_string())));
    }

    if kind == ValueKind::Guid {
        return Ok(None);
    }

    if !io::stdin().is_terminal() {
        // Source 2: Piped input (stdin is not a terminal).
        let mut buf = Zeroizing::new(String::new());
        io::stdin().read_to_string(&mut buf)?;
        let trimmed_len = buf.trim_end().len();
        buf.truncate(trimmed_len);
        return Ok(Some(buf));
    }

    // Source 3: Interactive secure prompt (default).
    let entered = dialoguer::Password::new()
        .with_prompt(format!("Enter value for {name}"))
        .interact()
        .map_err(|e| StrongboxError::CommandFailed(format!("input prompt: {e}")))?;
    Ok(Some(Zeroizing::new(entered)))
}

fn build_secret(name: &str, raw: Option<&str>, kind: ValueKind) -> Result<Secret> {
    match (kind, raw) {
        (ValueKind::Text, Some(text)) => Secret::text(name, text),
        (ValueKind::Bytes, Some(encoded)) => {
            let bytes = Zeroizing::new(BASE64.decode(encoded.trim()).map_err(|e| {
                StrongboxError::CommandFailed(format!("bytes value must be base64: {e}"))
            })?);
            Secret::bytes(name, &bytes)
        }
        (ValueKind::Guid, Some(text)) => {
            let guid = Uuid::parse_str(text.trim())
                .map_err(|e| StrongboxError::CommandFailed(format!("invalid GUID: {e}")))?;
            Secret::guid(name, guid)
        }
        (ValueKind::Guid, None) => Secret::guid(name, Uuid::new_v4()),
        (_, None) => Err(StrongboxError::CommandFailed(format!(
            "a value is required for '{name}'"
        ))),
    }
}

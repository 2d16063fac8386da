//! `strongbox get`: reveal and print a single secret's value.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::cli::output;
use crate::cli::{Cli, Session};
use crate::errors::Result;
use crate::vault::SecretValue;

/// Execute the `get` command.
pub fn execute(cli: &Cli, name: &str) -> Result<()> {
    let session = Session::open(cli)?;

    // Decrypt and print the value to stdout; binary values as base64.
    match session.vault.reveal(name)? {
        SecretValue::Text(text) => println!("{}", text.as_str()),
        SecretValue::Bytes(bytes) => println!("{}", BASE64.encode(bytes.as_slice())),
        SecretValue::Guid(guid) => println!("{guid}"),
        SecretValue::Certificate(cert) => {
            println!("{}", BASE64.encode(cert.der()));
            if cert.has_private_key() {
                output::info("Certificate has a private key (not printed).");
            }
        }
        SecretValue::SymmetricKey(key) => {
            let layers: Vec<&str> = key.algorithms().iter().map(|a| a.name()).collect();
            output::info(&format!(
                "'{name}' is a {}-layer cascading key ({}); key bytes are not printed.",
                key.layer_count(),
                layers.join(" -> ")
            ));
        }
    }

    Ok(())
}

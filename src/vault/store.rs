//! Concurrent, name-indexed secret storage.
//!
//! `SecretVault` keeps its `name -> Secret` map behind a bounded
//! `ConcurrencyGate`: lookups share the gate with up to
//! `read_concurrency` other readers, mutations take it exclusively.
//! Export takes it exclusively too, so a bundle is always a consistent
//! snapshot.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{Result, StrongboxError};
use crate::sync::{ConcurrencyGate, ExclusiveToken, GateToken};

use super::secret::{validate_secret_name, Secret, SecretKind, SecretMetadata, SecretValue};

pub(crate) type SecretMap = HashMap<String, Arc<Secret>>;

/// Tuning for a vault's gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultOptions {
    /// How many lookups may run at once.
    pub read_concurrency: usize,
    /// Give up with `GateTimeout` instead of blocking forever.
    pub acquire_timeout: Option<Duration>,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            read_concurrency: 8,
            acquire_timeout: None,
        }
    }
}

/// A concurrent collection of named secrets.
///
/// Every contained secret is disposed when the vault is dropped, when it is
/// removed, or when `set` replaces it.
pub struct SecretVault {
    secrets: ConcurrencyGate<SecretMap>,
    options: VaultOptions,
}

impl SecretVault {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    pub fn new() -> Self {
        Self::with_options(VaultOptions::default())
    }

    pub fn with_options(options: VaultOptions) -> Self {
        Self {
            secrets: ConcurrencyGate::bounded(options.read_concurrency, HashMap::new()),
            options,
        }
    }

    /// Build a vault pre-seeded with `secrets`.  Duplicate names are rejected.
    pub fn from_secrets(
        secrets: impl IntoIterator<Item = Secret>,
        options: VaultOptions,
    ) -> Result<Self> {
        let mut vault = Self::with_options(options);
        let map = vault.secrets.get_mut();
        for secret in secrets {
            if map.contains_key(secret.name()) {
                return Err(StrongboxError::SecretAlreadyExists(secret.name().to_string()));
            }
            map.insert(secret.name().to_string(), Arc::new(secret));
        }
        Ok(vault)
    }

    pub fn options(&self) -> VaultOptions {
        self.options
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Insert a secret.  Fails with `SecretAlreadyExists` if the name is taken.
    pub fn add(&self, secret: Secret) -> Result<()> {
        let mut map = self.write()?;
        if map.contains_key(secret.name()) {
            return Err(StrongboxError::SecretAlreadyExists(secret.name().to_string()));
        }

        log::debug!("vault: added '{}' ({})", secret.name(), secret.kind());
        map.insert(secret.name().to_string(), Arc::new(secret));
        Ok(())
    }

    /// Register a secret produced on first reveal.
    pub fn add_lazy<F>(&self, name: &str, kind: SecretKind, producer: F) -> Result<()>
    where
        F: Fn() -> Result<SecretValue> + Send + Sync + 'static,
    {
        self.add(Secret::lazy(name, kind, producer)?)
    }

    /// Insert or replace.  A replaced secret is disposed.
    ///
    /// Returns `true` if an existing secret was replaced.
    pub fn set(&self, secret: Secret) -> Result<bool> {
        let mut map = self.write()?;
        let name = secret.name().to_string();

        let previous = map.insert(name.clone(), Arc::new(secret));
        drop(map);

        match previous {
            Some(old) => {
                old.dispose()?;
                log::debug!("vault: replaced '{name}'");
                Ok(true)
            }
            None => {
                log::debug!("vault: added '{name}'");
                Ok(false)
            }
        }
    }

    /// Dispose and remove a secret.  Fails with `SecretNotFound` if absent.
    pub fn remove(&self, name: &str) -> Result<()> {
        validate_secret_name(name)?;

        let removed = self
            .write()?
            .remove(name)
            .ok_or_else(|| StrongboxError::SecretNotFound(name.to_string()))?;
        removed.dispose()?;

        log::debug!("vault: removed '{name}'");
        Ok(())
    }

    /// Dispose and remove every secret.
    pub fn clear(&self) -> Result<()> {
        let drained: Vec<Arc<Secret>> = self.write()?.drain().map(|(_, s)| s).collect();
        for secret in &drained {
            secret.dispose()?;
        }

        log::debug!("vault: cleared {} secret(s)", drained.len());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Look up a secret by name.
    pub fn get(&self, name: &str) -> Result<Arc<Secret>> {
        self.read()?
            .get(name)
            .cloned()
            .ok_or_else(|| StrongboxError::SecretNotFound(name.to_string()))
    }

    /// Look up and reveal a secret.
    ///
    /// The gate is released before decryption so a lazy producer may read
    /// other secrets from this vault.
    pub fn reveal(&self, name: &str) -> Result<SecretValue> {
        self.get(name)?.reveal()
    }

    /// Metadata-only check; nothing is decrypted.
    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(name))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    /// Metadata for all secrets, sorted by name.
    pub fn list(&self) -> Result<Vec<SecretMetadata>> {
        let mut list: Vec<SecretMetadata> = self.read()?.values().map(|s| s.metadata()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    // ------------------------------------------------------------------
    // Gate access
    // ------------------------------------------------------------------

    pub(crate) fn read(&self) -> Result<GateToken<'_, SecretMap>> {
        self.secrets.acquire_within(self.options.acquire_timeout)
    }

    pub(crate) fn write(&self) -> Result<ExclusiveToken<'_, SecretMap>> {
        self.secrets
            .acquire_exclusive_within(self.options.acquire_timeout)
    }
}

impl Default for SecretVault {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SecretVault {
    fn drop(&mut self) {
        for secret in self.secrets.get_mut().values() {
            if let Err(e) = secret.dispose() {
                log::warn!("vault teardown: could not dispose '{}': {e}", secret.name());
            }
        }
    }
}

impl fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretVault")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_get_returns_the_same_secret() {
        let vault = SecretVault::new();
        vault.add(Secret::text("db-password", "Tr0ub4dor&3").unwrap()).unwrap();

        let secret = vault.get("db-password").unwrap();
        assert_eq!(secret.reveal_string().unwrap().as_str(), "Tr0ub4dor&3");
        assert_eq!(vault.len().unwrap(), 1);
    }

    #[test]
    fn duplicate_add_is_a_collision() {
        let vault = SecretVault::new();
        vault.add(Secret::text("a", "1").unwrap()).unwrap();
        let err = vault.add(Secret::text("a", "2").unwrap()).unwrap_err();
        assert!(matches!(err, StrongboxError::SecretAlreadyExists(ref n) if n == "a"));

        // The original is untouched.
        assert_eq!(vault.get("a").unwrap().reveal_string().unwrap().as_str(), "1");
    }

    #[test]
    fn get_of_missing_name_is_not_found() {
        let vault = SecretVault::new();
        assert!(matches!(
            vault.get("nope"),
            Err(StrongboxError::SecretNotFound(_))
        ));
    }

    #[test]
    fn remove_disposes_and_absent_remove_is_not_found() {
        let vault = SecretVault::new();
        vault.add(Secret::text("tmp", "x").unwrap()).unwrap();
        let handle = vault.get("tmp").unwrap();

        vault.remove("tmp").unwrap();
        assert!(!vault.contains("tmp").unwrap());
        assert!(matches!(
            handle.reveal(),
            Err(StrongboxError::BufferDisposed)
        ));

        assert!(matches!(
            vault.remove("tmp"),
            Err(StrongboxError::SecretNotFound(_))
        ));
    }

    #[test]
    fn set_replaces_and_disposes_previous() {
        let vault = SecretVault::new();
        assert!(!vault.set(Secret::text("k", "old").unwrap()).unwrap());
        let old = vault.get("k").unwrap();

        assert!(vault.set(Secret::text("k", "new").unwrap()).unwrap());
        assert_eq!(vault.get("k").unwrap().reveal_string().unwrap().as_str(), "new");
        assert!(old.reveal().is_err());
    }

    #[test]
    fn list_is_sorted_and_reports_lazy_state() {
        let vault = SecretVault::new();
        vault.add(Secret::text("zeta", "z").unwrap()).unwrap();
        vault
            .add_lazy("alpha", SecretKind::Text, || Ok(SecretValue::text("a")))
            .unwrap();

        let list = vault.list().unwrap();
        let names: Vec<&str> = list.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["alpha", "zeta"]);
        assert!(!list[0].materialized);
        assert!(list[1].materialized);
    }

    #[test]
    fn lazy_producer_may_read_other_secrets() {
        let vault = Arc::new(SecretVault::new());
        vault.add(Secret::text("base", "root").unwrap()).unwrap();

        let inner = Arc::downgrade(&vault);
        vault
            .add_lazy("derived", SecretKind::Text, move || {
                let vault = inner
                    .upgrade()
                    .ok_or_else(|| StrongboxError::CommandFailed("vault dropped".into()))?;
                let base = vault.get("base")?.reveal_string()?;
                Ok(SecretValue::text(format!("{}-child", base.as_str())))
            })
            .unwrap();

        match vault.reveal("derived").unwrap() {
            SecretValue::Text(t) => assert_eq!(t.as_str(), "root-child"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn lazy_producer_revealing_itself_fails_fast() {
        let vault = Arc::new(SecretVault::new());
        let inner = Arc::downgrade(&vault);
        vault
            .add_lazy("loop", SecretKind::Text, move || {
                let vault = inner
                    .upgrade()
                    .ok_or_else(|| StrongboxError::CommandFailed("vault dropped".into()))?;
                vault.reveal("loop")
            })
            .unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let worker = Arc::clone(&vault);
        std::thread::spawn(move || {
            let _ = tx.send(worker.reveal("loop").map(|_| ()));
        });

        let result = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("self-revealing producer must not block");
        match result {
            Err(StrongboxError::ProducerFailed { name, reason }) => {
                assert_eq!(name, "loop");
                assert!(reason.contains("reentrant"));
            }
            other => panic!("expected ProducerFailed, got {other:?}"),
        }
        assert!(!vault.get("loop").unwrap().is_materialized());
    }

    #[test]
    fn removing_a_secret_while_its_producer_runs_discards_the_value() {
        let vault = Arc::new(SecretVault::new());
        let inner = Arc::downgrade(&vault);
        vault
            .add_lazy("ephemeral", SecretKind::Text, move || {
                let vault = inner
                    .upgrade()
                    .ok_or_else(|| StrongboxError::CommandFailed("vault dropped".into()))?;
                vault.remove("ephemeral")?;
                Ok(SecretValue::text("too late"))
            })
            .unwrap();

        let handle = vault.get("ephemeral").unwrap();
        assert!(matches!(handle.reveal(), Err(StrongboxError::BufferDisposed)));
        assert!(!handle.is_materialized());
        assert!(!vault.contains("ephemeral").unwrap());

        // The producer is gone too; nothing can bring the value back.
        assert!(matches!(handle.reveal(), Err(StrongboxError::BufferDisposed)));
    }

    #[test]
    fn clear_empties_the_vault() {
        let vault = SecretVault::new();
        vault.add(Secret::text("a", "1").unwrap()).unwrap();
        vault.add(Secret::text("b", "2").unwrap()).unwrap();
        let a = vault.get("a").unwrap();

        vault.clear().unwrap();
        assert!(vault.is_empty().unwrap());
        assert!(a.reveal().is_err());
    }

    #[test]
    fn from_secrets_rejects_duplicates() {
        let result = SecretVault::from_secrets(
            vec![
                Secret::text("dup", "1").unwrap(),
                Secret::text("dup", "2").unwrap(),
            ],
            VaultOptions::default(),
        );
        assert!(matches!(result, Err(StrongboxError::SecretAlreadyExists(_))));
    }

    #[test]
    fn dropping_the_vault_disposes_outstanding_handles() {
        let vault = SecretVault::new();
        vault.add(Secret::text("held", "x").unwrap()).unwrap();
        let handle = vault.get("held").unwrap();

        drop(vault);
        assert!(matches!(
            handle.reveal(),
            Err(StrongboxError::BufferDisposed)
        ));
    }

    #[test]
    fn configured_timeout_bounds_waiting_on_a_busy_vault() {
        let vault = SecretVault::with_options(VaultOptions {
            read_concurrency: 4,
            acquire_timeout: Some(Duration::from_millis(20)),
        });
        vault.add(Secret::text("a", "1").unwrap()).unwrap();

        let writer = vault.write().unwrap();
        std::thread::scope(|s| {
            s.spawn(|| {
                let err = vault.contains("a").unwrap_err();
                assert!(matches!(err, StrongboxError::GateTimeout(_)));
            });
        });
        drop(writer);

        assert!(vault.contains("a").unwrap());
    }
}

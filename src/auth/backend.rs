//! Secret backend selection
//!
//! Credentials live either in the OS keyring or in an encrypted file in the
//! config directory. The backend is chosen once per process: explicit
//! override, then configured preference, then keyring availability probe,
//! then the file store.

use crate::auth::file_store::EncryptedFileStore;
use crate::auth::keyring_store::KeyringStore;
use crate::auth::types::Credential;
use crate::config::{env_var_nonempty, Settings, VAULT_KEY_ENV};
use crate::error::AuthError;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Storage backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// OS native keyring
    Keyring,
    /// Encrypted JSON file in the config directory
    File,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Keyring => "keyring",
            BackendKind::File => "file",
        }
    }

    /// Parse a backend name from a flag, env var, or config value
    pub fn parse(name: &str) -> Result<Self, AuthError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(BackendKind::Keyring),
            "file" => Ok(BackendKind::File),
            other => Err(AuthError::InvalidInput(format!(
                "Unknown secret backend '{}' (expected 'keyring' or 'file')",
                other
            ))),
        }
    }
}

/// Persistent storage for account credentials
///
/// Absence is not an error: `get` returns `Ok(None)` for accounts that were
/// never stored, and `delete` reports whether anything was removed.
pub trait SecretBackend: Send + Sync {
    fn kind(&self) -> BackendKind;
    fn get(&self, account: &str) -> Result<Option<Credential>, AuthError>;
    fn set(&self, account: &str, credential: &Credential) -> Result<(), AuthError>;
    fn delete(&self, account: &str) -> Result<bool, AuthError>;
    fn list(&self) -> Result<Vec<String>, AuthError>;
}

/// Resolve the secret backend for this process
///
/// `explicit` carries a `--secrets-backend` flag or `BELLHOP_SECRETS_BACKEND`
/// value. A pinned backend that cannot be opened is an error; only the
/// auto-detect path falls through to the file store.
pub fn select_backend(
    explicit: Option<&str>,
    settings: &Settings,
    dir: &Path,
) -> Result<Arc<dyn SecretBackend>, AuthError> {
    if let Some(name) = explicit {
        let kind = BackendKind::parse(name)?;
        return open_pinned(kind, settings, dir);
    }

    if let Some(name) = settings.backend.as_deref() {
        let kind = BackendKind::parse(name)?;
        return open_pinned(kind, settings, dir);
    }

    let keyring = KeyringStore::new(settings.namespace.as_deref());
    match keyring.probe() {
        Ok(()) => {
            debug!("using keyring secret backend");
            return Ok(Arc::new(keyring));
        }
        Err(e) => {
            debug!("keyring unavailable, falling back to file store: {}", e);
        }
    }

    let store = open_file_store(settings, dir)
        .map_err(|e| AuthError::BackendUnavailable(format!("file store cannot be opened: {}", e)))?;
    debug!("using encrypted file secret backend");
    Ok(Arc::new(store))
}

fn open_pinned(
    kind: BackendKind,
    settings: &Settings,
    dir: &Path,
) -> Result<Arc<dyn SecretBackend>, AuthError> {
    match kind {
        BackendKind::Keyring => {
            let store = KeyringStore::new(settings.namespace.as_deref());
            store.probe().map_err(|e| {
                AuthError::BackendUnavailable(format!("keyring backend cannot be opened: {}", e))
            })?;
            debug!("using keyring secret backend");
            Ok(Arc::new(store))
        }
        BackendKind::File => {
            let store = open_file_store(settings, dir).map_err(|e| {
                AuthError::BackendUnavailable(format!("file store cannot be opened: {}", e))
            })?;
            debug!("using encrypted file secret backend");
            Ok(Arc::new(store))
        }
    }
}

fn open_file_store(settings: &Settings, dir: &Path) -> Result<EncryptedFileStore, AuthError> {
    let passphrase = env_var_nonempty(VAULT_KEY_ENV).or_else(|| settings.vault_key.clone());
    EncryptedFileStore::open(dir, passphrase)
}

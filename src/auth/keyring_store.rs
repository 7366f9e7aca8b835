//! OS keyring credential store

use crate::auth::backend::{BackendKind, SecretBackend};
use crate::auth::types::Credential;
use crate::error::AuthError;

const SERVICE_NAME: &str = "bellhop";
// Account ids always contain '@', so they can never collide with these keys.
const INDEX_KEY: &str = "account_index";
const PROBE_KEY: &str = "availability_probe";

/// Credential store backed by the platform keyring
///
/// Keyrings cannot enumerate their entries, so a separate index entry tracks
/// the stored account list.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(namespace: Option<&str>) -> Self {
        let service = match namespace {
            Some(ns) if !ns.trim().is_empty() => format!("{}-{}", SERVICE_NAME, ns.trim()),
            _ => SERVICE_NAME.to_string(),
        };
        Self { service }
    }

    /// Keyring service name used for every entry
    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, AuthError> {
        keyring::Entry::new(&self.service, key)
            .map_err(|e| AuthError::Storage(format!("failed to create keyring entry: {}", e)))
    }

    /// Verify the keyring actually accepts writes
    ///
    /// Entry construction succeeds even on hosts without a backing service;
    /// only a write round-trip proves availability.
    pub fn probe(&self) -> Result<(), AuthError> {
        let entry = self.entry(PROBE_KEY)?;
        entry
            .set_password("ok")
            .map_err(|e| AuthError::Storage(format!("keyring write failed: {}", e)))?;
        let _ = entry.delete_password(); // Ignore errors if already gone
        Ok(())
    }

    fn read_index(&self) -> Result<Vec<String>, AuthError> {
        let entry = self.entry(INDEX_KEY)?;
        match entry.get_password() {
            Ok(data) => serde_json::from_str(&data)
                .map_err(|e| AuthError::Storage(format!("failed to parse account index: {}", e))),
            Err(keyring::Error::NoEntry) => Ok(vec![]),
            Err(e) => Err(AuthError::Storage(format!("failed to read account index: {}", e))),
        }
    }

    fn write_index(&self, accounts: &[String]) -> Result<(), AuthError> {
        let entry = self.entry(INDEX_KEY)?;
        let data = serde_json::to_string(accounts)
            .map_err(|e| AuthError::Storage(format!("failed to serialize account index: {}", e)))?;
        entry
            .set_password(&data)
            .map_err(|e| AuthError::Storage(format!("failed to store account index: {}", e)))
    }

    fn update_index(&self, account: &str, add: bool) -> Result<(), AuthError> {
        let mut accounts = self.read_index()?;

        if add {
            if !accounts.iter().any(|a| a == account) {
                accounts.push(account.to_string());
            }
        } else {
            accounts.retain(|a| a != account);
        }

        self.write_index(&accounts)
    }
}

impl SecretBackend for KeyringStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Keyring
    }

    fn get(&self, account: &str) -> Result<Option<Credential>, AuthError> {
        let entry = self.entry(account)?;
        match entry.get_password() {
            Ok(data) => {
                let credential = serde_json::from_str(&data).map_err(|e| {
                    AuthError::Storage(format!("failed to parse stored credential: {}", e))
                })?;
                Ok(Some(credential))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::Storage(format!("failed to read credential: {}", e))),
        }
    }

    fn set(&self, account: &str, credential: &Credential) -> Result<(), AuthError> {
        let entry = self.entry(account)?;
        let data = serde_json::to_string(credential)
            .map_err(|e| AuthError::Storage(format!("failed to serialize credential: {}", e)))?;
        entry
            .set_password(&data)
            .map_err(|e| AuthError::Storage(format!("failed to store credential: {}", e)))?;

        self.update_index(account, true)
    }

    fn delete(&self, account: &str) -> Result<bool, AuthError> {
        let entry = self.entry(account)?;
        let removed = match entry.delete_password() {
            Ok(()) => true,
            Err(keyring::Error::NoEntry) => false,
            Err(e) => {
                return Err(AuthError::Storage(format!("failed to delete credential: {}", e)))
            }
        };

        self.update_index(account, false)?;
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<String>, AuthError> {
        self.read_index()
    }
}

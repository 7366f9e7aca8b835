//! Account registry
//!
//! Non-secret account bookkeeping: which accounts exist, which one is the
//! default, alias mappings, and login timestamps. Secrets never land here;
//! they live in the selected secret backend.

use crate::config::write_private;
use crate::error::{normalize_account, validate_account, AuthError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Metadata for one known account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryData {
    version: String,
    #[serde(default)]
    accounts: Vec<AccountEntry>,
    #[serde(default)]
    default_account: Option<String>,
    #[serde(default)]
    aliases: BTreeMap<String, String>,
}

impl Default for RegistryData {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            accounts: Vec::new(),
            default_account: None,
            aliases: BTreeMap::new(),
        }
    }
}

/// Registry persisted as accounts.json in the config directory
#[derive(Debug)]
pub struct AccountRegistry {
    path: PathBuf,
    data: RegistryData,
}

impl AccountRegistry {
    /// Load the registry from the given config directory
    pub fn load_from(dir: &Path) -> Result<Self, AuthError> {
        let path = dir.join("accounts.json");

        let data = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| AuthError::Storage(format!("failed to read account registry: {}", e)))?;
            serde_json::from_str(&raw)
                .map_err(|e| AuthError::Storage(format!("failed to parse account registry: {}", e)))?
        } else {
            RegistryData::default()
        };

        Ok(Self { path, data })
    }

    fn save(&self) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AuthError::Storage(format!("failed to create config directory: {}", e))
            })?;
        }

        let raw = serde_json::to_string_pretty(&self.data)
            .map_err(|e| AuthError::Storage(format!("failed to serialize account registry: {}", e)))?;

        write_private(&self.path, raw.as_bytes())
            .map_err(|e| AuthError::Storage(format!("failed to write account registry: {}", e)))?;

        Ok(())
    }

    /// All known accounts, in first-login order
    pub fn accounts(&self) -> &[AccountEntry] {
        &self.data.accounts
    }

    /// Look up one account entry
    pub fn get(&self, id: &str) -> Option<&AccountEntry> {
        self.data.accounts.iter().find(|a| a.id == id)
    }

    /// The configured default account, if any
    pub fn default_account(&self) -> Option<&str> {
        self.data.default_account.as_deref()
    }

    /// Record a successful login, creating the entry on first sight
    ///
    /// The first account ever recorded becomes the default; later logins
    /// never steal that marker.
    pub fn record_login(&mut self, id: &str) -> Result<(), AuthError> {
        let now = Utc::now();

        if let Some(entry) = self.data.accounts.iter_mut().find(|a| a.id == id) {
            entry.last_login = now;
        } else {
            self.data.accounts.push(AccountEntry {
                id: id.to_string(),
                created_at: now,
                last_login: now,
            });
        }

        if self.data.default_account.is_none() {
            self.data.default_account = Some(id.to_string());
        }

        self.save()
    }

    /// Remove an account entry; the default marker is cleared if it pointed
    /// there, alias mappings are left alone
    pub fn remove_account(&mut self, id: &str) -> Result<bool, AuthError> {
        let removed = match self.data.accounts.iter().position(|a| a.id == id) {
            Some(pos) => {
                self.data.accounts.remove(pos);
                true
            }
            None => false,
        };

        if self.data.default_account.as_deref() == Some(id) {
            self.data.default_account = None;
        }

        self.save()?;
        Ok(removed)
    }

    /// Mark an account as the default
    pub fn set_default(&mut self, id: &str) -> Result<(), AuthError> {
        self.data.default_account = Some(id.to_string());
        self.save()
    }

    /// Map a short alias onto a canonical account identifier
    ///
    /// Redefining an alias only rewrites the mapping; the credential stored
    /// for either account is untouched.
    pub fn set_alias(&mut self, alias: &str, account: &str) -> Result<(), AuthError> {
        let alias = normalize_account(alias);
        if alias.is_empty() {
            return Err(AuthError::InvalidInput("Alias cannot be empty".to_string()));
        }

        let account = normalize_account(account);
        validate_account(&account)?;

        self.data.aliases.insert(alias, account);
        self.save()
    }

    /// Current target of an alias, if defined
    pub fn alias_target(&self, alias: &str) -> Option<&str> {
        self.data.aliases.get(&normalize_account(alias)).map(String::as_str)
    }

    /// Expand an alias to its account, passing unknown names through
    pub fn resolve_alias<'a>(&'a self, name: &'a str) -> &'a str {
        self.alias_target(name).unwrap_or(name)
    }

    /// All alias mappings, sorted by alias
    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.data.aliases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, AccountRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = AccountRegistry::load_from(dir.path()).unwrap();
        (dir, registry)
    }

    #[test]
    fn test_first_login_becomes_default() {
        let (_dir, mut registry) = registry();
        registry.record_login("alice@workdesk.io").unwrap();
        registry.record_login("bob@workdesk.io").unwrap();

        assert_eq!(registry.default_account(), Some("alice@workdesk.io"));
        assert_eq!(registry.accounts().len(), 2);
    }

    #[test]
    fn test_repeat_login_keeps_created_at() {
        let (_dir, mut registry) = registry();
        registry.record_login("alice@workdesk.io").unwrap();
        let created = registry.get("alice@workdesk.io").unwrap().created_at;

        registry.record_login("alice@workdesk.io").unwrap();
        let entry = registry.get("alice@workdesk.io").unwrap();
        assert_eq!(entry.created_at, created);
        assert!(entry.last_login >= created);
        assert_eq!(registry.accounts().len(), 1);
    }

    #[test]
    fn test_remove_clears_default_keeps_aliases() {
        let (_dir, mut registry) = registry();
        registry.record_login("alice@workdesk.io").unwrap();
        registry.set_alias("work", "alice@workdesk.io").unwrap();

        assert!(registry.remove_account("alice@workdesk.io").unwrap());
        assert_eq!(registry.default_account(), None);
        assert_eq!(registry.alias_target("work"), Some("alice@workdesk.io"));
    }

    #[test]
    fn test_alias_normalization_and_redefinition() {
        let (_dir, mut registry) = registry();
        registry.set_alias("Work", "Alice@Workdesk.io").unwrap();
        assert_eq!(registry.alias_target("work"), Some("alice@workdesk.io"));

        registry.set_alias("work", "bob@workdesk.io").unwrap();
        assert_eq!(registry.alias_target("work"), Some("bob@workdesk.io"));
        assert_eq!(registry.resolve_alias("work"), "bob@workdesk.io");
        assert_eq!(registry.resolve_alias("unmapped"), "unmapped");
    }

    #[test]
    fn test_alias_rejects_invalid_account() {
        let (_dir, mut registry) = registry();
        let err = registry.set_alias("work", "not-an-account").unwrap_err();
        assert_eq!(err.error_code(), "invalid_input");
    }

    #[test]
    fn test_registry_persists_across_loads() {
        let (dir, mut registry) = registry();
        registry.record_login("alice@workdesk.io").unwrap();
        registry.set_alias("work", "alice@workdesk.io").unwrap();
        drop(registry);

        let reloaded = AccountRegistry::load_from(dir.path()).unwrap();
        assert_eq!(reloaded.default_account(), Some("alice@workdesk.io"));
        assert_eq!(reloaded.alias_target("work"), Some("alice@workdesk.io"));
    }
}

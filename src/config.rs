//! Tool configuration and on-disk layout
//!
//! Non-secret settings live in `config.json` under the bellhop config
//! directory. The directory can be relocated with `BELLHOP_CONFIG_DIR`;
//! tests rely on that for isolation.

use crate::error::AuthError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Relocates the whole config directory (settings, registry, vault, locks)
pub const CONFIG_DIR_ENV: &str = "BELLHOP_CONFIG_DIR";
/// Overrides account resolution for one invocation
pub const ACCOUNT_ENV: &str = "BELLHOP_ACCOUNT";
/// Overrides secret backend selection ("keyring" or "file")
pub const BACKEND_ENV: &str = "BELLHOP_SECRETS_BACKEND";
/// Passphrase for the encrypted file store in non-interactive contexts
pub const VAULT_KEY_ENV: &str = "BELLHOP_VAULT_KEY";

/// Read an env var, treating empty/whitespace values as unset
pub fn env_var_nonempty(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Get the bellhop configuration directory
pub fn config_dir() -> Result<PathBuf, AuthError> {
    if let Some(dir) = env_var_nonempty(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }

    let base = dirs::config_dir()
        .ok_or_else(|| AuthError::Storage("cannot determine config directory".to_string()))?;

    Ok(base.join("bellhop"))
}

/// Authorization provider endpoints and client identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub auth_url: String,
    pub token_url: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            auth_url: "https://auth.workdesk.io/oauth2/authorize".to_string(),
            token_url: "https://auth.workdesk.io/oauth2/token".to_string(),
            client_id: "bellhop-cli".to_string(),
            client_secret: None,
        }
    }
}

/// Non-secret tool settings persisted as config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub version: String,
    #[serde(default)]
    pub provider: ProviderSettings,
    /// Preferred secret backend ("keyring" or "file"); absent means auto-detect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Namespace appended to the keyring service name, for side-by-side installs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// File-store passphrase; `BELLHOP_VAULT_KEY` takes precedence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            provider: ProviderSettings::default(),
            backend: None,
            namespace: None,
            vault_key: None,
        }
    }
}

impl Settings {
    /// Load settings from the given directory, falling back to defaults
    pub fn load_from(dir: &Path) -> Result<Self, AuthError> {
        let path = dir.join("config.json");

        if !path.exists() {
            return Ok(Settings::default());
        }

        let data = fs::read_to_string(&path)
            .map_err(|e| AuthError::Storage(format!("failed to read config file: {}", e)))?;

        let settings: Settings = serde_json::from_str(&data)
            .map_err(|e| AuthError::Storage(format!("failed to parse config file: {}", e)))?;

        Ok(settings)
    }

    /// Save settings into the given directory
    pub fn save_to(&self, dir: &Path) -> Result<(), AuthError> {
        let path = dir.join("config.json");

        fs::create_dir_all(dir)
            .map_err(|e| AuthError::Storage(format!("failed to create config directory: {}", e)))?;

        let data = serde_json::to_string_pretty(self)
            .map_err(|e| AuthError::Storage(format!("failed to serialize config: {}", e)))?;

        write_private(&path, data.as_bytes())
            .map_err(|e| AuthError::Storage(format!("failed to write config file: {}", e)))?;

        Ok(())
    }
}

/// Write a file readable only by the owner
pub fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    fs::write(path, data)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default();
        settings.save_to(dir.path()).unwrap();

        let loaded = Settings::load_from(dir.path()).unwrap();
        assert_eq!(loaded.version, "1.0");
        assert_eq!(loaded.provider.token_url, settings.provider.token_url);
        assert!(loaded.backend.is_none());
    }

    #[test]
    fn test_settings_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(dir.path()).unwrap();
        assert_eq!(settings.provider.client_id, "bellhop-cli");
    }

    #[cfg(unix)]
    #[test]
    fn test_write_private_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.json");
        write_private(&path, b"{}").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

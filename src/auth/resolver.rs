//! Account selection for commands that need a signed-in identity
//!
//! Precedence: explicit flag, then the environment override, then the
//! registry default, then the only stored account if there is exactly one.
//! Anything the user typed goes through alias expansion and normalization;
//! values already on disk are trusted as stored.

use crate::auth::backend::SecretBackend;
use crate::auth::registry::AccountRegistry;
use crate::error::{normalize_account, validate_account, AuthError};
use tracing::debug;

pub fn resolve_account(
    explicit: Option<&str>,
    env_override: Option<&str>,
    registry: &AccountRegistry,
    backend: &dyn SecretBackend,
) -> Result<String, AuthError> {
    if let Some(requested) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        return named_account(requested, registry);
    }

    if let Some(requested) = env_override.map(str::trim).filter(|s| !s.is_empty()) {
        return named_account(requested, registry);
    }

    if let Some(default) = registry.default_account() {
        debug!("using default account '{}'", default);
        return Ok(default.to_string());
    }

    let stored = backend.list()?;
    match stored.len() {
        0 => Err(AuthError::AuthRequired(
            "no accounts are signed in; run 'bellhop login'".to_string(),
        )),
        1 => {
            debug!("using the only stored account '{}'", stored[0]);
            Ok(stored[0].clone())
        }
        _ => Err(AuthError::AuthRequired(
            "several accounts are signed in; pass --account or set a default".to_string(),
        )),
    }
}

fn named_account(requested: &str, registry: &AccountRegistry) -> Result<String, AuthError> {
    let expanded = registry.resolve_alias(requested);
    let account = normalize_account(expanded);
    validate_account(&account)?;
    Ok(account)
}

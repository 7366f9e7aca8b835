//! Refreshing token source backed by the secret store
//!
//! Hands out access tokens that are fresh for at least the safety margin,
//! refreshing through the token endpoint when they are not. Concurrent
//! refreshes are serialized twice over: a tokio mutex for tasks in this
//! process and an advisory file lock for other bellhop processes. Whoever
//! wins re-reads the store first, so one rotation serves everyone.

use crate::auth::backend::SecretBackend;
use crate::auth::exchange::{TokenClient, TokenGrant};
use crate::auth::types::Credential;
use crate::error::AuthError;
use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound on waiting for another process to finish its refresh
const LOCK_WAIT: Duration = Duration::from_secs(5);
const LOCK_POLL: Duration = Duration::from_millis(100);

pub struct PersistingTokenSource {
    account: String,
    backend: Arc<dyn SecretBackend>,
    tokens: TokenClient,
    locks_dir: PathBuf,
    refresh_serial: tokio::sync::Mutex<()>,
}

impl PersistingTokenSource {
    pub fn new(
        account: String,
        backend: Arc<dyn SecretBackend>,
        tokens: TokenClient,
        locks_dir: PathBuf,
    ) -> Self {
        Self {
            account,
            backend,
            tokens,
            locks_dir,
            refresh_serial: tokio::sync::Mutex::new(()),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Return a credential whose access token is usable right now
    ///
    /// Rotated refresh tokens are written back before the credential is
    /// handed out; losing one would strand the session.
    pub async fn current_token(&self) -> Result<Credential, AuthError> {
        let stored = self.read_required()?;
        if stored.is_fresh(Utc::now()) {
            return Ok(stored);
        }

        let _serial = self.refresh_serial.lock().await;

        let Some(lock_file) = self.acquire_refresh_lock().await? else {
            // The holder may have finished the rotation we were waiting for
            let stored = self.read_required()?;
            if stored.is_fresh(Utc::now()) {
                return Ok(stored);
            }
            return Err(AuthError::Storage(format!(
                "refresh lock for '{}' is held elsewhere and the stored token is stale",
                self.account
            )));
        };

        let result = self.refresh_locked().await;

        let _ = lock_file.unlock();
        result
    }

    async fn refresh_locked(&self) -> Result<Credential, AuthError> {
        // Another task or process may have rotated while we waited
        let stored = self.read_required()?;
        if stored.is_fresh(Utc::now()) {
            return Ok(stored);
        }

        let refresh_token = match stored
            .refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            Some(token) => token.to_string(),
            None => {
                return Err(AuthError::AuthRequired(format!(
                    "session for '{}' has expired and cannot be refreshed; run 'bellhop login'",
                    self.account
                )));
            }
        };

        debug!("refreshing access token for '{}'", self.account);
        let grant = match self.tokens.refresh(&refresh_token).await {
            Ok(grant) => grant,
            Err(AuthError::InvalidGrant(detail)) => {
                warn!(
                    "refresh token for '{}' was rejected: {}",
                    self.account, detail
                );
                let _ = self.backend.delete(&self.account);
                return Err(AuthError::AuthRequired(format!(
                    "session for '{}' was revoked; run 'bellhop login'",
                    self.account
                )));
            }
            Err(e) => return Err(e),
        };

        let rotated = rotate_credential(&stored, grant);

        if let Err(e) = self.backend.set(&self.account, &rotated) {
            // The token itself is still good for this call
            warn!(
                "refreshed credential for '{}' could not be stored: {}",
                self.account, e
            );
        }

        Ok(rotated)
    }

    fn read_required(&self) -> Result<Credential, AuthError> {
        self.backend.get(&self.account)?.ok_or_else(|| {
            AuthError::AuthRequired(format!(
                "no stored credential for '{}'; run 'bellhop login'",
                self.account
            ))
        })
    }

    /// Take the per-account advisory lock, bounded by LOCK_WAIT
    async fn acquire_refresh_lock(&self) -> Result<Option<File>, AuthError> {
        fs::create_dir_all(&self.locks_dir)
            .map_err(|e| AuthError::Storage(format!("failed to create lock directory: {}", e)))?;
        let path = self
            .locks_dir
            .join(format!("{}.lock", sanitize_lock_name(&self.account)));
        let file = File::create(&path)
            .map_err(|e| AuthError::Storage(format!("failed to open refresh lock: {}", e)))?;

        let deadline = Instant::now() + LOCK_WAIT;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Some(file)),
                Err(_) if Instant::now() < deadline => {
                    tokio::time::sleep(LOCK_POLL).await;
                }
                Err(_) => return Ok(None),
            }
        }
    }
}

/// Fold a refresh response into the stored credential
fn rotate_credential(stored: &Credential, grant: TokenGrant) -> Credential {
    // A response without a new refresh token keeps the current one alive
    let refresh_token = grant
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .or_else(|| stored.refresh_token.clone());

    let scopes = match grant.scope.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(granted) => granted.split_whitespace().map(str::to_string).collect(),
        None => stored.scopes.clone(),
    };

    Credential {
        access_token: grant.access_token,
        refresh_token,
        expires_at: grant.expires_at,
        scopes,
        scheme: stored.scheme.clone(),
    }
}

fn sanitize_lock_name(account: &str) -> String {
    account
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

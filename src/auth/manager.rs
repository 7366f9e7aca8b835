//! Ties the credential pieces together for the CLI
//!
//! One manager per invocation: it loads settings and the account registry,
//! picks the secret backend, and exposes the operations the commands are
//! built from. Flow variants live in `flow`; this module decides which
//! account a finished grant belongs to and makes the result durable.

use crate::auth::backend::{select_backend, BackendKind, SecretBackend};
use crate::auth::exchange::{TokenClient, TokenEndpoint};
use crate::auth::flow::{FlowOptions, LoginFlow, LoginGrant, PendingAuthorization};
use crate::auth::registry::{AccountEntry, AccountRegistry};
use crate::auth::resolver::resolve_account;
use crate::auth::scopes::ScopeRegistry;
use crate::auth::token_source::PersistingTokenSource;
use crate::auth::transport::AuthenticatedTransport;
use crate::config::{config_dir, env_var_nonempty, ProviderSettings, Settings, ACCOUNT_ENV};
use crate::error::{normalize_account, validate_account, AuthError};
use crate::http::{client_with_timeout, DEFAULT_TIMEOUT};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Knobs for a login attempt, shared by all flow variants
pub struct LoginOptions {
    /// Account the user expects to sign in as; also sent as login_hint
    pub account_hint: Option<String>,
    /// Services to request scopes for; empty means all of them
    pub services: Vec<String>,
    pub read_only: bool,
    pub open_browser: bool,
    pub timeout: Duration,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            account_hint: None,
            services: Vec::new(),
            read_only: false,
            open_browser: true,
            timeout: crate::auth::flow::INTERACTIVE_TIMEOUT,
        }
    }
}

/// What a completed login left behind
#[derive(Debug)]
pub struct LoginSummary {
    pub account: String,
    pub backend: BackendKind,
    pub scopes: Vec<String>,
    pub is_default: bool,
}

#[derive(Debug)]
pub struct LogoutSummary {
    pub account: String,
    pub removed: bool,
}

/// One account's standing, for `accounts list`
pub struct AccountStatus {
    pub id: String,
    pub is_default: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    /// A credential for this account exists in the secret backend
    pub stored: bool,
    /// Outcome of the token check, when one was requested
    pub usable: Option<bool>,
}

pub struct CredentialManager {
    settings: Settings,
    dir: PathBuf,
    registry: AccountRegistry,
    backend: Arc<dyn SecretBackend>,
    scopes: ScopeRegistry,
    http: reqwest::Client,
    env_account: Option<String>,
}

impl CredentialManager {
    /// Production wiring: config directory, settings file, env overrides
    pub fn open(backend_override: Option<&str>) -> Result<Self, AuthError> {
        let dir = config_dir()?;
        let settings = Settings::load_from(&dir)?;
        let env_account = env_var_nonempty(ACCOUNT_ENV);
        Self::with_parts(settings, dir, backend_override, env_account)
    }

    pub fn with_parts(
        settings: Settings,
        dir: PathBuf,
        backend_override: Option<&str>,
        env_account: Option<String>,
    ) -> Result<Self, AuthError> {
        fs::create_dir_all(&dir)
            .map_err(|e| AuthError::Storage(format!("failed to create config directory: {}", e)))?;

        let registry = AccountRegistry::load_from(&dir)?;
        let backend = select_backend(backend_override, &settings, &dir)?;

        Ok(Self {
            settings,
            dir,
            registry,
            backend,
            scopes: ScopeRegistry::default(),
            http: client_with_timeout(DEFAULT_TIMEOUT),
            env_account,
        })
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.registry
    }

    /// Scopes a login for these services must request
    pub fn scopes_for_services(
        &self,
        services: &[String],
        read_only: bool,
    ) -> Result<Vec<String>, AuthError> {
        let names: Vec<&str> = if services.is_empty() {
            self.scopes.service_names()
        } else {
            services.iter().map(String::as_str).collect()
        };
        self.scopes.scopes_for(&names, read_only)
    }

    /// Browser login against a loopback callback server
    pub async fn login_interactive(&mut self, opts: LoginOptions) -> Result<LoginSummary, AuthError> {
        let hint = self.normalized_hint(opts.account_hint.as_deref())?;
        let mut flow = self.build_flow(&opts, hint.clone())?;
        let grant = flow.run_interactive().await?;
        self.record_grant(grant, hint.as_deref())
    }

    /// First half of the paste-back login: URL to show the user
    pub fn manual_login_begin(
        &self,
        opts: &LoginOptions,
    ) -> Result<(LoginFlow, PendingAuthorization), AuthError> {
        let hint = self.normalized_hint(opts.account_hint.as_deref())?;
        let mut flow = self.build_flow(opts, hint)?;
        let pending = flow.start_manual();
        Ok((flow, pending))
    }

    /// Second half of the paste-back login, with the redirect the user saw
    pub async fn manual_login_finish(
        &mut self,
        flow: &mut LoginFlow,
        pending: &PendingAuthorization,
        pasted: &str,
        account_hint: Option<&str>,
    ) -> Result<LoginSummary, AuthError> {
        let hint = self.normalized_hint(account_hint)?;
        let grant = flow.finish_manual(pending, pasted).await?;
        self.record_grant(grant, hint.as_deref())
    }

    /// Authorization URL for the first remote invocation
    pub fn remote_login_url(&self, opts: &LoginOptions) -> Result<String, AuthError> {
        let hint = self.normalized_hint(opts.account_hint.as_deref())?;
        let flow = self.build_flow(opts, hint)?;
        Ok(flow.remote_authorize_url())
    }

    /// Second remote invocation: redeem the code the provider displayed
    pub async fn remote_login_finish(
        &mut self,
        opts: LoginOptions,
        code: &str,
    ) -> Result<LoginSummary, AuthError> {
        let hint = self.normalized_hint(opts.account_hint.as_deref())?;
        let mut flow = self.build_flow(&opts, hint.clone())?;
        let grant = flow.redeem_remote_code(code).await?;
        self.record_grant(grant, hint.as_deref())
    }

    /// Drop the stored credential and registry entry for an account
    pub fn logout(&mut self, explicit: Option<&str>) -> Result<LogoutSummary, AuthError> {
        let account = self.resolve(explicit)?;

        let removed_secret = self.backend.delete(&account)?;
        let removed_entry = self.registry.remove_account(&account)?;

        if removed_secret || removed_entry {
            info!("logged out '{}'", account);
        }

        Ok(LogoutSummary {
            account,
            removed: removed_secret || removed_entry,
        })
    }

    /// Transport for the resolved account, refreshing as needed
    pub fn transport_for(&self, explicit: Option<&str>) -> Result<AuthenticatedTransport, AuthError> {
        let account = self.resolve(explicit)?;
        Ok(self.transport_for_account(account))
    }

    /// Like `transport_for`, but refuses accounts whose grant does not
    /// cover the scopes these services need
    pub fn transport_for_services(
        &self,
        explicit: Option<&str>,
        services: &[String],
        read_only: bool,
    ) -> Result<AuthenticatedTransport, AuthError> {
        let account = self.resolve(explicit)?;
        let required = self.scopes_for_services(services, read_only)?;

        let credential = self.backend.get(&account)?.ok_or_else(|| {
            AuthError::AuthRequired(format!(
                "no stored credential for '{}'; run 'bellhop login'",
                account
            ))
        })?;

        if !credential.covers_scopes(&required) {
            let missing: Vec<&str> = required
                .iter()
                .filter(|scope| !credential.scopes.contains(scope))
                .map(String::as_str)
                .collect();
            return Err(AuthError::ScopeMismatch(format!(
                "account '{}' is missing {}; sign in again with the services you need",
                account,
                missing.join(", ")
            )));
        }

        Ok(self.transport_for_account(account))
    }

    /// Every account the registry or the backend knows about
    pub async fn list_accounts(&self, check: bool) -> Result<Vec<AccountStatus>, AuthError> {
        let stored = self.backend.list()?;

        let mut ids: Vec<String> = self
            .registry
            .accounts()
            .iter()
            .map(|entry| entry.id.clone())
            .collect();
        for id in &stored {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids.sort();

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let entry: Option<&AccountEntry> = self.registry.get(&id);
            let usable = if check {
                let source = self.token_source_for(id.clone());
                Some(source.current_token().await.is_ok())
            } else {
                None
            };

            out.push(AccountStatus {
                is_default: self.registry.default_account() == Some(id.as_str()),
                created_at: entry.map(|e| e.created_at),
                last_login: entry.map(|e| e.last_login),
                stored: stored.contains(&id),
                usable,
                id,
            });
        }

        Ok(out)
    }

    /// Mark an account as the one commands use when none is named
    pub fn set_default(&mut self, requested: &str) -> Result<String, AuthError> {
        let expanded = self.registry.resolve_alias(requested).to_string();
        let account = normalize_account(&expanded);
        validate_account(&account)?;

        if self.backend.get(&account)?.is_none() {
            return Err(AuthError::AuthRequired(format!(
                "'{}' is not signed in; run 'bellhop login' first",
                account
            )));
        }

        self.registry.set_default(&account)?;
        Ok(account)
    }

    pub fn set_alias(&mut self, alias: &str, account: &str) -> Result<(), AuthError> {
        self.registry.set_alias(alias, account)
    }

    pub fn alias_target(&self, alias: &str) -> Option<&str> {
        self.registry.alias_target(alias)
    }

    pub fn aliases(&self) -> &BTreeMap<String, String> {
        self.registry.aliases()
    }

    fn resolve(&self, explicit: Option<&str>) -> Result<String, AuthError> {
        resolve_account(
            explicit,
            self.env_account.as_deref(),
            &self.registry,
            self.backend.as_ref(),
        )
    }

    fn build_flow(&self, opts: &LoginOptions, hint: Option<String>) -> Result<LoginFlow, AuthError> {
        let scopes = self.scopes_for_services(&opts.services, opts.read_only)?;
        Ok(LoginFlow::new(
            &self.settings.provider,
            self.http.clone(),
            scopes,
            FlowOptions {
                login_hint: hint,
                open_browser: opts.open_browser,
                timeout: opts.timeout,
            },
        ))
    }

    fn normalized_hint(&self, hint: Option<&str>) -> Result<Option<String>, AuthError> {
        match hint.map(str::trim).filter(|h| !h.is_empty()) {
            Some(raw) => {
                let expanded = self.registry.resolve_alias(raw);
                let account = normalize_account(expanded);
                validate_account(&account)?;
                Ok(Some(account))
            }
            None => Ok(None),
        }
    }

    /// Decide who the grant belongs to and write it down
    fn record_grant(
        &mut self,
        grant: LoginGrant,
        hint: Option<&str>,
    ) -> Result<LoginSummary, AuthError> {
        let provider_named = grant
            .provider_account
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(normalize_account)
            .filter(|a| validate_account(a).is_ok());

        let account = match provider_named {
            Some(account) => {
                if let Some(hint) = hint {
                    if hint != account {
                        warn!(
                            "provider authenticated '{}' although '{}' was requested",
                            account, hint
                        );
                    }
                }
                account
            }
            None => hint.map(str::to_string).ok_or_else(|| {
                AuthError::InvalidInput(
                    "the provider did not name a usable account; pass --account".to_string(),
                )
            })?,
        };

        self.backend.set(&account, &grant.credential)?;
        self.registry.record_login(&account)?;
        info!("signed in '{}' via {}", account, self.backend.kind().as_str());

        Ok(LoginSummary {
            is_default: self.registry.default_account() == Some(account.as_str()),
            backend: self.backend.kind(),
            scopes: grant.credential.scopes.clone(),
            account,
        })
    }

    fn transport_for_account(&self, account: String) -> AuthenticatedTransport {
        AuthenticatedTransport::new(self.http.clone(), Arc::new(self.token_source_for(account)))
    }

    fn token_source_for(&self, account: String) -> PersistingTokenSource {
        PersistingTokenSource::new(
            account,
            self.backend.clone(),
            TokenClient::new(self.http.clone(), token_endpoint(&self.settings.provider)),
            self.dir.join("locks"),
        )
    }
}

fn token_endpoint(provider: &ProviderSettings) -> TokenEndpoint {
    TokenEndpoint {
        token_url: provider.token_url.clone(),
        client_id: provider.client_id.clone(),
        client_secret: provider.client_secret.clone(),
    }
}

//! Authorization code login flows
//!
//! Three ways to obtain the initial grant:
//! - interactive: loopback callback server plus the system browser
//! - manual: the user pastes the redirect URL back into the terminal
//! - remote: two separate invocations for machines without a browser
//!
//! Interactive and manual runs carry PKCE and a state parameter; the state
//! is checked before any code leaves the process. Remote runs span two
//! processes, so they carry neither.

use crate::auth::callback::{CallbackOutcome, CallbackServer};
use crate::auth::exchange::{TokenClient, TokenEndpoint, TokenGrant};
use crate::auth::types::{mask_token, Credential, TokenScheme};
use crate::config::ProviderSettings;
use crate::error::AuthError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Redirect target for flows where no local listener exists. The page shows
/// the full redirect URL and the authorization code for copying back.
pub const OUT_OF_BAND_REDIRECT_URI: &str = "https://auth.workdesk.io/cli/callback";

/// Default wait for the browser round trip
pub const INTERACTIVE_TIMEOUT: Duration = Duration::from_secs(120);

/// Where a login attempt currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    Idle,
    AwaitingAuthorization,
    ExchangingCode,
    Authenticated,
    Failed,
}

impl FlowPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowPhase::Idle => "idle",
            FlowPhase::AwaitingAuthorization => "awaiting_authorization",
            FlowPhase::ExchangingCode => "exchanging_code",
            FlowPhase::Authenticated => "authenticated",
            FlowPhase::Failed => "failed",
        }
    }
}

/// PKCE verifier and its S256 challenge
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let verifier_bytes: Vec<u8> = (0..32).map(|_| rand::thread_rng().gen()).collect();
        let verifier = URL_SAFE_NO_PAD.encode(&verifier_bytes);

        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

        Self {
            verifier,
            challenge,
        }
    }
}

/// Anti-forgery state parameter
pub fn generate_state() -> String {
    let state_bytes: Vec<u8> = (0..16).map(|_| rand::thread_rng().gen()).collect();
    URL_SAFE_NO_PAD.encode(&state_bytes)
}

/// State a started manual flow needs to finish later
#[derive(Debug)]
pub struct PendingAuthorization {
    pub auth_url: String,
    pub state: String,
    pub code_verifier: String,
}

/// Options shared by all flow variants
pub struct FlowOptions {
    pub login_hint: Option<String>,
    pub open_browser: bool,
    pub timeout: Duration,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            login_hint: None,
            open_browser: true,
            timeout: INTERACTIVE_TIMEOUT,
        }
    }
}

/// What a completed flow hands back
#[derive(Debug)]
pub struct LoginGrant {
    pub credential: Credential,
    /// Account the provider attached to the grant, when it names one
    pub provider_account: Option<String>,
}

/// Drives one login attempt from authorization URL to credential
pub struct LoginFlow {
    tokens: TokenClient,
    auth_url: String,
    client_id: String,
    scopes: Vec<String>,
    login_hint: Option<String>,
    open_browser: bool,
    timeout: Duration,
    phase: FlowPhase,
}

impl LoginFlow {
    pub fn new(
        provider: &ProviderSettings,
        http: reqwest::Client,
        scopes: Vec<String>,
        options: FlowOptions,
    ) -> Self {
        let endpoint = TokenEndpoint {
            token_url: provider.token_url.clone(),
            client_id: provider.client_id.clone(),
            client_secret: provider.client_secret.clone(),
        };

        Self {
            tokens: TokenClient::new(http, endpoint),
            auth_url: provider.auth_url.clone(),
            client_id: provider.client_id.clone(),
            scopes,
            login_hint: options.login_hint,
            open_browser: options.open_browser,
            timeout: options.timeout,
            phase: FlowPhase::Idle,
        }
    }

    pub fn phase(&self) -> FlowPhase {
        self.phase
    }

    fn transition(&mut self, next: FlowPhase) {
        debug!("login flow: {} -> {}", self.phase.as_str(), next.as_str());
        self.phase = next;
    }

    fn fail(&mut self, err: AuthError) -> AuthError {
        self.transition(FlowPhase::Failed);
        err
    }

    /// Run the browser flow against a loopback callback server
    pub async fn run_interactive(&mut self) -> Result<LoginGrant, AuthError> {
        let server = match CallbackServer::new() {
            Ok(server) => server,
            Err(e) => return Err(self.fail(e)),
        };
        let redirect_uri = server.redirect_uri();

        let pkce = Pkce::generate();
        let state = generate_state();
        let auth_url = self.authorize_url(&redirect_uri, Some(&state), Some(&pkce.challenge));

        self.transition(FlowPhase::AwaitingAuthorization);
        info!("Authorization URL: {}", auth_url);

        if self.open_browser && webbrowser::open(&auth_url).is_ok() {
            info!("Browser opened for authorization");
        } else {
            eprintln!("Open this URL in your browser to continue:\n  {}", auth_url);
        }

        let outcome = match server.wait_for_redirect(self.timeout).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail(e)),
        };

        let (code, returned_state) = match outcome {
            CallbackOutcome::Redirect { code, state } => (code, state),
            CallbackOutcome::ProviderError { error, description } => {
                return Err(self.fail(provider_refusal(&error, description)));
            }
            CallbackOutcome::TimedOut => {
                return Err(self.fail(AuthError::AuthRequired(format!(
                    "no authorization response within {} seconds",
                    self.timeout.as_secs()
                ))));
            }
            CallbackOutcome::Cancelled => {
                return Err(self.fail(AuthError::AuthRequired(
                    "authorization was cancelled".to_string(),
                )));
            }
        };

        // The code is only usable once, so the state check comes first
        if returned_state != state {
            return Err(self.fail(AuthError::StateMismatch(
                "authorization response does not belong to this login attempt".to_string(),
            )));
        }

        self.transition(FlowPhase::ExchangingCode);
        let grant = match self
            .tokens
            .exchange_code(&code, &redirect_uri, Some(&pkce.verifier))
            .await
        {
            Ok(grant) => grant,
            Err(e) => return Err(self.fail(e)),
        };

        self.finish(grant)
    }

    /// Start the paste-back flow: the caller shows the URL and collects the
    /// redirect the browser lands on
    pub fn start_manual(&mut self) -> PendingAuthorization {
        let pkce = Pkce::generate();
        let state = generate_state();
        let auth_url =
            self.authorize_url(OUT_OF_BAND_REDIRECT_URI, Some(&state), Some(&pkce.challenge));

        self.transition(FlowPhase::AwaitingAuthorization);

        PendingAuthorization {
            auth_url,
            state,
            code_verifier: pkce.verifier,
        }
    }

    /// Finish the paste-back flow with the redirect URL the user supplied
    pub async fn finish_manual(
        &mut self,
        pending: &PendingAuthorization,
        pasted: &str,
    ) -> Result<LoginGrant, AuthError> {
        let (code, returned_state) = match parse_pasted_redirect(pasted) {
            Ok(parts) => parts,
            Err(e) => return Err(self.fail(e)),
        };

        if returned_state.as_deref() != Some(pending.state.as_str()) {
            return Err(self.fail(AuthError::StateMismatch(
                "pasted redirect does not belong to this login attempt".to_string(),
            )));
        }

        self.transition(FlowPhase::ExchangingCode);
        let grant = match self
            .tokens
            .exchange_code(&code, OUT_OF_BAND_REDIRECT_URI, Some(&pending.code_verifier))
            .await
        {
            Ok(grant) => grant,
            Err(e) => return Err(self.fail(e)),
        };

        self.finish(grant)
    }

    /// Authorization URL for the two-invocation remote flow. Nothing is kept
    /// between the invocations, so the URL carries no state or challenge.
    pub fn remote_authorize_url(&self) -> String {
        self.authorize_url(OUT_OF_BAND_REDIRECT_URI, None, None)
    }

    /// Second half of the remote flow: redeem a code obtained elsewhere
    pub async fn redeem_remote_code(&mut self, code: &str) -> Result<LoginGrant, AuthError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(self.fail(AuthError::InvalidInput(
                "authorization code must not be empty".to_string(),
            )));
        }

        self.transition(FlowPhase::ExchangingCode);
        let grant = match self
            .tokens
            .exchange_code(code, OUT_OF_BAND_REDIRECT_URI, None)
            .await
        {
            Ok(grant) => grant,
            Err(e) => return Err(self.fail(e)),
        };

        self.finish(grant)
    }

    fn finish(&mut self, grant: TokenGrant) -> Result<LoginGrant, AuthError> {
        let has_refresh = grant
            .refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .is_some();
        if !has_refresh {
            return Err(self.fail(AuthError::EmptyToken(
                "token response carries no refresh_token, so the session could not outlive the access token".to_string(),
            )));
        }

        let scopes = match grant.scope.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(granted) => granted.split_whitespace().map(str::to_string).collect(),
            None => self.scopes.clone(),
        };

        let credential = Credential {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: grant.expires_at,
            scopes,
            scheme: TokenScheme::default(),
        };

        self.transition(FlowPhase::Authenticated);
        info!(
            "authorization granted, access token {}",
            mask_token(&credential.access_token)
        );

        Ok(LoginGrant {
            credential,
            provider_account: grant.account,
        })
    }

    fn authorize_url(
        &self,
        redirect_uri: &str,
        state: Option<&str>,
        challenge: Option<&str>,
    ) -> String {
        let mut params = vec![
            ("response_type", "code".to_string()),
            ("client_id", self.client_id.clone()),
            ("redirect_uri", redirect_uri.to_string()),
            ("scope", self.scopes.join(" ")),
        ];

        if let Some(state) = state {
            params.push(("state", state.to_string()));
        }

        if let Some(challenge) = challenge {
            params.push(("code_challenge", challenge.to_string()));
            params.push(("code_challenge_method", "S256".to_string()));
        }

        if let Some(hint) = &self.login_hint {
            params.push(("login_hint", hint.clone()));
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}?{}", self.auth_url, query)
    }
}

fn provider_refusal(error: &str, description: Option<String>) -> AuthError {
    let detail = description
        .map(|d| format!(" ({})", d))
        .unwrap_or_default();
    AuthError::Provider(format!("authorization was refused: {}{}", error, detail))
}

/// Pull code and state out of a pasted redirect URL
fn parse_pasted_redirect(input: &str) -> Result<(String, Option<String>), AuthError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AuthError::InvalidInput(
            "paste the full redirect URL shown after authorization".to_string(),
        ));
    }

    let url = Url::parse(trimmed)
        .map_err(|e| AuthError::InvalidInput(format!("redirect URL is not valid: {}", e)))?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(provider_refusal(&error, error_description));
    }

    match code {
        Some(code) if !code.trim().is_empty() => Ok((code, state)),
        _ => Err(AuthError::InvalidInput(
            "redirect URL carries no authorization code".to_string(),
        )),
    }
}

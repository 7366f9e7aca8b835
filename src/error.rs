//! Error types and handling for the bellhop credential core

use std::fmt;

/// Application error types surfaced by the credential and session layer
#[derive(Debug)]
pub enum AuthError {
    InvalidInput(String),
    Network(String),
    AuthRequired(String),
    InvalidGrant(String),
    StateMismatch(String),
    EmptyToken(String),
    BackendUnavailable(String),
    ScopeMismatch(String),
    UnknownService(String),
    Provider(String),
    Storage(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AuthError::Network(msg) => write!(f, "Network error: {}", msg),
            AuthError::AuthRequired(msg) => write!(f, "Authentication required: {}", msg),
            AuthError::InvalidGrant(msg) => write!(f, "Authorization grant rejected: {}", msg),
            AuthError::StateMismatch(msg) => write!(f, "State parameter mismatch: {}", msg),
            AuthError::EmptyToken(msg) => write!(f, "Token response incomplete: {}", msg),
            AuthError::BackendUnavailable(msg) => {
                write!(f, "No secret backend available: {}", msg)
            }
            AuthError::ScopeMismatch(msg) => write!(f, "Scope not granted: {}", msg),
            AuthError::UnknownService(msg) => write!(f, "Unknown service: {}", msg),
            AuthError::Provider(msg) => write!(f, "Provider error: {}", msg),
            AuthError::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

impl AuthError {
    /// Get the stable error code for diagnostics and scripting
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidInput(_) => "invalid_input",
            AuthError::Network(_) => "network_error",
            AuthError::AuthRequired(_) => "auth_required",
            AuthError::InvalidGrant(_) => "invalid_grant",
            AuthError::StateMismatch(_) => "state_mismatch",
            AuthError::EmptyToken(_) => "empty_token",
            AuthError::BackendUnavailable(_) => "backend_unavailable",
            AuthError::ScopeMismatch(_) => "scope_mismatch",
            AuthError::UnknownService(_) => "unknown_service",
            AuthError::Provider(_) => "provider_error",
            AuthError::Storage(_) => "storage_error",
        }
    }

    /// Process exit code for this error kind
    pub fn exit_code(&self) -> i32 {
        match self {
            AuthError::InvalidInput(_) => 1,
            AuthError::Network(_) => 2,
            AuthError::AuthRequired(_) => 3,
            AuthError::InvalidGrant(_) => 4,
            AuthError::StateMismatch(_) => 5,
            AuthError::EmptyToken(_) => 6,
            AuthError::BackendUnavailable(_) => 7,
            AuthError::ScopeMismatch(_) => 8,
            AuthError::UnknownService(_) => 9,
            AuthError::Provider(_) => 10,
            AuthError::Storage(_) => 11,
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Convert reqwest::Error to AuthError
impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AuthError::Network(format!("request timed out: {}", err))
        } else if err.is_decode() {
            AuthError::Provider(format!("malformed response body: {}", err))
        } else {
            AuthError::Network(err.to_string())
        }
    }
}

/// Convert serde_json::Error to AuthError
impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Storage(format!("stored data is not valid JSON: {}", err))
    }
}

/// Convert std::io::Error to AuthError
impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        AuthError::Storage(err.to_string())
    }
}

/// Canonical form of an account identifier: trimmed and lowercased
pub fn normalize_account(account: &str) -> String {
    account.trim().to_ascii_lowercase()
}

/// Validation for canonical account identifiers (email-like)
pub fn validate_account(account: &str) -> Result<(), AuthError> {
    if account.is_empty() {
        return Err(AuthError::InvalidInput("Account cannot be empty".to_string()));
    }

    let Some((local, domain)) = account.split_once('@') else {
        return Err(AuthError::InvalidInput(
            "Invalid account format, expected user@domain".to_string(),
        ));
    };

    if local.is_empty() {
        return Err(AuthError::InvalidInput("Account user part is empty".to_string()));
    }

    // Basic domain validation
    let parts: Vec<&str> = domain.split('.').collect();
    if parts.len() < 2 || parts.iter().any(|part| part.is_empty()) {
        return Err(AuthError::InvalidInput("Invalid account domain".to_string()));
    }

    Ok(())
}

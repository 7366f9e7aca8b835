use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Safety margin subtracted from the recorded expiry when judging freshness
pub const REFRESH_SAFETY_MARGIN_SECS: i64 = 60;

/// How the access token is attached to outbound requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenScheme {
    pub header: String,
    pub prefix: String,
}

impl Default for TokenScheme {
    fn default() -> Self {
        Self {
            header: "authorization".to_string(),
            prefix: "Bearer ".to_string(),
        }
    }
}

impl TokenScheme {
    /// Header value carrying the given access token
    pub fn header_value(&self, access_token: &str) -> String {
        format!("{}{}", self.prefix, access_token)
    }
}

/// Credential represents the stored authentication state for one account
///
/// The refresh token is the only durable secret; the access token is a
/// short-lived cache that rides along between invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub scheme: TokenScheme,
}

impl Credential {
    /// Check whether the access token can still be used at `now`
    ///
    /// A credential without a recorded expiry never ages out locally; the
    /// provider opted out of expiry metadata and controls rejection itself.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(REFRESH_SAFETY_MARGIN_SECS) < expires_at,
            None => true,
        }
    }

    /// Whether every requested scope was granted on this credential
    pub fn covers_scopes(&self, requested: &[String]) -> bool {
        requested.iter().all(|s| self.scopes.contains(s))
    }
}

/// Redact a token for log output, keeping a short recognizable prefix
pub fn mask_token(token: &str) -> String {
    match token.get(..6) {
        Some(prefix) if token.len() > 10 => format!("{}...", prefix),
        _ => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential_expiring_in(secs: i64) -> Credential {
        Credential {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_at: Some(Utc::now() + Duration::seconds(secs)),
            scopes: vec![],
            scheme: TokenScheme::default(),
        }
    }

    #[test]
    fn test_fresh_with_plenty_of_time_left() {
        assert!(credential_expiring_in(3600).is_fresh(Utc::now()));
    }

    #[test]
    fn test_stale_inside_safety_margin() {
        assert!(!credential_expiring_in(30).is_fresh(Utc::now()));
    }

    #[test]
    fn test_stale_when_already_expired() {
        assert!(!credential_expiring_in(-10).is_fresh(Utc::now()));
    }

    #[test]
    fn test_fresh_without_expiry_metadata() {
        let mut cred = credential_expiring_in(0);
        cred.expires_at = None;
        assert!(cred.is_fresh(Utc::now()));
    }

    #[test]
    fn test_default_scheme_is_bearer() {
        let scheme = TokenScheme::default();
        assert_eq!(scheme.header_value("T1"), "Bearer T1");
    }

    #[test]
    fn test_covers_scopes() {
        let mut cred = credential_expiring_in(3600);
        cred.scopes = vec!["account.basic".to_string(), "mail.readonly".to_string()];
        assert!(cred.covers_scopes(&["mail.readonly".to_string()]));
        assert!(!cred.covers_scopes(&["mail.send".to_string()]));
    }

    #[test]
    fn test_mask_token_redacts() {
        assert_eq!(mask_token("abc"), "***");
        assert_eq!(mask_token("abcdef0123456789"), "abcdef...");
    }
}

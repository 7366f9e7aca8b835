//! Token endpoint client
//!
//! Form POSTs for the authorization_code and refresh_token grants, plus the
//! response parsing shared by both. Providers signal failures with any
//! status code, so the body is inspected for an error member even on 2xx.

use crate::auth::types::mask_token;
use crate::error::AuthError;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::debug;

/// Provider endpoints and client identity used for every grant
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
}

/// Parsed token endpoint response
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    /// Account the provider says this grant belongs to
    pub account: Option<String>,
}

/// HTTP client for the provider's token endpoint
pub struct TokenClient {
    http: reqwest::Client,
    endpoint: TokenEndpoint,
}

impl TokenClient {
    pub fn new(http: reqwest::Client, endpoint: TokenEndpoint) -> Self {
        Self { http, endpoint }
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenGrant, AuthError> {
        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.trim().to_string()),
            ("redirect_uri", redirect_uri.trim().to_string()),
            ("client_id", self.endpoint.client_id.trim().to_string()),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier.to_string()));
        }
        self.push_client_secret(&mut form);

        self.post_form(&form, "token exchange").await
    }

    /// Trade a refresh token for a new access token
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.trim().to_string()),
            ("client_id", self.endpoint.client_id.trim().to_string()),
        ];
        self.push_client_secret(&mut form);

        self.post_form(&form, "token refresh").await
    }

    fn push_client_secret(&self, form: &mut Vec<(&str, String)>) {
        if let Some(secret) = self.endpoint.client_secret.as_deref().map(str::trim) {
            if !secret.is_empty() {
                form.push(("client_secret", secret.to_string()));
            }
        }
    }

    async fn post_form(&self, form: &[(&str, String)], what: &str) -> Result<TokenGrant, AuthError> {
        let resp = self
            .http
            .post(self.endpoint.token_url.trim())
            .form(form)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("{} request failed: {}", what, e)))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AuthError::Network(format!("{} response read failed: {}", what, e)))?;

        let grant = parse_token_response(status, &body)?;
        debug!(
            "{} succeeded, access token {}",
            what,
            mask_token(&grant.access_token)
        );
        Ok(grant)
    }
}

/// Turn a raw token endpoint response into a grant
///
/// Pure so the classification rules are testable without a server.
pub fn parse_token_response(
    status: reqwest::StatusCode,
    body: &str,
) -> Result<TokenGrant, AuthError> {
    let value: Option<Value> = serde_json::from_str(body).ok();

    // Error members win over the status code in both directions: a 2xx body
    // carrying an error is a failure, and invalid_grant keeps its meaning on
    // any status.
    if let Some(value) = value.as_ref() {
        if let Some((code, message)) = parse_error_details(value) {
            let detail = message.unwrap_or_else(|| "no description provided".to_string());
            if code == "invalid_grant" {
                return Err(AuthError::InvalidGrant(detail));
            }
            return Err(AuthError::Provider(format!("{}: {}", code, detail)));
        }
    }

    if !status.is_success() {
        return Err(AuthError::Provider(format!(
            "token endpoint returned status {}: {}",
            status.as_u16(),
            sanitize_body_snippet(body)
        )));
    }

    let Some(value) = value else {
        return Err(AuthError::Provider(
            "token response is not valid JSON".to_string(),
        ));
    };

    let access_token = value
        .get("access_token")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            AuthError::EmptyToken("token response carries no usable access_token".to_string())
        })?
        .to_string();

    let refresh_token = value
        .get("refresh_token")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let scope = value
        .get("scope")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let account = value
        .get("account")
        .or_else(|| value.get("sub"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let expires_at = value
        .get("expires_in")
        .and_then(parse_i64_lossy)
        .filter(|v| *v > 0)
        .map(|v| Utc::now() + Duration::seconds(v));

    Ok(TokenGrant {
        access_token,
        refresh_token,
        expires_at,
        scope,
        account,
    })
}

/// Extract an error code and description, covering both the flat OAuth shape
/// and providers that nest an error object
fn parse_error_details(value: &Value) -> Option<(String, Option<String>)> {
    let mut message = value
        .get("error_description")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let error_value = value.get("error")?;

    let code = if let Some(code) = error_value.as_str() {
        Some(code.trim().to_string()).filter(|c| !c.is_empty())
    } else if let Some(obj) = error_value.as_object() {
        if message.is_none() {
            message = obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);
        }
        obj.get("code")
            .or_else(|| obj.get("type"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    } else {
        None
    };

    code.map(|c| (c, message))
}

fn parse_i64_lossy(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lc = key.trim().to_ascii_lowercase();
    key_lc.contains("token") || key_lc.contains("secret")
}

fn redact_sensitive_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if is_sensitive_key(key) {
                    if let Some(raw) = nested.as_str() {
                        *nested = Value::String(mask_token(raw));
                        continue;
                    }
                }
                redact_sensitive_fields(nested);
            }
        }
        Value::Array(items) => {
            for nested in items {
                redact_sensitive_fields(nested);
            }
        }
        _ => {}
    }
}

/// Error bodies may echo secrets back; mask them before they reach a message
fn sanitize_body_snippet(body: &str) -> String {
    if let Ok(mut value) = serde_json::from_str::<Value>(body) {
        redact_sensitive_fields(&mut value);
        if let Ok(encoded) = serde_json::to_string(&value) {
            return encoded.chars().take(240).collect();
        }
    }
    body.chars().take(240).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_successful_response_parsed() {
        let body = r#"{
            "access_token": "T1",
            "refresh_token": "R1",
            "token_type": "Bearer",
            "expires_in": 3600,
            "scope": "account.basic mail.readonly",
            "account": "alice@workdesk.io"
        }"#;

        let grant = parse_token_response(StatusCode::OK, body).unwrap();
        assert_eq!(grant.access_token, "T1");
        assert_eq!(grant.refresh_token.as_deref(), Some("R1"));
        assert_eq!(grant.scope.as_deref(), Some("account.basic mail.readonly"));
        assert_eq!(grant.account.as_deref(), Some("alice@workdesk.io"));

        let expires_at = grant.expires_at.unwrap();
        assert!(expires_at > Utc::now() + Duration::seconds(3500));
        assert!(expires_at <= Utc::now() + Duration::seconds(3601));
    }

    #[test]
    fn test_error_in_body_beats_success_status() {
        let body = r#"{"error": "invalid_request", "error_description": "redirect_uri mismatch"}"#;
        let err = parse_token_response(StatusCode::OK, body).unwrap_err();
        assert_eq!(err.error_code(), "provider_error");
        assert!(err.to_string().contains("redirect_uri mismatch"));
    }

    #[test]
    fn test_invalid_grant_classified_on_any_status() {
        let body = r#"{"error": "invalid_grant", "error_description": "refresh token revoked"}"#;

        let err = parse_token_response(StatusCode::BAD_REQUEST, body).unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");

        let err = parse_token_response(StatusCode::OK, body).unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");
    }

    #[test]
    fn test_nested_error_object_supported() {
        let body = r#"{
            "error": {
                "code": "server_error",
                "message": "temporary backend failure"
            }
        }"#;

        let err = parse_token_response(StatusCode::OK, body).unwrap_err();
        assert_eq!(err.error_code(), "provider_error");
        assert!(err.to_string().contains("server_error"));
        assert!(err.to_string().contains("temporary backend failure"));
    }

    #[test]
    fn test_missing_access_token_is_empty_token() {
        let body = r#"{"token_type": "Bearer", "expires_in": 3600}"#;
        let err = parse_token_response(StatusCode::OK, body).unwrap_err();
        assert_eq!(err.error_code(), "empty_token");
    }

    #[test]
    fn test_blank_access_token_is_empty_token() {
        let body = r#"{"access_token": "   ", "refresh_token": "R1"}"#;
        let err = parse_token_response(StatusCode::OK, body).unwrap_err();
        assert_eq!(err.error_code(), "empty_token");
    }

    #[test]
    fn test_non_success_without_error_member() {
        let err = parse_token_response(StatusCode::BAD_GATEWAY, "upstream down").unwrap_err();
        assert_eq!(err.error_code(), "provider_error");
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_expires_in_lossy_parsing() {
        let body = r#"{"access_token": "T1", "expires_in": "1800"}"#;
        let grant = parse_token_response(StatusCode::OK, body).unwrap();
        assert!(grant.expires_at.is_some());

        let body = r#"{"access_token": "T1", "expires_in": 0}"#;
        let grant = parse_token_response(StatusCode::OK, body).unwrap();
        assert!(grant.expires_at.is_none());

        let body = r#"{"access_token": "T1"}"#;
        let grant = parse_token_response(StatusCode::OK, body).unwrap();
        assert!(grant.expires_at.is_none());
    }

    #[test]
    fn test_sub_fallback_for_account() {
        let body = r#"{"access_token": "T1", "sub": "bob@workdesk.io"}"#;
        let grant = parse_token_response(StatusCode::OK, body).unwrap();
        assert_eq!(grant.account.as_deref(), Some("bob@workdesk.io"));
    }

    #[test]
    fn test_error_snippet_masks_echoed_secrets() {
        let body = r#"{"detail": "rejected", "refresh_token": "abcd1234xyz98765"}"#;
        let err = parse_token_response(StatusCode::BAD_GATEWAY, body).unwrap_err();
        let msg = err.to_string();
        assert!(!msg.contains("abcd1234xyz98765"));
        assert!(msg.contains("abcd12..."));
    }
}

//! Request builder that attaches the session token
//!
//! Thin layer over reqwest: callers describe the request, the transport
//! asks the token source for a fresh credential and sets the auth header
//! the credential's scheme names. Nothing here inspects responses.

use crate::auth::token_source::PersistingTokenSource;
use crate::error::AuthError;
use reqwest::{Method, RequestBuilder};
use std::sync::Arc;

pub struct AuthenticatedTransport {
    http: reqwest::Client,
    source: Arc<PersistingTokenSource>,
}

impl AuthenticatedTransport {
    pub fn new(http: reqwest::Client, source: Arc<PersistingTokenSource>) -> Self {
        Self { http, source }
    }

    pub fn account(&self) -> &str {
        self.source.account()
    }

    /// Start a request with the session token already attached
    ///
    /// Refreshes first when the stored token is stale, so the builder is
    /// ready to send as-is.
    pub async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, AuthError> {
        let credential = self.source.current_token().await?;
        let builder = self.http.request(method, url).header(
            credential.scheme.header.as_str(),
            credential.scheme.header_value(&credential.access_token),
        );
        Ok(builder)
    }

    pub async fn get(&self, url: &str) -> Result<RequestBuilder, AuthError> {
        self.request(Method::GET, url).await
    }

    pub async fn post(&self, url: &str) -> Result<RequestBuilder, AuthError> {
        self.request(Method::POST, url).await
    }
}

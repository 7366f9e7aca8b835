//! HTTP client utilities
//!
//! Provides a reqwest::Client configured with timeouts and system proxy support

use reqwest::{Client, NoProxy, Proxy};
use std::time::Duration;

/// Default timeout for requests against the authorization provider
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a reqwest Client with the given timeout and honoring system proxy env vars
///
/// Recognized env vars:
/// - HTTP_PROXY / http_proxy
/// - HTTPS_PROXY / https_proxy
/// - ALL_PROXY / all_proxy
/// - NO_PROXY / no_proxy
pub fn client_with_timeout(timeout: Duration) -> Client {
    let mut builder = Client::builder().timeout(timeout);

    let no_proxy = NoProxy::from_env();
    if let Some(url) = getenv_first(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]) {
        if let Ok(proxy) = Proxy::https(url.as_str()) {
            builder = builder.proxy(proxy.no_proxy(no_proxy.clone()));
        }
    }
    if let Some(url) = getenv_first(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]) {
        if let Ok(proxy) = Proxy::http(url.as_str()) {
            builder = builder.proxy(proxy.no_proxy(no_proxy));
        }
    }

    builder
        .user_agent(concat!("bellhop/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("Failed to create HTTP client")
}

fn getenv_first(keys: &[&str]) -> Option<String> {
    for k in keys {
        if let Ok(v) = std::env::var(k) {
            if !v.trim().is_empty() {
                return Some(v);
            }
        }
    }
    None
}

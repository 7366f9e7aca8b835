//! Local HTTP callback listener for the interactive authorization flow
//!
//! Minimal loopback server that waits for the provider to redirect the
//! browser back with `code` and `state`. One GET is served, then the
//! listener shuts down. Timeout and Ctrl-C are outcomes, not errors, so the
//! flow engine can record the phase transition either way.

use crate::error::AuthError;
use axum::{extract::Query, response::Html, routing::get, Router};
use serde::Deserialize;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Query parameters the provider sends on redirect
#[derive(Debug, Deserialize)]
struct RedirectParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// What the wait ended with
#[derive(Debug)]
pub enum CallbackOutcome {
    Redirect {
        code: String,
        state: String,
    },
    ProviderError {
        error: String,
        description: Option<String>,
    },
    TimedOut,
    Cancelled,
}

/// Loopback callback listener on an ephemeral port
pub struct CallbackServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl CallbackServer {
    /// Bind to 127.0.0.1 on a random available port
    ///
    /// The socket is held from here on, so the redirect URI handed to the
    /// provider cannot be taken over by another process.
    pub fn new() -> Result<Self, AuthError> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .map_err(|e| AuthError::Network(format!("failed to bind loopback listener: {}", e)))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| AuthError::Network(format!("failed to prepare loopback listener: {}", e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| AuthError::Network(format!("failed to read listener address: {}", e)))?;

        Ok(Self { listener, addr })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Redirect URI to register with the authorization request
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}", self.port())
    }

    /// Serve until the redirect arrives, the timeout passes, or Ctrl-C
    ///
    /// The listener is released on every exit path before the outcome
    /// propagates.
    pub async fn wait_for_redirect(self, timeout: Duration) -> Result<CallbackOutcome, AuthError> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(tokio::sync::Mutex::new(Some(tx)));

        let callback_tx = tx.clone();
        let handler = move |Query(params): Query<RedirectParams>| async move {
            let outcome = if let Some(error) = params.error {
                CallbackOutcome::ProviderError {
                    error,
                    description: params.error_description,
                }
            } else if let (Some(code), Some(state)) = (params.code, params.state) {
                CallbackOutcome::Redirect { code, state }
            } else {
                CallbackOutcome::ProviderError {
                    error: "invalid_request".to_string(),
                    description: Some("Missing code or state parameter".to_string()),
                }
            };

            let page = match &outcome {
                CallbackOutcome::Redirect { .. } => LANDING_SUCCESS,
                _ => LANDING_FAILURE,
            };

            if let Some(tx) = callback_tx.lock().await.take() {
                let _ = tx.send(outcome);
            }

            Html(page)
        };

        let app = Router::new().route("/", get(handler));

        let listener = tokio::net::TcpListener::from_std(self.listener)
            .map_err(|e| AuthError::Network(format!("failed to activate loopback listener: {}", e)))?;

        debug!("authorization callback listener on {}", self.addr);

        let server_handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let outcome = tokio::select! {
            received = rx => match received {
                Ok(outcome) => Ok(outcome),
                Err(_) => Err(AuthError::Network("callback channel closed".to_string())),
            },
            _ = tokio::time::sleep(timeout) => Ok(CallbackOutcome::TimedOut),
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => Ok(CallbackOutcome::Cancelled),
                Err(e) => Err(AuthError::Network(format!("signal handler failed: {}", e))),
            },
        };

        server_handle.abort();
        let _ = tokio::time::timeout(Duration::from_secs(2), server_handle).await;

        outcome
    }
}

const LANDING_SUCCESS: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Signed in</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, Helvetica, Arial, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
            background: #f3f4f6;
        }
        .card {
            background: white;
            padding: 3rem;
            border-radius: 1rem;
            box-shadow: 0 10px 40px rgba(0,0,0,0.15);
            text-align: center;
            max-width: 400px;
        }
        h1 { color: #1f2937; margin: 0 0 0.5rem; font-size: 1.5rem; }
        p { color: #6b7280; margin: 0; line-height: 1.6; }
    </style>
</head>
<body>
    <div class="card">
        <h1>Signed in to Workdesk</h1>
        <p>You can close this window and return to the terminal.</p>
    </div>
</body>
</html>"#;

const LANDING_FAILURE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Sign-in failed</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, Helvetica, Arial, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
            background: #f3f4f6;
        }
        .card {
            background: white;
            padding: 3rem;
            border-radius: 1rem;
            box-shadow: 0 10px 40px rgba(0,0,0,0.15);
            text-align: center;
            max-width: 400px;
        }
        h1 { color: #991b1b; margin: 0 0 0.5rem; font-size: 1.5rem; }
        p { color: #6b7280; margin: 0; line-height: 1.6; }
    </style>
</head>
<body>
    <div class="card">
        <h1>Sign-in did not complete</h1>
        <p>Return to the terminal for details.</p>
    </div>
</body>
</html>"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_redirect_with_code_and_state() {
        let server = CallbackServer::new().unwrap();
        let url = format!("{}/?code=abc&state=S1", server.redirect_uri());

        let wait = tokio::spawn(server.wait_for_redirect(Duration::from_secs(5)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let body = reqwest::get(&url).await.unwrap().text().await.unwrap();
        assert!(body.contains("Signed in"));

        let outcome = wait.await.unwrap().unwrap();
        match outcome {
            CallbackOutcome::Redirect { code, state } => {
                assert_eq!(code, "abc");
                assert_eq!(state, "S1");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_provider_error_reported() {
        let server = CallbackServer::new().unwrap();
        let url = format!(
            "{}/?error=access_denied&error_description=user%20said%20no",
            server.redirect_uri()
        );

        let wait = tokio::spawn(server.wait_for_redirect(Duration::from_secs(5)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let body = reqwest::get(&url).await.unwrap().text().await.unwrap();
        assert!(body.contains("did not complete"));

        let outcome = wait.await.unwrap().unwrap();
        match outcome {
            CallbackOutcome::ProviderError { error, description } => {
                assert_eq!(error, "access_denied");
                assert_eq!(description.as_deref(), Some("user said no"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_parameters_rejected() {
        let server = CallbackServer::new().unwrap();
        let url = format!("{}/", server.redirect_uri());

        let wait = tokio::spawn(server.wait_for_redirect(Duration::from_secs(5)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let _ = reqwest::get(&url).await.unwrap();

        let outcome = wait.await.unwrap().unwrap();
        match outcome {
            CallbackOutcome::ProviderError { error, .. } => {
                assert_eq!(error, "invalid_request");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_outcome() {
        let server = CallbackServer::new().unwrap();
        let outcome = server
            .wait_for_redirect(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(matches!(outcome, CallbackOutcome::TimedOut));
    }
}

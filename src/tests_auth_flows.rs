//! End-to-end login and refresh tests against a stub token endpoint

use crate::auth::backend::SecretBackend;
use crate::auth::file_store::EncryptedFileStore;
use crate::auth::manager::{CredentialManager, LoginOptions};
use crate::auth::types::{Credential, TokenScheme};
use crate::config::Settings;
use axum::http::{header, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Serve canned token responses on an ephemeral port, counting hits
async fn start_stub<F>(respond: F) -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<()>)
where
    F: Fn(usize) -> (StatusCode, String) + Send + Sync + 'static,
{
    let hits = Arc::new(AtomicUsize::new(0));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let respond = Arc::new(respond);
    let handler_hits = hits.clone();
    let app = Router::new().route(
        "/",
        post(move || {
            let respond = respond.clone();
            let hits = handler_hits.clone();
            async move {
                let n = hits.fetch_add(1, Ordering::SeqCst);
                let (status, body) = (*respond)(n);
                (status, [(header::CONTENT_TYPE, "application/json")], body)
            }
        }),
    );

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (url, hits, server)
}

fn manager_with(dir: &Path, token_url: &str) -> CredentialManager {
    let mut settings = Settings::load_from(dir).unwrap();
    settings.backend = Some("file".to_string());
    settings.vault_key = Some("integration-test-key".to_string());
    settings.provider.token_url = token_url.to_string();
    CredentialManager::with_parts(settings, dir.to_path_buf(), None, None).unwrap()
}

fn seed_stale(dir: &Path, access: &str, refresh: Option<&str>) {
    let store = EncryptedFileStore::open(dir, Some("integration-test-key".to_string())).unwrap();
    let credential = Credential {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        expires_at: Some(Utc::now() - ChronoDuration::minutes(5)),
        scopes: vec!["account.basic".to_string()],
        scheme: TokenScheme::default(),
    };
    store.set("pat@example.com", &credential).unwrap();
}

#[tokio::test]
async fn manual_login_to_authenticated_request() {
    let dir = tempfile::tempdir().unwrap();
    let (url, hits, server) = start_stub(|_| {
        (
            StatusCode::OK,
            json!({
                "access_token": "T1",
                "refresh_token": "R1",
                "expires_in": 3600,
                "account": "pat@example.com",
            })
            .to_string(),
        )
    })
    .await;

    let mut manager = manager_with(dir.path(), &url);
    let opts = LoginOptions {
        services: vec!["mail".to_string()],
        ..LoginOptions::default()
    };

    let (mut flow, pending) = manager.manual_login_begin(&opts).unwrap();
    let pasted = format!("https://cb/?code=abc&state={}", pending.state);
    let summary = manager
        .manual_login_finish(&mut flow, &pending, &pasted, None)
        .await
        .unwrap();

    assert_eq!(summary.account, "pat@example.com");
    assert!(summary.is_default);
    assert!(summary.scopes.contains(&"mail.readwrite".to_string()));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // The stored session backs an authenticated request without another
    // token round trip
    let transport = manager.transport_for(None).unwrap();
    let request = transport
        .get("https://api.workdesk.io/mail/v1/messages")
        .await
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(
        request
            .headers()
            .get("authorization")
            .unwrap()
            .to_str()
            .unwrap(),
        "Bearer T1"
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    server.abort();
}

#[tokio::test]
async fn state_mismatch_never_reaches_the_token_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let (url, hits, server) = start_stub(|_| {
        (
            StatusCode::OK,
            json!({"access_token": "T1", "refresh_token": "R1"}).to_string(),
        )
    })
    .await;

    let mut manager = manager_with(dir.path(), &url);
    let (mut flow, pending) = manager.manual_login_begin(&LoginOptions::default()).unwrap();

    let err = manager
        .manual_login_finish(&mut flow, &pending, "https://cb/?code=abc&state=WRONG", None)
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "state_mismatch");
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    server.abort();
}

#[tokio::test]
async fn remote_code_redemption_signs_in() {
    let dir = tempfile::tempdir().unwrap();
    let (url, hits, server) = start_stub(|_| {
        (
            StatusCode::OK,
            json!({
                "access_token": "T1",
                "refresh_token": "R1",
                "expires_in": 3600,
                "account": "pat@example.com",
            })
            .to_string(),
        )
    })
    .await;

    let mut manager = manager_with(dir.path(), &url);

    let authorize_url = manager.remote_login_url(&LoginOptions::default()).unwrap();
    assert!(authorize_url.contains("client_id=bellhop-cli"));

    let summary = manager
        .remote_login_finish(LoginOptions::default(), "remote-code-1")
        .await
        .unwrap();
    assert_eq!(summary.account, "pat@example.com");
    assert!(summary.is_default);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    server.abort();
}

#[tokio::test]
async fn revoked_refresh_token_clears_the_stored_session() {
    let dir = tempfile::tempdir().unwrap();
    let (url, hits, server) = start_stub(|_| {
        (
            StatusCode::BAD_REQUEST,
            json!({
                "error": "invalid_grant",
                "error_description": "refresh token revoked",
            })
            .to_string(),
        )
    })
    .await;

    seed_stale(dir.path(), "T-old", Some("R-dead"));
    let manager = manager_with(dir.path(), &url);

    let transport = manager.transport_for(Some("pat@example.com")).unwrap();
    let err = transport
        .get("https://api.workdesk.io/mail/v1/messages")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "auth_required");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // The dead session is gone from the store
    let store =
        EncryptedFileStore::open(dir.path(), Some("integration-test-key".to_string())).unwrap();
    assert!(store.get("pat@example.com").unwrap().is_none());

    server.abort();
}

#[tokio::test]
async fn concurrent_requests_share_one_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let (url, hits, server) = start_stub(|n| {
        (
            StatusCode::OK,
            json!({
                "access_token": format!("T{}", n + 2),
                "refresh_token": format!("R{}", n + 2),
                "expires_in": 3600,
            })
            .to_string(),
        )
    })
    .await;

    seed_stale(dir.path(), "T1", Some("R1"));
    let manager = manager_with(dir.path(), &url);
    let transport = Arc::new(manager.transport_for(Some("pat@example.com")).unwrap());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let transport = transport.clone();
        handles.push(tokio::spawn(async move {
            let request = transport
                .get("https://api.workdesk.io/drive/v1/files")
                .await
                .unwrap()
                .build()
                .unwrap();
            request
                .headers()
                .get("authorization")
                .unwrap()
                .to_str()
                .unwrap()
                .to_string()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), "Bearer T2");
    }

    // One rotation served every task, and its refresh token is what
    // survived on disk
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    let store =
        EncryptedFileStore::open(dir.path(), Some("integration-test-key".to_string())).unwrap();
    let stored = store.get("pat@example.com").unwrap().unwrap();
    assert_eq!(stored.access_token, "T2");
    assert_eq!(stored.refresh_token.as_deref(), Some("R2"));

    server.abort();
}

#[tokio::test]
async fn concurrent_invocations_share_one_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let (url, hits, server) = start_stub(|n| {
        if n == 0 {
            (
                StatusCode::OK,
                json!({
                    "access_token": "T1",
                    "refresh_token": "R2",
                    "expires_in": 3600,
                })
                .to_string(),
            )
        } else {
            (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "invalid_grant",
                    "error_description": "refresh token already rotated",
                })
                .to_string(),
            )
        }
    })
    .await;

    seed_stale(dir.path(), "T0", Some("R1"));

    // Two managers over one config directory stand in for two bellhop
    // processes. Each has its own in-process mutex, so only the on-disk
    // account lock serializes the rotation.
    let first = manager_with(dir.path(), &url);
    let second = manager_with(dir.path(), &url);
    let transport_a = first.transport_for(Some("pat@example.com")).unwrap();
    let transport_b = second.transport_for(Some("pat@example.com")).unwrap();

    let mut handles = Vec::new();
    for transport in [transport_a, transport_b] {
        handles.push(tokio::spawn(async move {
            let request = transport
                .get("https://api.workdesk.io/drive/v1/files")
                .await
                .unwrap()
                .build()
                .unwrap();
            request
                .headers()
                .get("authorization")
                .unwrap()
                .to_str()
                .unwrap()
                .to_string()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), "Bearer T1");
    }

    // The lock loser read the winner's rotation instead of replaying R1;
    // a replay would have hit the stub's invalid_grant arm
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    let store =
        EncryptedFileStore::open(dir.path(), Some("integration-test-key".to_string())).unwrap();
    let stored = store.get("pat@example.com").unwrap().unwrap();
    assert_eq!(stored.access_token, "T1");
    assert_eq!(stored.refresh_token.as_deref(), Some("R2"));

    server.abort();
}

#[tokio::test]
async fn refresh_without_rotation_keeps_the_old_refresh_token() {
    let dir = tempfile::tempdir().unwrap();
    let (url, hits, server) = start_stub(|_| {
        (
            StatusCode::OK,
            json!({"access_token": "T2", "expires_in": 3600}).to_string(),
        )
    })
    .await;

    seed_stale(dir.path(), "T1", Some("R1"));
    let manager = manager_with(dir.path(), &url);

    let transport = manager.transport_for(Some("pat@example.com")).unwrap();
    let request = transport
        .get("https://api.workdesk.io/calendar/v1/events")
        .await
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(
        request
            .headers()
            .get("authorization")
            .unwrap()
            .to_str()
            .unwrap(),
        "Bearer T2"
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let store =
        EncryptedFileStore::open(dir.path(), Some("integration-test-key".to_string())).unwrap();
    let stored = store.get("pat@example.com").unwrap().unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some("R1"));

    server.abort();
}

#[tokio::test]
async fn provider_error_in_ok_response_fails_the_login() {
    let dir = tempfile::tempdir().unwrap();
    let (url, _hits, server) = start_stub(|_| {
        (
            StatusCode::OK,
            json!({
                "error": "invalid_grant",
                "error_description": "code already redeemed",
            })
            .to_string(),
        )
    })
    .await;

    let mut manager = manager_with(dir.path(), &url);
    let err = manager
        .remote_login_finish(LoginOptions::default(), "stale-code")
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "invalid_grant");
    assert!(err.message().contains("code already redeemed"));

    server.abort();
}

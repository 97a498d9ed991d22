// Integration tests for the dashboard API

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{Duration, Utc};
use reach::api::oauth::{HandshakeSession, SessionStore};
use reach::api::{create_router, AppState};
use reach::config::ReachConfig;
use reach::connector::ConnectorRegistry;
use reach::credentials::{AccountStore, SocialAccount};
use reach::metrics::{MetricsCache, MetricsHistory};
use reach::platform::Platform;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

fn create_test_app() -> (Router, Arc<AccountStore>, SessionStore) {
    let key = BASE64.encode([0u8; 32]);
    let accounts = Arc::new(AccountStore::new(":memory:", &key).unwrap());
    let history = Arc::new(MetricsHistory::new(":memory:").unwrap());
    let config = ReachConfig::default();
    let cache = Arc::new(MetricsCache::new(history, config.cache.clone()));
    let sessions = SessionStore::new(600);

    let state = AppState {
        accounts: Arc::clone(&accounts),
        cache,
        registry: Arc::new(ConnectorRegistry::new("http://localhost:3000").unwrap()),
        sessions: sessions.clone(),
        encryption_key: vec![0u8; 32],
        config,
    };

    (create_router(state), accounts, sessions)
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::empty()).unwrap()
}

fn delete(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .header("x-user-id", user)
        .body(Body::empty())
        .unwrap()
}

async fn json_of(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn stored_account(user_id: &str, platform: Platform) -> SocialAccount {
    SocialAccount {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        platform,
        platform_user_id: "42".to_string(),
        platform_username: "someuser".to_string(),
        access_token: "secret-access-token".to_string(),
        refresh_token: Some("secret-refresh-token".to_string()),
        token_secret: None,
        expires_at: Some(Utc::now() + Duration::hours(1)),
        scopes: Some("tweet.read users.read".to_string()),
        metadata: json!({"followers": 10}),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_metrics_requires_identity() {
    let (app, _, _) = create_test_app();

    let response = app.oneshot(get("/metrics/twitter", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = json_of(response).await;
    assert!(json["error"].as_str().unwrap().contains("x-user-id"));
}

#[tokio::test]
async fn test_metrics_unknown_platform() {
    let (app, _, _) = create_test_app();

    let response = app
        .oneshot(get("/metrics/facebook", Some("u1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_without_account_is_404() {
    let (app, _, _) = create_test_app();

    let response = app
        .oneshot(get("/metrics/twitter", Some("u1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = json_of(response).await;
    assert!(json["error"].as_str().unwrap().contains("twitter"));
}

#[tokio::test]
async fn test_accounts_empty_list() {
    let (app, _, _) = create_test_app();

    let response = app.oneshot(get("/accounts", Some("u1"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_of(response).await;
    assert_eq!(json["accounts"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_accounts_lists_connected_platforms_without_tokens() {
    let (app, accounts, _) = create_test_app();
    accounts
        .upsert(&stored_account("u1", Platform::Twitter))
        .unwrap();
    accounts
        .upsert(&stored_account("u1", Platform::Instagram))
        .unwrap();

    let response = app.oneshot(get("/accounts", Some("u1"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let raw = String::from_utf8(body.to_vec()).unwrap();

    // Token material must never reach the dashboard
    assert!(!raw.contains("secret-access-token"));
    assert!(!raw.contains("secret-refresh-token"));

    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let listed = json["accounts"].as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0]["username"], "someuser");
    // Status only appears with ?includeStatus=true
    assert!(listed[0].get("status").is_none());
}

#[tokio::test]
async fn test_accounts_scoped_per_user() {
    let (app, accounts, _) = create_test_app();
    accounts
        .upsert(&stored_account("u1", Platform::Twitter))
        .unwrap();

    let response = app.oneshot(get("/accounts", Some("u2"))).await.unwrap();
    let json = json_of(response).await;
    assert_eq!(json["accounts"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_disconnect_unknown_platform_is_400() {
    let (app, _, _) = create_test_app();

    let response = app
        .oneshot(delete("/accounts?platform=facebook", "u1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_disconnect_without_account_is_404() {
    let (app, _, _) = create_test_app();

    let response = app
        .oneshot(delete("/accounts?platform=twitter", "u1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_disconnect_removes_account() {
    let (app, accounts, _) = create_test_app();
    accounts
        .upsert(&stored_account("u1", Platform::Twitter))
        .unwrap();

    let response = app
        .oneshot(delete("/accounts?platform=twitter", "u1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_of(response).await;
    assert_eq!(json["success"], true);
    assert!(accounts.get("u1", Platform::Twitter).unwrap().is_none());
}

#[tokio::test]
async fn test_login_without_identity_redirects_to_login_page() {
    let (app, _, _) = create_test_app();

    let response = app.oneshot(get("/login/twitter", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers().get("location").unwrap(), "/login");
}

#[tokio::test]
async fn test_callback_provider_error_redirects_with_flag() {
    let (app, _, _) = create_test_app();

    let response = app
        .oneshot(get(
            "/callback/twitter?error=access_denied&error_description=User+cancelled",
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response.headers().get("location").unwrap().to_str().unwrap();
    assert!(location.contains("error=provider_error"));

    // Handshake cookie is cleared on every outcome
    let set_cookie = response
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(set_cookie.starts_with("twitter_oauth_data=;"));
    assert!(set_cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn test_callback_missing_code_redirects_with_flag() {
    let (app, _, _) = create_test_app();

    let response = app
        .oneshot(get("/callback/twitter?state=abc.def", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response.headers().get("location").unwrap().to_str().unwrap();
    assert!(location.contains("error=missing_code"));
}

fn handshake(state: &str) -> HandshakeSession {
    HandshakeSession {
        user_id: "u1".to_string(),
        platform: Platform::Twitter,
        state: state.to_string(),
        code_verifier: Some("verifier".to_string()),
        reconnect: false,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_callback_tampered_state_is_rejected() {
    let (app, _, sessions) = create_test_app();
    sessions.insert("login-1", handshake("real-state"));

    let response = app
        .oneshot(get("/callback/twitter?code=abc&state=tampered.login-1", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response.headers().get("location").unwrap().to_str().unwrap();
    assert!(location.contains("error=invalid_state"));
}

#[tokio::test]
async fn test_callback_consumes_handshake_session() {
    let (app, _, sessions) = create_test_app();
    sessions.insert("login-1", handshake("real-state"));

    // First callback finds the handshake and fails later in the flow
    let response = app
        .clone()
        .oneshot(get("/callback/twitter?code=abc&state=real-state.login-1", None))
        .await
        .unwrap();
    let location = response.headers().get("location").unwrap().to_str().unwrap();
    assert!(!location.contains("error=invalid_state"));

    // A replay of the same callback has no handshake data left
    let response = app
        .oneshot(get("/callback/twitter?code=abc&state=real-state.login-1", None))
        .await
        .unwrap();
    let location = response.headers().get("location").unwrap().to_str().unwrap();
    assert!(location.contains("error=invalid_state"));
}

#[tokio::test]
async fn test_callback_without_handshake_data_is_invalid_state() {
    let (app, _, _) = create_test_app();

    let response = app
        .oneshot(get("/callback/twitter?code=abc&state=xyz.unknown-login", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response.headers().get("location").unwrap().to_str().unwrap();
    assert!(location.contains("error=invalid_state"));
}

//! Unit tests for the dashboard API

use super::*;
use axum::http::HeaderValue;

#[test]
fn test_current_user_extraction() {
    let mut headers = HeaderMap::new();
    headers.insert("x-user-id", HeaderValue::from_static("user-123"));

    assert_eq!(current_user(&headers).unwrap(), "user-123");
}

#[test]
fn test_current_user_missing_header() {
    let headers = HeaderMap::new();
    assert!(current_user(&headers).is_err());
}

#[test]
fn test_current_user_empty_header() {
    let mut headers = HeaderMap::new();
    headers.insert("x-user-id", HeaderValue::from_static("   "));
    assert!(current_user(&headers).is_err());
}

#[test]
fn test_token_preview_truncates() {
    let preview = token_preview("abcdefghijklmnopqrstuvwxyz");
    assert_eq!(preview, "abcdefghij... (26 chars)");
    // Never leaks the tail of the token
    assert!(!preview.contains("klmnop"));
}

#[test]
fn test_token_preview_short_token() {
    let preview = token_preview("abc");
    assert_eq!(preview, "abc... (3 chars)");
}

#[test]
fn test_account_summary_serialization_has_no_tokens() {
    let summary = AccountSummary {
        platform: Platform::Twitter,
        username: "someuser".to_string(),
        connected_at: chrono::Utc::now(),
        metadata: serde_json::json!({"followers": 10}),
        status: None,
    };

    let json = serde_json::to_string(&summary).unwrap();
    assert!(json.contains("\"platform\":\"twitter\""));
    assert!(json.contains("\"username\":\"someuser\""));
    assert!(!json.contains("token"));
    // Status omitted unless requested
    assert!(!json.contains("\"status\""));
}

#[test]
fn test_account_summary_with_status() {
    let summary = AccountSummary {
        platform: Platform::Youtube,
        username: "chan".to_string(),
        connected_at: chrono::Utc::now(),
        metadata: serde_json::Value::Null,
        status: Some(TokenStatus::Expired),
    };

    let json = serde_json::to_string(&summary).unwrap();
    assert!(json.contains("\"status\":\"expired\""));
}

#[test]
fn test_error_response_shape() {
    let response = AppError::NotFound("No connected twitter account".to_string()).into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

//! Dashboard-facing HTTP API.
//!
//! Routes:
//! - `GET /metrics/:platform` — cached engagement metrics for the caller's
//!   connected account (`?debug=true` adds sanitized token introspection)
//! - `GET /accounts` — connected platforms (`?includeStatus=true` performs
//!   live token-status checks)
//! - `DELETE /accounts?platform=X` — disconnect an account
//! - `GET /login/:platform`, `GET /callback/:platform` — OAuth handshake
//!
//! Authentication itself is external: callers present a stable user id in
//! the `x-user-id` header. Tokens never leave the server; even debug
//! introspection only shows truncated previews.

pub mod oauth;

use crate::config::ReachConfig;
use crate::connector::{check_token_status, ConnectorRegistry, TokenStatus};
use crate::credentials::{AccountStore, SocialAccount};
use crate::lifecycle::ensure_valid_tokens;
use crate::metrics::MetricsCache;
use crate::platform::Platform;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use oauth::SessionStore;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for API endpoints
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    ServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<AccountStore>,
    pub cache: Arc<MetricsCache>,
    pub registry: Arc<ConnectorRegistry>,
    pub sessions: SessionStore,
    pub encryption_key: Vec<u8>,
    pub config: ReachConfig,
}

/// Extracts the authenticated user id from the `x-user-id` header.
///
/// The authentication system lives outside this service; this header is the
/// contract with it.
pub fn current_user(headers: &HeaderMap) -> Result<String, AppError> {
    let user_id = headers
        .get("x-user-id")
        .ok_or_else(|| AppError::Unauthorized("Missing x-user-id header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Unauthorized("Invalid x-user-id header".to_string()))?
        .trim();

    if user_id.is_empty() {
        return Err(AppError::Unauthorized("Empty x-user-id header".to_string()));
    }

    Ok(user_id.to_string())
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics/:platform", get(get_metrics))
        .route("/accounts", get(list_accounts).delete(disconnect_account))
        .merge(oauth::router())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

#[derive(Deserialize)]
struct MetricsQuery {
    debug: Option<bool>,
}

/// Sanitized account introspection for `?debug=true`. Previews never exceed
/// 10 characters of the real token.
#[derive(Serialize)]
struct DebugInfo {
    platform_user_id: String,
    platform_username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scopes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
    access_token_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token_preview: Option<String>,
}

fn token_preview(token: &str) -> String {
    let head: String = token.chars().take(10).collect();
    format!("{}... ({} chars)", head, token.chars().count())
}

/// GET /metrics/:platform
async fn get_metrics(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Query(query): Query<MetricsQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let user_id = current_user(&headers)?;
    let platform = parse_platform(&platform)?;

    let account = state
        .accounts
        .get(&user_id, platform)
        .map_err(|e| {
            error!(platform = %platform, error = %e, "Account lookup failed");
            AppError::ServerError("Account lookup failed".to_string())
        })?
        .ok_or_else(|| {
            AppError::NotFound(format!("No connected {} account", platform))
        })?;

    let connector = state.registry.get(platform).map_err(|e| {
        error!(platform = %platform, error = %e, "Connector unavailable");
        AppError::ServerError(format!("Connector unavailable for {}", platform))
    })?;

    let tokens = ensure_valid_tokens(&state.accounts, connector.as_ref(), &user_id)
        .await
        .map_err(|e| {
            error!(platform = %platform, error = %e, "Token lifecycle failure");
            AppError::ServerError("Token lifecycle failure".to_string())
        })?
        .ok_or_else(|| {
            info!(platform = %platform, user_id = %user_id, "Reconnect required");
            AppError::Unauthorized(format!(
                "Stored {} tokens are no longer usable; reconnect the account",
                platform
            ))
        })?;

    let mut metrics = state
        .cache
        .get_metrics(connector.as_ref(), &tokens, Some(&user_id), None)
        .await;
    metrics.flag_if_suspicious();

    if query.debug.unwrap_or(false) {
        let debug_info = DebugInfo {
            platform_user_id: account.platform_user_id,
            platform_username: account.platform_username,
            scopes: account.scopes,
            expires_at: account.expires_at,
            access_token_preview: token_preview(&tokens.access_token),
            refresh_token_preview: tokens.refresh_token.as_deref().map(token_preview),
        };
        let mut body = serde_json::to_value(&metrics).map_err(|e| {
            error!(error = %e, "Metrics serialization failed");
            AppError::ServerError("Metrics serialization failed".to_string())
        })?;
        body["debug"] = serde_json::to_value(&debug_info).map_err(|e| {
            error!(error = %e, "Debug serialization failed");
            AppError::ServerError("Debug serialization failed".to_string())
        })?;
        return Ok(Json(body).into_response());
    }

    Ok(Json(metrics).into_response())
}

#[derive(Deserialize)]
struct AccountsQuery {
    #[serde(rename = "includeStatus")]
    include_status: Option<bool>,
}

/// One connected account as exposed to the dashboard. No token material.
#[derive(Serialize)]
struct AccountSummary {
    platform: Platform,
    username: String,
    connected_at: chrono::DateTime<chrono::Utc>,
    metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<TokenStatus>,
}

#[derive(Serialize)]
struct ListAccountsResponse {
    accounts: Vec<AccountSummary>,
}

/// GET /accounts
async fn list_accounts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AccountsQuery>,
    headers: HeaderMap,
) -> Result<Json<ListAccountsResponse>, AppError> {
    let user_id = current_user(&headers)?;
    let include_status = query.include_status.unwrap_or(false);

    let stored = state.accounts.list_for_user(&user_id).map_err(|e| {
        error!(user_id = %user_id, error = %e, "Account listing failed");
        AppError::ServerError("Account listing failed".to_string())
    })?;

    let mut accounts = Vec::with_capacity(stored.len());
    for account in stored {
        let status = if include_status {
            Some(live_status(&state, &account).await)
        } else {
            None
        };
        accounts.push(AccountSummary {
            platform: account.platform,
            username: account.platform_username,
            connected_at: account.created_at,
            metadata: account.metadata,
            status,
        });
    }

    debug!(user_id = %user_id, count = accounts.len(), "Listed connected accounts");
    Ok(Json(ListAccountsResponse { accounts }))
}

async fn live_status(state: &AppState, account: &SocialAccount) -> TokenStatus {
    match state.registry.get(account.platform) {
        Ok(connector) => check_token_status(connector.as_ref(), account).await,
        Err(e) => {
            error!(platform = %account.platform, error = %e, "Connector unavailable for status check");
            TokenStatus::Error
        }
    }
}

#[derive(Deserialize)]
struct DisconnectQuery {
    platform: String,
}

#[derive(Serialize)]
struct DisconnectResponse {
    success: bool,
}

/// DELETE /accounts?platform=X
async fn disconnect_account(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DisconnectQuery>,
    headers: HeaderMap,
) -> Result<Json<DisconnectResponse>, AppError> {
    let user_id = current_user(&headers)?;
    let platform = Platform::from_str(&query.platform)
        .map_err(|_| AppError::BadRequest(format!("Unknown platform '{}'", query.platform)))?;

    let deleted = state.accounts.delete(&user_id, platform).map_err(|e| {
        error!(platform = %platform, error = %e, "Account deletion failed");
        AppError::ServerError("Account deletion failed".to_string())
    })?;

    if !deleted {
        return Err(AppError::NotFound(format!(
            "No connected {} account",
            platform
        )));
    }

    state.cache.invalidate(platform.as_str(), &user_id);
    info!(platform = %platform, user_id = %user_id, "Account disconnected");

    Ok(Json(DisconnectResponse { success: true }))
}

fn parse_platform(raw: &str) -> Result<Platform, AppError> {
    Platform::from_str(raw).map_err(|_| AppError::NotFound(format!("Unknown platform '{}'", raw)))
}

#[cfg(test)]
mod tests;

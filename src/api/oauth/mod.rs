//! OAuth 2.0 authorization flow for connecting platform accounts.
//!
//! The handshake:
//! 1. User clicks "Connect" in the dashboard
//! 2. `GET /login/:platform` → redirect to the provider's consent page
//! 3. User authorizes on the provider's site
//! 4. Provider redirects to `GET /callback/:platform`
//! 5. Exchange code for tokens, fetch the platform identity, store the
//!    account encrypted
//! 6. Redirect back to the dashboard with an outcome flag
//!
//! Handshake data (CSRF state, PKCE verifier, requesting user) travels over
//! two channels at once: an encrypted cookie and a server-side session keyed
//! by a `login_id` suffixed onto the provider state. Either alone is enough
//! to complete the callback; the state token itself must match exactly or
//! the callback is rejected.

pub mod cookie;
pub mod session;

pub use session::{run_session_cleanup, HandshakeSession, SessionStore};

use super::{current_user, AppError, AppState};
use crate::credentials::SocialAccount;
use crate::platform::Platform;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login/:platform", get(login))
        .route("/callback/:platform", get(callback))
}

#[derive(Deserialize)]
struct LoginQuery {
    reconnect: Option<bool>,
}

/// Provider callback query parameters.
#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /login/:platform
///
/// Starts the handshake: persists the session to both channels and
/// redirects the browser to the provider's authorization page.
async fn login(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Query(query): Query<LoginQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let platform = parse_platform(&platform)?;

    // Browser-facing route: missing identity goes back to the login page
    let user_id = match current_user(&headers) {
        Ok(user_id) => user_id,
        Err(_) => return Ok(Redirect::temporary("/login").into_response()),
    };
    let reconnect = query.reconnect.unwrap_or(false);

    let connector = state.registry.get(platform).map_err(|e| {
        error!(platform = %platform, error = %e, "Connector unavailable for login");
        AppError::ServerError(format!("OAuth not configured for {}", platform))
    })?;

    let csrf_state = Uuid::new_v4().to_string();
    let login_id = Uuid::new_v4().to_string();
    // The provider echoes this back; the suffix locates the server-side
    // session when the cookie does not survive the round trip
    let composite_state = format!("{}.{}", csrf_state, login_id);

    let auth = connector.prepare_auth_request(&composite_state);

    let handshake = HandshakeSession {
        user_id: user_id.clone(),
        platform,
        state: csrf_state,
        code_verifier: auth.code_verifier,
        reconnect,
        created_at: Utc::now(),
    };
    state.sessions.insert(&login_id, handshake.clone());

    info!(
        platform = %platform,
        user_id = %user_id,
        reconnect,
        "Redirecting to OAuth provider"
    );

    // A failed cookie seal is survivable: the session store still holds the
    // handshake
    match cookie::set_header(platform, &handshake, &state.encryption_key) {
        Ok(set_cookie) => Ok((
            [(header::SET_COOKIE, set_cookie)],
            Redirect::temporary(&auth.url),
        )
            .into_response()),
        Err(e) => {
            warn!(platform = %platform, error = %e, "Failed to seal handshake cookie");
            Ok(Redirect::temporary(&auth.url).into_response())
        }
    }
}

/// GET /callback/:platform
///
/// Completes the handshake. Every outcome clears the handshake cookie and
/// redirects the browser; raw provider errors are logged server-side only.
async fn callback(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let platform = parse_platform(&platform)?;
    debug!(platform = %platform, "OAuth callback received");

    if let Some(provider_error) = &query.error {
        warn!(
            platform = %platform,
            error = %provider_error,
            description = query.error_description.as_deref().unwrap_or("none"),
            "Provider rejected the authorization"
        );
        return Ok(reject(&state, platform, "provider_error"));
    }

    let code = match &query.code {
        Some(code) => code,
        None => {
            warn!(platform = %platform, "Callback missing authorization code");
            return Ok(reject(&state, platform, "missing_code"));
        }
    };
    let composite_state = match &query.state {
        Some(s) => s,
        None => {
            warn!(platform = %platform, "Callback missing state parameter");
            return Ok(reject(&state, platform, "invalid_state"));
        }
    };

    // Composite state is "{state}.{login_id}"; both halves are UUIDs
    let (echoed_state, login_id) = composite_state
        .split_once('.')
        .unwrap_or((composite_state.as_str(), ""));

    // The session entry is consumed regardless of which channel wins, so a
    // replayed callback cannot reuse it
    let stored = state.sessions.take(login_id);
    let handshake = match cookie::read(platform, &headers, &state.encryption_key).or(stored) {
        Some(handshake) => handshake,
        None => {
            warn!(platform = %platform, "No handshake data on either channel");
            return Ok(reject(&state, platform, "invalid_state"));
        }
    };

    if handshake.state != echoed_state {
        warn!(
            platform = %platform,
            user_id = %handshake.user_id,
            "State mismatch on callback"
        );
        return Ok(reject(&state, platform, "invalid_state"));
    }

    let connector = match state.registry.get(platform) {
        Ok(connector) => connector,
        Err(e) => {
            error!(platform = %platform, error = %e, "Connector unavailable for callback");
            return Ok(reject(&state, platform, "internal_error"));
        }
    };

    let tokens = match connector
        .exchange_code(code, handshake.code_verifier.as_deref())
        .await
    {
        Ok(tokens) => tokens,
        Err(e) => {
            error!(
                platform = %platform,
                user_id = %handshake.user_id,
                error = %e,
                "Token exchange failed"
            );
            return Ok(reject(&state, platform, "token_exchange_failed"));
        }
    };

    let platform_user = match connector.fetch_user_info(&tokens).await {
        Ok(user) => user,
        Err(e) => {
            error!(
                platform = %platform,
                user_id = %handshake.user_id,
                error = %e,
                "Identity fetch failed after exchange"
            );
            return Ok(reject(&state, platform, "user_info_failed"));
        }
    };

    let now = Utc::now();
    let account = SocialAccount {
        id: Uuid::new_v4().to_string(),
        user_id: handshake.user_id.clone(),
        platform,
        platform_user_id: platform_user.id.clone(),
        platform_username: platform_user.username.clone(),
        access_token: tokens.access_token.clone(),
        refresh_token: tokens.refresh_token.clone(),
        token_secret: None,
        expires_at: tokens.expires_at,
        scopes: tokens.scopes.clone(),
        metadata: json!({
            "display_name": platform_user.display_name,
            "profile_image_url": platform_user.profile_image_url,
            "followers": platform_user.followers,
        }),
        created_at: now,
        updated_at: now,
    };

    if let Err(e) = state.accounts.upsert(&account) {
        error!(
            platform = %platform,
            user_id = %handshake.user_id,
            error = %e,
            "Failed to store connected account"
        );
        return Ok(reject(&state, platform, "internal_error"));
    }

    // A reconnect may carry stale cached metrics for the old grant
    state.cache.invalidate(platform.as_str(), &handshake.user_id);

    info!(
        platform = %platform,
        user_id = %handshake.user_id,
        platform_username = %platform_user.username,
        has_refresh_token = tokens.refresh_token.is_some(),
        reconnect = handshake.reconnect,
        "Account connected"
    );

    let flag = if handshake.reconnect {
        "reconnected"
    } else {
        "connected"
    };
    let url = format!("{}?{}={}", state.config.server.dashboard_url, flag, platform);
    Ok(redirect_clearing_cookie(platform, &url))
}

/// Error outcome: clear the handshake cookie and send the browser back to
/// the accounts page with a machine-readable flag.
fn reject(state: &AppState, platform: Platform, flag: &str) -> Response {
    let url = format!("{}?error={}", state.config.server.accounts_url, flag);
    redirect_clearing_cookie(platform, &url)
}

fn redirect_clearing_cookie(platform: Platform, url: &str) -> Response {
    (
        [(header::SET_COOKIE, cookie::clear_header(platform))],
        Redirect::temporary(url),
    )
        .into_response()
}

fn parse_platform(raw: &str) -> Result<Platform, AppError> {
    Platform::from_str(raw)
        .map_err(|_| AppError::NotFound(format!("Unknown platform '{}'", raw)))
}

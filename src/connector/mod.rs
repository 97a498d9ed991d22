//! Platform connectors: OAuth flows and metrics retrieval per platform.
//!
//! Every platform implements the [`Connector`] trait. Provider quirks
//! (Instagram's two-step token exchange, its lack of PKCE, Google's
//! body-embedded client credentials) stay inside the variant and never leak
//! into shared logic.
//!
//! Connectors perform network calls only; persistence belongs to the
//! lifecycle manager and the account store.

mod error;
mod instagram;
mod pkce;
mod twitter;
mod youtube;

pub use error::ConnectorError;
pub use instagram::InstagramConnector;
pub use twitter::TwitterConnector;
pub use youtube::YoutubeConnector;

use crate::config::PlatformCredentials;
use crate::credentials::{SocialAccount, SocialTokens};
use crate::metrics::SocialMetrics;
use crate::platform::Platform;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Safety margin applied before the reported token expiry, covering clock
/// skew and in-flight request latency.
const EXPIRY_BUFFER_MINUTES: i64 = 5;

/// Default timeout for every upstream HTTP call. A hung upstream is treated
/// the same as an HTTP error by the cache's stale-fallback path.
const HTTP_TIMEOUT_SECS: u64 = 15;

/// A prepared authorization request for the browser redirect.
#[derive(Clone, Debug)]
pub struct AuthRequest {
    /// Full provider authorization URL to redirect the browser to.
    pub url: String,
    /// PKCE verifier to hold until the callback; `None` for platforms
    /// without PKCE support.
    pub code_verifier: Option<String>,
}

/// Platform identity fetched after token exchange.
#[derive(Clone, Debug, Serialize)]
pub struct PlatformUser {
    pub id: String,
    pub username: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    pub followers: u64,
}

/// Live connection status of a stored account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Connected,
    Expired,
    Error,
}

/// One platform integration: OAuth URL construction, token exchange and
/// refresh, and metrics retrieval.
#[async_trait]
pub trait Connector: Send + Sync {
    fn platform(&self) -> Platform;

    /// Base authorization endpoint, constant per platform.
    fn auth_url(&self) -> &str;

    /// Whether the platform supports PKCE (S256).
    fn supports_pkce(&self) -> bool;

    /// Whether `refresh` needs a stored refresh token. Instagram refreshes
    /// off the long-lived access token itself and overrides this to `false`.
    fn refresh_requires_refresh_token(&self) -> bool {
        true
    }

    /// Builds the full authorization URL for the given CSRF `state`,
    /// generating a fresh PKCE pair when the platform supports it.
    fn prepare_auth_request(&self, state: &str) -> AuthRequest;

    /// Exchanges an authorization code for tokens at the platform's token
    /// endpoint. `expires_at` is computed from the reported `expires_in`.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<SocialTokens, ConnectorError>;

    /// Obtains fresh tokens. When the platform omits a new refresh token in
    /// the response, the old one is carried forward unchanged.
    async fn refresh(&self, tokens: &SocialTokens) -> Result<SocialTokens, ConnectorError>;

    /// Fetches the platform identity of the token's owner.
    async fn fetch_user_info(&self, tokens: &SocialTokens)
        -> Result<PlatformUser, ConnectorError>;

    /// Fetches live metrics: profile, recent items, and (where available)
    /// historical counters. A failing optional call must not sink the whole
    /// response.
    async fn fetch_metrics(&self, tokens: &SocialTokens)
        -> Result<SocialMetrics, ConnectorError>;
}

/// True when the token is expired or has no expiry information.
///
/// A 5-minute buffer is applied: a token expiring within the buffer is
/// already treated as expired.
pub fn is_token_expired(expires_at: Option<DateTime<Utc>>) -> bool {
    is_token_expired_at(expires_at, Utc::now())
}

fn is_token_expired_at(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        None => true,
        Some(exp) => now + Duration::minutes(EXPIRY_BUFFER_MINUTES) >= exp,
    }
}

/// Live token-status check for a stored account.
///
/// Does not persist refreshed tokens; the lifecycle manager owns
/// persistence.
pub async fn check_token_status(connector: &dyn Connector, account: &SocialAccount) -> TokenStatus {
    if !is_token_expired(account.expires_at) {
        return TokenStatus::Connected;
    }

    let has_refresh = account
        .refresh_token
        .as_deref()
        .map(|t| !t.is_empty())
        .unwrap_or(false);
    if !has_refresh && connector.refresh_requires_refresh_token() {
        return TokenStatus::Expired;
    }

    match connector.refresh(&account.tokens()).await {
        Ok(_) => TokenStatus::Connected,
        Err(ConnectorError::Refresh { status, .. }) => {
            debug!(
                platform = %connector.platform(),
                user_id = %account.user_id,
                status,
                "Refresh rejected during status check"
            );
            TokenStatus::Expired
        }
        Err(e) => {
            warn!(
                platform = %connector.platform(),
                user_id = %account.user_id,
                error = %e,
                "Status check failed"
            );
            TokenStatus::Error
        }
    }
}

/// Lazily-constructed connector instances, one per platform.
///
/// Construction reads the platform's `{PLATFORM}_CLIENT_ID` /
/// `{PLATFORM}_CLIENT_SECRET` / `{PLATFORM}_REDIRECT_URI` environment
/// variables; a missing client id or secret surfaces as
/// `ConnectorError::Config` at first use, not as a generic network error
/// later. A missing redirect URI is derived from the configured callback
/// base URL instead.
pub struct ConnectorRegistry {
    http: reqwest::Client,
    callback_base_url: String,
    connectors: DashMap<Platform, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new(callback_base_url: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            callback_base_url: callback_base_url.to_string(),
            connectors: DashMap::new(),
        })
    }

    /// Returns the connector for a platform, constructing it from the
    /// environment on first use.
    pub fn get(&self, platform: Platform) -> Result<Arc<dyn Connector>, ConnectorError> {
        if let Some(existing) = self.connectors.get(&platform) {
            return Ok(Arc::clone(&existing));
        }

        let creds = PlatformCredentials::from_env(platform, &self.callback_base_url)?;
        let connector: Arc<dyn Connector> = match platform {
            Platform::Twitter => Arc::new(TwitterConnector::new(creds, self.http.clone())),
            Platform::Youtube => Arc::new(YoutubeConnector::new(creds, self.http.clone())),
            Platform::Instagram => Arc::new(InstagramConnector::new(creds, self.http.clone())),
        };

        self.connectors.insert(platform, Arc::clone(&connector));
        Ok(connector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_buffer_boundary() {
        let now = Utc::now();

        // No expiry info means expired (force refresh path)
        assert!(is_token_expired_at(None, now));

        // 4 minutes out is inside the 5-minute buffer
        assert!(is_token_expired_at(Some(now + Duration::minutes(4)), now));

        // 6 minutes out is still valid
        assert!(!is_token_expired_at(Some(now + Duration::minutes(6)), now));

        // Exactly at the buffer edge counts as expired
        assert!(is_token_expired_at(Some(now + Duration::minutes(5)), now));

        // Long past expiry
        assert!(is_token_expired_at(Some(now - Duration::hours(1)), now));
    }
}

//! Instagram connector: Basic Display API.
//!
//! Instagram diverges from the other platforms in three ways, all contained
//! here: no PKCE support, a chained second exchange (short-lived token →
//! long-lived token) before the token is usable, and refresh keyed by the
//! access token itself (`grant_type=ig_refresh_token`) instead of a separate
//! refresh token.

use super::{AuthRequest, Connector, ConnectorError, PlatformUser};
use crate::config::PlatformCredentials;
use crate::credentials::SocialTokens;
use crate::metrics::{AccountInfo, Post, SocialMetrics};
use crate::platform::Platform;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

const AUTHORIZE_URL: &str = "https://api.instagram.com/oauth/authorize";
const TOKEN_URL: &str = "https://api.instagram.com/oauth/access_token";
const GRAPH_BASE: &str = "https://graph.instagram.com";

const SCOPES: &str = "user_profile,user_media";

pub struct InstagramConnector {
    creds: PlatformCredentials,
    http: reqwest::Client,
    authorize_url: String,
    token_url: String,
    graph_base: String,
}

impl InstagramConnector {
    pub fn new(creds: PlatformCredentials, http: reqwest::Client) -> Self {
        Self::with_endpoints(creds, http, AUTHORIZE_URL, TOKEN_URL, GRAPH_BASE)
    }

    /// Endpoint override used by tests against a mock server.
    pub fn with_endpoints(
        creds: PlatformCredentials,
        http: reqwest::Client,
        authorize_url: &str,
        token_url: &str,
        graph_base: &str,
    ) -> Self {
        Self {
            creds,
            http,
            authorize_url: authorize_url.to_string(),
            token_url: token_url.to_string(),
            graph_base: graph_base.to_string(),
        }
    }

    async fn get_json(&self, url: &str) -> Result<String, ConnectorError> {
        let response = self.http.get(url).send().await?;
        let status = response.status().as_u16();
        if status == 429 {
            return Err(ConnectorError::RateLimited);
        }
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(ConnectorError::Api { status, body });
        }
        Ok(body)
    }

    /// Second exchange step: trade the short-lived token for a long-lived
    /// one (~60 days). Required before the token is useful.
    async fn exchange_long_lived(
        &self,
        short_lived_token: &str,
    ) -> Result<LongLivedTokenResponse, ConnectorError> {
        let url = format!(
            "{}/access_token?grant_type=ig_exchange_token&client_secret={}&access_token={}",
            self.graph_base,
            urlencoding::encode(&self.creds.client_secret),
            urlencoding::encode(short_lived_token),
        );
        let response = self.http.get(&url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(ConnectorError::Exchange { status, body });
        }
        serde_json::from_str(&body).map_err(|_| ConnectorError::Exchange { status, body })
    }
}

#[derive(Deserialize)]
struct ShortLivedTokenResponse {
    access_token: String,
    #[serde(default)]
    user_id: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct LongLivedTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct ProfileResponse {
    id: String,
    username: String,
    #[serde(default)]
    media_count: Option<u64>,
}

#[derive(Deserialize)]
struct MediaListResponse {
    #[serde(default)]
    data: Vec<MediaItem>,
}

#[derive(Deserialize)]
struct MediaItem {
    id: String,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    media_url: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    like_count: Option<i64>,
    #[serde(default)]
    comments_count: Option<i64>,
}

#[async_trait]
impl Connector for InstagramConnector {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn auth_url(&self) -> &str {
        &self.authorize_url
    }

    fn supports_pkce(&self) -> bool {
        false
    }

    fn refresh_requires_refresh_token(&self) -> bool {
        false
    }

    fn prepare_auth_request(&self, state: &str) -> AuthRequest {
        // Instagram's Basic Display API does not support PKCE
        let url = format!(
            "{}?client_id={}&redirect_uri={}&scope={}&response_type=code&state={}",
            self.authorize_url,
            urlencoding::encode(&self.creds.client_id),
            urlencoding::encode(&self.creds.redirect_uri),
            urlencoding::encode(SCOPES),
            urlencoding::encode(state),
        );
        AuthRequest {
            url,
            code_verifier: None,
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        _code_verifier: Option<&str>,
    ) -> Result<SocialTokens, ConnectorError> {
        let form = [
            ("client_id", self.creds.client_id.as_str()),
            ("client_secret", self.creds.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.creds.redirect_uri.as_str()),
            ("code", code),
        ];

        let response = self.http.post(&self.token_url).form(&form).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(ConnectorError::Exchange { status, body });
        }

        let short: ShortLivedTokenResponse = serde_json::from_str(&body)
            .map_err(|_| ConnectorError::Exchange { status, body })?;

        debug!(
            has_user_id = short.user_id.is_some(),
            "Instagram short-lived exchange succeeded, upgrading to long-lived"
        );

        // Chained second exchange; the short-lived token alone is not
        // usable long-term
        let long = self.exchange_long_lived(&short.access_token).await?;

        Ok(SocialTokens {
            access_token: long.access_token,
            refresh_token: None,
            token_secret: None,
            expires_at: long.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
            scopes: Some(SCOPES.to_string()),
        })
    }

    async fn refresh(&self, tokens: &SocialTokens) -> Result<SocialTokens, ConnectorError> {
        // Refresh is keyed by the (long-lived) access token, not a refresh
        // token
        let url = format!(
            "{}/refresh_access_token?grant_type=ig_refresh_token&access_token={}",
            self.graph_base,
            urlencoding::encode(&tokens.access_token),
        );
        let response = self.http.get(&url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(ConnectorError::Refresh { status, body });
        }

        let parsed: LongLivedTokenResponse = serde_json::from_str(&body)
            .map_err(|_| ConnectorError::Refresh { status, body })?;

        Ok(SocialTokens {
            access_token: parsed.access_token,
            refresh_token: None,
            token_secret: None,
            expires_at: parsed.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
            scopes: tokens.scopes.clone(),
        })
    }

    async fn fetch_user_info(
        &self,
        tokens: &SocialTokens,
    ) -> Result<PlatformUser, ConnectorError> {
        let url = format!(
            "{}/me?fields=id,username,media_count&access_token={}",
            self.graph_base,
            urlencoding::encode(&tokens.access_token),
        );
        let body = self.get_json(&url).await?;
        let profile: ProfileResponse =
            serde_json::from_str(&body).map_err(|e| ConnectorError::Parse(e.to_string()))?;

        Ok(PlatformUser {
            id: profile.id,
            display_name: profile.username.clone(),
            username: profile.username,
            profile_image_url: None,
            // Basic Display API exposes no follower count
            followers: 0,
        })
    }

    async fn fetch_metrics(
        &self,
        tokens: &SocialTokens,
    ) -> Result<SocialMetrics, ConnectorError> {
        let url = format!(
            "{}/me?fields=id,username,media_count&access_token={}",
            self.graph_base,
            urlencoding::encode(&tokens.access_token),
        );
        let body = self.get_json(&url).await?;
        let profile: ProfileResponse =
            serde_json::from_str(&body).map_err(|e| ConnectorError::Parse(e.to_string()))?;

        // Media list is optional: a failure degrades to profile-only
        let media_url = format!(
            "{}/me/media?fields=id,caption,media_url,timestamp,like_count,comments_count&limit=10&access_token={}",
            self.graph_base,
            urlencoding::encode(&tokens.access_token),
        );
        let posts = match self.get_json(&media_url).await {
            Ok(body) => match serde_json::from_str::<MediaListResponse>(&body) {
                Ok(parsed) => parsed
                    .data
                    .into_iter()
                    .map(|m| {
                        let mut metrics = HashMap::new();
                        metrics.insert("like_count".to_string(), m.like_count.unwrap_or(0));
                        metrics
                            .insert("comments_count".to_string(), m.comments_count.unwrap_or(0));
                        Post {
                            id: m.id,
                            text: m.caption,
                            image_url: m.media_url,
                            created_at: m.timestamp.unwrap_or_else(Utc::now),
                            metrics,
                        }
                    })
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "Failed to parse Instagram media response");
                    Vec::new()
                }
            },
            Err(ConnectorError::RateLimited) => return Err(ConnectorError::RateLimited),
            Err(e) => {
                warn!(error = %e, "Instagram media fetch failed, returning profile only");
                Vec::new()
            }
        };

        let mut metrics = SocialMetrics::live(
            AccountInfo {
                username: profile.username.clone(),
                display_name: profile.username,
                followers: 0,
                following: None,
                profile_image_url: None,
            },
            posts,
        );
        metrics.flag_if_suspicious();
        Ok(metrics)
    }
}

//! Twitter/X connector: OAuth 2.0 authorization code + PKCE, metrics via the
//! v2 API.

use super::{pkce, AuthRequest, Connector, ConnectorError, PlatformUser};
use crate::config::PlatformCredentials;
use crate::credentials::SocialTokens;
use crate::metrics::{AccountInfo, Post, SocialMetrics};
use crate::platform::Platform;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

const AUTHORIZE_URL: &str = "https://twitter.com/i/oauth2/authorize";
const TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";
const API_BASE: &str = "https://api.twitter.com/2";

const SCOPES: &str = "tweet.read users.read offline.access";

pub struct TwitterConnector {
    creds: PlatformCredentials,
    http: reqwest::Client,
    authorize_url: String,
    token_url: String,
    api_base: String,
}

impl TwitterConnector {
    pub fn new(creds: PlatformCredentials, http: reqwest::Client) -> Self {
        Self::with_endpoints(creds, http, AUTHORIZE_URL, TOKEN_URL, API_BASE)
    }

    /// Endpoint override used by tests against a mock server.
    pub fn with_endpoints(
        creds: PlatformCredentials,
        http: reqwest::Client,
        authorize_url: &str,
        token_url: &str,
        api_base: &str,
    ) -> Self {
        Self {
            creds,
            http,
            authorize_url: authorize_url.to_string(),
            token_url: token_url.to_string(),
            api_base: api_base.to_string(),
        }
    }

    async fn token_request(
        &self,
        form: &[(&str, &str)],
    ) -> Result<(u16, String), ConnectorError> {
        // Twitter wants HTTP Basic client authentication on the token endpoint
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.creds.client_id, Some(&self.creds.client_secret))
            .form(form)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }

    async fn get_json(&self, url: &str, access_token: &str) -> Result<String, ConnectorError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await?;
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
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Deserialize)]
struct UserResponse {
    data: UserData,
}

#[derive(Deserialize)]
struct UserData {
    id: String,
    name: String,
    username: String,
    #[serde(default)]
    profile_image_url: Option<String>,
    #[serde(default)]
    public_metrics: Option<UserMetrics>,
}

#[derive(Deserialize, Default)]
struct UserMetrics {
    #[serde(default)]
    followers_count: u64,
    #[serde(default)]
    following_count: u64,
}

#[derive(Deserialize)]
struct TweetsResponse {
    #[serde(default)]
    data: Vec<Tweet>,
}

#[derive(Deserialize)]
struct Tweet {
    id: String,
    text: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    public_metrics: Option<HashMap<String, i64>>,
}

#[async_trait]
impl Connector for TwitterConnector {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    fn auth_url(&self) -> &str {
        &self.authorize_url
    }

    fn supports_pkce(&self) -> bool {
        true
    }

    fn prepare_auth_request(&self, state: &str) -> AuthRequest {
        let (code_verifier, code_challenge) = pkce::generate_pair();
        let url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
            self.authorize_url,
            urlencoding::encode(&self.creds.client_id),
            urlencoding::encode(&self.creds.redirect_uri),
            urlencoding::encode(SCOPES),
            urlencoding::encode(state),
            urlencoding::encode(&code_challenge),
        );
        AuthRequest {
            url,
            code_verifier: Some(code_verifier),
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<SocialTokens, ConnectorError> {
        let verifier = code_verifier.unwrap_or_default();
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.creds.redirect_uri.as_str()),
            ("code_verifier", verifier),
        ];

        let (status, body) = self.token_request(&form).await?;
        if !(200..300).contains(&status) {
            return Err(ConnectorError::Exchange { status, body });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|_| ConnectorError::Exchange { status, body })?;

        debug!(
            has_refresh_token = parsed.refresh_token.is_some(),
            expires_in = ?parsed.expires_in,
            "Twitter token exchange succeeded"
        );

        Ok(SocialTokens {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
            token_secret: None,
            expires_at: parsed.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
            scopes: parsed.scope,
        })
    }

    async fn refresh(&self, tokens: &SocialTokens) -> Result<SocialTokens, ConnectorError> {
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ConnectorError::Refresh {
                    status: 0,
                    body: "no refresh token available".to_string(),
                }
            })?;

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let (status, body) = self.token_request(&form).await?;
        if !(200..300).contains(&status) {
            return Err(ConnectorError::Refresh { status, body });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|_| ConnectorError::Refresh { status, body })?;

        Ok(SocialTokens {
            access_token: parsed.access_token,
            // Twitter rotates refresh tokens but may omit one; carry the old
            // token forward in that case
            refresh_token: parsed
                .refresh_token
                .or_else(|| Some(refresh_token.to_string())),
            token_secret: None,
            expires_at: parsed.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
            scopes: parsed.scope.or_else(|| tokens.scopes.clone()),
        })
    }

    async fn fetch_user_info(
        &self,
        tokens: &SocialTokens,
    ) -> Result<PlatformUser, ConnectorError> {
        let url = format!(
            "{}/users/me?user.fields=public_metrics,profile_image_url",
            self.api_base
        );
        let body = self.get_json(&url, &tokens.access_token).await?;
        let parsed: UserResponse =
            serde_json::from_str(&body).map_err(|e| ConnectorError::Parse(e.to_string()))?;

        let metrics = parsed.data.public_metrics.unwrap_or_default();
        Ok(PlatformUser {
            id: parsed.data.id,
            username: parsed.data.username,
            display_name: parsed.data.name,
            profile_image_url: parsed.data.profile_image_url,
            followers: metrics.followers_count,
        })
    }

    async fn fetch_metrics(
        &self,
        tokens: &SocialTokens,
    ) -> Result<SocialMetrics, ConnectorError> {
        let user = self.fetch_user_info(tokens).await?;

        // Recent tweets are optional: a failure here degrades to an empty
        // post list instead of sinking the response
        let tweets_url = format!(
            "{}/users/{}/tweets?max_results=10&tweet.fields=public_metrics,created_at",
            self.api_base, user.id
        );
        let posts = match self.get_json(&tweets_url, &tokens.access_token).await {
            Ok(body) => match serde_json::from_str::<TweetsResponse>(&body) {
                Ok(parsed) => parsed
                    .data
                    .into_iter()
                    .map(|t| Post {
                        id: t.id,
                        text: Some(t.text),
                        image_url: None,
                        created_at: t.created_at.unwrap_or_else(Utc::now),
                        metrics: t.public_metrics.unwrap_or_default(),
                    })
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "Failed to parse Twitter tweets response");
                    Vec::new()
                }
            },
            Err(ConnectorError::RateLimited) => return Err(ConnectorError::RateLimited),
            Err(e) => {
                warn!(error = %e, "Twitter tweets fetch failed, returning profile only");
                Vec::new()
            }
        };

        let followers = user.followers;
        let mut metrics = SocialMetrics::live(
            AccountInfo {
                username: user.username,
                display_name: user.display_name,
                followers,
                following: None,
                profile_image_url: user.profile_image_url,
            },
            posts,
        );
        metrics.flag_if_suspicious();
        Ok(metrics)
    }
}

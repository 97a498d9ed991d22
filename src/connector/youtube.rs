//! YouTube connector: Google OAuth (authorization code + PKCE), metrics via
//! the YouTube Data API v3.
//!
//! Google takes client credentials in the token request body rather than
//! HTTP Basic auth, and only issues a refresh token when the authorization
//! request carries `access_type=offline&prompt=consent`.

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

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

const SCOPES: &str = "https://www.googleapis.com/auth/youtube.readonly";

pub struct YoutubeConnector {
    creds: PlatformCredentials,
    http: reqwest::Client,
    authorize_url: String,
    token_url: String,
    api_base: String,
}

impl YoutubeConnector {
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
        let response = self.http.post(&self.token_url).form(form).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }

    async fn get_json(&self, url: &str, access_token: &str) -> Result<String, ConnectorError> {
        let response = self.http.get(url).bearer_auth(access_token).send().await?;
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

    async fn fetch_channel(&self, access_token: &str) -> Result<Channel, ConnectorError> {
        let url = format!(
            "{}/channels?part=snippet,statistics,contentDetails&mine=true",
            self.api_base
        );
        let body = self.get_json(&url, access_token).await?;
        let parsed: ChannelListResponse =
            serde_json::from_str(&body).map_err(|e| ConnectorError::Parse(e.to_string()))?;
        parsed
            .items
            .into_iter()
            .next()
            .ok_or_else(|| ConnectorError::Parse("no channel for authorized user".to_string()))
    }

    /// Recent uploads via the channel's uploads playlist, then per-video
    /// statistics. Both calls are optional for the metrics response.
    async fn fetch_recent_videos(
        &self,
        access_token: &str,
        uploads_playlist: &str,
    ) -> Result<Vec<Post>, ConnectorError> {
        let url = format!(
            "{}/playlistItems?part=snippet,contentDetails&maxResults=10&playlistId={}",
            self.api_base,
            urlencoding::encode(uploads_playlist)
        );
        let body = self.get_json(&url, access_token).await?;
        let parsed: PlaylistItemsResponse =
            serde_json::from_str(&body).map_err(|e| ConnectorError::Parse(e.to_string()))?;

        let video_ids: Vec<String> = parsed
            .items
            .iter()
            .filter_map(|i| i.content_details.as_ref().map(|c| c.video_id.clone()))
            .collect();
        if video_ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/videos?part=snippet,statistics&id={}",
            self.api_base,
            video_ids.join(",")
        );
        let body = self.get_json(&url, access_token).await?;
        let parsed: VideoListResponse =
            serde_json::from_str(&body).map_err(|e| ConnectorError::Parse(e.to_string()))?;

        Ok(parsed
            .items
            .into_iter()
            .map(|v| {
                let stats = v.statistics.unwrap_or_default();
                let mut metrics = HashMap::new();
                metrics.insert("view_count".to_string(), stats.view_count.parse_i64());
                metrics.insert("like_count".to_string(), stats.like_count.parse_i64());
                metrics.insert("comment_count".to_string(), stats.comment_count.parse_i64());
                let snippet = v.snippet.unwrap_or_default();
                Post {
                    id: v.id,
                    text: Some(snippet.title),
                    image_url: snippet.thumbnails.and_then(|t| t.default.map(|d| d.url)),
                    created_at: snippet.published_at.unwrap_or_else(Utc::now),
                    metrics,
                }
            })
            .collect())
    }
}

/// YouTube statistics arrive as JSON strings, not numbers.
#[derive(Deserialize, Default)]
#[serde(transparent)]
struct CountString(Option<String>);

impl CountString {
    fn parse_u64(&self) -> u64 {
        self.0.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0)
    }

    fn parse_i64(&self) -> i64 {
        self.0.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0)
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
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<Channel>,
}

#[derive(Deserialize)]
struct Channel {
    id: String,
    #[serde(default)]
    snippet: Option<ChannelSnippet>,
    #[serde(default)]
    statistics: Option<ChannelStatistics>,
    #[serde(default, rename = "contentDetails")]
    content_details: Option<ChannelContentDetails>,
}

#[derive(Deserialize, Default)]
struct ChannelSnippet {
    #[serde(default)]
    title: String,
    #[serde(default, rename = "customUrl")]
    custom_url: Option<String>,
    #[serde(default)]
    thumbnails: Option<Thumbnails>,
}

#[derive(Deserialize, Default)]
struct ChannelStatistics {
    #[serde(default, rename = "subscriberCount")]
    subscriber_count: CountString,
}

#[derive(Deserialize)]
struct ChannelContentDetails {
    #[serde(rename = "relatedPlaylists")]
    related_playlists: RelatedPlaylists,
}

#[derive(Deserialize)]
struct RelatedPlaylists {
    #[serde(default)]
    uploads: Option<String>,
}

#[derive(Deserialize)]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

#[derive(Deserialize)]
struct PlaylistItem {
    #[serde(default, rename = "contentDetails")]
    content_details: Option<PlaylistItemContentDetails>,
}

#[derive(Deserialize)]
struct PlaylistItemContentDetails {
    #[serde(rename = "videoId")]
    video_id: String,
}

#[derive(Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<Video>,
}

#[derive(Deserialize)]
struct Video {
    id: String,
    #[serde(default)]
    snippet: Option<VideoSnippet>,
    #[serde(default)]
    statistics: Option<VideoStatistics>,
}

#[derive(Deserialize, Default)]
struct VideoSnippet {
    #[serde(default)]
    title: String,
    #[serde(default, rename = "publishedAt")]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    thumbnails: Option<Thumbnails>,
}

#[derive(Deserialize, Default)]
struct VideoStatistics {
    #[serde(default, rename = "viewCount")]
    view_count: CountString,
    #[serde(default, rename = "likeCount")]
    like_count: CountString,
    #[serde(default, rename = "commentCount")]
    comment_count: CountString,
}

#[derive(Deserialize, Default)]
struct Thumbnails {
    #[serde(default)]
    default: Option<Thumbnail>,
}

#[derive(Deserialize)]
struct Thumbnail {
    url: String,
}

#[async_trait]
impl Connector for YoutubeConnector {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    fn auth_url(&self) -> &str {
        &self.authorize_url
    }

    fn supports_pkce(&self) -> bool {
        true
    }

    fn prepare_auth_request(&self, state: &str) -> AuthRequest {
        let (code_verifier, code_challenge) = pkce::generate_pair();
        // access_type=offline + prompt=consent makes Google return a refresh
        // token on every authorization
        let url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256&access_type=offline&prompt=consent",
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
        // Google expects client credentials in the body, not Basic auth
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.creds.redirect_uri.as_str()),
            ("client_id", self.creds.client_id.as_str()),
            ("client_secret", self.creds.client_secret.as_str()),
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
            "YouTube token exchange succeeded"
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
            .ok_or_else(|| ConnectorError::Refresh {
                status: 0,
                body: "no refresh token available".to_string(),
            })?;

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.creds.client_id.as_str()),
            ("client_secret", self.creds.client_secret.as_str()),
        ];

        let (status, body) = self.token_request(&form).await?;
        if !(200..300).contains(&status) {
            return Err(ConnectorError::Refresh { status, body });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|_| ConnectorError::Refresh { status, body })?;

        Ok(SocialTokens {
            access_token: parsed.access_token,
            // Google never rotates refresh tokens on refresh; keep the old one
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
        let channel = self.fetch_channel(&tokens.access_token).await?;
        let snippet = channel.snippet.unwrap_or_default();
        let stats = channel.statistics.unwrap_or_default();

        Ok(PlatformUser {
            id: channel.id,
            username: snippet.custom_url.unwrap_or_else(|| snippet.title.clone()),
            display_name: snippet.title,
            profile_image_url: snippet.thumbnails.and_then(|t| t.default.map(|d| d.url)),
            followers: stats.subscriber_count.parse_u64(),
        })
    }

    async fn fetch_metrics(
        &self,
        tokens: &SocialTokens,
    ) -> Result<SocialMetrics, ConnectorError> {
        let channel = self.fetch_channel(&tokens.access_token).await?;
        let snippet = channel.snippet.unwrap_or_default();
        let stats = channel.statistics.unwrap_or_default();

        let uploads = channel
            .content_details
            .and_then(|c| c.related_playlists.uploads);

        // The uploads chain is optional: a failure degrades to no posts
        let posts = match uploads {
            Some(playlist) => {
                match self.fetch_recent_videos(&tokens.access_token, &playlist).await {
                    Ok(posts) => posts,
                    Err(ConnectorError::RateLimited) => return Err(ConnectorError::RateLimited),
                    Err(e) => {
                        warn!(error = %e, "YouTube video fetch failed, returning channel only");
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };

        let mut metrics = SocialMetrics::live(
            AccountInfo {
                username: snippet.custom_url.unwrap_or_else(|| snippet.title.clone()),
                display_name: snippet.title,
                followers: stats.subscriber_count.parse_u64(),
                following: None,
                profile_image_url: snippet.thumbnails.and_then(|t| t.default.map(|d| d.url)),
            },
            posts,
        );
        metrics.flag_if_suspicious();
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_creds() -> PlatformCredentials {
        PlatformCredentials {
            client_id: "google-client".to_string(),
            client_secret: "google-secret".to_string(),
            redirect_uri: "http://localhost:3000/callback/youtube".to_string(),
        }
    }

    fn connector_for(server: &mockito::ServerGuard) -> YoutubeConnector {
        let url = server.url();
        YoutubeConnector::with_endpoints(
            test_creds(),
            reqwest::Client::new(),
            &format!("{}/o/oauth2/v2/auth", url),
            &format!("{}/token", url),
            &format!("{}/youtube/v3", url),
        )
    }

    #[test]
    fn test_auth_request_requests_offline_access() {
        let connector = YoutubeConnector::new(test_creds(), reqwest::Client::new());
        let request = connector.prepare_auth_request("state.login1");

        assert!(request.url.contains("access_type=offline"));
        assert!(request.url.contains("prompt=consent"));
        assert!(request.url.contains("code_challenge_method=S256"));
        assert!(request.code_verifier.is_some());
    }

    #[tokio::test]
    async fn test_exchange_code_embeds_client_credentials_in_body() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("client_id".into(), "google-client".into()),
                mockito::Matcher::UrlEncoded("client_secret".into(), "google-secret".into()),
                mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"ya29.token","refresh_token":"1//refresh","expires_in":3599}"#)
            .create_async()
            .await;

        let connector = connector_for(&server);
        let tokens = connector
            .exchange_code("code-1", Some("verifier"))
            .await
            .unwrap();
        assert_eq!(tokens.access_token, "ya29.token");
        assert_eq!(tokens.refresh_token, Some("1//refresh".to_string()));
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"ya29.new","expires_in":3599}"#)
            .create_async()
            .await;

        let connector = connector_for(&server);
        let mut old = SocialTokens::new("ya29.old");
        old.refresh_token = Some("1//refresh".to_string());

        let refreshed = connector.refresh(&old).await.unwrap();
        assert_eq!(refreshed.refresh_token, Some("1//refresh".to_string()));
    }

    #[tokio::test]
    async fn test_refresh_failure_is_typed() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/token")
            .with_status(401)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let connector = connector_for(&server);
        let mut old = SocialTokens::new("ya29.old");
        old.refresh_token = Some("revoked".to_string());

        let err = connector.refresh(&old).await.unwrap_err();
        match err {
            ConnectorError::Refresh { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("expected Refresh error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_metrics_parses_string_counters() {
        let mut server = mockito::Server::new_async().await;
        let _channels = server
            .mock("GET", mockito::Matcher::Regex("/youtube/v3/channels.*".to_string()))
            .with_status(200)
            .with_body(
                r#"{"items":[{"id":"UC123","snippet":{"title":"My Channel","customUrl":"@mychannel"},"statistics":{"subscriberCount":"1234"},"contentDetails":{"relatedPlaylists":{"uploads":"UU123"}}}]}"#,
            )
            .create_async()
            .await;
        let _playlist = server
            .mock("GET", mockito::Matcher::Regex("/youtube/v3/playlistItems.*".to_string()))
            .with_status(200)
            .with_body(r#"{"items":[{"contentDetails":{"videoId":"vid1"}}]}"#)
            .create_async()
            .await;
        let _videos = server
            .mock("GET", mockito::Matcher::Regex("/youtube/v3/videos.*".to_string()))
            .with_status(200)
            .with_body(
                r#"{"items":[{"id":"vid1","snippet":{"title":"First video","publishedAt":"2026-08-01T00:00:00Z"},"statistics":{"viewCount":"1000","likeCount":"50","commentCount":"7"}}]}"#,
            )
            .create_async()
            .await;

        let connector = connector_for(&server);
        let metrics = connector
            .fetch_metrics(&SocialTokens::new("ya29.at"))
            .await
            .unwrap();

        assert_eq!(metrics.account_info.followers, 1234);
        assert_eq!(metrics.account_info.username, "@mychannel");
        assert_eq!(metrics.posts.len(), 1);
        assert_eq!(metrics.posts[0].metrics["view_count"], 1000);
        assert_eq!(metrics.posts[0].metrics["comment_count"], 7);
    }

    #[tokio::test]
    async fn test_fetch_metrics_survives_playlist_failure() {
        let mut server = mockito::Server::new_async().await;
        let _channels = server
            .mock("GET", mockito::Matcher::Regex("/youtube/v3/channels.*".to_string()))
            .with_status(200)
            .with_body(
                r#"{"items":[{"id":"UC123","snippet":{"title":"My Channel"},"statistics":{"subscriberCount":"10"},"contentDetails":{"relatedPlaylists":{"uploads":"UU123"}}}]}"#,
            )
            .create_async()
            .await;
        let _playlist = server
            .mock("GET", mockito::Matcher::Regex("/youtube/v3/playlistItems.*".to_string()))
            .with_status(500)
            .create_async()
            .await;

        let connector = connector_for(&server);
        let metrics = connector
            .fetch_metrics(&SocialTokens::new("ya29.at"))
            .await
            .unwrap();

        assert_eq!(metrics.account_info.followers, 10);
        assert!(metrics.posts.is_empty());
    }
}

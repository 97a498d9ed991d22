//! Token lifecycle management.
//!
//! Guarantees callers a valid, non-expired access token for a (user,
//! platform) pair, refreshing and persisting as needed. Central
//! retry/failure policy lives here: a failed refresh returns `None` and
//! leaves the stored account untouched, so transient provider hiccups never
//! destroy a user's connection. The caller decides whether to prompt a
//! reconnect.
//!
//! Concurrent calls for the same user are tolerated without locking: both
//! may refresh, and the last write to the account store wins. Refresh is
//! idempotent from the provider's perspective for the supported platforms.

use crate::connector::{is_token_expired, Connector};
use crate::credentials::{AccountStore, SocialTokens};
use anyhow::Result;
use tracing::{debug, info, warn};

/// Returns valid tokens for the user on the connector's platform, or `None`
/// when the user must (re)connect.
///
/// Steps:
/// 1. No stored account, or no access token → `None`.
/// 2. Token not expired (5-minute buffer) → returned as-is, no network call.
/// 3. Expired without a refresh path → `None`.
/// 4. Expired with a refresh path → refresh, persist, return new tokens;
///    refresh failure → `None` (account kept).
pub async fn ensure_valid_tokens(
    store: &AccountStore,
    connector: &dyn Connector,
    user_id: &str,
) -> Result<Option<SocialTokens>> {
    let platform = connector.platform();

    let account = match store.get(user_id, platform)? {
        Some(account) => account,
        None => {
            debug!(user_id = %user_id, platform = %platform, "No connected account");
            return Ok(None);
        }
    };

    if account.access_token.is_empty() {
        debug!(user_id = %user_id, platform = %platform, "Account has no access token");
        return Ok(None);
    }

    let tokens = account.tokens();

    if !is_token_expired(tokens.expires_at) {
        return Ok(Some(tokens));
    }

    let has_refresh_token = tokens
        .refresh_token
        .as_deref()
        .map(|t| !t.is_empty())
        .unwrap_or(false);
    if connector.refresh_requires_refresh_token() && !has_refresh_token {
        info!(
            user_id = %user_id,
            platform = %platform,
            "Token expired with no refresh token; reconnect required"
        );
        return Ok(None);
    }

    debug!(user_id = %user_id, platform = %platform, "Token expired, refreshing");

    match connector.refresh(&tokens).await {
        Ok(new_tokens) => {
            store.update_tokens(user_id, platform, &new_tokens)?;
            info!(user_id = %user_id, platform = %platform, "Tokens refreshed and persisted");
            Ok(Some(new_tokens))
        }
        Err(e) => {
            // Deliberate: no auto-disconnect on refresh failure
            warn!(
                user_id = %user_id,
                platform = %platform,
                error = %e,
                "Token refresh failed; keeping stored account"
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{AuthRequest, ConnectorError, PlatformUser};
    use crate::credentials::SocialAccount;
    use crate::metrics::SocialMetrics;
    use crate::platform::Platform;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted connector: counts refresh calls and returns a fixed outcome.
    struct ScriptedConnector {
        refresh_calls: AtomicUsize,
        refresh_result: Option<SocialTokens>,
    }

    impl ScriptedConnector {
        fn succeeding(tokens: SocialTokens) -> Self {
            Self {
                refresh_calls: AtomicUsize::new(0),
                refresh_result: Some(tokens),
            }
        }

        fn failing() -> Self {
            Self {
                refresh_calls: AtomicUsize::new(0),
                refresh_result: None,
            }
        }

        fn refresh_count(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        fn platform(&self) -> Platform {
            Platform::Twitter
        }

        fn auth_url(&self) -> &str {
            "https://example.com/authorize"
        }

        fn supports_pkce(&self) -> bool {
            true
        }

        fn prepare_auth_request(&self, _state: &str) -> AuthRequest {
            unimplemented!("not used by lifecycle tests")
        }

        async fn exchange_code(
            &self,
            _code: &str,
            _verifier: Option<&str>,
        ) -> Result<SocialTokens, ConnectorError> {
            unimplemented!("not used by lifecycle tests")
        }

        async fn refresh(&self, _tokens: &SocialTokens) -> Result<SocialTokens, ConnectorError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            match &self.refresh_result {
                Some(tokens) => Ok(tokens.clone()),
                None => Err(ConnectorError::Refresh {
                    status: 401,
                    body: "invalid_grant".to_string(),
                }),
            }
        }

        async fn fetch_user_info(
            &self,
            _tokens: &SocialTokens,
        ) -> Result<PlatformUser, ConnectorError> {
            unimplemented!("not used by lifecycle tests")
        }

        async fn fetch_metrics(
            &self,
            _tokens: &SocialTokens,
        ) -> Result<SocialMetrics, ConnectorError> {
            unimplemented!("not used by lifecycle tests")
        }
    }

    fn test_store() -> AccountStore {
        let key = BASE64.encode([0u8; 32]);
        AccountStore::new(":memory:", &key).unwrap()
    }

    fn account(user_id: &str, expires_in_secs: i64, refresh_token: Option<&str>) -> SocialAccount {
        SocialAccount {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            platform: Platform::Twitter,
            platform_user_id: "42".to_string(),
            platform_username: "testuser".to_string(),
            access_token: "abc".to_string(),
            refresh_token: refresh_token.map(String::from),
            token_secret: None,
            expires_at: Some(Utc::now() + Duration::seconds(expires_in_secs)),
            scopes: None,
            metadata: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_no_account_returns_none() {
        let store = test_store();
        let connector = ScriptedConnector::failing();

        let result = ensure_valid_tokens(&store, &connector, "u1").await.unwrap();
        assert!(result.is_none());
        assert_eq!(connector.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_fresh_token_returned_without_refresh() {
        let store = test_store();
        store.upsert(&account("u1", 3600, Some("rt"))).unwrap();
        let connector = ScriptedConnector::failing();

        let tokens = ensure_valid_tokens(&store, &connector, "u1")
            .await
            .unwrap()
            .expect("tokens expected");

        assert_eq!(tokens.access_token, "abc");
        assert_eq!(connector.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_token_triggers_exactly_one_refresh_and_persist() {
        let store = test_store();
        store.upsert(&account("u1", -10, Some("rt"))).unwrap();

        let mut new_tokens = SocialTokens::new("fresh-access");
        new_tokens.refresh_token = Some("fresh-refresh".to_string());
        new_tokens.expires_at = Some(Utc::now() + Duration::hours(2));
        let connector = ScriptedConnector::succeeding(new_tokens);

        let tokens = ensure_valid_tokens(&store, &connector, "u1")
            .await
            .unwrap()
            .expect("tokens expected");

        assert_eq!(tokens.access_token, "fresh-access");
        assert_eq!(connector.refresh_count(), 1);

        // Refresh result was persisted
        let stored = store.get("u1", Platform::Twitter).unwrap().unwrap();
        assert_eq!(stored.access_token, "fresh-access");
        assert_eq!(stored.refresh_token, Some("fresh-refresh".to_string()));
    }

    #[tokio::test]
    async fn test_token_inside_buffer_counts_as_expired() {
        let store = test_store();
        // 4 minutes out: inside the 5-minute expiry buffer
        store.upsert(&account("u1", 240, Some("rt"))).unwrap();

        let connector = ScriptedConnector::succeeding(SocialTokens::new("fresh"));
        ensure_valid_tokens(&store, &connector, "u1").await.unwrap();
        assert_eq!(connector.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token_returns_none() {
        let store = test_store();
        store.upsert(&account("u1", -10, None)).unwrap();
        let connector = ScriptedConnector::failing();

        let result = ensure_valid_tokens(&store, &connector, "u1").await.unwrap();
        assert!(result.is_none());
        assert_eq!(connector.refresh_count(), 0);

        // Account must survive
        assert!(store.get("u1", Platform::Twitter).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_account() {
        let store = test_store();
        store.upsert(&account("u1", -10, Some("rt"))).unwrap();
        let connector = ScriptedConnector::failing();

        let result = ensure_valid_tokens(&store, &connector, "u1").await.unwrap();
        assert!(result.is_none());
        assert_eq!(connector.refresh_count(), 1);

        // No auto-disconnect: the stored tokens are unchanged
        let stored = store.get("u1", Platform::Twitter).unwrap().unwrap();
        assert_eq!(stored.access_token, "abc");
        assert_eq!(stored.refresh_token, Some("rt".to_string()));
    }

    #[tokio::test]
    async fn test_missing_expiry_forces_refresh_path() {
        let store = test_store();
        let mut acc = account("u1", 0, Some("rt"));
        acc.expires_at = None;
        store.upsert(&acc).unwrap();

        let connector = ScriptedConnector::succeeding(SocialTokens::new("fresh"));
        ensure_valid_tokens(&store, &connector, "u1").await.unwrap();
        assert_eq!(connector.refresh_count(), 1);
    }
}

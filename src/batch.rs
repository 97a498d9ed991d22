//! Periodic token refresh sweep.
//!
//! Walks every stored account on an interval and runs the token lifecycle
//! for it, so long-lived tokens (Instagram's 60-day grants in particular)
//! are renewed even for users who rarely open the dashboard. One account
//! failing never aborts the sweep.

use crate::connector::ConnectorRegistry;
use crate::credentials::AccountStore;
use crate::lifecycle::ensure_valid_tokens;
use std::sync::Arc;
use tokio::time;
use tracing::{info, warn};

/// Outcome counts for one sweep.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Accounts whose lifecycle run yielded usable tokens.
    pub refreshed: usize,
    /// Accounts needing user action (no usable refresh path).
    pub skipped: usize,
    /// Accounts where the sweep itself errored.
    pub failed: usize,
}

/// Runs the lifecycle once for every stored account.
pub async fn sweep_all(store: &AccountStore, registry: &ConnectorRegistry) -> SweepReport {
    let accounts = match store.list_all() {
        Ok(accounts) => accounts,
        Err(e) => {
            warn!(error = %e, "Refresh sweep: failed to list accounts");
            return SweepReport {
                failed: 1,
                ..Default::default()
            };
        }
    };

    let mut report = SweepReport::default();

    for (user_id, platform) in accounts {
        let connector = match registry.get(platform) {
            Err(e) => {
                warn!(
                    platform = %platform,
                    user_id = %user_id,
                    error = %e,
                    "Refresh sweep: connector unavailable"
                );
                report.failed += 1;
                continue;
            }
            Ok(connector) => connector,
        };

        match ensure_valid_tokens(store, connector.as_ref(), &user_id).await {
            Ok(Some(_)) => report.refreshed += 1,
            Ok(None) => report.skipped += 1,
            Err(e) => {
                warn!(
                    platform = %platform,
                    user_id = %user_id,
                    error = %e,
                    "Refresh sweep: lifecycle error"
                );
                report.failed += 1;
            }
        }
    }

    info!(
        refreshed = report.refreshed,
        skipped = report.skipped,
        failed = report.failed,
        "Refresh sweep complete"
    );

    report
}

/// Background task running `sweep_all` on the configured interval.
pub async fn run_refresh_sweep(
    store: Arc<AccountStore>,
    registry: Arc<ConnectorRegistry>,
    interval_seconds: u64,
) {
    let mut interval = time::interval(time::Duration::from_secs(interval_seconds));
    // The first tick fires immediately; skip it so startup is not a sweep
    interval.tick().await;

    loop {
        interval.tick().await;
        sweep_all(&store, &registry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::SocialAccount;
    use crate::platform::Platform;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn test_store() -> AccountStore {
        let key = BASE64.encode([0u8; 32]);
        AccountStore::new(":memory:", &key).unwrap()
    }

    fn account(user_id: &str, platform: Platform, expires_in_secs: i64) -> SocialAccount {
        SocialAccount {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            platform,
            platform_user_id: "42".to_string(),
            platform_username: "testuser".to_string(),
            access_token: "at".to_string(),
            refresh_token: None,
            token_secret: None,
            expires_at: Some(Utc::now() + Duration::seconds(expires_in_secs)),
            scopes: None,
            metadata: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_sweep_empty_store() {
        let store = test_store();
        let registry = ConnectorRegistry::new("http://localhost:3000").unwrap();

        let report = sweep_all(&store, &registry).await;
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_sweep_continues_past_unconfigured_platform() {
        // No platform env vars in tests, so every connector lookup fails;
        // the sweep must count failures and keep going
        let store = test_store();
        store.upsert(&account("u1", Platform::Twitter, -10)).unwrap();
        store.upsert(&account("u2", Platform::Youtube, -10)).unwrap();
        let registry = ConnectorRegistry::new("http://localhost:3000").unwrap();

        let report = sweep_all(&store, &registry).await;
        assert_eq!(report.failed, 2);
        assert_eq!(report.refreshed, 0);

        // Accounts survive a failing sweep
        assert!(store.get("u1", Platform::Twitter).unwrap().is_some());
        assert!(store.get("u2", Platform::Youtube).unwrap().is_some());
    }
}

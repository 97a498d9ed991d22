//! Metrics read model and the three-tier read-through cache.
//!
//! `SocialMetrics` is an ephemeral view assembled per fetch, never the source
//! of truth. Every response carries a cache envelope telling the caller where
//! the data came from and whether it is stale or degraded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod cache;
pub mod history;

pub use cache::{CacheKind, MetricsCache};
pub use history::{DailySnapshot, MetricsHistory};

/// Profile-level numbers for the connected account.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub username: String,
    pub display_name: String,
    pub followers: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub following: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
}

/// One recent post/video/media item with its engagement counters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Per-platform counter map (likes, retweets, views, comments, ...).
    pub metrics: HashMap<String, i64>,
}

/// The time window the metrics describe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Where a served response came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    Memory,
    Database,
    Api,
}

/// Provenance envelope attached to every metrics response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEnvelope {
    pub from_cache: bool,
    pub timestamp: DateTime<Utc>,
    /// Set when stale data was served past its TTL (stale-on-error path).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<bool>,
    /// Set when no data was available at all; the payload is zero-valued
    /// filler, not real engagement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CacheSource>,
}

impl CacheEnvelope {
    pub fn live() -> Self {
        Self {
            from_cache: false,
            timestamp: Utc::now(),
            expired: None,
            error: None,
            source: Some(CacheSource::Api),
        }
    }
}

/// Engagement metrics for one account over one period.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SocialMetrics {
    pub account_info: AccountInfo,
    pub posts: Vec<Post>,
    pub period: Period,
    pub cache: CacheEnvelope,
    /// UX signal for technically-valid-but-suspicious data (e.g. zero
    /// followers and zero posts). Not an error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl SocialMetrics {
    /// Fresh live response over the last 30 days.
    pub fn live(account_info: AccountInfo, posts: Vec<Post>) -> Self {
        let end = Utc::now();
        Self {
            account_info,
            posts,
            period: Period {
                start: end - chrono::Duration::days(30),
                end,
            },
            cache: CacheEnvelope::live(),
            warning: None,
        }
    }

    /// Zero-valued degraded response served when no cached data exists and
    /// the upstream fetch failed. Callers must check `cache.error` to
    /// distinguish this from a legitimately empty account.
    pub fn empty_with_error() -> Self {
        let now = Utc::now();
        Self {
            account_info: AccountInfo::default(),
            posts: Vec::new(),
            period: Period {
                start: now - chrono::Duration::days(30),
                end: now,
            },
            cache: CacheEnvelope {
                from_cache: false,
                timestamp: now,
                expired: None,
                error: Some(true),
                source: None,
            },
            warning: None,
        }
    }

    /// Flags suspicious all-zero data with a warning.
    pub fn flag_if_suspicious(&mut self) {
        if self.cache.error.is_none()
            && self.account_info.followers == 0
            && self.posts.is_empty()
        {
            self.warning =
                Some("account reports zero followers and zero posts; data may be incomplete".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_with_error_shape() {
        let metrics = SocialMetrics::empty_with_error();
        assert_eq!(metrics.account_info.followers, 0);
        assert!(metrics.posts.is_empty());
        assert_eq!(metrics.cache.error, Some(true));
        assert!(!metrics.cache.from_cache);
    }

    #[test]
    fn test_suspicious_zero_data_gets_warning() {
        let mut metrics = SocialMetrics::live(AccountInfo::default(), vec![]);
        metrics.flag_if_suspicious();
        assert!(metrics.warning.is_some());
    }

    #[test]
    fn test_nonzero_data_not_flagged() {
        let mut metrics = SocialMetrics::live(
            AccountInfo {
                followers: 10,
                ..Default::default()
            },
            vec![],
        );
        metrics.flag_if_suspicious();
        assert!(metrics.warning.is_none());
    }

    #[test]
    fn test_error_response_never_flagged() {
        let mut metrics = SocialMetrics::empty_with_error();
        metrics.flag_if_suspicious();
        assert!(metrics.warning.is_none());
    }

    #[test]
    fn test_envelope_serialization_omits_unset_fields() {
        let metrics = SocialMetrics::live(AccountInfo::default(), vec![]);
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["cache"]["from_cache"], false);
        assert_eq!(json["cache"]["source"], "api");
        assert!(json["cache"].get("expired").is_none());
        assert!(json["cache"].get("error").is_none());
    }
}

//! Three-tier read-through metrics cache.
//!
//! Read path: durable daily snapshot → process memory → live platform API.
//! The cache shields connectors from redundant calls and rate limits, and
//! prefers stale data over failure: an upstream 429 or fetch error serves
//! the most recent memory entry even past its TTL. Only with no cached value
//! at all does the caller receive a zero-valued response tagged
//! `cache.error`.
//!
//! Entries are scoped per user; batch contexts without a request-scoped
//! identity pass an explicit cache key instead.

use super::{CacheSource, MetricsHistory, SocialMetrics};
use crate::config::CacheConfig;
use crate::connector::{Connector, ConnectorError};
use crate::credentials::SocialTokens;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a memory-tier entry holds, with independent TTLs per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Profile/user data.
    Profile,
    /// Recent media or tweets.
    Items,
    /// The assembled metrics response.
    Metrics,
    /// Historical/aggregate metrics.
    Historical,
}

#[derive(Clone)]
struct Entry {
    metrics: SocialMetrics,
    inserted_at: DateTime<Utc>,
}

/// Process-local metrics cache over a durable history store.
pub struct MetricsCache {
    entries: DashMap<(String, CacheKind), Entry>,
    history: Arc<MetricsHistory>,
    config: CacheConfig,
}

impl MetricsCache {
    pub fn new(history: Arc<MetricsHistory>, config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            history,
            config,
        }
    }

    fn ttl(&self, kind: CacheKind) -> Duration {
        match kind {
            CacheKind::Historical => Duration::seconds(self.config.historical_ttl_secs as i64),
            _ => Duration::seconds(self.config.memory_ttl_secs as i64),
        }
    }

    /// Serves metrics for one account through the tiered read path.
    ///
    /// `user_id` enables the durable tier and default cache scoping;
    /// `cache_key` overrides the scope for batch/cron contexts. With
    /// neither, every call goes live.
    pub async fn get_metrics(
        &self,
        connector: &dyn Connector,
        tokens: &SocialTokens,
        user_id: Option<&str>,
        cache_key: Option<&str>,
    ) -> SocialMetrics {
        let platform = connector.platform();
        let scope = cache_key.or(user_id);
        let key = scope.map(|s| format!("{}:{}", platform, s));

        // Tier 1: durable daily snapshot, coarse but free of API quota
        if let Some(uid) = user_id {
            match self.history.latest(uid, platform.as_str(), self.config.max_age_days) {
                Ok(Some(snapshot)) => {
                    debug!(platform = %platform, user_id = %uid, "Serving metrics from daily snapshot");
                    return snapshot.into_metrics();
                }
                Ok(None) => {}
                Err(e) => {
                    // Durable tier is best-effort on the read side too
                    warn!(platform = %platform, error = %e, "Daily snapshot lookup failed");
                }
            }
        }

        let now = Utc::now();

        // Tier 2: process memory within TTL
        if let Some(key) = &key {
            if let Some(fresh) = self.memory_lookup(key, CacheKind::Metrics, now) {
                debug!(platform = %platform, "Serving metrics from memory cache");
                return fresh;
            }
        }

        // Tier 3: live upstream fetch with write-through
        match connector.fetch_metrics(tokens).await {
            Ok(metrics) => {
                if let Some(key) = &key {
                    self.insert(key, CacheKind::Metrics, metrics.clone());
                }
                if let Some(uid) = user_id {
                    // Write-through failure must not fail the read
                    if let Err(e) = self.history.record(uid, platform.as_str(), &metrics) {
                        warn!(platform = %platform, error = %e, "Failed to record daily snapshot");
                    }
                }
                metrics
            }
            Err(e) => self.degrade(key.as_deref(), platform.as_str(), &e),
        }
    }

    /// Stale-cache-preferred failure handling: any cached value beats an
    /// error, and only a fully cold cache yields the zero-valued response.
    fn degrade(&self, key: Option<&str>, platform: &str, error: &ConnectorError) -> SocialMetrics {
        if matches!(error, ConnectorError::RateLimited) {
            warn!(platform = %platform, "Rate limited by platform; falling back to cache");
        } else {
            warn!(platform = %platform, error = %error, "Metrics fetch failed; falling back to cache");
        }

        if let Some(key) = key {
            if let Some(entry) = self.entries.get(&(key.to_string(), CacheKind::Metrics)) {
                let mut metrics = entry.metrics.clone();
                metrics.cache.from_cache = true;
                metrics.cache.expired = Some(true);
                metrics.cache.timestamp = entry.inserted_at;
                metrics.cache.source = Some(CacheSource::Memory);
                return metrics;
            }
        }

        SocialMetrics::empty_with_error()
    }

    fn memory_lookup(
        &self,
        key: &str,
        kind: CacheKind,
        now: DateTime<Utc>,
    ) -> Option<SocialMetrics> {
        let entry = self.entries.get(&(key.to_string(), kind))?;
        if now - entry.inserted_at > self.ttl(kind) {
            return None;
        }
        let mut metrics = entry.metrics.clone();
        metrics.cache.from_cache = true;
        metrics.cache.timestamp = entry.inserted_at;
        metrics.cache.source = Some(CacheSource::Memory);
        metrics.cache.expired = None;
        Some(metrics)
    }

    fn insert(&self, key: &str, kind: CacheKind, metrics: SocialMetrics) {
        self.insert_at(key, kind, metrics, Utc::now());
    }

    /// Insertion with an explicit timestamp; tests use this to back-date
    /// entries.
    pub(crate) fn insert_at(
        &self,
        key: &str,
        kind: CacheKind,
        metrics: SocialMetrics,
        inserted_at: DateTime<Utc>,
    ) {
        self.entries.insert(
            (key.to_string(), kind),
            Entry {
                metrics,
                inserted_at,
            },
        );
    }

    /// Drops all entries for a cache scope (called on disconnect).
    pub fn invalidate(&self, platform: &str, scope: &str) {
        let prefix = format!("{}:{}", platform, scope);
        self.entries.retain(|(key, _), _| key != &prefix);
    }
}

//! Durable daily metrics snapshots (Tier 1 of the read-through cache).
//!
//! One aggregated row per (user, platform, day). Serving a recent snapshot
//! trades fidelity (no per-post detail) for API-quota conservation: a hit
//! here avoids calling the platform API entirely.

use super::{AccountInfo, CacheEnvelope, CacheSource, Period, SocialMetrics};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// One day's aggregate for a connected account.
#[derive(Clone, Debug, PartialEq)]
pub struct DailySnapshot {
    pub day: String,
    pub username: String,
    pub followers: u64,
    pub total_engagement: i64,
    pub posts_count: i64,
    pub recorded_at: DateTime<Utc>,
}

impl DailySnapshot {
    /// Synthesizes a metrics response from the aggregate, tagged as coming
    /// from the database tier.
    pub fn into_metrics(self) -> SocialMetrics {
        let end = self.recorded_at;
        SocialMetrics {
            account_info: AccountInfo {
                username: self.username,
                display_name: String::new(),
                followers: self.followers,
                following: None,
                profile_image_url: None,
            },
            posts: Vec::new(),
            period: Period {
                start: end - Duration::days(30),
                end,
            },
            cache: CacheEnvelope {
                from_cache: true,
                timestamp: self.recorded_at,
                expired: None,
                error: None,
                source: Some(CacheSource::Database),
            },
            warning: None,
        }
    }
}

/// SQLite-backed store for daily metrics aggregates.
pub struct MetricsHistory {
    conn: Mutex<Connection>,
}

impl MetricsHistory {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS metrics_history (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                day TEXT NOT NULL,
                username TEXT NOT NULL,
                followers INTEGER NOT NULL,
                total_engagement INTEGER NOT NULL,
                posts_count INTEGER NOT NULL,
                recorded_at TEXT NOT NULL,
                UNIQUE(user_id, platform, day)
            )
            "#,
            [],
        )
        .context("Failed to create metrics_history table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Records today's aggregate for an account, replacing any earlier
    /// snapshot for the same day.
    pub fn record(&self, user_id: &str, platform: &str, metrics: &SocialMetrics) -> Result<()> {
        let total_engagement: i64 = metrics
            .posts
            .iter()
            .flat_map(|p| p.metrics.values())
            .sum();
        let now = Utc::now();
        let day = now.format("%Y-%m-%d").to_string();

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO metrics_history (
                    user_id, platform, day, username,
                    followers, total_engagement, posts_count, recorded_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(user_id, platform, day) DO UPDATE SET
                    username = excluded.username,
                    followers = excluded.followers,
                    total_engagement = excluded.total_engagement,
                    posts_count = excluded.posts_count,
                    recorded_at = excluded.recorded_at
                "#,
                params![
                    user_id,
                    platform,
                    day,
                    metrics.account_info.username,
                    metrics.account_info.followers as i64,
                    total_engagement,
                    metrics.posts.len() as i64,
                    now.to_rfc3339(),
                ],
            )
            .context("Failed to record metrics snapshot")?;

        Ok(())
    }

    /// Most recent snapshot for an account no older than `max_age_days`.
    pub fn latest(
        &self,
        user_id: &str,
        platform: &str,
        max_age_days: i64,
    ) -> Result<Option<DailySnapshot>> {
        let cutoff = (Utc::now() - Duration::days(max_age_days)).to_rfc3339();

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT day, username, followers, total_engagement, posts_count, recorded_at
                FROM metrics_history
                WHERE user_id = ?1 AND platform = ?2 AND recorded_at >= ?3
                ORDER BY recorded_at DESC
                LIMIT 1
                "#,
            )
            .context("Failed to prepare query")?;

        let mut rows = stmt
            .query(params![user_id, platform, cutoff])
            .context("Failed to execute query")?;

        match rows.next().context("Failed to read row")? {
            Some(row) => {
                let followers: i64 = row.get(2)?;
                let recorded_at: String = row.get(5)?;
                Ok(Some(DailySnapshot {
                    day: row.get(0)?,
                    username: row.get(1)?,
                    followers: followers.max(0) as u64,
                    total_engagement: row.get(3)?,
                    posts_count: row.get(4)?,
                    recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                        .context("Failed to parse recorded_at")?
                        .with_timezone(&Utc),
                }))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Post;
    use std::collections::HashMap;

    fn sample_metrics(followers: u64, engagement: i64) -> SocialMetrics {
        let mut post_metrics = HashMap::new();
        post_metrics.insert("like_count".to_string(), engagement);
        SocialMetrics::live(
            AccountInfo {
                username: "testuser".to_string(),
                display_name: "Test".to_string(),
                followers,
                following: None,
                profile_image_url: None,
            },
            vec![Post {
                id: "p1".to_string(),
                text: None,
                image_url: None,
                created_at: Utc::now(),
                metrics: post_metrics,
            }],
        )
    }

    #[test]
    fn test_record_and_latest() {
        let history = MetricsHistory::new(":memory:").unwrap();
        history
            .record("u1", "twitter", &sample_metrics(100, 25))
            .unwrap();

        let snapshot = history.latest("u1", "twitter", 1).unwrap().unwrap();
        assert_eq!(snapshot.followers, 100);
        assert_eq!(snapshot.total_engagement, 25);
        assert_eq!(snapshot.posts_count, 1);
        assert_eq!(snapshot.username, "testuser");
    }

    #[test]
    fn test_same_day_record_replaces() {
        let history = MetricsHistory::new(":memory:").unwrap();
        history.record("u1", "twitter", &sample_metrics(100, 25)).unwrap();
        history.record("u1", "twitter", &sample_metrics(110, 30)).unwrap();

        let snapshot = history.latest("u1", "twitter", 1).unwrap().unwrap();
        assert_eq!(snapshot.followers, 110);
        assert_eq!(snapshot.total_engagement, 30);
    }

    #[test]
    fn test_latest_scoped_per_user_and_platform() {
        let history = MetricsHistory::new(":memory:").unwrap();
        history.record("u1", "twitter", &sample_metrics(100, 1)).unwrap();

        assert!(history.latest("u2", "twitter", 1).unwrap().is_none());
        assert!(history.latest("u1", "youtube", 1).unwrap().is_none());
    }

    #[test]
    fn test_snapshot_synthesizes_database_tagged_metrics() {
        let history = MetricsHistory::new(":memory:").unwrap();
        history.record("u1", "twitter", &sample_metrics(100, 25)).unwrap();

        let metrics = history
            .latest("u1", "twitter", 1)
            .unwrap()
            .unwrap()
            .into_metrics();

        assert!(metrics.cache.from_cache);
        assert_eq!(metrics.cache.source, Some(super::CacheSource::Database));
        assert_eq!(metrics.account_info.followers, 100);
        // Aggregate tier carries no per-post detail
        assert!(metrics.posts.is_empty());
    }
}

//! SQLite-backed account store with transparent token encryption.
//!
//! The durable contract other systems (batch refresh, admin tooling) read
//! directly: one row per (user_id, platform) with upsert semantics.

use super::{encryption, SocialAccount, SocialTokens};
use crate::platform::Platform;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

/// Encrypted storage for connected social accounts.
///
/// # Schema
/// ```sql
/// CREATE TABLE social_accounts (
///     id TEXT PRIMARY KEY,
///     user_id TEXT NOT NULL,
///     platform TEXT NOT NULL,
///     platform_user_id TEXT NOT NULL,
///     platform_username TEXT NOT NULL,
///     access_token TEXT NOT NULL,       -- sealed (nonce:ciphertext)
///     refresh_token TEXT,               -- sealed (optional)
///     token_secret TEXT,                -- sealed (optional)
///     expires_at TEXT,                  -- ISO 8601 (optional)
///     scopes TEXT,
///     metadata TEXT NOT NULL,           -- JSON object
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL,
///     UNIQUE(user_id, platform)
/// );
/// ```
///
/// # Thread Safety
/// Connection is wrapped in a Mutex; SQLite itself runs in serialized mode.
pub struct AccountStore {
    conn: Mutex<Connection>,
    encryption_key: Vec<u8>,
}

impl AccountStore {
    /// Creates or opens an account store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let key_bytes =
            encryption::validate_key(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS social_accounts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                platform_user_id TEXT NOT NULL,
                platform_username TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                token_secret TEXT,
                expires_at TEXT,
                scopes TEXT,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, platform)
            )
            "#,
            [],
        )
        .context("Failed to create social_accounts table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_user_platform ON social_accounts(user_id, platform)",
            [],
        )
        .context("Failed to create index")?;

        Ok(Self {
            conn: Mutex::new(conn),
            encryption_key: key_bytes,
        })
    }

    /// Stores an account, replacing any existing row for the same
    /// (user_id, platform) pair.
    ///
    /// `created_at` of an existing row is preserved; `updated_at` always
    /// moves forward.
    pub fn upsert(&self, account: &SocialAccount) -> Result<()> {
        let access_token = encryption::seal(&account.access_token, &self.encryption_key)
            .context("Failed to seal access token")?;

        let refresh_token = account
            .refresh_token
            .as_deref()
            .map(|t| encryption::seal(t, &self.encryption_key))
            .transpose()
            .context("Failed to seal refresh token")?;

        let token_secret = account
            .token_secret
            .as_deref()
            .map(|t| encryption::seal(t, &self.encryption_key))
            .transpose()
            .context("Failed to seal token secret")?;

        let metadata =
            serde_json::to_string(&account.metadata).context("Failed to serialize metadata")?;
        let expires_at = account.expires_at.map(|dt| dt.to_rfc3339());
        let now = Utc::now().to_rfc3339();

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO social_accounts (
                    id, user_id, platform,
                    platform_user_id, platform_username,
                    access_token, refresh_token, token_secret,
                    expires_at, scopes, metadata,
                    created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
                ON CONFLICT(user_id, platform) DO UPDATE SET
                    platform_user_id = excluded.platform_user_id,
                    platform_username = excluded.platform_username,
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    token_secret = excluded.token_secret,
                    expires_at = excluded.expires_at,
                    scopes = excluded.scopes,
                    metadata = excluded.metadata,
                    updated_at = excluded.updated_at
                "#,
                params![
                    account.id,
                    account.user_id,
                    account.platform.as_str(),
                    account.platform_user_id,
                    account.platform_username,
                    access_token,
                    refresh_token,
                    token_secret,
                    expires_at,
                    account.scopes,
                    metadata,
                    now,
                ],
            )
            .context("Failed to store account")?;

        Ok(())
    }

    /// Persists refreshed tokens for an existing account row.
    ///
    /// No-op when the row does not exist (the account may have been
    /// disconnected between read and write; last writer wins).
    pub fn update_tokens(
        &self,
        user_id: &str,
        platform: Platform,
        tokens: &SocialTokens,
    ) -> Result<()> {
        let access_token = encryption::seal(&tokens.access_token, &self.encryption_key)
            .context("Failed to seal access token")?;
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .map(|t| encryption::seal(t, &self.encryption_key))
            .transpose()
            .context("Failed to seal refresh token")?;
        let expires_at = tokens.expires_at.map(|dt| dt.to_rfc3339());
        let now = Utc::now().to_rfc3339();

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                UPDATE social_accounts
                SET access_token = ?1, refresh_token = ?2, expires_at = ?3, updated_at = ?4
                WHERE user_id = ?5 AND platform = ?6
                "#,
                params![
                    access_token,
                    refresh_token,
                    expires_at,
                    now,
                    user_id,
                    platform.as_str()
                ],
            )
            .context("Failed to update tokens")?;

        Ok(())
    }

    /// Retrieves and decrypts the account for a (user, platform) pair.
    pub fn get(&self, user_id: &str, platform: Platform) -> Result<Option<SocialAccount>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, user_id, platform,
                       platform_user_id, platform_username,
                       access_token, refresh_token, token_secret,
                       expires_at, scopes, metadata,
                       created_at, updated_at
                FROM social_accounts
                WHERE user_id = ?1 AND platform = ?2
                "#,
            )
            .context("Failed to prepare query")?;

        let mut rows = stmt
            .query(params![user_id, platform.as_str()])
            .context("Failed to execute query")?;

        match rows.next().context("Failed to read row")? {
            Some(row) => Ok(Some(self.account_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Deletes the account for a (user, platform) pair.
    ///
    /// Returns `true` when a row was removed.
    pub fn delete(&self, user_id: &str, platform: Platform) -> Result<bool> {
        let rows_affected = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "DELETE FROM social_accounts WHERE user_id = ?1 AND platform = ?2",
                params![user_id, platform.as_str()],
            )
            .context("Failed to delete account")?;

        Ok(rows_affected > 0)
    }

    /// Lists all connected accounts for a user.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<SocialAccount>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, user_id, platform,
                       platform_user_id, platform_username,
                       access_token, refresh_token, token_secret,
                       expires_at, scopes, metadata,
                       created_at, updated_at
                FROM social_accounts
                WHERE user_id = ?1
                ORDER BY platform
                "#,
            )
            .context("Failed to prepare query")?;

        let mut rows = stmt
            .query(params![user_id])
            .context("Failed to execute query")?;

        let mut accounts = Vec::new();
        while let Some(row) = rows.next().context("Failed to read row")? {
            accounts.push(self.account_from_row(row)?);
        }
        Ok(accounts)
    }

    /// Lists all (user_id, platform) pairs across all users.
    ///
    /// Used by the batch refresh sweep to enumerate every connected account.
    pub fn list_all(&self) -> Result<Vec<(String, Platform)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT user_id, platform FROM social_accounts ORDER BY user_id, platform")
            .context("Failed to prepare query")?;

        let pairs = stmt
            .query_map([], |row| {
                let user_id: String = row.get(0)?;
                let platform: String = row.get(1)?;
                Ok((user_id, platform))
            })
            .context("Failed to execute query")?
            .collect::<Result<Vec<(String, String)>, _>>()
            .context("Failed to read results")?;

        // Rows with unknown platform names are skipped rather than failing
        // the whole enumeration
        Ok(pairs
            .into_iter()
            .filter_map(|(uid, p)| p.parse::<Platform>().ok().map(|p| (uid, p)))
            .collect())
    }

    fn account_from_row(&self, row: &Row<'_>) -> Result<SocialAccount> {
        let platform_str: String = row.get(2)?;
        let platform: Platform = platform_str
            .parse()
            .context("Unknown platform in social_accounts row")?;

        let access_token_sealed: String = row.get(5)?;
        let access_token = encryption::open(&access_token_sealed, &self.encryption_key)
            .context("Failed to open access token")?;

        let refresh_token: Option<String> = row.get(6)?;
        let refresh_token = refresh_token
            .map(|sealed| encryption::open(&sealed, &self.encryption_key))
            .transpose()
            .context("Failed to open refresh token")?;

        let token_secret: Option<String> = row.get(7)?;
        let token_secret = token_secret
            .map(|sealed| encryption::open(&sealed, &self.encryption_key))
            .transpose()
            .context("Failed to open token secret")?;

        // The row is a durable contract other tooling may write directly.
        // An unparsable expiry degrades to "no expiry info", which forces
        // the refresh path, rather than failing the whole read.
        let expires_at: Option<String> = row.get(8)?;
        let expires_at = expires_at.and_then(|s| match DateTime::parse_from_rfc3339(&s) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(e) => {
                warn!(raw = %s, error = %e, "Unparsable expires_at in account row");
                None
            }
        });

        let metadata: String = row.get(10)?;
        let metadata =
            serde_json::from_str(&metadata).context("Failed to parse metadata JSON")?;

        let created_at: String = row.get(11)?;
        let updated_at: String = row.get(12)?;

        Ok(SocialAccount {
            id: row.get(0)?,
            user_id: row.get(1)?,
            platform,
            platform_user_id: row.get(3)?,
            platform_username: row.get(4)?,
            access_token,
            refresh_token,
            token_secret,
            expires_at,
            scopes: row.get(9)?,
            metadata,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .context("Failed to parse created_at")?
                .with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .context("Failed to parse updated_at")?
                .with_timezone(&Utc),
        })
    }
}

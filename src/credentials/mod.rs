//! Encrypted storage for connected social accounts.
//!
//! One row per (user, platform) pair holds the OAuth tokens, the platform
//! identity, and open metadata for that connection. Tokens are encrypted at
//! rest with AES-256-GCM; the master key comes from `REACH_ENCRYPTION_KEY`.
//!
//! # Security
//! - Access tokens, refresh tokens, and token secrets are sealed separately,
//!   each with a unique nonce
//! - Master key lives in memory only (from env var)
//! - SQLite ACID guarantees prevent partial updates

use crate::platform::Platform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
mod store;

pub use encryption::{open, seal, validate_key};
pub use store::AccountStore;

/// A connected social account: the durable record for one (user, platform)
/// pair.
///
/// Created on successful token exchange, mutated on every refresh or
/// reconnect, deleted on explicit disconnect. The connector framework is the
/// only writer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SocialAccount {
    /// Opaque row identifier (UUID v4).
    pub id: String,
    pub user_id: String,
    pub platform: Platform,
    /// The user's id on the platform (e.g. numeric Twitter id).
    pub platform_user_id: String,
    pub platform_username: String,
    /// OAuth access token. Encrypted at rest.
    pub access_token: String,
    /// OAuth refresh token, absent for platforms without refresh flows.
    /// Encrypted at rest.
    pub refresh_token: Option<String>,
    /// Token secret for 1-legged OAuth schemes. Encrypted at rest.
    pub token_secret: Option<String>,
    /// When the access token expires. `None` means the platform did not
    /// report an expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted scopes, informational.
    pub scopes: Option<String>,
    /// Open key-value map: display name, avatar URL, follower snapshot.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SocialAccount {
    /// Extracts the transient token view used by connectors.
    pub fn tokens(&self) -> SocialTokens {
        SocialTokens {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            token_secret: self.token_secret.clone(),
            expires_at: self.expires_at,
            scopes: self.scopes.clone(),
        }
    }

}

/// Transient token bundle passed between connectors and the lifecycle
/// manager. Never persisted as its own entity; always folded back into a
/// [`SocialAccount`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SocialTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_secret: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Option<String>,
}

impl SocialTokens {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_secret: None,
            expires_at: None,
            scopes: None,
        }
    }
}

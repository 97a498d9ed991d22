//! Server-side handshake session storage.
//!
//! One of the two channels carrying in-flight OAuth handshake data (the
//! other is the encrypted cookie). Sessions are keyed by a `login_id`
//! embedded in the provider round-trip state, expire after 10 minutes, and
//! are single-use: `take` removes the entry, so a replayed callback finds
//! nothing.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::platform::Platform;

/// In-flight handshake data persisted between the login redirect and the
/// provider callback.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandshakeSession {
    pub user_id: String,
    pub platform: Platform,
    /// CSRF state token (the part of the composite state before the dot).
    pub state: String,
    /// PKCE verifier; `None` for platforms without PKCE.
    pub code_verifier: Option<String>,
    /// Whether this is a reconnect of an existing account.
    pub reconnect: bool,
    pub created_at: DateTime<Utc>,
}

/// In-memory handshake session store with automatic expiry.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, HandshakeSession>>,
    expiry: Duration,
}

impl SessionStore {
    /// `expiry_seconds` bounds how long a handshake may stay open
    /// (default: 600 = 10 minutes).
    pub fn new(expiry_seconds: i64) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            expiry: Duration::seconds(expiry_seconds),
        }
    }

    /// Stores a session under its `login_id`. The caller generates the id
    /// because it is embedded in the provider state before storage.
    pub fn insert(&self, login_id: &str, session: HandshakeSession) {
        self.sessions.insert(login_id.to_string(), session);
    }

    /// Removes and returns the session if present and unexpired.
    ///
    /// Single-use: expired or already-consumed ids yield `None`.
    pub fn take(&self, login_id: &str) -> Option<HandshakeSession> {
        let (_, session) = self.sessions.remove(login_id)?;
        if Utc::now() - session.created_at > self.expiry {
            return None;
        }
        Some(session)
    }

    /// Drops expired sessions; called periodically from a background task.
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.sessions
            .retain(|_, session| now - session.created_at <= self.expiry);
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

/// Background task that periodically drops expired handshake sessions.
pub async fn run_session_cleanup(store: SessionStore, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        store.cleanup_expired();
        tracing::debug!(
            remaining = store.count(),
            "Handshake session cleanup complete"
        );
    }
}

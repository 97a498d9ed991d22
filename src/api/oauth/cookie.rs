//! Encrypted handshake cookie, the browser-side handshake channel.
//!
//! The cookie mirrors the server-side session so the callback can recover
//! handshake data even when the process restarted mid-handshake. The payload
//! is sealed with the same AEAD key as stored credentials; a tampered or
//! garbled cookie simply fails to open and the callback falls back to the
//! session store.

use super::session::HandshakeSession;
use crate::credentials::{open, seal};
use crate::platform::Platform;
use anyhow::{Context, Result};
use axum::http::HeaderMap;
use tracing::debug;

const MAX_AGE_SECS: u32 = 600;

/// Cookie name for a platform's handshake, e.g. `twitter_oauth_data`.
pub fn cookie_name(platform: Platform) -> String {
    format!("{}_oauth_data", platform)
}

/// `Set-Cookie` value carrying the sealed handshake payload.
///
/// `SameSite=None` because the provider redirects back cross-site; `Secure`
/// is required for that to be accepted.
pub fn set_header(platform: Platform, session: &HandshakeSession, key: &[u8]) -> Result<String> {
    let payload = serde_json::to_string(session).context("Failed to serialize handshake")?;
    let sealed = seal(&payload, key)?;
    Ok(format!(
        "{}={}; HttpOnly; Secure; SameSite=None; Max-Age={}; Path=/",
        cookie_name(platform),
        sealed,
        MAX_AGE_SECS
    ))
}

/// `Set-Cookie` value that clears the handshake cookie.
pub fn clear_header(platform: Platform) -> String {
    format!(
        "{}=; HttpOnly; Secure; SameSite=None; Max-Age=0; Path=/",
        cookie_name(platform)
    )
}

/// Recovers the handshake from the request's cookie, if possible.
///
/// Returns `None` for a missing, unreadable, or tampered cookie; the caller
/// falls back to the session store.
pub fn read(platform: Platform, headers: &HeaderMap, key: &[u8]) -> Option<HandshakeSession> {
    let name = cookie_name(platform);
    let sealed = headers
        .get("cookie")?
        .to_str()
        .ok()?
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)?;

    match open(sealed, key) {
        Ok(payload) => serde_json::from_str(&payload).ok(),
        Err(e) => {
            debug!(platform = %platform, error = %e, "Handshake cookie failed to open");
            None
        }
    }
}

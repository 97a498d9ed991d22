//! Typed failure taxonomy for the connector contract.
//!
//! Callers match on the variant to decide policy: configuration errors are
//! fatal and never retried, exchange/refresh failures carry the upstream
//! status and body for server-side logs, and the metrics cache absorbs any
//! runtime failure by serving stale data.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Missing or invalid platform configuration (client id/secret/redirect
    /// URI). Fatal at first use; distinct from runtime errors.
    #[error("platform not configured: {0}")]
    Config(String),

    /// Token endpoint returned non-2xx or an unparseable body during the
    /// code-for-token exchange.
    #[error("token exchange failed with status {status}: {body}")]
    Exchange { status: u16, body: String },

    /// Token endpoint returned non-2xx or an unparseable body during refresh.
    #[error("token refresh failed with status {status}: {body}")]
    Refresh { status: u16, body: String },

    /// Upstream returned HTTP 429; retry-later signal, never retried
    /// synchronously.
    #[error("rate limited by platform API")]
    RateLimited,

    /// Data API returned a non-2xx status outside the rate-limit case.
    #[error("platform API returned status {status}: {body}")]
    Api { status: u16, body: String },

    /// Network-level failure (includes request timeouts).
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body did not match the expected shape.
    #[error("failed to parse platform response: {0}")]
    Parse(String),
}

//! Server configuration (TOML file) and per-platform OAuth credentials
//! (environment variables).

use crate::connector::ConnectorError;
use crate::platform::Platform;
use serde::Deserialize;

/// Complete Reach configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReachConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Base URL prefixed to `/callback/{platform}` in redirect URIs and
    /// used when provider env vars omit one.
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
    /// Where the browser lands after a completed OAuth flow.
    #[serde(default = "default_dashboard_url")]
    pub dashboard_url: String,
    /// Where the browser lands after a failed OAuth flow.
    #[serde(default = "default_accounts_url")]
    pub accounts_url: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_callback_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_dashboard_url() -> String {
    "/dashboard".to_string()
}

fn default_accounts_url() -> String {
    "/accounts".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            callback_base_url: default_callback_base_url(),
            dashboard_url: default_dashboard_url(),
            accounts_url: default_accounts_url(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "reach.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Metrics cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// TTL for profile/items/metrics entries in the memory tier (seconds)
    #[serde(default = "default_memory_ttl")]
    pub memory_ttl_secs: u64,
    /// TTL for historical-metrics entries in the memory tier (seconds)
    #[serde(default = "default_historical_ttl")]
    pub historical_ttl_secs: u64,
    /// Maximum age of a daily snapshot served from the durable tier (days)
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
}

fn default_memory_ttl() -> u64 {
    300
}

fn default_historical_ttl() -> u64 {
    900
}

fn default_max_age_days() -> i64 {
    1
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_ttl_secs: default_memory_ttl(),
            historical_ttl_secs: default_historical_ttl(),
            max_age_days: default_max_age_days(),
        }
    }
}

/// Batch token-refresh sweep configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_enabled")]
    pub enabled: bool,
    #[serde(default = "default_batch_interval")]
    pub interval_secs: u64,
}

fn default_batch_enabled() -> bool {
    true
}

fn default_batch_interval() -> u64 {
    21600 // 6 hours
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: default_batch_enabled(),
            interval_secs: default_batch_interval(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<ReachConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ReachConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// OAuth client credentials for one platform, read from the environment.
#[derive(Clone, Debug)]
pub struct PlatformCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl PlatformCredentials {
    /// Reads `{PLATFORM}_CLIENT_ID`, `{PLATFORM}_CLIENT_SECRET`, and
    /// `{PLATFORM}_REDIRECT_URI`. A missing client id or secret is a
    /// configuration error at first use, never a generic network error
    /// later; a missing redirect URI falls back to
    /// `{callback_base_url}/callback/{platform}`.
    pub fn from_env(
        platform: Platform,
        callback_base_url: &str,
    ) -> Result<Self, ConnectorError> {
        let prefix = platform.env_prefix();
        let var = |suffix: &str| -> Result<String, ConnectorError> {
            let name = format!("{}_{}", prefix, suffix);
            std::env::var(&name)
                .map_err(|_| ConnectorError::Config(format!("missing environment variable {}", name)))
        };

        let redirect_uri = var("REDIRECT_URI")
            .unwrap_or_else(|_| default_redirect_uri(platform, callback_base_url));

        Ok(Self {
            client_id: var("CLIENT_ID")?,
            client_secret: var("CLIENT_SECRET")?,
            redirect_uri,
        })
    }
}

fn default_redirect_uri(platform: Platform, callback_base_url: &str) -> String {
    format!(
        "{}/callback/{}",
        callback_base_url.trim_end_matches('/'),
        platform
    )
}

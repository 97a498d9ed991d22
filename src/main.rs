use anyhow::{Context, Result};
use reach::api::oauth::{run_session_cleanup, SessionStore};
use reach::api::{create_router, AppState};
use reach::batch::run_refresh_sweep;
use reach::config::load_config;
use reach::connector::ConnectorRegistry;
use reach::credentials::{validate_key, AccountStore};
use reach::metrics::{MetricsCache, MetricsHistory};
use std::sync::Arc;
use tracing::info;

const SESSION_EXPIRY_SECS: i64 = 600;
const SESSION_CLEANUP_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reach=info".into()),
        )
        .init();

    info!("Reach starting...");

    let config_path =
        std::env::var("REACH_CONFIG").unwrap_or_else(|_| "reach.toml".to_string());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            info!(path = %config_path, error = %e, "Config file not loaded; using defaults");
            reach::config::ReachConfig::default()
        }
    };

    let encryption_key_b64 = std::env::var("REACH_ENCRYPTION_KEY")
        .context("REACH_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;
    let encryption_key = validate_key(&encryption_key_b64)?;

    info!(
        bind_addr = %config.server.bind_addr,
        db_path = %config.storage.db_path,
        batch_enabled = config.batch.enabled,
        "Configuration loaded"
    );

    let accounts = Arc::new(
        AccountStore::new(&config.storage.db_path, &encryption_key_b64)
            .context("Failed to initialize account store")?,
    );
    info!("Account store initialized");

    let history = Arc::new(
        MetricsHistory::new(&config.storage.db_path)
            .context("Failed to initialize metrics history")?,
    );
    let cache = Arc::new(MetricsCache::new(Arc::clone(&history), config.cache.clone()));

    let registry = Arc::new(
        ConnectorRegistry::new(&config.server.callback_base_url)
            .context("Failed to build HTTP client")?,
    );

    let sessions = SessionStore::new(SESSION_EXPIRY_SECS);
    tokio::spawn(run_session_cleanup(
        sessions.clone(),
        SESSION_CLEANUP_INTERVAL_SECS,
    ));

    if config.batch.enabled {
        tokio::spawn(run_refresh_sweep(
            Arc::clone(&accounts),
            Arc::clone(&registry),
            config.batch.interval_secs,
        ));
        info!(
            interval_secs = config.batch.interval_secs,
            "Refresh sweep scheduled"
        );
    }

    let bind_addr = config.server.bind_addr.clone();
    let state = AppState {
        accounts,
        cache,
        registry,
        sessions,
        encryption_key,
        config,
    };

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context("Failed to bind API port")?;
    info!(addr = %bind_addr, "API listening");

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

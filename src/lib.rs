// Platform identifiers
pub mod platform;

// Service configuration and platform credentials
pub mod config;

// Platform connectors: OAuth flows and metrics retrieval
pub mod connector;

// Encrypted account storage
pub mod credentials;

// Token lifecycle management
pub mod lifecycle;

// Metrics read model and tiered cache
pub mod metrics;

// Dashboard-facing HTTP API
pub mod api;

// Periodic token refresh sweep
pub mod batch;

//! Domogik REST gateway
//!
//! Serves the gateway dispatcher over HTTP: each request path is handed to
//! [`domogik_core::dispatch::Dispatcher`] and the rendered envelope is sent
//! back as JSON (or JSONP).

pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod server;

use server::{ServerConfig, start_server};
use tracing_subscriber::EnvFilter;

/// Start the gateway with the default configuration
pub async fn start() -> anyhow::Result<()> {
    start_with_config(ServerConfig::default(), "info").await
}

/// Start the gateway with a custom configuration
pub async fn start_with_config(config: ServerConfig, log_level: &str) -> anyhow::Result<()> {
    // RUST_LOG wins over the command line level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    start_server(config).await
}

use std::{net::SocketAddr, path::Path};

use axum::response::{IntoResponse, Response};
use domogik_core::{Gateway, InternalResult, config::GatewayConfig, dispatch::Dispatcher};
use serde::{Deserialize, Serialize};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::{error::AppError, routes::create_router};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Gateway configuration: queues, tickets, bus and commands
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    40405
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> InternalResult<Self> {
        domogik_core::config::from_file(path)
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl From<&Gateway> for AppState {
    fn from(gateway: &Gateway) -> Self {
        Self::new(gateway.dispatcher.clone())
    }
}

/// Full application router with its layers, ready to serve.
pub fn build_app(state: AppState) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    create_router()
        .with_state(state)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn handle_panic(_: Box<dyn std::any::Any + Send + 'static>) -> Response {
    AppError::Internal("request handler panicked".to_string()).into_response()
}

/// Start the HTTP server
pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    let gateway = Gateway::new(config.gateway);
    let tasks = gateway.start()?;
    info!("Initialized gateway");

    let app = build_app(AppState::from(&gateway));

    let addr = format!("{}:{}", config.host, config.port).parse::<SocketAddr>()?;
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await;

    tasks.shutdown();
    served?;
    Ok(())
}

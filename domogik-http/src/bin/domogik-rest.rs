use std::path::PathBuf;

use clap::Parser;
use domogik_http::server::ServerConfig;

/// Domogik REST gateway
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Host address to bind to
    #[arg(short = 'H', long, env = "DOMOGIK_REST_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "DOMOGIK_REST_PORT")]
    port: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    // Command line flags override the file
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    domogik_http::start_with_config(config, &cli.log_level).await
}

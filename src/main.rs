//! Walkie Talkie server entry point

use clap::Parser;
use std::path::PathBuf;

use walkie_talkie::config::load_settings;

/// Voice-and-text WebSocket gateway to Claude
#[derive(Debug, Parser)]
#[command(name = "walkie-server", version, about)]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, env = "WT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // INFO level by default, RUST_LOG overrides
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    walkie_talkie::server::start(settings).await
}

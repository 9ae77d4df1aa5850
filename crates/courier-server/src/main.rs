//! # Courier
//!
//! STOMP-style publish/subscribe message broker.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! courier
//!
//! # Run with custom config
//! courier --config /path/to/courier.toml
//!
//! # Run with environment variables
//! COURIER_PORT=61613 COURIER_HOST=0.0.0.0 courier
//! ```

mod config;
mod delivery;
mod engine;
mod metrics;
mod server;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "courier", version, about = "STOMP-style message broker")]
struct Args {
    /// Configuration file. Without it the default locations are searched.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    port: Option<u16>,
}

impl Args {
    fn load_config(&self) -> Result<config::Config> {
        let mut config = match &self.config {
            Some(path) => config::Config::from_file(path)?,
            None => config::Config::load()?,
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,courier_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = args.load_config()?;

    tracing::info!("Starting Courier on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    server::run_server(config).await?;

    Ok(())
}

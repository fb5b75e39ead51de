//! Feed relay (v1)
//!
//! Relays a ZeroMQ market-data feed to WebSocket clients.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────┐
//!                       │                    FEED RELAY                    │
//!                       │                                                  │
//!   Engine (PUB)        │  ┌────────────┐    ┌─────────────┐               │
//!   ────────────────────┼─▶│ upstream   │───▶│ broadcaster │               │
//!                       │  │ subscriber │    └──────┬──────┘               │
//!                       │  └────────────┘           │ snapshot             │
//!                       │                           ▼                      │
//!                       │                    ┌─────────────┐               │
//!                       │                    │  registry   │               │
//!                       │                    └──────┬──────┘               │
//!                       │                           │ per-client queues    │
//!                       │                           ▼                      │
//!   WebSocket clients   │  ┌────────────┐    ┌─────────────┐               │
//!   ◀───────────────────┼──│   http     │◀───│  lifecycle  │               │
//!                       │  │  server    │    │  handlers   │               │
//!                       │  └────────────┘    └─────────────┘               │
//!                       └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use feed_relay::config::{load_config, validation::validate_config, ConfigError};
use feed_relay::lifecycle::signals::wait_for_signal;
use feed_relay::observability::{logging, metrics};
use feed_relay::{RelayServer, Shutdown};

#[derive(Parser)]
#[command(name = "feed-relay")]
#[command(about = "Relay a ZeroMQ feed to WebSocket clients", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upstream publisher endpoint (overrides config and environment).
    #[arg(short, long)]
    upstream: Option<String>,

    /// Listen address (overrides config and environment).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(upstream) = cli.upstream {
        config.upstream.endpoint = upstream;
    }
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability);
    tracing::info!("feed-relay v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        ws_path = %config.listener.ws_path,
        upstream = %config.upstream.endpoint,
        queue_capacity = config.broadcast.queue_capacity,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    // Bind TCP listener
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let server = RelayServer::new(config, shutdown);
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

//! # tether
//!
//! Session router binary: wires the default toolbox handler to the HTTP
//! server and runs until interrupted.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tether_server::{ResponseMode, ServerConfig, ToolboxHandler};

/// Tether session router.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "Session-affinity router for streamable HTTP")]
struct Cli {
    /// Host to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, default_value = "3000")]
    port: u16,

    /// Stream POST responses as SSE instead of buffered JSON.
    #[arg(long)]
    stream: bool,

    /// Per-session event log capacity.
    #[arg(long, default_value = "4096")]
    max_events: usize,

    /// Idle session eviction threshold in seconds (0 disables the reaper).
    #[arg(long, default_value = "1800")]
    idle_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = ServerConfig {
        bind: cli.host,
        port: cli.port,
        response_mode: if cli.stream {
            ResponseMode::Stream
        } else {
            ResponseMode::Json
        },
        max_events: cli.max_events,
        idle_timeout_secs: cli.idle_timeout_secs,
        ..ServerConfig::default()
    };

    let handler = Arc::new(ToolboxHandler::new("tether", env!("CARGO_PKG_VERSION")));
    let handle = tether_server::start(config, handler).await?;

    tracing::info!(port = handle.port, "tether ready at /mcp");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    handle.shutdown();
    Ok(())
}

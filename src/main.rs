//! API Gateway
//!
//! Single entry point in front of the bookstore backend services.
//!
//! # Architecture Overview
//!
//! ```text
//!                              ┌──────────────────────────────────────────────────────┐
//!                              │                     API GATEWAY                       │
//!                              │                                                       │
//!     Client Request           │  ┌─────────┐    ┌──────────────┐                      │
//!     ─────────────────────────┼─▶│  http   │───▶│ route table  │                      │
//!                              │  │ server  │    │ (service →   │                      │
//!                              │  └─────────┘    │  BackendRoute)│                     │
//!                              │                 └──────┬───────┘                      │
//!                              │          /api/{svc}    │    /ws/{svc}                 │
//!                              │         ┌──────────────┴─────────────┐                │
//!                              │         ▼                            ▼                │
//!                              │  ┌──────────────┐           ┌─────────────────┐       │
//!                              │  │    unary     │           │  tunnel bridge  │       │
//!                              │  │  forwarder   │           │ upgrade? ─ no ─▶│ pass- │
//!                              │  │ (JSON re-    │           │   │ yes         │through│
//!                              │  │  encode)     │           │   ▼             │       │
//!                              │  └──────┬───────┘           │ dial + relay ×2 │       │
//!                              │         │                   └────────┬────────┘       │
//!                              └─────────┼────────────────────────────┼────────────────┘
//!                                        ▼                            ▼
//!                                  Backend REST                 Backend WebSocket
//! ```

use std::path::PathBuf;

use clap::Parser;

use api_gateway::config::{load_config, GatewayConfig};
use api_gateway::lifecycle::{signals, startup};
use api_gateway::observability::logging;
use api_gateway::Shutdown;

#[derive(Parser)]
#[command(name = "api-gateway")]
#[command(about = "HTTP and WebSocket gateway for backend services", long_about = None)]
struct Cli {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);

    tracing::info!("api-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        config_file = ?cli.config,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        signals::wait_for_signal().await;
        trigger.trigger();
    });

    startup::run(config, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

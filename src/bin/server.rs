//! Headless trading core.
//!
//! Runs the worker tree without any UI or HTTP surface; operator
//! configuration beyond the bootstrap environment arrives pre-merged from
//! the surrounding deployment.
//!
//! # Environment Variables
//! - `DATABASE_URL` - SQLite url (default: sqlite://tradecore.db)
//! - `FEE_RATE` - taker fee fraction (default: 0.001)
//! - `CALLBACK_BUDGET_MS` - per-callback script budget (default: 500)
//! - `RUST_LOG` - tracing filter

use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::prelude::*;

use tradecore::application::system::Application;
use tradecore::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("tradecore server {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();
    info!(
        "Configuration loaded: exchanges={}, strategies={}",
        config.exchanges.len(),
        config.strategies.len()
    );

    let app = Application::build(config).await?;
    let handle = app.start().await?;
    info!("Trading system running. Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    handle.shutdown().await;

    Ok(())
}

//! Gateway server binary.
//!
//! Usage: `openlocal-server [--config <path>]`. Without `--config` the file
//! named by `OPENLOCAL_CONFIG` is used; environment variables override it.

use openlocal::config::{GatewayConfig, config_path_from};
use openlocal::{AppState, GatewayServer};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = config_path_from(std::env::args().skip(1), |name| std::env::var(name).ok());
    let config = GatewayConfig::load(config_path.as_deref())?;
    tracing::info!(
        "openlocal v{} starting (chat={}, audio={}, backend={})",
        env!("CARGO_PKG_VERSION"),
        config.chat.model_id,
        config.audio.model_id,
        config.audio.backend
    );

    let registry = openlocal::startup::build_registry(&config)
        .await
        .map_err(|e| anyhow::anyhow!("startup failed: {e}"))?;

    let bind_addr = config.bind_addr();
    let state = AppState {
        registry: Arc::new(registry),
        config: Arc::new(config),
    };
    let server = GatewayServer::start(state, &bind_addr).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.shutdown();
    Ok(())
}

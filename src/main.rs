mod battle;
mod config;
mod ecs;
mod game;
mod net;
mod util;

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::game::context::GameContext;
use crate::game::persistence::MemoryStore;
use crate::net::transport::TcpServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    info!("Steel Arena Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    if let Err(e) = config.validate() {
        anyhow::bail!("invalid configuration: {e}");
    }
    info!(
        "Configuration loaded: {}:{}, tick_rate={}",
        config.bind_address, config.port, config.tick_rate
    );

    let ctx = GameContext::new(config, Arc::new(MemoryStore::new()));
    info!("{} maps registered", ctx.maps.all().len());

    let server = TcpServer::bind(ctx.clone()).await?;
    info!("Server ready on {}", server.local_addr()?);

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {e}");
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    for battle in ctx.battles.all() {
        battle.finish();
    }
    info!("Server stopped");

    Ok(())
}

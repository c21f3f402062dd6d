//! Arena Lobby Server
//!
//! Binary entrypoint: install logging, read configuration from the
//! environment, and serve the matchmaking endpoint until shutdown.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use arena_lobby::network::auth::OpenDirectory;
use arena_lobby::{LobbyServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let config = ServerConfig::from_env();

    info!("Arena Lobby Server v{}", VERSION);
    info!("Bind address: {}", config.bind_addr);
    info!(
        "Port range: {}..={}",
        config.lobby.port_range.start(),
        config.lobby.port_range.end()
    );
    info!("Match runner: {}", config.lobby.runner.binary.display());

    if !config.auth.is_configured() {
        anyhow::bail!("AUTH_SECRET is not set; refusing to accept unauthenticated joins");
    }

    // The token issuer is the gatekeeper: any subject it signed for is a
    // valid player. Swap the directory to restrict admission further.
    let server = LobbyServer::new(config, Arc::new(OpenDirectory));
    server.run().await.context("server terminated")?;
    Ok(())
}

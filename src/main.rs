//! Chain Reaction Game Server
//!
//! Authoritative server. Configuration comes from `CR_*` environment
//! variables; log level from `RUST_LOG`.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use chain_reaction::{
    network::{GameServer, ServerConfig},
    VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    info!("Chain Reaction Server v{}", VERSION);

    let config = ServerConfig::from_env().context("invalid server configuration")?;
    info!(
        bind = %config.bind_addr,
        idle_timeout = ?config.idle_timeout,
        seed = config.seed,
        "configuration loaded"
    );

    let server = GameServer::new(config);
    tokio::select! {
        result = server.run() => result.context("server stopped")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            server.shutdown();
        }
    }
    Ok(())
}

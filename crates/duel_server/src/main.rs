//! Main application entry point for the duel server.
//!
//! Parses the CLI, loads configuration, initialises logging, connects to
//! the coordination store and runs the server until a termination signal.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use duel_server::config::{self, Args};
use duel_server::logging::setup_logging;
use duel_server::notify::HttpPeerNotifier;
use duel_server::shutdown::setup_shutdown_handler;
use duel_server::store::RedisStore;
use duel_server::GameServer;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = config::load_config(&args).await?;
    config.apply_overrides(&args);
    setup_logging(&args, config.logging.as_ref())?;

    let server_id = config.server.resolve_server_id();
    info!(%server_id, "duel server starting");

    let store = RedisStore::connect(&config.server.store_url)
        .await
        .context("failed to connect to the coordination store")?;
    let notifier = Arc::new(HttpPeerNotifier::new(config.server.peer_port));

    let server = Arc::new(GameServer::new(
        config,
        server_id,
        Arc::new(store),
        notifier,
    ));

    let shutdown_rx = setup_shutdown_handler().await;
    let run = {
        let server = server.clone();
        tokio::spawn(async move { server.start().await })
    };

    tokio::select! {
        result = run => result??,
        _ = shutdown_rx => {
            info!("shutting down");
            server.stop();
            // Give in-flight tasks a moment to observe the signal.
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
    }

    info!("duel server stopped");
    Ok(())
}

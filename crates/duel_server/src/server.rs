//! Server wiring and lifecycle.
//!
//! `GameServer` owns the store handle and the coordination services, binds
//! both listeners (player WebSocket + peer HTTP) and runs the background
//! loops until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::duel::DuelService;
use crate::matchmaking::{Matchmaker, MatchmakingTiming};
use crate::notify::{rest_router, PeerNotifier, RestState};
use crate::session::{PlayerRegistry, SessionManager};
use crate::stock::StockService;
use crate::store::CoordinationStore;
use crate::trade::TradeService;

const STORE_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// One game-server instance.
pub struct GameServer {
    config: Config,
    server_id: String,
    store: Arc<dyn CoordinationStore>,
    stock: Arc<StockService>,
    duels: Arc<DuelService>,
    matchmaker: Arc<Matchmaker>,
    sessions: Arc<SessionManager>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Wires the full service graph over the given store and notifier.
    pub fn new(
        config: Config,
        server_id: impl Into<String>,
        store: Arc<dyn CoordinationStore>,
        notifier: Arc<dyn PeerNotifier>,
    ) -> Self {
        let server_id = server_id.into();
        let registry = Arc::new(PlayerRegistry::new());
        let stock = Arc::new(StockService::new(store.clone()));
        let duels = Arc::new(DuelService::new(
            store.clone(),
            registry.clone(),
            &server_id,
            config.timing.turn_timeout(),
        ));
        let matchmaker = Arc::new(Matchmaker::new(
            store.clone(),
            duels.clone(),
            notifier,
            &server_id,
            MatchmakingTiming {
                match_timeout: config.timing.match_timeout(),
                pairing_interval: config.timing.pairing_interval(),
                lock_ttl: config.timing.matchmaker_lock_ttl(),
            },
        ));
        let trades = Arc::new(TradeService::new(
            store.clone(),
            &server_id,
            config.timing.trade_lock_ttl(),
        ));
        let sessions = Arc::new(SessionManager::new(
            registry,
            store.clone(),
            stock.clone(),
            matchmaker.clone(),
            duels.clone(),
            trades,
            &server_id,
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            server_id,
            store,
            stock,
            duels,
            matchmaker,
            sessions,
            shutdown_tx,
        }
    }

    /// Requests a graceful stop of all loops started by [`start`](Self::start).
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Runs the instance until shutdown.
    pub async fn start(&self) -> Result<()> {
        info!(server_id = %self.server_id, "starting duel server");

        tokio::time::timeout(STORE_PING_TIMEOUT, self.store.ping())
            .await
            .context("coordination store ping timed out")?
            .context("coordination store unreachable")?;
        info!("coordination store connection established");

        let seed = self.config.server.stock_seed.unwrap_or_else(rand::random);
        self.stock
            .initialise(seed)
            .await
            .context("failed to initialise the card stock")?;

        let ws_listener = TcpListener::bind(&self.config.server.listen_addr)
            .await
            .with_context(|| {
                format!("failed to bind {}", self.config.server.listen_addr)
            })?;
        info!(addr = %self.config.server.listen_addr, "player WebSocket listener bound");

        let rest_listener = TcpListener::bind(&self.config.server.rest_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.server.rest_addr))?;
        info!(addr = %self.config.server.rest_addr, "peer HTTP listener bound");

        let rest_state = Arc::new(RestState {
            duels: self.duels.clone(),
            stock: self.stock.clone(),
            server_id: self.server_id.clone(),
        });
        let mut rest_shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let serve = axum::serve(rest_listener, rest_router(rest_state))
                .with_graceful_shutdown(async move {
                    let _ = rest_shutdown.recv().await;
                });
            if let Err(err) = serve.await {
                error!(%err, "peer HTTP server failed");
            }
        });

        self.matchmaker
            .clone()
            .spawn_pairing_loop(self.shutdown_tx.subscribe());

        let mut shutdown = self.shutdown_tx.subscribe();
        info!(server_id = %self.server_id, "duel server ready");
        loop {
            tokio::select! {
                accepted = ws_listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let sessions = self.sessions.clone();
                        tokio::spawn(sessions.handle_connection(stream, addr));
                    }
                    Err(err) => warn!(%err, "failed to accept connection"),
                },
                _ = shutdown.recv() => {
                    info!("accept loop stopping");
                    break;
                }
            }
        }
        Ok(())
    }
}

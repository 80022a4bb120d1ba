//! Cross-instance matchmaking.
//!
//! The queue is a single sorted set scored by enqueue time. Every instance
//! runs the pairing pass on a timer, but only the one holding the store-wide
//! lock proceeds; the atomic two-member removal is the commit point, so two
//! racing instances can never pair the same ticket twice.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::duel::DuelService;
use crate::error::CoreError;
use crate::notify::PeerNotifier;
use crate::session::PlayerSession;
use crate::store::{CoordinationStore, MATCHMAKER_LOCK_KEY, MATCHMAKING_QUEUE_KEY};
use crate::types::{MatchNotification, MatchTicket, Phase};

/// Timing knobs for the matchmaking service.
#[derive(Debug, Clone)]
pub struct MatchmakingTiming {
    /// How long a player waits in the queue before `NO_MATCH_FOUND`.
    pub match_timeout: Duration,
    /// Period of the pairing pass.
    pub pairing_interval: Duration,
    /// TTL of `lock:matchmaker`; bounds the damage of a crashed pairer.
    pub lock_ttl: Duration,
}

/// First-come-first-served pairing over the shared queue.
pub struct Matchmaker {
    store: Arc<dyn CoordinationStore>,
    duels: Arc<DuelService>,
    notifier: Arc<dyn PeerNotifier>,
    server_id: String,
    timing: MatchmakingTiming,
}

impl Matchmaker {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        duels: Arc<DuelService>,
        notifier: Arc<dyn PeerNotifier>,
        server_id: impl Into<String>,
        timing: MatchmakingTiming,
    ) -> Self {
        Self {
            store,
            duels,
            notifier,
            server_id: server_id.into(),
            timing,
        }
    }

    /// Puts the player into the shared queue and arms their wait timer.
    pub async fn enqueue(self: Arc<Self>, session: &Arc<PlayerSession>) {
        let flipped = session.with_data(|d| {
            if d.phase == Phase::Menu {
                d.phase = Phase::Searching;
                true
            } else {
                false
            }
        });
        if !flipped {
            session.send("Você já está procurando uma partida.");
            return;
        }

        let ticket = MatchTicket {
            player_name: session.name.clone(),
            server_id: self.server_id.clone(),
            enqueued_at: unix_now(),
        };
        let member = match serde_json::to_string(&ticket) {
            Ok(member) => member,
            Err(err) => {
                error!(player = %session.name, %err, "failed to encode ticket");
                session.with_data(|d| d.phase = Phase::Menu);
                session.send("Erro interno ao entrar na fila. Tente novamente.");
                return;
            }
        };

        if let Err(err) = self
            .store
            .zset_add(MATCHMAKING_QUEUE_KEY, ticket.enqueued_at, &member)
            .await
        {
            error!(player = %session.name, %err, "failed to enqueue for matchmaking");
            session.with_data(|d| d.phase = Phase::Menu);
            session.send("Erro interno ao entrar na fila. Tente novamente.");
            return;
        }

        info!(player = %session.name, "enqueued for matchmaking");
        session.send("Entrou na fila de matchmaking. Aguardando oponente...");

        let session = session.clone();
        tokio::spawn(async move { self.run_wait_timer(session).await });
    }

    /// Removes an unpaired player from the queue once the wait expires.
    async fn run_wait_timer(&self, session: Arc<PlayerSession>) {
        tokio::time::sleep(self.timing.match_timeout).await;

        let still_searching = session.with_data(|d| {
            if d.phase == Phase::Searching {
                d.phase = Phase::Menu;
                true
            } else {
                false
            }
        });
        if !still_searching {
            return;
        }

        let members = match self.store.zset_range(MATCHMAKING_QUEUE_KEY, 0, -1).await {
            Ok(members) => members,
            Err(err) => {
                error!(player = %session.name, %err, "failed to scan queue for timeout");
                return;
            }
        };

        let needle = format!("\"player_name\":\"{}\"", session.name);
        let Some(member) = members.into_iter().find(|m| m.contains(&needle)) else {
            return;
        };

        match self
            .store
            .zset_remove(MATCHMAKING_QUEUE_KEY, &[member])
            .await
        {
            Ok(removed) if removed > 0 => {
                info!(player = %session.name, "removed from queue after wait timeout");
                session.send("NO_MATCH_FOUND");
            }
            Ok(_) => {}
            Err(err) => {
                error!(player = %session.name, %err, "failed to remove expired ticket");
            }
        }
    }

    /// Spawns the periodic pairing pass; stops when `shutdown` fires.
    pub fn spawn_pairing_loop(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let this = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.timing.pairing_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = this.pairing_tick().await {
                            error!(%err, "pairing pass failed");
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("pairing loop stopped");
                        break;
                    }
                }
            }
        })
    }

    /// One pairing pass: lock, drain the two oldest tickets, orchestrate.
    pub async fn pairing_tick(&self) -> Result<(), CoreError> {
        let token = format!("{}-{}", self.server_id, Uuid::new_v4());
        let acquired = self
            .store
            .try_set_if_absent(MATCHMAKER_LOCK_KEY, &token, self.timing.lock_ttl)
            .await?;
        if !acquired {
            // Another instance is pairing this tick.
            return Ok(());
        }

        let outcome = self.pair_once().await;

        if let Err(err) = self
            .store
            .release_lock_if_token_matches(MATCHMAKER_LOCK_KEY, &token)
            .await
        {
            warn!(%err, "failed to release matchmaker lock");
        }
        outcome
    }

    async fn pair_once(&self) -> Result<(), CoreError> {
        let members = self.store.zset_range(MATCHMAKING_QUEUE_KEY, 0, 1).await?;
        if members.len() < 2 {
            return Ok(());
        }

        // Ground truth: whoever removes exactly these two members owns the
        // pairing. Anything else means another pairer got there first.
        let removed = self
            .store
            .zset_remove(MATCHMAKING_QUEUE_KEY, &members)
            .await?;
        if removed != 2 {
            debug!(removed, "lost the pairing race, skipping");
            return Ok(());
        }

        // The zset yields (score, member) order, so members[0] is P1.
        let tickets: Vec<MatchTicket> = members
            .iter()
            .filter_map(|member| match serde_json::from_str(member) {
                Ok(ticket) => Some(ticket),
                Err(err) => {
                    error!(%err, %member, "discarding malformed matchmaking ticket");
                    None
                }
            })
            .collect();
        let [p1, p2] = match <[MatchTicket; 2]>::try_from(tickets) {
            Ok(pair) => pair,
            Err(_) => return Ok(()),
        };

        info!(
            p1 = %p1.player_name, p1_server = %p1.server_id,
            p2 = %p2.player_name, p2_server = %p2.server_id,
            "pairing confirmed"
        );
        self.orchestrate(p1, p2).await
    }

    /// Starts the match on every involved instance.
    ///
    /// Remote instances are notified first; a failure aborts the pairing and
    /// the players' wait timers will surface `NO_MATCH_FOUND`.
    async fn orchestrate(&self, p1: MatchTicket, p2: MatchTicket) -> Result<(), CoreError> {
        let req = MatchNotification {
            player1_name: p1.player_name.clone(),
            player2_name: p2.player_name.clone(),
            server1_id: p1.server_id.clone(),
            server2_id: p2.server_id.clone(),
        };

        let mut remotes: Vec<&str> = [p1.server_id.as_str(), p2.server_id.as_str()]
            .into_iter()
            .filter(|id| *id != self.server_id)
            .collect();
        remotes.dedup();

        for remote in remotes {
            if let Err(err) = self.notifier.notify_match(remote, &req).await {
                error!(
                    remote,
                    p1 = %req.player1_name,
                    p2 = %req.player2_name,
                    %err,
                    "peer notification failed, aborting match"
                );
                return Err(err);
            }
        }

        if p1.server_id == self.server_id || p2.server_id == self.server_id {
            self.duels.clone().start_half_match(&req).await?;
        }
        Ok(())
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

//! Cross-instance duel coordination.
//!
//! Both participating instances run `start_half_match`; only the *owner*
//! (P1's instance) runs the duel brain, which collects moves through the
//! store and finalises the match exactly once, either when both moves are
//! present or at the turn deadline.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::CoreError;
use crate::session::{PlayerRegistry, PlayerSession};
use crate::store::{game_channel, game_state_key, player_channel, CoordinationStore};
use crate::types::{Card, MatchNotification, Phase};

/// One active duel, keyed in the owner and non-owner maps by P1's name.
///
/// Only the locally-hosted side has a hand; the remote participant exists
/// here as a name and server id only.
pub struct Duel {
    pub p1_name: String,
    pub p2_name: String,
    pub p1_server: String,
    pub p2_server: String,
    state: Mutex<DuelState>,
}

#[derive(Default)]
struct DuelState {
    p1_hand: Option<[Card; 2]>,
    p2_hand: Option<[Card; 2]>,
    p1_played: Option<Card>,
    p2_played: Option<Card>,
}

impl Duel {
    fn new(req: &MatchNotification) -> Self {
        Self {
            p1_name: req.player1_name.clone(),
            p2_name: req.player2_name.clone(),
            p1_server: req.server1_id.clone(),
            p2_server: req.server2_id.clone(),
            state: Mutex::new(DuelState::default()),
        }
    }
}

/// Per-match state machine driver.
pub struct DuelService {
    store: Arc<dyn CoordinationStore>,
    registry: Arc<PlayerRegistry>,
    server_id: String,
    turn_timeout: Duration,
    duels: DashMap<String, Arc<Duel>>,
}

impl DuelService {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        registry: Arc<PlayerRegistry>,
        server_id: impl Into<String>,
        turn_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            server_id: server_id.into(),
            turn_timeout,
            duels: DashMap::new(),
        }
    }

    pub fn active_duels(&self) -> usize {
        self.duels.len()
    }

    /// Starts the local half of a paired match.
    ///
    /// Sets up every participant hosted on this instance (both, for a
    /// single-instance duel) and, when this instance owns the duel, spawns
    /// the brain. Fails when neither player is local or when a local deck
    /// cannot produce a hand.
    pub async fn start_half_match(
        self: Arc<Self>,
        req: &MatchNotification,
    ) -> Result<(), CoreError> {
        let mut started = false;
        for is_p1 in [true, false] {
            let name = if is_p1 {
                &req.player1_name
            } else {
                &req.player2_name
            };
            let Some(session) = self.registry.get(name) else {
                continue;
            };
            self.clone().start_for_local(&session, req, is_p1).await?;
            started = true;
        }

        if !started {
            warn!(
                p1 = %req.player1_name,
                p2 = %req.player2_name,
                "match notification received but neither player is local"
            );
            return Err(CoreError::Invariant(format!(
                "nenhum jogador local na partida {} vs {}",
                req.player1_name, req.player2_name
            )));
        }
        Ok(())
    }

    async fn start_for_local(
        self: Arc<Self>,
        session: &Arc<PlayerSession>,
        req: &MatchNotification,
        is_p1: bool,
    ) -> Result<(), CoreError> {
        let Some(hand) = deal_hand(session) else {
            warn!(player = %session.name, "deck too small to start a duel");
            session.send("Erro: Você não tem cartas suficientes (mínimo 2).");
            return Err(CoreError::User(format!(
                "{} não tem cartas suficientes",
                session.name
            )));
        };

        // The record may already exist when this instance hosts both sides.
        let duel = self
            .duels
            .entry(req.player1_name.clone())
            .or_insert_with(|| Arc::new(Duel::new(req)))
            .clone();
        {
            let mut state = duel.state.lock().await;
            if is_p1 {
                state.p1_hand = Some(hand.clone());
            } else {
                state.p2_hand = Some(hand.clone());
            }
        }

        session.with_data(|d| {
            d.phase = Phase::InGame;
            d.duel = Some(req.player1_name.clone());
        });

        // The owner subscribes before the match is announced, so no move
        // notification can slip past the brain.
        let owner = is_p1 && req.server1_id == self.server_id;
        let moves_rx = if owner {
            match self.store.subscribe(&game_channel(&req.player1_name)).await {
                Ok(rx) => Some(rx),
                Err(err) => {
                    error!(duel = %req.player1_name, %err, "brain subscription failed");
                    None
                }
            }
        } else {
            None
        };

        info!(
            player = %session.name,
            opponent = %if is_p1 { &req.player2_name } else { &req.player1_name },
            role = if is_p1 { "P1" } else { "P2" },
            "duel half started"
        );

        session.send("MATCH_FOUND");
        session.send(format!(
            "MATCH_START|{} ({})|{} ({})",
            hand[0].name, hand[0].strength, hand[1].name, hand[1].strength
        ));
        session.send(format!("TIMER|{}", self.turn_timeout.as_secs()));

        if owner {
            let duel = duel.clone();
            tokio::spawn(async move { self.run_brain(duel, moves_rx).await });
        }
        Ok(())
    }

    /// Handles a `"1"` / `"2"` command from a player who is in this duel.
    ///
    /// The move is written to the shared hash first-write-wins, so replays
    /// and cross-instance races cannot overwrite a committed card.
    pub async fn submit_move(
        &self,
        session: &Arc<PlayerSession>,
        duel_key: &str,
        command: &str,
    ) {
        let Some(duel) = self.duels.get(duel_key).map(|entry| entry.clone()) else {
            session.send("Comando inválido.");
            return;
        };

        let choice = match command {
            "1" => 0,
            "2" => 1,
            _ => {
                session.send("Comando inválido. Jogue '1' ou '2'.");
                return;
            }
        };

        let is_p1 = session.name == duel.p1_name;
        let chosen = {
            let state = duel.state.lock().await;
            let hand = if is_p1 { &state.p1_hand } else { &state.p2_hand };
            match hand {
                Some(hand) => hand[choice].clone(),
                None => {
                    error!(player = %session.name, "no local hand in duel record");
                    session.send("Erro interno, tente novamente.");
                    return;
                }
            }
        };

        let field = if is_p1 { "p1_card" } else { "p2_card" };
        let payload = match serde_json::to_string(&chosen) {
            Ok(payload) => payload,
            Err(err) => {
                error!(player = %session.name, %err, "failed to encode move");
                session.send("Erro interno, tente novamente.");
                return;
            }
        };

        let key = game_state_key(&duel.p1_name);
        match self.store.hash_set_if_absent(&key, field, &payload).await {
            Ok(true) => {
                info!(player = %session.name, card = %chosen.name, "move committed");
                if let Err(err) = self
                    .store
                    .publish(&game_channel(&duel.p1_name), "MOVE_MADE")
                    .await
                {
                    error!(player = %session.name, %err, "failed to notify duel brain");
                }
            }
            Ok(false) => session.send("Você já fez sua jogada."),
            Err(err) => {
                error!(player = %session.name, %err, "failed to write move");
                session.send("Erro interno, tente novamente.");
            }
        }
    }

    /// The duel brain. Runs only on the owner instance.
    ///
    /// Resolves as soon as both moves are visible in the store, or at the
    /// deadline with whatever subset arrived.
    async fn run_brain(
        self: Arc<Self>,
        duel: Arc<Duel>,
        moves_rx: Option<tokio::sync::mpsc::Receiver<String>>,
    ) {
        let key = game_state_key(&duel.p1_name);
        let deadline = tokio::time::Instant::now() + self.turn_timeout;

        debug!(duel = %duel.p1_name, "duel brain waiting for moves");

        match moves_rx {
            Some(mut rx) => loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        debug!(duel = %duel.p1_name, "turn deadline reached");
                        break;
                    }
                    notification = rx.recv() => match notification {
                        Some(_) => match self.store.hash_get_all(&key).await {
                            Ok(moves)
                                if moves.contains_key("p1_card")
                                    && moves.contains_key("p2_card") =>
                            {
                                break;
                            }
                            Ok(_) => {}
                            Err(err) => {
                                warn!(duel = %duel.p1_name, %err, "failed to read moves");
                            }
                        },
                        // Subscription lost: hold out until the deadline so a
                        // slow move can still land in the hash.
                        None => {
                            tokio::time::sleep_until(deadline).await;
                            break;
                        }
                    }
                }
            },
            // Without a subscription the hash is only read at the deadline.
            None => tokio::time::sleep_until(deadline).await,
        }

        self.resolve(&duel).await;
    }

    /// Finalises the duel: computes the outcome, delivers both results,
    /// clears shared and local state. Runs at most once per duel.
    async fn resolve(&self, duel: &Arc<Duel>) {
        // A P1 already back in the menu means another path finished first.
        if let Some(p1) = self.registry.get(&duel.p1_name) {
            if p1.phase() != Phase::InGame {
                debug!(duel = %duel.p1_name, "resolution skipped, already finalised");
                return;
            }
        }

        let key = game_state_key(&duel.p1_name);
        let moves = match self.store.hash_get_all(&key).await {
            Ok(moves) => moves,
            Err(err) => {
                error!(duel = %duel.p1_name, %err, "failed to read final moves");
                Default::default()
            }
        };

        let (p1_played, p2_played) = {
            let mut state = duel.state.lock().await;
            state.p1_played = moves
                .get("p1_card")
                .and_then(|raw| serde_json::from_str(raw).ok());
            state.p2_played = moves
                .get("p2_card")
                .and_then(|raw| serde_json::from_str(raw).ok());
            (state.p1_played.clone(), state.p2_played.clone())
        };

        let (result_p1, result_p2) = build_result_messages(
            &duel.p1_name,
            &duel.p2_name,
            p1_played.as_ref(),
            p2_played.as_ref(),
        );
        info!(
            p1 = %duel.p1_name,
            p2 = %duel.p2_name,
            "duel finalised"
        );

        self.deliver(&duel.p1_name, result_p1).await;
        self.deliver(&duel.p2_name, result_p2).await;

        if let Err(err) = self.store.delete(&key).await {
            warn!(duel = %duel.p1_name, %err, "failed to clear duel state hash");
        }
        self.duels.remove(&duel.p1_name);
    }

    /// Delivers a result to a participant: directly when the player is on
    /// this instance, through their store channel otherwise.
    async fn deliver(&self, player_name: &str, message: String) {
        if let Some(session) = self.registry.get(player_name) {
            session.with_data(|d| {
                d.phase = Phase::Menu;
                d.duel = None;
            });
            session.send(message);
        } else if let Err(err) = self
            .store
            .publish(&player_channel(player_name), &message)
            .await
        {
            error!(player = %player_name, %err, "failed to publish duel result");
        }
    }

    /// Non-owner cleanup, invoked when a `RESULT|` payload arrives on the
    /// player's channel: back to the menu, drop the local duel record.
    pub fn clear_remote_half(&self, session: &Arc<PlayerSession>) {
        let duel_key = session.with_data(|d| {
            d.phase = Phase::Menu;
            d.duel.take()
        });
        if let Some(duel_key) = duel_key {
            self.duels.remove(&duel_key);
            debug!(player = %session.name, duel = %duel_key, "remote duel half cleared");
        }
    }
}

/// Samples a 2-card hand from the player's deck without replacement.
///
/// The deck itself is not consumed; `None` when it holds fewer than 2 cards.
fn deal_hand(session: &Arc<PlayerSession>) -> Option<[Card; 2]> {
    session.with_data(|d| {
        if d.deck.len() < 2 {
            return None;
        }
        let mut shuffled = d.deck.clone();
        shuffled.shuffle(&mut rand::thread_rng());
        Some([shuffled[0].clone(), shuffled[1].clone()])
    })
}

/// Builds the `RESULT|…` line for each side from the cards that arrived.
///
/// Higher strength wins; equal strengths draw; a missing card loses to a
/// present one; two missing cards draw.
fn build_result_messages(
    p1_name: &str,
    p2_name: &str,
    p1_card: Option<&Card>,
    p2_card: Option<&Card>,
) -> (String, String) {
    match (p1_card, p2_card) {
        (Some(c1), Some(c2)) => {
            if c1.strength > c2.strength {
                (
                    format!(
                        "RESULT|VITÓRIA|Sua carta {} ({}) venceu {} ({}) de {}.\n",
                        c1.name, c1.strength, c2.name, c2.strength, p2_name
                    ),
                    format!(
                        "RESULT|DERROTA|Sua carta {} ({}) perdeu para {} ({}) de {}.\n",
                        c2.name, c2.strength, c1.name, c1.strength, p1_name
                    ),
                )
            } else if c2.strength > c1.strength {
                (
                    format!(
                        "RESULT|DERROTA|Sua carta {} ({}) perdeu para {} ({}) de {}.\n",
                        c1.name, c1.strength, c2.name, c2.strength, p2_name
                    ),
                    format!(
                        "RESULT|VITÓRIA|Sua carta {} ({}) venceu {} ({}) de {}.\n",
                        c2.name, c2.strength, c1.name, c1.strength, p1_name
                    ),
                )
            } else {
                let draw = format!(
                    "RESULT|EMPATE|Empate! Ambas as cartas têm força {}.\n",
                    c1.strength
                );
                (draw.clone(), draw)
            }
        }
        (None, Some(_)) => (
            "RESULT|DERROTA|Você não jogou a tempo e perdeu.\n".to_string(),
            format!("RESULT|VITÓRIA|{p1_name} não jogou a tempo. Você venceu!\n"),
        ),
        (Some(_), None) => (
            format!("RESULT|VITÓRIA|{p2_name} não jogou a tempo. Você venceu!\n"),
            "RESULT|DERROTA|Você não jogou a tempo e perdeu.\n".to_string(),
        ),
        (None, None) => {
            let draw = "RESULT|EMPATE|Nenhum jogador jogou a tempo. Empate.\n".to_string();
            (draw.clone(), draw)
        }
    }
}

//! Player sessions and connection glue.
//!
//! Each connected player owns a WebSocket; the first text frame names the
//! session. From then on three tasks serve the player: the inbound command
//! loop, a writer task draining the outbound queue, and a subscription loop
//! on the player's store channel for messages produced by other instances.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::duel::DuelService;
use crate::matchmaking::Matchmaker;
use crate::stock::{PackIssue, StockService};
use crate::store::{player_channel, CoordinationStore};
use crate::trade::TradeService;
use crate::types::{Card, Phase};

/// Extra packs a player may open on top of the mandatory welcome pack.
pub const MAX_EXTRA_PACKS: u32 = 3;

/// Mutable per-player state, serialised by the session's single lock.
#[derive(Debug)]
pub struct PlayerData {
    pub deck: Vec<Card>,
    pub packs_opened: u32,
    pub phase: Phase,
    /// Key of the duel the player is in (the duel's P1 name).
    pub duel: Option<String>,
}

/// A player connected to this instance.
///
/// The session is addressable across instances by name only; the socket is
/// reachable solely through the outbound queue, so any core task can send
/// without touching connection internals.
pub struct PlayerSession {
    pub name: String,
    pub server_id: String,
    outbound: mpsc::UnboundedSender<String>,
    data: Mutex<PlayerData>,
}

impl PlayerSession {
    pub fn new(
        name: impl Into<String>,
        server_id: impl Into<String>,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            server_id: server_id.into(),
            outbound,
            data: Mutex::new(PlayerData {
                deck: Vec::new(),
                packs_opened: 0,
                phase: Phase::Menu,
                duel: None,
            }),
        })
    }

    /// Queues a message for the player's socket.
    pub fn send(&self, message: impl Into<String>) {
        if self.outbound.send(message.into()).is_err() {
            debug!(player = %self.name, "dropping message for closed connection");
        }
    }

    pub fn phase(&self) -> Phase {
        self.data.lock().phase
    }

    /// Runs `f` under the per-player lock.
    pub fn with_data<R>(&self, f: impl FnOnce(&mut PlayerData) -> R) -> R {
        f(&mut self.data.lock())
    }
}

/// Instance-wide map of connected players, keyed by name.
#[derive(Default)]
pub struct PlayerRegistry {
    players: DashMap<String, Arc<PlayerSession>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session; fails when the name is already connected.
    pub fn insert(&self, session: Arc<PlayerSession>) -> bool {
        match self.players.entry(session.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    pub fn remove(&self, name: &str) {
        self.players.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<Arc<PlayerSession>> {
        self.players.get(name).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

/// Accepts connections and routes player commands to the core services.
pub struct SessionManager {
    registry: Arc<PlayerRegistry>,
    store: Arc<dyn CoordinationStore>,
    stock: Arc<StockService>,
    matchmaker: Arc<Matchmaker>,
    duels: Arc<DuelService>,
    trades: Arc<TradeService>,
    server_id: String,
}

impl SessionManager {
    pub fn new(
        registry: Arc<PlayerRegistry>,
        store: Arc<dyn CoordinationStore>,
        stock: Arc<StockService>,
        matchmaker: Arc<Matchmaker>,
        duels: Arc<DuelService>,
        trades: Arc<TradeService>,
        server_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            store,
            stock,
            matchmaker,
            duels,
            trades,
            server_id: server_id.into(),
        }
    }

    /// Drives one player connection from handshake to disconnect.
    pub async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(err) => {
                warn!(%addr, %err, "WebSocket handshake failed");
                return;
            }
        };
        let (mut sink, mut stream) = ws.split();

        // The first frame establishes the session name.
        let name = match stream.next().await {
            Some(Ok(Message::Text(text))) => text.trim().to_string(),
            _ => return,
        };
        if name.is_empty() {
            let _ = sink
                .send(Message::Text(
                    "Nome de jogador inválido. Desconectando.".into(),
                ))
                .await;
            return;
        }

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let session = PlayerSession::new(&name, &self.server_id, outbound_tx);
        if !self.registry.insert(session.clone()) {
            warn!(player = %name, %addr, "rejected duplicate player name");
            let _ = sink
                .send(Message::Text(
                    "Nome de jogador inválido. Desconectando.".into(),
                ))
                .await;
            return;
        }
        info!(player = %name, %addr, "player connected");

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if sink.send(Message::Text(message)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        self.open_pack(&session, true).await;

        let pubsub = tokio::spawn({
            let this = self.clone();
            let session = session.clone();
            async move { this.run_pubsub_loop(session).await }
        });

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let command = text.trim().to_string();
                    if command.is_empty() {
                        continue;
                    }
                    debug!(player = %name, %command, "command received");
                    self.dispatch(&session, &command).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    debug!(player = %name, %err, "socket error");
                    break;
                }
            }
        }

        pubsub.abort();
        writer.abort();
        self.registry.remove(&name);
        info!(player = %name, "player disconnected");
    }

    /// Routes a text command according to the player's phase.
    pub async fn dispatch(&self, session: &Arc<PlayerSession>, command: &str) {
        let (phase, duel_key) = session.with_data(|d| (d.phase, d.duel.clone()));

        if phase == Phase::InGame {
            if let Some(duel_key) = duel_key {
                self.duels.submit_move(session, &duel_key, command).await;
                return;
            }
        }

        match command {
            "FIND_MATCH" => self.matchmaker.clone().enqueue(session).await,
            "OPEN_PACK" => self.open_pack(session, false).await,
            "VIEW_DECK" => self.view_deck(session),
            cmd if cmd.starts_with("TRADE_CARD") => {
                self.trades.handle_trade(session, cmd).await
            }
            _ => session.send("Comando inválido."),
        }
    }

    /// Issues one pack to the player.
    ///
    /// The welcome pack (`mandatory`) bypasses and does not count towards
    /// the voluntary cap of [`MAX_EXTRA_PACKS`].
    pub async fn open_pack(&self, session: &Arc<PlayerSession>, mandatory: bool) {
        if !mandatory {
            let opened = session.with_data(|d| d.packs_opened);
            if opened >= MAX_EXTRA_PACKS {
                session.send("Você já abriu o máximo de 3 pacotes.");
                return;
            }
        }

        let pack = match self.stock.issue_pack(&session.name).await {
            Ok(PackIssue::Pack(cards)) => cards,
            Ok(PackIssue::Insufficient) => {
                session.send(
                    "Desculpe, não há pacotes de cartas suficientes no estoque global.",
                );
                return;
            }
            Err(err) => {
                error!(player = %session.name, %err, "pack issuance failed");
                session.send("Erro interno, tente novamente.");
                return;
            }
        };

        session.with_data(|d| {
            d.deck.extend(pack.iter().cloned());
            if !mandatory {
                d.packs_opened += 1;
            }
        });

        let remaining = match self.stock.remaining_packs().await {
            Ok(remaining) => remaining,
            Err(err) => {
                warn!(%err, "failed to read remaining stock");
                0
            }
        };
        session.send(pack_message(&session.name, &pack, remaining, mandatory));
    }

    fn view_deck(&self, session: &Arc<PlayerSession>) {
        let deck = session.with_data(|d| d.deck.clone());
        if deck.is_empty() {
            session.send("Seu deck está vazio.");
            return;
        }
        let listing = deck.iter().map(Card::label).collect::<Vec<_>>().join(" | ");
        session.send(format!("Seu deck: {listing}"));
    }

    /// Consumes the player's store channel.
    ///
    /// `RESULT|` payloads clear this instance's half of a finished duel
    /// before being forwarded; `TRADE_COMPLETE|` payloads deliver the
    /// counterpart card of an asynchronous trade. Anything else is forwarded
    /// verbatim.
    pub async fn run_pubsub_loop(&self, session: Arc<PlayerSession>) {
        let channel = player_channel(&session.name);
        let mut rx = match self.store.subscribe(&channel).await {
            Ok(rx) => rx,
            Err(err) => {
                error!(player = %session.name, %err, "player channel subscription failed");
                return;
            }
        };

        while let Some(payload) = rx.recv().await {
            debug!(player = %session.name, %payload, "pub/sub message received");

            if payload.starts_with("RESULT|") {
                self.duels.clear_remote_half(&session);
                session.send(payload);
            } else if let Some(card_json) = payload.strip_prefix("TRADE_COMPLETE|") {
                match serde_json::from_str::<Card>(card_json) {
                    Ok(card) => {
                        let label = card.label();
                        session.with_data(|d| d.deck.push(card));
                        session.send(format!(
                            "Troca concluída! Sua carta anterior foi trocada por '{label}'."
                        ));
                    }
                    Err(err) => {
                        error!(player = %session.name, %err, "malformed trade payload");
                        session.send("Erro ao processar uma troca recebida.");
                    }
                }
            } else {
                session.send(payload);
            }
        }
    }
}

fn pack_message(name: &str, pack: &[Card], remaining: u64, mandatory: bool) -> String {
    let list = pack.iter().map(Card::label).collect::<Vec<_>>().join(", ");
    if mandatory {
        format!(
            "Bem-vindo(a), {name}! Você recebeu seu pacote inicial: {list}. \
             Pacotes restantes no servidor: {remaining}\n"
        )
    } else {
        format!(
            "Parabéns, {name}! Você abriu um pacote extra e recebeu: {list}. \
             Pacotes restantes no servidor: {remaining}\n"
        )
    }
}

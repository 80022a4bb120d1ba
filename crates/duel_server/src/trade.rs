//! Asynchronous card-trade rendezvous.
//!
//! One shared list holds pending offers; the critical section around it is
//! guarded by `lock:trade`. The initiator's card leaves their deck before
//! anything touches the store, and every failure path puts it back, so a
//! card is never simultaneously in a deck and in the queue, and never lost.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::session::PlayerSession;
use crate::store::{player_channel, CoordinationStore, TRADE_LOCK_KEY, TRADE_QUEUE_KEY};
use crate::types::{Card, Phase, TradeTicket};

/// Lock-guarded rendezvous on the shared offer queue.
pub struct TradeService {
    store: Arc<dyn CoordinationStore>,
    server_id: String,
    lock_ttl: Duration,
}

impl TradeService {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        server_id: impl Into<String>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            store,
            server_id: server_id.into(),
            lock_ttl,
        }
    }

    /// Handles a `TRADE_CARD <n>` command (1-based deck index).
    pub async fn handle_trade(&self, session: &Arc<PlayerSession>, command: &str) {
        if session.phase() != Phase::Menu {
            session.send(
                "Você não pode trocar cartas enquanto estiver em jogo ou procurando partida.",
            );
            return;
        }

        let arg = command
            .strip_prefix("TRADE_CARD")
            .map(str::trim)
            .unwrap_or("");
        if arg.is_empty() {
            session.send("Comando inválido. Use 'TRADE_CARD [numero]'.");
            return;
        }
        let index: usize = match arg.parse() {
            Ok(index) => index,
            Err(_) => {
                session.send("Número da carta inválido.");
                return;
            }
        };

        // Take the card out of the deck up front; from here on every exit
        // either trades it, queues it, or puts it back.
        let card = session.with_data(|d| {
            if index >= 1 && index <= d.deck.len() {
                Some(d.deck.remove(index - 1))
            } else {
                None
            }
        });
        let Some(card) = card else {
            session.send("Número da carta fora do alcance do seu deck.");
            return;
        };

        info!(player = %session.name, card = %card.name, "trade requested");
        self.rendezvous(session, card).await;
    }

    async fn rendezvous(&self, session: &Arc<PlayerSession>, card: Card) {
        let token = format!("{}-{}", self.server_id, Uuid::new_v4());
        match self
            .store
            .try_set_if_absent(TRADE_LOCK_KEY, &token, self.lock_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                restore(session, card);
                session.send(
                    "O sistema de trocas está ocupado. Tente novamente em alguns segundos.",
                );
                return;
            }
            Err(err) => {
                error!(player = %session.name, %err, "failed to acquire trade lock");
                restore(session, card);
                session.send("Erro interno no sistema de trocas. Tente novamente.");
                return;
            }
        }

        self.exchange(session, card).await;

        if let Err(err) = self
            .store
            .release_lock_if_token_matches(TRADE_LOCK_KEY, &token)
            .await
        {
            warn!(%err, "failed to release trade lock");
        }
    }

    /// The critical section: pop a pending offer or become one.
    async fn exchange(&self, session: &Arc<PlayerSession>, card: Card) {
        let popped = match self.store.list_pop_left(TRADE_QUEUE_KEY).await {
            Ok(popped) => popped,
            Err(err) => {
                error!(player = %session.name, %err, "failed to read trade queue");
                restore(session, card);
                session.send("Erro interno ao acessar a fila de trocas. Tente novamente.");
                return;
            }
        };

        let Some(raw_ticket) = popped else {
            self.enqueue_offer(session, card).await;
            return;
        };

        let other: TradeTicket = match serde_json::from_str(&raw_ticket) {
            Ok(ticket) => ticket,
            Err(err) => {
                error!(%err, "corrupted ticket at the head of the trade queue");
                // Put the undecodable ticket back rather than destroy it.
                if let Err(push_err) = self
                    .store
                    .list_push_left(TRADE_QUEUE_KEY, &raw_ticket)
                    .await
                {
                    error!(%push_err, "failed to return corrupted ticket to the queue");
                }
                restore(session, card);
                session.send("Erro! O ticket na fila estava corrompido. Sua carta foi devolvida.");
                return;
            }
        };

        // Rendezvous complete: the initiator's card goes to this player now;
        // the counterpart learns of theirs through their channel.
        session.with_data(|d| d.deck.push(other.card.clone()));
        info!(
            player = %session.name,
            sent = %card.name,
            received = %other.card.name,
            counterpart = %other.player_name,
            "trade completed"
        );
        session.send(format!(
            "Troca realizada! Você enviou '{}' e recebeu '{}'.",
            card.label(),
            other.card.label()
        ));

        let payload = match serde_json::to_string(&card) {
            Ok(json) => format!("TRADE_COMPLETE|{json}"),
            Err(err) => {
                error!(%err, "failed to encode traded card");
                return;
            }
        };
        if let Err(err) = self
            .store
            .publish(&player_channel(&other.player_name), &payload)
            .await
        {
            // The counterpart keeps this player's card but is not notified.
            error!(
                counterpart = %other.player_name,
                %err,
                "failed to publish trade completion"
            );
        }
    }

    async fn enqueue_offer(&self, session: &Arc<PlayerSession>, card: Card) {
        let ticket = TradeTicket {
            player_name: session.name.clone(),
            server_id: self.server_id.clone(),
            card: card.clone(),
        };
        let encoded = match serde_json::to_string(&ticket) {
            Ok(encoded) => encoded,
            Err(err) => {
                error!(player = %session.name, %err, "failed to encode trade ticket");
                restore(session, card);
                session.send("Erro interno ao acessar a fila de trocas. Tente novamente.");
                return;
            }
        };

        if let Err(err) = self
            .store
            .list_push_right(TRADE_QUEUE_KEY, &[encoded])
            .await
        {
            error!(player = %session.name, %err, "failed to enqueue trade offer");
            restore(session, card);
            session.send("Erro interno ao acessar a fila de trocas. Tente novamente.");
            return;
        }

        info!(player = %session.name, card = %card.name, "trade offer queued");
        session.send(format!(
            "Sua carta '{}' foi adicionada à fila de trocas. Aguardando outro jogador...",
            card.name
        ));
    }
}

fn restore(session: &Arc<PlayerSession>, card: Card) {
    session.with_data(|d| d.deck.push(card));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tokio::sync::mpsc;

    fn harness() -> (Arc<MemoryStore>, TradeService) {
        let store = Arc::new(MemoryStore::new());
        let trades = TradeService::new(store.clone(), "Server-1", Duration::from_secs(3));
        (store, trades)
    }

    fn session_with_deck(
        name: &str,
        deck: Vec<Card>,
    ) -> (Arc<PlayerSession>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = PlayerSession::new(name, "Server-1", tx);
        session.with_data(|d| d.deck = deck);
        (session, rx)
    }

    #[tokio::test]
    async fn first_offer_is_queued() {
        let (store, trades) = harness();
        let (alice, mut rx) = session_with_deck("Alice", vec![Card::new("Ghoul", 1)]);

        trades.handle_trade(&alice, "TRADE_CARD 1").await;

        assert_eq!(alice.with_data(|d| d.deck.len()), 0);
        assert_eq!(store.list_len(TRADE_QUEUE_KEY).await.unwrap(), 1);
        let msg = rx.recv().await.unwrap();
        assert_eq!(
            msg,
            "Sua carta 'Ghoul' foi adicionada à fila de trocas. Aguardando outro jogador..."
        );
    }

    #[tokio::test]
    async fn second_offer_completes_the_swap() {
        let (store, trades) = harness();
        let (alice, _alice_rx) = session_with_deck("Alice", vec![Card::new("Ghoul", 1)]);
        let (bob, mut bob_rx) = session_with_deck("Bob", vec![Card::new("Wyvern", 5)]);

        // Bob's notification travels over Alice's player channel.
        let mut alice_channel = store.subscribe(&player_channel("Alice")).await.unwrap();

        trades.handle_trade(&alice, "TRADE_CARD 1").await;
        trades.handle_trade(&bob, "TRADE_CARD 1").await;

        assert_eq!(store.list_len(TRADE_QUEUE_KEY).await.unwrap(), 0);
        assert_eq!(
            bob.with_data(|d| d.deck.first().cloned()).unwrap().name,
            "Ghoul"
        );
        assert_eq!(
            bob_rx.recv().await.unwrap(),
            "Troca realizada! Você enviou 'Wyvern (Força: 5)' e recebeu 'Ghoul (Força: 1)'."
        );

        let payload = alice_channel.recv().await.unwrap();
        let card: Card = serde_json::from_str(
            payload.strip_prefix("TRADE_COMPLETE|").unwrap(),
        )
        .unwrap();
        assert_eq!(card.name, "Wyvern");
    }

    #[tokio::test]
    async fn out_of_range_index_is_refused() {
        let (store, trades) = harness();
        let (alice, mut rx) = session_with_deck("Alice", vec![Card::new("Ghoul", 1)]);

        trades.handle_trade(&alice, "TRADE_CARD 2").await;

        assert_eq!(rx.recv().await.unwrap(), "Número da carta fora do alcance do seu deck.");
        assert_eq!(alice.with_data(|d| d.deck.len()), 1);
        assert_eq!(store.list_len(TRADE_QUEUE_KEY).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn busy_lock_restores_the_card() {
        let (store, trades) = harness();
        let (alice, mut rx) = session_with_deck("Alice", vec![Card::new("Ghoul", 1)]);

        // Someone else holds the trade lock.
        store
            .try_set_if_absent(TRADE_LOCK_KEY, "other", Duration::from_secs(30))
            .await
            .unwrap();

        trades.handle_trade(&alice, "TRADE_CARD 1").await;

        assert_eq!(
            rx.recv().await.unwrap(),
            "O sistema de trocas está ocupado. Tente novamente em alguns segundos."
        );
        assert_eq!(alice.with_data(|d| d.deck.len()), 1);
    }

    #[tokio::test]
    async fn corrupted_ticket_is_returned_to_the_queue() {
        let (store, trades) = harness();
        store
            .list_push_right(TRADE_QUEUE_KEY, &["not-json".to_string()])
            .await
            .unwrap();
        let (alice, mut rx) = session_with_deck("Alice", vec![Card::new("Ghoul", 1)]);

        trades.handle_trade(&alice, "TRADE_CARD 1").await;

        assert_eq!(
            rx.recv().await.unwrap(),
            "Erro! O ticket na fila estava corrompido. Sua carta foi devolvida."
        );
        assert_eq!(alice.with_data(|d| d.deck.len()), 1);
        assert_eq!(store.list_len(TRADE_QUEUE_KEY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn refuses_outside_the_menu() {
        let (_store, trades) = harness();
        let (alice, mut rx) = session_with_deck("Alice", vec![Card::new("Ghoul", 1)]);
        alice.with_data(|d| d.phase = Phase::Searching);

        trades.handle_trade(&alice, "TRADE_CARD 1").await;

        assert_eq!(
            rx.recv().await.unwrap(),
            "Você não pode trocar cartas enquanto estiver em jogo ou procurando partida."
        );
        assert_eq!(alice.with_data(|d| d.deck.len()), 1);
    }

    #[tokio::test]
    async fn trade_conserves_the_card_multiset() {
        let (store, trades) = harness();
        let (alice, _rx_a) = session_with_deck(
            "Alice",
            vec![Card::new("Ghoul", 1), Card::new("Ifrit", 8)],
        );
        let (bob, _rx_b) = session_with_deck(
            "Bob",
            vec![Card::new("Wyvern", 5), Card::new("Leshen", 6)],
        );

        trades.handle_trade(&alice, "TRADE_CARD 2").await;
        trades.handle_trade(&bob, "TRADE_CARD 1").await;

        // Queue drained, Bob holds Ifrit; Alice's Wyvern is in flight on her
        // channel (delivered by her session loop in production).
        assert_eq!(store.list_len(TRADE_QUEUE_KEY).await.unwrap(), 0);
        let bob_deck: Vec<String> =
            bob.with_data(|d| d.deck.iter().map(|c| c.name.clone()).collect());
        assert_eq!(bob_deck, vec!["Leshen".to_string(), "Ifrit".to_string()]);
        let alice_deck: Vec<String> =
            alice.with_data(|d| d.deck.iter().map(|c| c.name.clone()).collect());
        assert_eq!(alice_deck, vec!["Ghoul".to_string()]);
    }
}

//! End-to-end scenarios over the in-memory coordination store.
//!
//! Each test wires one or more server instances the way `GameServer` does,
//! but drives players through captured session channels instead of sockets.
//! Cross-instance calls go through an in-process notifier, so the full
//! pairing / duel / trade protocols run exactly as in production, minus the
//! network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use duel_server::catalog::SUPPLY_SIZE;
use duel_server::duel::DuelService;
use duel_server::error::CoreError;
use duel_server::matchmaking::{Matchmaker, MatchmakingTiming};
use duel_server::notify::PeerNotifier;
use duel_server::session::{PlayerRegistry, PlayerSession, SessionManager};
use duel_server::stock::{StockService, PACK_SIZE};
use duel_server::store::{CoordinationStore, MemoryStore, MATCHMAKING_QUEUE_KEY, STOCK_KEY};
use duel_server::trade::TradeService;
use duel_server::types::{Card, Phase};

/// Routes match notifications between instances of the same test process.
#[derive(Default)]
struct LocalNotifier {
    peers: StdMutex<HashMap<String, Arc<DuelService>>>,
}

impl LocalNotifier {
    fn register(&self, server_id: &str, duels: Arc<DuelService>) {
        self.peers
            .lock()
            .unwrap()
            .insert(server_id.to_string(), duels);
    }
}

#[async_trait]
impl PeerNotifier for LocalNotifier {
    async fn notify_match(
        &self,
        remote_server_id: &str,
        req: &duel_server::types::MatchNotification,
    ) -> Result<(), CoreError> {
        let duels = self
            .peers
            .lock()
            .unwrap()
            .get(remote_server_id)
            .cloned()
            .ok_or_else(|| CoreError::PeerUnreachable {
                server_id: remote_server_id.to_string(),
                reason: "not registered".to_string(),
            })?;
        duels.start_half_match(req).await
    }
}

struct Instance {
    server_id: String,
    registry: Arc<PlayerRegistry>,
    stock: Arc<StockService>,
    duels: Arc<DuelService>,
    matchmaker: Arc<Matchmaker>,
    sessions: Arc<SessionManager>,
}

fn fast_timing() -> MatchmakingTiming {
    MatchmakingTiming {
        match_timeout: Duration::from_millis(300),
        pairing_interval: Duration::from_millis(50),
        lock_ttl: Duration::from_millis(500),
    }
}

fn make_instance(
    store: Arc<MemoryStore>,
    notifier: Arc<LocalNotifier>,
    server_id: &str,
    turn_timeout: Duration,
) -> Instance {
    let registry = Arc::new(PlayerRegistry::new());
    let stock = Arc::new(StockService::new(store.clone() as Arc<dyn CoordinationStore>));
    let duels = Arc::new(DuelService::new(
        store.clone(),
        registry.clone(),
        server_id,
        turn_timeout,
    ));
    let matchmaker = Arc::new(Matchmaker::new(
        store.clone(),
        duels.clone(),
        notifier.clone(),
        server_id,
        fast_timing(),
    ));
    let trades = Arc::new(TradeService::new(
        store.clone(),
        server_id,
        Duration::from_secs(3),
    ));
    let sessions = Arc::new(SessionManager::new(
        registry.clone(),
        store,
        stock.clone(),
        matchmaker.clone(),
        duels.clone(),
        trades,
        server_id,
    ));
    notifier.register(server_id, duels.clone());
    Instance {
        server_id: server_id.to_string(),
        registry,
        stock,
        duels,
        matchmaker,
        sessions,
    }
}

/// Connects a player to an instance, without the welcome pack.
fn connect(
    instance: &Instance,
    name: &str,
    deck: Vec<Card>,
) -> (Arc<PlayerSession>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = PlayerSession::new(name, &instance.server_id, tx);
    session.with_data(|d| d.deck = deck);
    assert!(instance.registry.insert(session.clone()));
    (session, rx)
}

/// Spawns the player's store-channel subscription loop, as the session
/// layer does for every real connection.
fn spawn_pubsub(instance: &Instance, session: &Arc<PlayerSession>) {
    let sessions = instance.sessions.clone();
    let session = session.clone();
    tokio::spawn(async move { sessions.run_pubsub_loop(session).await });
}

async fn recv_with_prefix(
    rx: &mut mpsc::UnboundedReceiver<String>,
    prefix: &str,
) -> String {
    timeout(Duration::from_secs(5), async {
        loop {
            let msg = rx.recv().await.expect("channel closed while waiting");
            if msg.starts_with(prefix) {
                return msg;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for '{prefix}'"))
}

fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut messages = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        messages.push(msg);
    }
    messages
}

fn strong(name: &str) -> Card {
    Card::new(name, 15)
}

fn weak(name: &str) -> Card {
    Card::new(name, 1)
}

// --- Scenario S1: welcome pack ---------------------------------------------

#[tokio::test]
async fn welcome_pack_on_connect() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(LocalNotifier::default());
    let instance = make_instance(store.clone(), notifier, "I1", Duration::from_secs(10));

    instance.stock.initialise(7).await.unwrap();
    let (alice, mut rx) = connect(&instance, "Alice", Vec::new());

    instance.sessions.open_pack(&alice, true).await;

    let msg = rx.recv().await.unwrap();
    assert!(msg.starts_with("Bem-vindo(a), Alice!"), "got: {msg}");
    assert!(msg.contains("Pacotes restantes no servidor:"));
    assert_eq!(alice.with_data(|d| d.deck.len()), PACK_SIZE);
    assert_eq!(
        store.list_len(STOCK_KEY).await.unwrap(),
        (SUPPLY_SIZE - PACK_SIZE) as u64
    );
}

// --- Scenario S2: two-player duel on one instance --------------------------

#[tokio::test(flavor = "multi_thread")]
async fn local_duel_resolves_by_strength() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(LocalNotifier::default());
    let instance = make_instance(store, notifier, "I1", Duration::from_secs(5));

    let (alice, mut alice_rx) = connect(
        &instance,
        "Alice",
        vec![strong("Geralt de Rívia"), strong("Rei Foltest")],
    );
    let (bob, mut bob_rx) = connect(&instance, "Bob", vec![weak("Ghoul"), weak("Nekker")]);

    instance.matchmaker.clone().enqueue(&alice).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    instance.matchmaker.clone().enqueue(&bob).await;

    assert_eq!(
        recv_with_prefix(&mut alice_rx, "Entrou na fila").await,
        "Entrou na fila de matchmaking. Aguardando oponente..."
    );

    instance.matchmaker.pairing_tick().await.unwrap();

    recv_with_prefix(&mut alice_rx, "MATCH_FOUND").await;
    recv_with_prefix(&mut bob_rx, "MATCH_FOUND").await;
    let start = recv_with_prefix(&mut alice_rx, "MATCH_START|").await;
    assert_eq!(start.split('|').count(), 3);
    recv_with_prefix(&mut alice_rx, "TIMER|").await;
    recv_with_prefix(&mut bob_rx, "MATCH_START|").await;
    recv_with_prefix(&mut bob_rx, "TIMER|").await;

    assert_eq!(alice.phase(), Phase::InGame);
    assert_eq!(bob.phase(), Phase::InGame);

    instance.sessions.dispatch(&alice, "1").await;
    instance.sessions.dispatch(&bob, "2").await;

    let alice_result = recv_with_prefix(&mut alice_rx, "RESULT|").await;
    let bob_result = recv_with_prefix(&mut bob_rx, "RESULT|").await;
    assert!(alice_result.starts_with("RESULT|VITÓRIA|"), "{alice_result}");
    assert!(bob_result.starts_with("RESULT|DERROTA|"), "{bob_result}");

    assert_eq!(alice.phase(), Phase::Menu);
    assert_eq!(bob.phase(), Phase::Menu);

    // Record cleanup happens just after delivery.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(instance.duels.active_duels(), 0);
}

// --- Scenario S3: cross-instance duel with one absent move -----------------

#[tokio::test(flavor = "multi_thread")]
async fn cross_instance_duel_times_out_the_absent_player() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(LocalNotifier::default());
    let i1 = make_instance(store.clone(), notifier.clone(), "I1", Duration::from_millis(500));
    let i2 = make_instance(store.clone(), notifier.clone(), "I2", Duration::from_millis(500));

    let (alice, mut alice_rx) = connect(&i1, "Alice", vec![weak("Ghoul"), weak("Nekker")]);
    let (bob, mut bob_rx) = connect(&i2, "Bob", vec![strong("Ifrit"), strong("Draug")]);
    spawn_pubsub(&i1, &alice);
    spawn_pubsub(&i2, &bob);

    i1.matchmaker.clone().enqueue(&alice).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    i2.matchmaker.clone().enqueue(&bob).await;

    // Whichever instance wins the lock orchestrates; force I2 here.
    i2.matchmaker.pairing_tick().await.unwrap();

    recv_with_prefix(&mut alice_rx, "MATCH_FOUND").await;
    recv_with_prefix(&mut alice_rx, "MATCH_START|").await;
    recv_with_prefix(&mut alice_rx, "TIMER|").await;
    recv_with_prefix(&mut bob_rx, "MATCH_FOUND").await;
    recv_with_prefix(&mut bob_rx, "MATCH_START|").await;
    recv_with_prefix(&mut bob_rx, "TIMER|").await;

    // Bob plays; Alice never does.
    i2.sessions.dispatch(&bob, "1").await;

    let alice_result = recv_with_prefix(&mut alice_rx, "RESULT|").await;
    assert_eq!(
        alice_result,
        "RESULT|DERROTA|Você não jogou a tempo e perdeu.\n"
    );
    let bob_result = recv_with_prefix(&mut bob_rx, "RESULT|").await;
    assert_eq!(
        bob_result,
        "RESULT|VITÓRIA|Alice não jogou a tempo. Você venceu!\n"
    );

    // Both instances cleaned their halves.
    assert_eq!(alice.phase(), Phase::Menu);
    assert_eq!(bob.phase(), Phase::Menu);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(i1.duels.active_duels(), 0);
    assert_eq!(i2.duels.active_duels(), 0);
}

// --- Scenario S4: bounded matchmaking wait ---------------------------------

#[tokio::test]
async fn lone_player_gets_no_match_found_once() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(LocalNotifier::default());
    let instance = make_instance(store.clone(), notifier, "I1", Duration::from_secs(5));

    let (alice, mut rx) = connect(&instance, "Alice", Vec::new());
    instance.matchmaker.clone().enqueue(&alice).await;
    assert_eq!(alice.phase(), Phase::Searching);

    tokio::time::sleep(Duration::from_millis(600)).await;

    let messages = drain(&mut rx);
    let no_match = messages
        .iter()
        .filter(|m| m.as_str() == "NO_MATCH_FOUND")
        .count();
    assert_eq!(no_match, 1, "messages: {messages:?}");
    assert_eq!(alice.phase(), Phase::Menu);
    assert_eq!(
        store
            .zset_range(MATCHMAKING_QUEUE_KEY, 0, -1)
            .await
            .unwrap()
            .len(),
        0
    );
}

// --- Scenario S5: trade rendezvous across instances ------------------------

#[tokio::test(flavor = "multi_thread")]
async fn trade_rendezvous_delivers_both_sides() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(LocalNotifier::default());
    let i1 = make_instance(store.clone(), notifier.clone(), "I1", Duration::from_secs(5));
    let i2 = make_instance(store.clone(), notifier, "I2", Duration::from_secs(5));

    let (alice, mut alice_rx) = connect(&i1, "Alice", vec![weak("Ghoul")]);
    let (bob, mut bob_rx) = connect(&i2, "Bob", vec![strong("Ifrit")]);
    spawn_pubsub(&i1, &alice);
    spawn_pubsub(&i2, &bob);

    i1.sessions.dispatch(&alice, "TRADE_CARD 1").await;
    let queued = recv_with_prefix(&mut alice_rx, "Sua carta").await;
    assert!(queued.contains("fila de trocas"), "{queued}");

    i2.sessions.dispatch(&bob, "TRADE_CARD 1").await;
    let done = recv_with_prefix(&mut bob_rx, "Troca realizada!").await;
    assert!(done.contains("'Ifrit (Força: 15)'"), "{done}");
    assert!(done.contains("'Ghoul (Força: 1)'"), "{done}");

    let async_side = recv_with_prefix(&mut alice_rx, "Troca concluída!").await;
    assert!(async_side.contains("'Ifrit (Força: 15)'"), "{async_side}");

    // Deck sizes preserved, cards swapped.
    assert_eq!(
        alice.with_data(|d| d.deck.iter().map(|c| c.name.clone()).collect::<Vec<_>>()),
        vec!["Ifrit".to_string()]
    );
    assert_eq!(
        bob.with_data(|d| d.deck.iter().map(|c| c.name.clone()).collect::<Vec<_>>()),
        vec!["Ghoul".to_string()]
    );
}

// --- Scenario S6: stock exhaustion -----------------------------------------

#[tokio::test]
async fn exhausted_stock_refuses_without_consuming() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(LocalNotifier::default());
    let instance = make_instance(store.clone(), notifier, "I1", Duration::from_secs(5));

    let leftovers: Vec<String> = vec![
        serde_json::to_string(&weak("Ghoul")).unwrap(),
        serde_json::to_string(&weak("Nekker")).unwrap(),
    ];
    store.list_push_right(STOCK_KEY, &leftovers).await.unwrap();

    let (alice, mut rx) = connect(&instance, "Alice", Vec::new());
    instance.sessions.dispatch(&alice, "OPEN_PACK").await;

    let msg = rx.recv().await.unwrap();
    assert_eq!(
        msg,
        "Desculpe, não há pacotes de cartas suficientes no estoque global."
    );
    assert_eq!(store.list_len(STOCK_KEY).await.unwrap(), 2);
    assert!(alice.with_data(|d| d.deck.is_empty()));
}

// --- Invariant: exactly-once pairing under racing pairers ------------------

#[tokio::test(flavor = "multi_thread")]
async fn racing_pairers_never_double_match() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(LocalNotifier::default());
    let i1 = make_instance(store.clone(), notifier.clone(), "I1", Duration::from_secs(5));
    let i2 = make_instance(store.clone(), notifier.clone(), "I2", Duration::from_secs(5));

    // Queue the tickets directly so no wait-timer can race the pairers.
    let mut receivers = Vec::new();
    for n in 0..8 {
        let home = if n % 2 == 0 { &i1 } else { &i2 };
        let name = format!("Jogador{n}");
        let (session, rx) = connect(home, &name, vec![weak("Ghoul"), weak("Nekker")]);
        session.with_data(|d| d.phase = Phase::Searching);
        let ticket = duel_server::types::MatchTicket {
            player_name: name,
            server_id: home.server_id.clone(),
            enqueued_at: n,
        };
        store
            .zset_add(
                MATCHMAKING_QUEUE_KEY,
                n,
                &serde_json::to_string(&ticket).unwrap(),
            )
            .await
            .unwrap();
        receivers.push((session, rx));
    }

    // Two instances race over the same queue.
    let t1 = {
        let mm = i1.matchmaker.clone();
        tokio::spawn(async move {
            for _ in 0..30 {
                let _ = mm.pairing_tick().await;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };
    let t2 = {
        let mm = i2.matchmaker.clone();
        tokio::spawn(async move {
            for _ in 0..30 {
                let _ = mm.pairing_tick().await;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };
    t1.await.unwrap();
    t2.await.unwrap();

    let mut matched = 0;
    for (session, rx) in receivers.iter_mut() {
        let found = drain(rx)
            .into_iter()
            .filter(|m| m == "MATCH_FOUND")
            .count();
        assert!(found <= 1, "{} matched {found} times", session.name);
        matched += found;
    }
    assert_eq!(matched, 8, "every queued player pairs exactly once");
    assert!(store
        .zset_range(MATCHMAKING_QUEUE_KEY, 0, -1)
        .await
        .unwrap()
        .is_empty());
}

// --- Invariant: FIFO pairing ------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn earliest_two_players_pair_first() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(LocalNotifier::default());
    let instance = make_instance(store, notifier, "I1", Duration::from_secs(5));

    let (alice, mut alice_rx) = connect(&instance, "Alice", vec![weak("a"), weak("b")]);
    let (bob, mut bob_rx) = connect(&instance, "Bob", vec![weak("a"), weak("b")]);
    let (carol, mut carol_rx) = connect(&instance, "Carol", vec![weak("a"), weak("b")]);

    instance.matchmaker.clone().enqueue(&alice).await;
    instance.matchmaker.clone().enqueue(&bob).await;
    instance.matchmaker.clone().enqueue(&carol).await;

    instance.matchmaker.pairing_tick().await.unwrap();

    recv_with_prefix(&mut alice_rx, "MATCH_FOUND").await;
    recv_with_prefix(&mut bob_rx, "MATCH_FOUND").await;
    assert!(!drain(&mut carol_rx).iter().any(|m| m == "MATCH_FOUND"));
    assert_eq!(carol.phase(), Phase::Searching);
}

// --- Invariant: per-player pack cap ----------------------------------------

#[tokio::test]
async fn voluntary_packs_cap_at_three() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(LocalNotifier::default());
    let instance = make_instance(store, notifier, "I1", Duration::from_secs(5));
    instance.stock.initialise(3).await.unwrap();

    let (alice, mut rx) = connect(&instance, "Alice", Vec::new());
    instance.sessions.open_pack(&alice, true).await;

    for _ in 0..4 {
        instance.sessions.dispatch(&alice, "OPEN_PACK").await;
    }

    let messages = drain(&mut rx);
    let refused = messages
        .iter()
        .filter(|m| m.as_str() == "Você já abriu o máximo de 3 pacotes.")
        .count();
    assert_eq!(refused, 1, "messages: {messages:?}");
    // Welcome pack + 3 voluntary packs.
    assert_eq!(alice.with_data(|d| d.deck.len()), 4 * PACK_SIZE);
}

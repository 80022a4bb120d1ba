//! # Duel Server
//!
//! Horizontally-scaled backend for a 1v1 card-duel game. Any number of
//! stateless instances share a Redis-compatible coordination store; players
//! connect to any instance over a persistent WebSocket and can be paired,
//! duel and trade with players whose sockets terminate elsewhere.
//!
//! The hard parts all live in the coordination layer:
//!
//! * **Stock** — one global ordered card supply, packs issued through an
//!   atomic batch script so no card is duplicated or lost under load.
//! * **Matchmaking** — a shared FIFO queue; every instance runs the pairing
//!   pass, a store-wide lock plus an atomic two-member removal guarantee
//!   each pair is matched exactly once.
//! * **Duels** — P1's instance owns the match and collects moves through a
//!   shared hash and pub/sub channel, finalising exactly once on
//!   both-moves-in or turn deadline.
//! * **Trades** — a lock-guarded rendezvous on a single pending-offer
//!   queue, with the counterpart card delivered over the player's channel.
//!
//! Everything globally visible goes through the [`store::CoordinationStore`]
//! trait; the in-memory backend gives tests the same atomicity without an
//! external service.

pub use config::{Args, Config};
pub use error::{CoreError, StoreError};
pub use server::GameServer;

pub mod catalog;
pub mod config;
pub mod duel;
pub mod error;
pub mod logging;
pub mod matchmaking;
pub mod notify;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod stock;
pub mod store;
pub mod trade;
pub mod types;

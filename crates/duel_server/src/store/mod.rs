//! Typed access to the shared coordination store.
//!
//! Every globally-visible piece of state (card stock, matchmaking queue,
//! trade queue, duel move hashes, locks, pub/sub channels) lives behind the
//! [`CoordinationStore`] trait. The production backend talks to a
//! Redis-compatible service; the in-memory backend provides the same
//! atomicity guarantees inside one process for deterministic tests.

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StoreError;

/// List of JSON-encoded cards forming the global supply.
pub const STOCK_KEY: &str = "global_card_stock";
/// Sorted set of pending matchmaking tickets, scored by enqueue time.
pub const MATCHMAKING_QUEUE_KEY: &str = "matchmaking_queue";
/// Store-wide lock serialising the pairing pass.
pub const MATCHMAKER_LOCK_KEY: &str = "lock:matchmaker";
/// List of pending trade tickets.
pub const TRADE_QUEUE_KEY: &str = "trade_queue";
/// Store-wide lock serialising the trade rendezvous.
pub const TRADE_LOCK_KEY: &str = "lock:trade";

/// Hash holding the `p1_card` / `p2_card` moves of one duel.
pub fn game_state_key(p1_name: &str) -> String {
    format!("game:state:{p1_name}")
}

/// Channel carrying `MOVE_MADE` notifications to the duel brain.
pub fn game_channel(p1_name: &str) -> String {
    format!("game:channel:{p1_name}")
}

/// Per-player channel for out-of-band delivery (results, trades).
pub fn player_channel(player_name: &str) -> String {
    format!("player:{player_name}")
}

/// Atomic primitives over the shared store.
///
/// Each operation is atomic with respect to every other. Multi-step
/// sequences ([`take_batch`](CoordinationStore::take_batch) and the
/// compare-and-delete unlock) run as single server-side scripts on the
/// Redis backend and under one critical section on the in-memory backend.
/// Any call may fail with [`StoreError::Unavailable`]; callers roll back
/// their local effects instead of swallowing the error.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Round-trip health probe, used once at bootstrap.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn list_len(&self, key: &str) -> Result<u64, StoreError>;

    async fn list_push_right(&self, key: &str, values: &[String]) -> Result<(), StoreError>;

    /// Push-back at the head, used to return an element taken in error.
    async fn list_push_left(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn list_pop_left(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Removes exactly `n` elements from the head, or nothing at all.
    ///
    /// Never returns a partial batch: when the list holds fewer than `n`
    /// elements the result is empty and the list is untouched.
    async fn take_batch(&self, key: &str, n: usize) -> Result<Vec<String>, StoreError>;

    /// Adds `member` with `score`, replacing the score of an existing member.
    async fn zset_add(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError>;

    /// Inclusive range by rank; `stop = -1` addresses the last member.
    async fn zset_range(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, StoreError>;

    /// Removes the listed members atomically, returning how many existed.
    async fn zset_remove(&self, key: &str, members: &[String]) -> Result<usize, StoreError>;

    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    /// First write wins; returns `false` when the field was already set.
    async fn hash_set_if_absent(&self, key: &str, field: &str, value: &str)
        -> Result<bool, StoreError>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// `SET key token NX PX ttl` — the acquisition half of a store lock.
    async fn try_set_if_absent(&self, key: &str, token: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Compare-and-delete release: the key is removed only while it still
    /// holds `token`, so a lock that expired and was re-acquired by another
    /// instance is never released by the previous holder.
    async fn release_lock_if_token_matches(&self, key: &str, token: &str)
        -> Result<bool, StoreError>;

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError>;

    /// Lazy sequence of payloads published on `channel`.
    ///
    /// Dropping the receiver ends the subscription.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, StoreError>;
}

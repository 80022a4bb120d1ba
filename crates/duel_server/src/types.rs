//! Core data types shared by the coordination services.

use serde::{Deserialize, Serialize};

/// A single playing card. Immutable once issued.
///
/// The wire field for strength is `forca`, matching the JSON stored in the
/// coordination store and exchanged between instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub name: String,
    #[serde(rename = "forca")]
    pub strength: u8,
}

impl Card {
    pub fn new(name: impl Into<String>, strength: u8) -> Self {
        Self {
            name: name.into(),
            strength,
        }
    }

    /// Human-readable form used in deck listings and pack messages.
    pub fn label(&self) -> String {
        format!("{} (Força: {})", self.name, self.strength)
    }
}

/// Lifecycle phase of a connected player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Menu,
    Searching,
    InGame,
}

/// Matchmaking queue member, JSON-encoded into the sorted set.
///
/// The score of the member is `enqueued_at`, so the queue drains in
/// first-come-first-served order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchTicket {
    pub player_name: String,
    pub server_id: String,
    #[serde(rename = "timestamp")]
    pub enqueued_at: i64,
}

/// Pending trade offer, JSON-encoded into the trade queue list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeTicket {
    pub player_name: String,
    pub server_id: String,
    pub card: Card,
}

/// Body of the instance-to-instance match notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchNotification {
    pub player1_name: String,
    pub player2_name: String,
    pub server1_id: String,
    pub server2_id: String,
}

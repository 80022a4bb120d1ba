//! Configuration settings structures.
//!
//! The root [`Config`] is serialised to/from TOML. Timing defaults follow
//! the protocol constants; tests shrink them to keep suites fast.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main configuration structure.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Instance-level settings
    pub server: ServerSettings,
    /// Protocol timing knobs
    pub timing: TimingSettings,
    /// Optional logging configuration
    pub logging: Option<LoggingSettings>,
}

/// Instance-level settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerSettings {
    /// Identifier of this instance. Peers address it by this name, so in a
    /// multi-instance deployment it must resolve as a hostname.
    ///
    /// `SERVER_ID` in the environment wins over this setting; when neither
    /// is present a random local id is generated.
    pub server_id: Option<String>,

    /// WebSocket (player-facing) listen address
    pub listen_addr: String,

    /// Instance-to-instance HTTP listen address
    pub rest_addr: String,

    /// Coordination store URL
    pub store_url: String,

    /// Port used when calling a peer instance by its server id
    pub peer_port: u16,

    /// Seed for the one-time supply shuffle; random when unset
    pub stock_seed: Option<u64>,
}

/// Protocol timing knobs.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingSettings {
    /// Matchmaking wait before NO_MATCH_FOUND, in seconds
    pub match_timeout_secs: u64,
    /// Duel turn deadline, in seconds
    pub turn_timeout_secs: u64,
    /// Period of the pairing pass, in seconds
    pub pairing_interval_secs: u64,
    /// TTL of the matchmaker lock, in milliseconds
    pub matchmaker_lock_ttl_ms: u64,
    /// TTL of the trade lock, in milliseconds
    pub trade_lock_ttl_ms: u64,
}

/// Logging system configuration.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggingSettings {
    /// Logging level filter: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Enable JSON-formatted log output
    pub json_format: bool,
}

impl ServerSettings {
    /// Resolves the effective instance id: environment, then config, then a
    /// random local fallback.
    pub fn resolve_server_id(&self) -> String {
        if let Ok(id) = std::env::var("SERVER_ID") {
            if !id.is_empty() {
                return id;
            }
        }
        self.server_id
            .clone()
            .unwrap_or_else(|| format!("Server-Local-{}", rand::random::<u16>()))
    }
}

impl TimingSettings {
    pub fn match_timeout(&self) -> Duration {
        Duration::from_secs(self.match_timeout_secs)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }

    pub fn pairing_interval(&self) -> Duration {
        Duration::from_secs(self.pairing_interval_secs)
    }

    pub fn matchmaker_lock_ttl(&self) -> Duration {
        Duration::from_millis(self.matchmaker_lock_ttl_ms)
    }

    pub fn trade_lock_ttl(&self) -> Duration {
        Duration::from_millis(self.trade_lock_ttl_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                server_id: None,
                listen_addr: "0.0.0.0:8080".to_string(),
                rest_addr: "0.0.0.0:8081".to_string(),
                store_url: "redis://127.0.0.1:6379/0".to_string(),
                peer_port: 8081,
                stock_seed: None,
            },
            timing: TimingSettings {
                match_timeout_secs: 15,
                turn_timeout_secs: 10,
                pairing_interval_secs: 2,
                matchmaker_lock_ttl_ms: 1000,
                trade_lock_ttl_ms: 3000,
            },
            logging: Some(LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            }),
        }
    }
}

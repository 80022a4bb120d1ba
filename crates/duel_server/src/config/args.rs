//! Command-line argument parsing.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the duel server.
///
/// These override the corresponding settings from the configuration file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    ///
    /// If the file doesn't exist, a default configuration will be created.
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// WebSocket listen address (e.g. "0.0.0.0:8080")
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Instance-to-instance listen address (e.g. "0.0.0.0:8081")
    #[arg(short, long)]
    pub rest: Option<String>,

    /// Identifier of this instance; peers reach it by this name
    #[arg(long)]
    pub server_id: Option<String>,

    /// Coordination store URL (e.g. "redis://127.0.0.1:6379/0")
    #[arg(long)]
    pub store_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: PathBuf::from("config.toml"),
            listen: None,
            rest: None,
            server_id: None,
            store_url: None,
            debug: false,
        }
    }
}

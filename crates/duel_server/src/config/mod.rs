//! Configuration module for the duel server.
//!
//! Handles command-line arguments, configuration file parsing, and default
//! settings.

pub mod args;
pub mod settings;

pub use args::Args;
pub use settings::{Config, LoggingSettings, ServerSettings, TimingSettings};

use anyhow::Result;
use tracing::{info, warn};

/// Load configuration from file or create a default configuration.
///
/// If the file doesn't exist, a default configuration file is written and
/// the defaults are returned.
pub async fn load_config(args: &Args) -> Result<Config> {
    if args.config.exists() {
        let config_str = tokio::fs::read_to_string(&args.config).await?;
        match toml::de::from_str::<Config>(&config_str) {
            Ok(config) => Ok(config),
            Err(err) => {
                warn!(
                    "Failed to parse config file {}: {}",
                    args.config.display(),
                    err
                );
                Err(err.into())
            }
        }
    } else {
        warn!(
            "Configuration file not found: {}, using defaults",
            args.config.display()
        );

        let default_config = Config::default();
        let config_str = toml::to_string_pretty(&default_config)?;
        tokio::fs::write(&args.config, config_str).await?;
        info!(
            "Created default configuration file: {}",
            args.config.display()
        );

        Ok(default_config)
    }
}

impl Config {
    /// Applies command-line overrides on top of the file settings.
    pub fn apply_overrides(&mut self, args: &Args) {
        if let Some(listen) = &args.listen {
            self.server.listen_addr = listen.clone();
        }
        if let Some(rest) = &args.rest {
            self.server.rest_addr = rest.clone();
        }
        if let Some(server_id) = &args.server_id {
            self.server.server_id = Some(server_id.clone());
        }
        if let Some(store_url) = &args.store_url {
            self.server.store_url = store_url.clone();
        }
    }
}

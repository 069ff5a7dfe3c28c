//! relay-moderation configuration: a thin clap front end over the shared
//! `relay_core::config::RelayConfig`, grounded on `prober`'s original
//! `Config` (ex `prober/src/config.rs`), which likewise was a small
//! `clap::Parser` struct read once at startup; the rest of the fields it
//! used to carry directly (probe interval, concurrency, data dir) now live
//! in the shared `ModerationConfig`/`StorageConfig` sections instead.

use clap::Parser;
use relay_core::config::{ConfigError, RelayConfig};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "relay-moderation")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the relay TOML config file; searched in standard locations
    /// if omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn load_config(&self) -> Result<RelayConfig, ConfigError> {
        relay_core::config::load(self.config.as_deref())
    }
}

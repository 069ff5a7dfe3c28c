//! relay-push configuration
//!
//! Grounded on `relay-moderation/src/config.rs`: a thin `clap`-derive
//! wrapper over the shared `RelayConfig` schema, per-daemon CLI plus
//! `relay_core::config::load`'s env/file/defaults cascade.

use clap::Parser;
use relay_core::config::{ConfigError, RelayConfig};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "relay-push")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn load_config(&self) -> Result<RelayConfig, ConfigError> {
        relay_core::config::load(self.config.as_deref())
    }
}

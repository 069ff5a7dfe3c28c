//! Shared configuration schema (SPEC_FULL.md §4.9).
//!
//! `relayd` owns loading and hot-reload (layered CLI > env > TOML file >
//! defaults, published behind an atomic snapshot pointer); this module only
//! defines the schema so `relay-store`, `relay-moderation`, and `relay-push`
//! can all depend on the same validated struct without depending on `clap`.

use crate::types::{AccessMode, KindFilterMode, Tier};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub moderation: ModerationConfig,
    pub push: PushConfig,
    pub access: AccessConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub upnp: bool,
    pub relay_name: String,
    pub relay_description: String,
    /// Hex-encoded seed for the relay's own signing identity (moderation
    /// tickets, dispute resolutions).
    pub identity_seed_hex: String,
    /// Event kind -> human-readable NIP name, surfaced on the relay-info
    /// endpoint for client display purposes only; the relay itself never
    /// branches on these labels.
    #[serde(default)]
    pub kind_nip_map: std::collections::BTreeMap<u32, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_path: PathBuf,
    pub value_threshold_bytes: u64,
    pub vlog_gc_background_ratio: f64,
    pub vlog_gc_post_bulk_ratio: f64,
    pub vlog_gc_compaction_ratio: f64,
    pub vlog_gc_interval_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModerationConfig {
    pub classifier_url: String,
    pub worker_count: usize,
    pub tick_interval_secs: u64,
    pub batch_size: usize,
    pub confidence_threshold: f64,
    pub blocked_retention_hours: i64,
    pub resolution_ticket_retention_hours: i64,
    pub classifier_timeout_secs: u64,
    pub kind_filter_mode: KindFilterMode,
    pub allowed_kinds: Vec<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushConfig {
    pub gateway_url: String,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
    pub gateway_timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessConfig {
    pub mode: AccessMode,
    pub tiers: Vec<Tier>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl RelayConfig {
    /// Validate cross-field invariants not expressible via serde defaults
    /// alone. Called once at load and after every hot-reload.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.identity_seed_hex.len() != 64 {
            return Err("server.identity_seed_hex must be 32 bytes of hex".into());
        }
        if hex::decode(&self.server.identity_seed_hex).is_err() {
            return Err("server.identity_seed_hex is not valid hex".into());
        }
        if self.moderation.confidence_threshold < 0.0 || self.moderation.confidence_threshold > 1.0 {
            return Err("moderation.confidence_threshold must be within 0..=1".into());
        }
        if self.moderation.worker_count == 0 {
            return Err("moderation.worker_count must be > 0".into());
        }
        if self.push.worker_count == 0 {
            return Err("push.worker_count must be > 0".into());
        }
        if self.access.mode != AccessMode::Public && self.access.tiers.is_empty() {
            return Err("access.tiers must be non-empty unless access.mode is public".into());
        }
        for tier in &self.access.tiers {
            if tier.name.is_empty() {
                return Err("access tier name must not be empty".into());
            }
        }
        Ok(())
    }

    /// Built-in defaults, the bottom of the CLI > env > TOML file > defaults
    /// priority stack described in SPEC_FULL.md §4.9.
    pub fn defaults() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 7000,
                upnp: false,
                relay_name: "relay".to_string(),
                relay_description: String::new(),
                identity_seed_hex: "0".repeat(64),
                kind_nip_map: std::collections::BTreeMap::new(),
            },
            storage: StorageConfig {
                data_path: PathBuf::from("./data/relay"),
                value_threshold_bytes: 1024,
                vlog_gc_background_ratio: 0.5,
                vlog_gc_post_bulk_ratio: 0.7,
                vlog_gc_compaction_ratio: 0.5,
                vlog_gc_interval_secs: 600,
            },
            moderation: ModerationConfig {
                classifier_url: "http://127.0.0.1:9100".to_string(),
                worker_count: 5,
                tick_interval_secs: 30,
                batch_size: 20,
                confidence_threshold: 0.8,
                blocked_retention_hours: 48,
                resolution_ticket_retention_hours: 24 * 7,
                classifier_timeout_secs: 30,
                kind_filter_mode: KindFilterMode::Blacklist,
                allowed_kinds: Vec::new(),
            },
            push: PushConfig {
                gateway_url: "http://127.0.0.1:9200".to_string(),
                worker_count: 4,
                queue_capacity: 1000,
                retry_attempts: 3,
                retry_delay_secs: 5,
                gateway_timeout_secs: 10,
            },
            access: AccessConfig {
                mode: AccessMode::Public,
                tiers: Vec::new(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

const SEARCH_PATHS: &[&str] = &["relay.toml", "/app/relay.toml", "./config/relay.toml"];

/// Load a `RelayConfig` from, in priority order: an explicit `--config`
/// path, a TOML file found by searching `SEARCH_PATHS`, or built-in
/// defaults; then apply `RELAY_`-prefixed environment variable overrides
/// for the handful of leaf fields operators most commonly need to flip
/// without editing the file. Validates before returning.
pub fn load(explicit_path: Option<&Path>) -> Result<RelayConfig, ConfigError> {
    let mut config = match locate_file(explicit_path) {
        Some(path) => read_toml(&path)?,
        None => RelayConfig::defaults(),
    };
    apply_env_overrides(&mut config);
    config.validate().map_err(ConfigError::Invalid)?;
    Ok(config)
}

fn locate_file(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }
    SEARCH_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

fn read_toml(path: &Path) -> Result<RelayConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_env_overrides(config: &mut RelayConfig) {
    if let Ok(v) = std::env::var("RELAY_SERVER_PORT") {
        if let Ok(port) = v.parse() {
            config.server.port = port;
        }
    }
    if let Ok(v) = std::env::var("RELAY_SERVER_BIND_ADDRESS") {
        config.server.bind_address = v;
    }
    if let Ok(v) = std::env::var("RELAY_STORAGE_DATA_PATH") {
        config.storage.data_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("RELAY_MODERATION_CLASSIFIER_URL") {
        config.moderation.classifier_url = v;
    }
    if let Ok(v) = std::env::var("RELAY_PUSH_GATEWAY_URL") {
        config.push.gateway_url = v;
    }
    if let Ok(v) = std::env::var("RELAY_LOGGING_LEVEL") {
        config.logging.level = v;
    }
    if let Ok(v) = std::env::var("RELAY_SERVER_IDENTITY_SEED_HEX") {
        config.server.identity_seed_hex = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        RelayConfig::defaults().validate().unwrap();
    }

    #[test]
    fn env_override_takes_effect_over_defaults() {
        std::env::set_var("RELAY_SERVER_PORT", "4242");
        let config = load(None).unwrap();
        assert_eq!(config.server.port, 4242);
        std::env::remove_var("RELAY_SERVER_PORT");
    }
}

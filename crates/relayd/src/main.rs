//! relayd - the relay's websocket wire server and blob HTTP endpoint.
//!
//! Grounded on `gossipd/src/main.rs`'s tracing-init-then-run shape, extended
//! with a hot-reloadable config snapshot (`config::ConfigHandle`) and an
//! axum server in place of the teacher's raw TCP accept loop.

mod accept;
mod blob_routes;
mod config;
mod info;
mod protocol;
mod server;
mod state;
mod ws;

use clap::Parser;
use config::{Cli, ConfigHandle};
use relay_net::crypto::KeyPair;
use relay_store::access::AccessControl;
use relay_store::blob::BlobStore;
use relay_store::events::EventStore;
use relay_store::kv::Kv;
use relay_store::merkle::MerkleStore;
use relay_store::moderation::ModerationStore;
use state::{AppState, EVENT_BROADCAST_CAPACITY};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `AccessConfig` has no per-pubkey rate-limit field of its own (§4.9); this
/// mirrors the sliding-window default `AccessControl` already assumes.
const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 120;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match cli.load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::registry()
        .with(if config.logging.json { fmt::layer().json().boxed() } else { fmt::layer().boxed() })
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)))
        .init();

    info!("relayd v{} starting", env!("CARGO_PKG_VERSION"));

    let identity_seed = match hex::decode(&config.server.identity_seed_hex) {
        Ok(bytes) if bytes.len() == 32 => {
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&bytes);
            seed
        }
        _ => {
            error!("invalid server.identity_seed_hex");
            return ExitCode::FAILURE;
        }
    };
    let identity = Arc::new(KeyPair::from_seed(&identity_seed));

    let kv = match Kv::open(&config.storage.data_path) {
        Ok(kv) => kv,
        Err(e) => {
            error!(?e, "failed to open KV store");
            return ExitCode::FAILURE;
        }
    };
    let _gc_ticker = relay_store::kv::spawn_gc_ticker(kv.clone(), config.storage.vlog_gc_interval_secs);
    let events = match EventStore::open(kv.clone()) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            error!(?e, "failed to open event store");
            return ExitCode::FAILURE;
        }
    };
    let access = match AccessControl::new(
        kv.clone(),
        config.access.mode,
        config.access.tiers.clone(),
        DEFAULT_RATE_LIMIT_PER_MINUTE,
    ) {
        Ok(a) => Arc::new(a),
        Err(e) => {
            error!(?e, "failed to open access control store");
            return ExitCode::FAILURE;
        }
    };
    let moderation = Arc::new(ModerationStore::new(kv.clone()));
    let blob = Arc::new(BlobStore::new(kv.clone()));
    let merkle = Arc::new(MerkleStore::new(kv));

    let config_path = cli.config.clone();
    let config_handle = ConfigHandle::new(config_path, config.clone());
    #[cfg(unix)]
    let _sighup_handle = config_handle.clone().spawn_sighup_listener();

    let (event_tx, _rx) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
    let app_state = AppState {
        config: config_handle,
        identity,
        events,
        access,
        moderation,
        blob,
        merkle,
        event_tx,
    };

    let router = server::build_router(app_state);
    let bind_address = config.server.bind_address.clone();
    let port = config.server.port;

    if let Err(e) = server::run(&bind_address, port, router, shutdown_signal()).await {
        error!(?e, "server exited with error");
        return ExitCode::FAILURE;
    }

    info!("relayd shut down cleanly");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
}

//! relay-moderation - moderation worker pool daemon.
//!
//! Launches N workers calling the external classifier against pending
//! media-bearing events, plus the retention sweep and the orphan temp-file
//! sweeper. Grounded on `prober/src/main.rs`'s spawn-and-ctrl_c shape.

mod classifier;
mod config;
mod worker;

use classifier::ClassifierClient;
use clap::Parser;
use config::Cli;
use relay_net::crypto::KeyPair;
use relay_store::events::EventStore;
use relay_store::kv::Kv;
use relay_store::moderation::ModerationStore;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use worker::{run_orphan_sweeper, ModerationWorkerPool, MOD_TICKET_KIND};

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

    info!("relay-moderation v{} starting", env!("CARGO_PKG_VERSION"));

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
    let moderation = Arc::new(ModerationStore::new(kv));

    let classifier = Arc::new(ClassifierClient::new(
        config.moderation.classifier_url.clone(),
        config.moderation.classifier_timeout_secs,
    ));

    let temp_dir = std::env::temp_dir().join("relay-moderation");
    if let Err(e) = tokio::fs::create_dir_all(&temp_dir).await {
        error!(?e, "failed to create moderation temp dir");
        return ExitCode::FAILURE;
    }

    let pool = Arc::new(ModerationWorkerPool::new(
        events.clone(),
        moderation.clone(),
        classifier,
        identity.clone(),
        config.moderation.confidence_threshold,
        config.moderation.batch_size,
        Duration::from_secs(config.moderation.tick_interval_secs),
        temp_dir.clone(),
        config.moderation.blocked_retention_hours,
    ));
    let worker_handles = pool.spawn(config.moderation.worker_count);

    tokio::spawn(run_orphan_sweeper(
        temp_dir,
        Duration::from_secs(3600),
        Duration::from_secs(24 * 3600),
    ));

    let sweep_events = events.clone();
    let sweep_moderation = moderation.clone();
    let relay_pubkey = hex::encode(identity.public_key());
    let resolution_retention_hours = config.moderation.resolution_ticket_retention_hours;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(600));
        loop {
            ticker.tick().await;
            let now = now_secs();
            match sweep_moderation.sweep_expired(&sweep_events, now, MOD_TICKET_KIND, &relay_pubkey) {
                Ok(count) if count > 0 => info!(count, "retention sweep removed blocked events"),
                Ok(_) => {}
                Err(e) => error!(?e, "retention sweep failed"),
            }
            let swept = sweep_moderation.sweep_resolution_tickets(
                &sweep_events,
                now,
                MOD_TICKET_KIND,
                &relay_pubkey,
                resolution_retention_hours * 3600,
            );
            if swept > 0 {
                info!(swept, "swept stale resolution tickets");
            }
        }
    });

    info!(
        workers = config.moderation.worker_count,
        "relay-moderation started, press Ctrl+C to exit"
    );
    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    for handle in worker_handles {
        handle.abort();
    }

    ExitCode::SUCCESS
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

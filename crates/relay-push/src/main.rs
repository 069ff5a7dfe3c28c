//! relay-push - push-notification dispatcher daemon.
//!
//! Tails the global event timeline from its own cursor (no direct call from
//! relayd's accept path - keeps the daemon independently restartable, same
//! as `relay-moderation`'s tick-and-dequeue shape) and hands eligible events
//! to the dispatcher, which fans out to a bounded worker pool.

mod config;
mod dispatcher;
mod platform;
mod worker;

use clap::Parser;
use config::Cli;
use dispatcher::Dispatcher;
use platform::GatewayClient;
use relay_core::canonical::hex_pad_timestamp;
use relay_store::events::{parse_index_suffix, EventStore};
use relay_store::kv::Kv;
use relay_store::push::PushStore;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use worker::PushWorkerPool;

const TIMELINE_PREFIX: &[u8] = b"ets:";
const POLL_INTERVAL_SECS: u64 = 2;

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

    info!("relay-push v{} starting", env!("CARGO_PKG_VERSION"));

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
    let push_store = Arc::new(PushStore::new(kv));

    let gateway = Arc::new(GatewayClient::new(
        config.push.gateway_url.clone(),
        config.push.gateway_timeout_secs,
    ));

    let (pool, tx, rx) = PushWorkerPool::new(
        gateway,
        push_store.clone(),
        config.push.worker_count,
        config.push.queue_capacity,
        config.push.retry_attempts,
        Duration::from_secs(config.push.retry_delay_secs),
    );
    let worker_handle = pool.spawn(rx);

    let dispatcher = Arc::new(Dispatcher::new(events.clone(), push_store.clone(), tx));
    let tail_handle = tokio::spawn(tail_loop(events, push_store, dispatcher));

    info!(
        workers = config.push.worker_count,
        "relay-push started, press Ctrl+C to exit"
    );
    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    worker_handle.abort();
    tail_handle.abort();

    ExitCode::SUCCESS
}

/// Builds the seek key one byte past the cursor's key so the forward scan
/// resumes strictly after the last event it processed.
fn seek_past_cursor(ts: i64, id: &str) -> Vec<u8> {
    let mut key = TIMELINE_PREFIX.to_vec();
    key.extend_from_slice(hex_pad_timestamp(ts).as_bytes());
    key.push(b':');
    key.extend_from_slice(id.as_bytes());
    key.push(0);
    key
}

/// Polls the `ets:` timeline past the stored cursor on a fixed interval,
/// handing each newly-seen event to the dispatcher and advancing the cursor
/// as it goes. A separate process from relayd's accept path, so "on every
/// accepted event" (§4.6 step 1) is approximated by this poll interval
/// rather than a synchronous hook.
async fn tail_loop(events: Arc<EventStore>, push_store: Arc<PushStore>, dispatcher: Arc<Dispatcher>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(POLL_INTERVAL_SECS));
    loop {
        ticker.tick().await;
        let cursor = match push_store.cursor() {
            Ok(c) => c,
            Err(e) => {
                warn!(?e, "failed to read push cursor, skipping this tick");
                continue;
            }
        };
        let seek = cursor.as_ref().map(|(ts, id)| seek_past_cursor(*ts, id));

        let mut last = cursor;
        for entry in events.kv().iterate_prefix(TIMELINE_PREFIX, false, seek.as_deref()) {
            let (key, _) = match entry {
                Ok(kv) => kv,
                Err(e) => {
                    warn!(?e, "timeline scan error");
                    break;
                }
            };
            let Some((ts, id)) = parse_index_suffix(&key, TIMELINE_PREFIX.len()) else {
                continue;
            };
            match events.get_event(&id) {
                Ok(Some(event)) => dispatcher.handle_event(&event),
                Ok(None) => {}
                Err(e) => warn!(event_id = %id, ?e, "failed to load event for dispatch"),
            }
            last = Some((ts, id));
        }

        if let Some((ts, id)) = last {
            if let Err(e) = push_store.advance_cursor(ts, &id) {
                warn!(?e, "failed to advance push cursor");
            }
        }
    }
}

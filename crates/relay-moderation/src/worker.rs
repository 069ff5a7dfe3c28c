//! Moderation worker pool (SPEC_FULL.md §4.5).
//!
//! Grounded on `prober/src/main.rs`'s two-task shape (a schedule ticker plus
//! N concurrent execution slots) and `prober/src/scheduler.rs`'s
//! `Scheduler::stats`-driven slot accounting, replacing simulated probe
//! results with real classifier calls and real blocked-record persistence.

use crate::classifier::{ClassifierClient, ClassifierError, Decision};
use relay_core::crypto::moderation_ticket_id;
use relay_core::types::Event;
use relay_net::crypto::KeyPair;
use relay_store::events::EventStore;
use relay_store::moderation::{ModerationStore, PendingModerationRecord};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Wire kind of a relay-authored moderation-ticket event. Not a protocol
/// constant elsewhere in the core; owned by this pool since it is the only
/// component that emits these events.
pub const MOD_TICKET_KIND: u32 = 19841;

pub struct ModerationWorkerPool {
    events: Arc<EventStore>,
    moderation: Arc<ModerationStore>,
    classifier: Arc<ClassifierClient>,
    identity: Arc<KeyPair>,
    confidence_threshold: f64,
    batch_size: usize,
    tick_interval: Duration,
    temp_dir: PathBuf,
    blocked_retention_hours: i64,
}

#[derive(Serialize)]
struct TicketContent {
    reason: String,
    content_level: u8,
    confidence: f64,
}

impl ModerationWorkerPool {
    pub fn new(
        events: Arc<EventStore>,
        moderation: Arc<ModerationStore>,
        classifier: Arc<ClassifierClient>,
        identity: Arc<KeyPair>,
        confidence_threshold: f64,
        batch_size: usize,
        tick_interval: Duration,
        temp_dir: PathBuf,
        blocked_retention_hours: i64,
    ) -> Self {
        Self {
            events,
            moderation,
            classifier,
            identity,
            confidence_threshold,
            batch_size,
            tick_interval,
            temp_dir,
            blocked_retention_hours,
        }
    }

    /// Spawn `worker_count` independent ticking workers, each pulling its
    /// own batch on its own interval so a slow classifier response on one
    /// worker doesn't stall the others.
    pub fn spawn(self: Arc<Self>, worker_count: usize) -> Vec<tokio::task::JoinHandle<()>> {
        (0..worker_count)
            .map(|idx| {
                let pool = self.clone();
                tokio::spawn(async move { pool.run(idx).await })
            })
            .collect()
    }

    async fn run(&self, worker_idx: usize) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            ticker.tick().await;
            match self.moderation.dequeue_pending_batch(self.batch_size) {
                Ok(batch) if !batch.is_empty() => {
                    debug!(worker_idx, count = batch.len(), "dequeued pending moderation records");
                    for record in batch {
                        self.process(record).await;
                    }
                }
                Ok(_) => {}
                Err(e) => error!(worker_idx, ?e, "failed to dequeue pending moderation batch"),
            }
        }
    }

    async fn process(&self, record: PendingModerationRecord) {
        let scratch = match tempfile::Builder::new()
            .prefix("relay-mod-")
            .tempdir_in(&self.temp_dir)
        {
            Ok(dir) => dir,
            Err(e) => {
                error!(?e, "failed to create scoped temp dir for moderation download");
                return;
            }
        };

        let mut downloaded = Vec::new();
        for url in &record.media_urls {
            match download(url, scratch.path()).await {
                Ok(path) => downloaded.push(path),
                Err(e) => {
                    warn!(event_id = %record.event_id, url, ?e, "failed to download media for classification");
                }
            }
        }
        if downloaded.is_empty() {
            return;
        }

        match self.classifier.classify(&downloaded, "image").await {
            Ok(response) => {
                if response.decision == Decision::Block && response.confidence >= self.confidence_threshold {
                    self.block(&record.event_id, &response).await;
                } else {
                    debug!(event_id = %record.event_id, decision = ?response.decision, "event left visible");
                }
            }
            Err(ClassifierError::Request(e)) => {
                warn!(event_id = %record.event_id, ?e, "classifier call failed, leaving event as-is");
            }
            Err(e) => {
                warn!(event_id = %record.event_id, ?e, "classifier call failed, leaving event as-is");
            }
        }
        // scratch dropped here; its Drop impl removes the directory tree.
    }

    async fn block(&self, event_id: &str, response: &crate::classifier::ClassifyResponse) {
        let now = now_secs();
        let record = match self.moderation.mark_blocked_with_details(
            event_id,
            now,
            &response.reason,
            response.content_level,
            self.blocked_retention_hours,
        ) {
            Ok(r) => r,
            Err(e) => {
                error!(event_id, ?e, "failed to persist blocked record");
                return;
            }
        };

        if let Err(e) = self.emit_ticket(event_id, &record, response, now) {
            warn!(event_id, ?e, "failed to emit moderation ticket (block still applied)");
        }
    }

    fn emit_ticket(
        &self,
        event_id: &str,
        _record: &relay_store::moderation::BlockedRecord,
        response: &crate::classifier::ClassifyResponse,
        now: i64,
    ) -> Result<(), relay_store::events::EventStoreError> {
        let id_bytes = moderation_ticket_id(event_id, now);
        let id = hex::encode(id_bytes);
        let content = serde_json::to_string(&TicketContent {
            reason: response.reason.clone(),
            content_level: response.content_level,
            confidence: response.confidence,
        })
        .unwrap_or_default();
        let pubkey = hex::encode(self.identity.public_key());
        let tags = vec![vec!["e".to_string(), event_id.to_string()]];
        let signing_payload = format!("{id}:{pubkey}:{now}:{MOD_TICKET_KIND}:{content}");
        let sig = hex::encode(self.identity.sign(signing_payload.as_bytes()));

        let ticket = Event {
            id,
            pubkey,
            created_at: now,
            kind: MOD_TICKET_KIND,
            tags,
            content,
            sig,
        };
        self.events.store_event(&ticket)?;
        info!(event_id, ticket_id = %ticket.id, "emitted moderation ticket");
        Ok(())
    }
}

async fn download(url: &str, dir: &std::path::Path) -> Result<PathBuf, DownloadError> {
    let response = reqwest::get(url).await?.error_for_status()?;
    let bytes = response.bytes().await?;
    let name = format!("{:x}.bin", relay_core::crypto::content_hash(&bytes)[0] as u32 + rand::random::<u32>());
    let path = dir.join(name);
    tokio::fs::write(&path, &bytes).await?;
    Ok(path)
}

#[derive(Debug, thiserror::Error)]
enum DownloadError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Periodically removes scratch files older than `max_age` from `temp_dir`,
/// guarding against downloads orphaned by a worker crash between download
/// and classifier response.
pub async fn run_orphan_sweeper(temp_dir: PathBuf, interval: Duration, max_age: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let removed = sweep_once(&temp_dir, max_age).await;
        if removed > 0 {
            info!(removed, "swept orphaned moderation temp files");
        }
    }
}

async fn sweep_once(temp_dir: &std::path::Path, max_age: Duration) -> usize {
    let mut removed = 0;
    let Ok(mut entries) = tokio::fs::read_dir(temp_dir).await else {
        return 0;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(metadata) = entry.metadata().await else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        if modified.elapsed().unwrap_or_default() > max_age {
            let path = entry.path();
            let result = if metadata.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            if result.is_ok() {
                removed += 1;
            }
        }
    }
    removed
}

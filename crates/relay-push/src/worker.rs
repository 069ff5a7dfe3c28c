//! Bounded push-delivery worker pool (SPEC_FULL.md §4.6 steps 6-7).
//!
//! Grounded on `relay-moderation/src/worker.rs`'s pool shape, replaced with
//! a semaphore-bounded fan-out over a single `tokio::mpsc` queue rather than
//! N independent tickers, since push delivery is triggered by arriving
//! events instead of a periodic dequeue.

use crate::platform::{GatewayClient, PushMessage};
use relay_store::push::{DeliveryLogRecord, PushStore};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Semaphore};
use tracing::warn;

/// One device's worth of a notification, with its own retry counter so a
/// slow or flaky device doesn't block delivery to others.
pub struct PushTask {
    pub pubkey: String,
    pub token: String,
    pub event_id: String,
    pub kind: u32,
    pub message: PushMessage,
    pub attempts: u32,
}

pub struct PushWorkerPool {
    gateway: Arc<GatewayClient>,
    devices: Arc<PushStore>,
    tx: mpsc::Sender<PushTask>,
    retry_attempts: u32,
    retry_delay: Duration,
    permits: Arc<Semaphore>,
}

impl PushWorkerPool {
    /// Creates the pool and its bounded task channel. Returns the pool (to
    /// be `spawn`ed) and a sender the dispatcher enqueues onto.
    pub fn new(
        gateway: Arc<GatewayClient>,
        devices: Arc<PushStore>,
        worker_count: usize,
        queue_capacity: usize,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> (Arc<Self>, mpsc::Sender<PushTask>, mpsc::Receiver<PushTask>) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let pool = Arc::new(Self {
            gateway,
            devices,
            tx: tx.clone(),
            retry_attempts,
            retry_delay,
            permits: Arc::new(Semaphore::new(worker_count.max(1))),
        });
        (pool, tx, rx)
    }

    /// Drains `rx`, handing each task to one of `worker_count` concurrent
    /// delivery slots.
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::Receiver<PushTask>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                let pool = self.clone();
                let permit = match pool.permits.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    pool.deliver(task).await;
                    drop(permit);
                });
            }
        })
    }

    async fn deliver(&self, mut task: PushTask) {
        let now = now_secs();
        match self.gateway.send(&task.message).await {
            Ok(()) => {
                self.log(&task, true, now, "delivered");
            }
            Err(e) => {
                task.attempts += 1;
                if task.attempts < self.retry_attempts {
                    self.log(&task, false, now, &format!("attempt {} failed: {e}", task.attempts));
                    let tx = self.tx.clone();
                    let delay = self.retry_delay;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if tx.try_send(task).is_err() {
                            warn!("push retry dropped: queue full");
                        }
                    });
                } else {
                    self.log(&task, false, now, &format!("exhausted {} attempts: {e}", task.attempts));
                    if let Err(e) = self.devices.deactivate(&task.pubkey, &task.token) {
                        warn!(?e, "failed to deactivate device after repeated delivery failure");
                    }
                }
            }
        }
    }

    fn log(&self, task: &PushTask, success: bool, now: i64, detail: &str) {
        let record = DeliveryLogRecord {
            token: task.token.clone(),
            pubkey: task.pubkey.clone(),
            event_id: task.event_id.clone(),
            kind: task.kind,
            success,
            attempted_at: now,
            detail: detail.to_string(),
        };
        if let Err(e) = self.devices.log_delivery(&record) {
            warn!(?e, "failed to write delivery log record");
        }
    }
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

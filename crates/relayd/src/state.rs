//! Shared application state handed to every axum handler via `State`.
//!
//! Grounded on the `ioi-foundation-ioi-network` gateway's `AppState` +
//! `axum::extract::State` wiring; the broadcast channel replaces that
//! gateway's request/response shape with a fan-out publish/subscribe one,
//! since relay subscriptions are long-lived pushes rather than one-shot
//! RPCs.

use crate::config::ConfigHandle;
use relay_core::types::Event;
use relay_net::crypto::KeyPair;
use relay_store::access::AccessControl;
use relay_store::blob::BlobStore;
use relay_store::events::EventStore;
use relay_store::merkle::MerkleStore;
use relay_store::moderation::ModerationStore;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the accepted-event broadcast channel. A slow subscriber that
/// falls more than this many events behind receives `Lagged` and is told to
/// resubscribe rather than stalling every other connection.
pub const EVENT_BROADCAST_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigHandle>,
    pub identity: Arc<KeyPair>,
    pub events: Arc<EventStore>,
    pub access: Arc<AccessControl>,
    pub moderation: Arc<ModerationStore>,
    pub blob: Arc<BlobStore>,
    pub merkle: Arc<MerkleStore>,
    /// Fan-out of every event accepted into the store, consumed by each
    /// connection's live REQ subscriptions (SPEC_FULL.md §4.11).
    pub event_tx: broadcast::Sender<Event>,
}

impl AppState {
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // No receivers is not an error: a relay with zero live subscribers
        // still needs to accept and store events.
        let _ = self.event_tx.send(event);
    }
}

//! Shared accept-path logic for an incoming `EVENT` message, used by the
//! websocket handler (§4.1, §4.2, §4.4's media-gating rule).
//!
//! Grounded on `gossipd/src/server.rs`'s inline accept-and-broadcast
//! sequence inside its connection loop; here the broadcast fan-out is a
//! `tokio::sync::broadcast::Sender` instead of a direct peer write-list.

use crate::protocol::verify_event_signature;
use crate::state::AppState;
use relay_core::config::ModerationConfig;
use relay_core::types::{Event, KindFilterMode};
use relay_store::moderation::PendingModerationRecord;
use std::time::{SystemTime, UNIX_EPOCH};

/// Outcome of attempting to accept an `EVENT` message, mapped to an `OK`
/// reply by the caller.
pub enum AcceptOutcome {
    Accepted,
    Invalid(String),
    Rejected(String),
}

const MEDIA_TAG_NAMES: [&str; 2] = ["media", "imeta"];

fn has_media(event: &Event) -> bool {
    event
        .tags
        .iter()
        .any(|t| t.first().map(String::as_str).is_some_and(|name| MEDIA_TAG_NAMES.contains(&name)))
}

/// Validates, authorizes, stores, and - for media-bearing events - enqueues
/// `event` for moderation, then broadcasts it to live subscribers.
pub fn accept_event(state: &AppState, event: Event) -> AcceptOutcome {
    if event.id.len() != 64 || event.pubkey.len() != 64 || event.sig.len() != 128 {
        return AcceptOutcome::Invalid("malformed id/pubkey/sig length".to_string());
    }
    if !verify_event_signature(&event) {
        return AcceptOutcome::Invalid("signature verification failed".to_string());
    }

    let config_snapshot = state.config.current();
    if !kind_allowed(&config_snapshot.moderation, event.kind) {
        return AcceptOutcome::Rejected(format!("blocked: kind {} not permitted", event.kind));
    }

    let now = now_secs();
    if let Err(e) = state.access.authorize(&event.pubkey, now) {
        return AcceptOutcome::Rejected(crate::protocol::access_error_reason(&e));
    }

    if let Err(e) = state.events.store_event(&event) {
        return AcceptOutcome::Rejected(format!("error: {e}"));
    }

    if has_media(&event) {
        let media_urls: Vec<String> = event
            .tags
            .iter()
            .filter(|t| t.first().map(String::as_str).is_some_and(|n| MEDIA_TAG_NAMES.contains(&n)))
            .filter_map(|t| t.get(1).cloned())
            .collect();
        let record = PendingModerationRecord {
            event_id: event.id.clone(),
            media_urls,
            added_at: now,
        };
        if let Err(e) = state.moderation.enqueue_pending(&record) {
            tracing::warn!(event_id = %event.id, ?e, "failed to enqueue event for moderation");
        }
    }

    state.publish(event);
    AcceptOutcome::Accepted
}

/// Event-kind filter (§6's "event-filtering mode (whitelist|blacklist) and
/// allowed kinds"): whitelist admits only listed kinds, blacklist admits
/// everything except them. An empty list under blacklist mode (the default)
/// filters nothing.
fn kind_allowed(config: &ModerationConfig, kind: u32) -> bool {
    match config.kind_filter_mode {
        KindFilterMode::Whitelist => config.allowed_kinds.contains(&kind),
        KindFilterMode::Blacklist => !config.allowed_kinds.contains(&kind),
    }
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::types::{AccessMode, Event};
    use relay_net::crypto::KeyPair;
    use relay_store::access::AccessControl;
    use relay_store::blob::BlobStore;
    use relay_store::events::EventStore;
    use relay_store::kv::Kv;
    use relay_store::merkle::MerkleStore;
    use relay_store::moderation::ModerationStore;
    use std::sync::Arc;
    use tokio::sync::broadcast;

    fn signed_event(kind: u32, tags: Vec<Vec<String>>) -> Event {
        let key = KeyPair::from_seed(&[3u8; 32]);
        let id_bytes = [5u8; 32];
        let sig = key.sign(&id_bytes);
        Event {
            id: hex::encode(id_bytes),
            pubkey: hex::encode(key.public_key()),
            created_at: 100,
            kind,
            tags,
            content: "hi".into(),
            sig: hex::encode(sig),
        }
    }

    fn state() -> (tempfile::TempDir, AppState) {
        state_with_config(relay_core::config::RelayConfig::defaults())
    }

    fn state_with_config(config: relay_core::config::RelayConfig) -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let kv = Kv::open(dir.path()).unwrap();
        let events = Arc::new(EventStore::open(kv.clone()).unwrap());
        let (event_tx, _rx) = broadcast::channel(16);
        let app = AppState {
            config: crate::config::ConfigHandle::new(None, config),
            identity: Arc::new(KeyPair::from_seed(&[1u8; 32])),
            events,
            access: Arc::new(AccessControl::new(kv.clone(), AccessMode::Public, vec![], 1000).unwrap()),
            moderation: Arc::new(ModerationStore::new(kv.clone())),
            blob: Arc::new(BlobStore::new(kv.clone())),
            merkle: Arc::new(MerkleStore::new(kv)),
            event_tx,
        };
        (dir, app)
    }

    #[test]
    fn valid_event_is_accepted_and_stored() {
        let (_dir, state) = state();
        let event = signed_event(1, vec![]);
        let id = event.id.clone();
        assert!(matches!(accept_event(&state, event), AcceptOutcome::Accepted));
        assert!(state.events.has_event(&id).unwrap());
    }

    #[test]
    fn bad_signature_is_invalid() {
        let (_dir, state) = state();
        let mut event = signed_event(1, vec![]);
        event.sig = hex::encode([0u8; 64]);
        assert!(matches!(accept_event(&state, event), AcceptOutcome::Invalid(_)));
    }

    #[test]
    fn media_event_is_enqueued_for_moderation() {
        let (_dir, state) = state();
        let event = signed_event(1, vec![vec!["imeta".into(), "https://example/x.jpg".into()]]);
        let id = event.id.clone();
        assert!(matches!(accept_event(&state, event), AcceptOutcome::Accepted));
        let batch = state.moderation.dequeue_pending_batch(10).unwrap();
        assert!(batch.iter().any(|r| r.event_id == id));
    }

    #[test]
    fn blocked_pubkey_is_rejected() {
        let (_dir, state) = state();
        let event = signed_event(1, vec![]);
        state.access.block_pubkey(&event.pubkey, "spam").unwrap();
        assert!(matches!(accept_event(&state, event), AcceptOutcome::Rejected(_)));
    }

    fn with_kind_filter(
        mode: relay_core::types::KindFilterMode,
        allowed_kinds: Vec<u32>,
    ) -> relay_core::config::RelayConfig {
        let mut config = relay_core::config::RelayConfig::defaults();
        config.moderation.kind_filter_mode = mode;
        config.moderation.allowed_kinds = allowed_kinds;
        config
    }

    #[test]
    fn whitelist_mode_accepts_listed_kind_and_rejects_others() {
        let (_dir, state) =
            state_with_config(with_kind_filter(relay_core::types::KindFilterMode::Whitelist, vec![1]));
        assert!(matches!(accept_event(&state, signed_event(1, vec![])), AcceptOutcome::Accepted));
        assert!(matches!(accept_event(&state, signed_event(2, vec![])), AcceptOutcome::Rejected(_)));
    }

    #[test]
    fn blacklist_mode_rejects_listed_kind() {
        let (_dir, state) =
            state_with_config(with_kind_filter(relay_core::types::KindFilterMode::Blacklist, vec![9]));
        assert!(matches!(accept_event(&state, signed_event(9, vec![])), AcceptOutcome::Rejected(_)));
        assert!(matches!(accept_event(&state, signed_event(1, vec![])), AcceptOutcome::Accepted));
    }
}

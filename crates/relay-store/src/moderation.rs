//! Moderation pending/blocked/dispute queues and retention sweep
//! (SPEC_FULL.md §4.4).
//!
//! The at-most-once `dequeue_batch` has no direct teacher analogue, but is
//! built the same way `gossipd/src/storage.rs` wraps individual sled
//! transactions: each dequeued record is removed inside its own
//! transaction and only returned to the caller if the removal actually
//! took a value (i.e. no other worker got there first). The worker-tick
//! shape around it mirrors `prober/src/scheduler.rs`'s backoff-tier idiom.

use crate::events::EventStore;
use crate::kv::{Kv, RetryPolicy, StoreError};
use relay_core::types::Filter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Postcard(#[from] postcard::Error),
}

pub type Result<T> = std::result::Result<T, ModerationError>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingModerationRecord {
    pub event_id: String,
    pub media_urls: Vec<String>,
    pub added_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockedRecord {
    pub event_id: String,
    pub reason: String,
    pub content_level: u8,
    pub blocked_at: i64,
    pub retain_until: i64,
    pub has_dispute: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingDisputeRecord {
    pub dispute_id: String,
    pub ticket_id: String,
    pub event_id: String,
    pub media_url: String,
    pub reason: String,
    pub claimant_pubkey: String,
    pub added_at: i64,
}

const PENDING_MOD_PREFIX: &str = "pending_mod:";
const BLOCKED_PREFIX: &str = "blocked:";
const PENDING_DISPUTE_PREFIX: &str = "pending_dispute:";

pub struct ModerationStore {
    kv: Kv,
    retry: RetryPolicy,
}

impl ModerationStore {
    pub fn new(kv: Kv) -> Self {
        Self {
            kv,
            retry: RetryPolicy::default(),
        }
    }

    pub fn enqueue_pending(&self, record: &PendingModerationRecord) -> Result<()> {
        let key = format!("{PENDING_MOD_PREFIX}{}", record.event_id);
        let bytes = postcard::to_allocvec(record)?;
        self.kv.set(key.as_bytes(), &bytes)?;
        Ok(())
    }

    /// At-most-once batch dequeue: list up to `n` keys under the prefix,
    /// then atomically remove each one, keeping only those whose removal
    /// actually found a value. A key already claimed by a racing caller is
    /// logged and skipped, not treated as an error.
    pub fn dequeue_pending_batch(&self, n: usize) -> Result<Vec<PendingModerationRecord>> {
        self.dequeue_batch(PENDING_MOD_PREFIX, n)
    }

    pub fn dequeue_dispute_batch(&self, n: usize) -> Result<Vec<PendingDisputeRecord>> {
        self.dequeue_batch(PENDING_DISPUTE_PREFIX, n)
    }

    fn dequeue_batch<T: for<'de> Deserialize<'de>>(&self, prefix: &str, n: usize) -> Result<Vec<T>> {
        let candidate_keys: Vec<Vec<u8>> = self
            .kv
            .iterate_prefix(prefix.as_bytes(), false, None)
            .take(n)
            .filter_map(|r| r.ok().map(|(k, _)| k.to_vec()))
            .collect();

        let mut out = Vec::with_capacity(candidate_keys.len());
        for key in candidate_keys {
            let removed = self.kv.transaction(&self.retry, |tx| Ok(tx.remove(key.as_slice())?))?;
            match removed {
                Some(bytes) => match postcard::from_bytes::<T>(&bytes) {
                    Ok(record) => out.push(record),
                    Err(e) => warn!(?e, "dropping undecodable moderation queue record"),
                },
                None => {
                    warn!(key = %String::from_utf8_lossy(&key), "record already claimed by another worker");
                }
            }
        }
        Ok(out)
    }

    pub fn enqueue_dispute(&self, record: &PendingDisputeRecord) -> Result<()> {
        let key = format!("{PENDING_DISPUTE_PREFIX}{}", record.dispute_id);
        let bytes = postcard::to_allocvec(record)?;
        self.kv.set(key.as_bytes(), &bytes)?;
        Ok(())
    }

    pub fn mark_blocked(&self, record: &BlockedRecord) -> Result<()> {
        let key = format!("{BLOCKED_PREFIX}{}", record.event_id);
        let bytes = postcard::to_allocvec(record)?;
        self.kv.set(key.as_bytes(), &bytes)?;
        Ok(())
    }

    /// Convenience constructor used by the moderation worker pool: builds
    /// and stores a `BlockedRecord` with `retain_until` derived from
    /// `blocked_at + retention_hours` (the configured
    /// `moderation.blocked_retention_hours`), returning the stored record
    /// so the caller can emit a moderation-ticket event referencing it.
    pub fn mark_blocked_with_details(
        &self,
        event_id: &str,
        blocked_at: i64,
        reason: &str,
        content_level: u8,
        retention_hours: i64,
    ) -> Result<BlockedRecord> {
        let record = BlockedRecord {
            event_id: event_id.to_string(),
            reason: reason.to_string(),
            content_level,
            blocked_at,
            retain_until: blocked_at + retention_hours * 3600,
            has_dispute: false,
        };
        self.mark_blocked(&record)?;
        Ok(record)
    }

    pub fn get_blocked(&self, event_id: &str) -> Result<Option<BlockedRecord>> {
        let key = format!("{BLOCKED_PREFIX}{event_id}");
        match self.kv.get(key.as_bytes())? {
            Some(raw) => Ok(Some(postcard::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_has_dispute(&self, event_id: &str, has_dispute: bool) -> Result<()> {
        if let Some(mut record) = self.get_blocked(event_id)? {
            record.has_dispute = has_dispute;
            self.mark_blocked(&record)?;
        }
        Ok(())
    }

    /// Unblock an event outright (dispute upheld): removes the blocked
    /// record without deleting the underlying event.
    pub fn unblock(&self, event_id: &str) -> Result<()> {
        let key = format!("{BLOCKED_PREFIX}{event_id}");
        self.kv.delete(key.as_bytes())?;
        Ok(())
    }

    fn all_blocked(&self) -> Result<Vec<BlockedRecord>> {
        let mut out = Vec::new();
        for entry in self.kv.iterate_prefix(BLOCKED_PREFIX.as_bytes(), false, None) {
            let Ok((_, value)) = entry else { continue };
            out.push(postcard::from_bytes(&value)?);
        }
        Ok(out)
    }

    /// Retention sweep (§4.4): deletes expired, non-disputed blocked
    /// records, their referenced events, and any moderation-ticket events
    /// authored by the relay referencing them. Returns the count swept.
    pub fn sweep_expired(
        &self,
        events: &EventStore,
        now: i64,
        mod_ticket_kind: u32,
        relay_pubkey: &str,
    ) -> Result<usize> {
        let mut swept = 0;
        for record in self.all_blocked()? {
            if record.has_dispute || record.retain_until >= now {
                continue;
            }
            self.unblock(&record.event_id)?;
            events.delete_event(&record.event_id).ok();
            for ticket in tickets_referencing(events, mod_ticket_kind, relay_pubkey, &record.event_id) {
                events.delete_event(&ticket.id).ok();
            }
            swept += 1;
        }
        Ok(swept)
    }

    /// Sweep resolution-ticket events older than `max_age_secs`, a separate
    /// pass from the blocked-record sweep above.
    pub fn sweep_resolution_tickets(
        &self,
        events: &EventStore,
        now: i64,
        resolution_ticket_kind: u32,
        relay_pubkey: &str,
        max_age_secs: i64,
    ) -> usize {
        let filter = Filter {
            kinds: vec![resolution_ticket_kind],
            authors: vec![relay_pubkey.to_string()],
            until: Some(now - max_age_secs),
            limit: Some(10_000),
            ..Default::default()
        };
        let stale = crate::query::query(events, &filter);
        let mut swept = 0;
        for ticket in stale {
            if events.delete_event(&ticket.id).is_ok() {
                swept += 1;
            }
        }
        swept
    }

    pub fn stats(&self) -> ModerationStats {
        let pending = self
            .kv
            .iterate_prefix(PENDING_MOD_PREFIX.as_bytes(), false, None)
            .count();
        let blocked = self.kv.iterate_prefix(BLOCKED_PREFIX.as_bytes(), false, None).count();
        let disputes = self
            .kv
            .iterate_prefix(PENDING_DISPUTE_PREFIX.as_bytes(), false, None)
            .count();
        ModerationStats {
            pending,
            blocked,
            disputes,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ModerationStats {
    pub pending: usize,
    pub blocked: usize,
    pub disputes: usize,
}

fn tickets_referencing(
    events: &EventStore,
    mod_ticket_kind: u32,
    relay_pubkey: &str,
    event_id: &str,
) -> Vec<relay_core::types::Event> {
    let mut tags = BTreeMap::new();
    tags.insert("e".to_string(), vec![event_id.to_string()]);
    let filter = Filter {
        kinds: vec![mod_ticket_kind],
        authors: vec![relay_pubkey.to_string()],
        tags,
        limit: Some(10),
        ..Default::default()
    };
    crate::query::query(events, &filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Kv;

    fn stores() -> (tempfile::TempDir, EventStore, ModerationStore) {
        let dir = tempfile::tempdir().unwrap();
        let kv = Kv::open(dir.path()).unwrap();
        let events = EventStore::open(kv.clone()).unwrap();
        let moderation = ModerationStore::new(kv);
        (dir, events, moderation)
    }

    #[test]
    fn dequeue_batch_is_at_most_once_across_callers() {
        let (_dir, _events, moderation) = stores();
        for i in 0..10 {
            moderation
                .enqueue_pending(&PendingModerationRecord {
                    event_id: format!("e{i}"),
                    media_urls: vec![],
                    added_at: 0,
                })
                .unwrap();
        }

        let first = moderation.dequeue_pending_batch(6).unwrap();
        let second = moderation.dequeue_pending_batch(6).unwrap();
        let mut ids: Vec<_> = first.iter().chain(second.iter()).map(|r| r.event_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(first.len() + second.len(), 10);
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn sweep_respects_dispute_exemption() {
        let (_dir, events, moderation) = stores();
        let event = relay_core::types::Event {
            id: "e1".into(),
            pubkey: "a".into(),
            created_at: 0,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: "s".into(),
        };
        events.store_event(&event).unwrap();
        moderation
            .mark_blocked(&BlockedRecord {
                event_id: "e1".into(),
                reason: "r".into(),
                content_level: 3,
                blocked_at: 0,
                retain_until: 100,
                has_dispute: true,
            })
            .unwrap();

        moderation.sweep_expired(&events, 200, 9999, "relay").unwrap();
        assert!(events.has_event("e1").unwrap());

        moderation.set_has_dispute("e1", false).unwrap();
        moderation.sweep_expired(&events, 200, 9999, "relay").unwrap();
        assert!(!events.has_event("e1").unwrap());
    }
}

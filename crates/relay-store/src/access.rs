//! Subscriber / pubkey access layer (SPEC_FULL.md §3, §4.4's blocked-pubkey
//! piece).
//!
//! Grounded on `gossipd/src/membership.rs`: `RwLock<HashMap>` registry,
//! `RwLock<HashSet>` banned set, sliding-window rate limiting, generalized
//! from world-membership admission to subscriber tiers and blocked-pubkey
//! rejection. Blocked pubkeys and subscriber records are persisted through
//! `Kv` the same way `push.rs` persists device registrations, so a relay
//! restart does not silently un-ban anyone or drop tier/quota state; only
//! the per-minute rate-limit window stays in-memory, since it resets on its
//! own every 60 seconds regardless of process lifetime.

use crate::kv::{Kv, StoreError};
use parking_lot::RwLock;
use relay_core::types::{AccessMode, Tier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("pubkey is blocked: {0}")]
    Blocked(String),
    #[error("rate limited")]
    RateLimited,
    #[error("subscription required")]
    SubscriptionRequired,
    #[error("subscription expired")]
    SubscriptionExpired,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subscriber {
    pub pubkey: String,
    pub tier: String,
    pub expires_at: Option<i64>,
    pub monthly_bytes_used: u64,
}

struct RateLimitState {
    window_start: Instant,
    count: u32,
}

const BLOCKED_PREFIX: &str = "access_blocked:";
const SUBSCRIBER_PREFIX: &str = "access_subscriber:";

pub struct AccessControl {
    kv: Kv,
    mode: AccessMode,
    tiers: Vec<Tier>,
    subscribers: RwLock<HashMap<String, Subscriber>>,
    blocked: RwLock<HashMap<String, String>>,
    rate_limits: RwLock<HashMap<String, RateLimitState>>,
    rate_limit_per_minute: u32,
}

impl AccessControl {
    /// Opens the access layer over `kv`, loading any blocked pubkeys and
    /// registered subscribers persisted by a previous run.
    pub fn new(
        kv: Kv,
        mode: AccessMode,
        tiers: Vec<Tier>,
        rate_limit_per_minute: u32,
    ) -> crate::kv::Result<Self> {
        let blocked = Self::load_blocked(&kv)?;
        let subscribers = Self::load_subscribers(&kv)?;
        Ok(Self {
            kv,
            mode,
            tiers,
            subscribers: RwLock::new(subscribers),
            blocked: RwLock::new(blocked),
            rate_limits: RwLock::new(HashMap::new()),
            rate_limit_per_minute,
        })
    }

    fn load_blocked(kv: &Kv) -> crate::kv::Result<HashMap<String, String>> {
        let mut out = HashMap::new();
        for entry in kv.iterate_prefix(BLOCKED_PREFIX.as_bytes(), false, None) {
            let (key, value) = entry?;
            let key_bytes: &[u8] = &key;
            let pubkey = String::from_utf8_lossy(&key_bytes[BLOCKED_PREFIX.len()..]).into_owned();
            let reason = String::from_utf8_lossy(&value).into_owned();
            out.insert(pubkey, reason);
        }
        Ok(out)
    }

    fn load_subscribers(kv: &Kv) -> crate::kv::Result<HashMap<String, Subscriber>> {
        let mut out = HashMap::new();
        for entry in kv.iterate_prefix(SUBSCRIBER_PREFIX.as_bytes(), false, None) {
            let (key, value) = entry?;
            let subscriber: Subscriber = postcard::from_bytes(&value).map_err(StoreError::from)?;
            out.insert(subscriber.pubkey.clone(), subscriber);
        }
        Ok(out)
    }

    pub fn block_pubkey(&self, pubkey: &str, reason: &str) -> crate::kv::Result<()> {
        self.blocked.write().insert(pubkey.to_string(), reason.to_string());
        self.kv.set(format!("{BLOCKED_PREFIX}{pubkey}").as_bytes(), reason.as_bytes())
    }

    pub fn unblock_pubkey(&self, pubkey: &str) -> crate::kv::Result<()> {
        self.blocked.write().remove(pubkey);
        self.kv.delete(format!("{BLOCKED_PREFIX}{pubkey}").as_bytes())
    }

    pub fn is_blocked(&self, pubkey: &str) -> bool {
        self.blocked.read().contains_key(pubkey)
    }

    pub fn register_subscriber(&self, subscriber: Subscriber) -> crate::kv::Result<()> {
        let bytes = postcard::to_allocvec(&subscriber).map_err(StoreError::from)?;
        self.kv
            .set(format!("{SUBSCRIBER_PREFIX}{}", subscriber.pubkey).as_bytes(), &bytes)?;
        self.subscribers.write().insert(subscriber.pubkey.clone(), subscriber);
        Ok(())
    }

    pub fn subscriber(&self, pubkey: &str) -> Option<Subscriber> {
        self.subscribers.read().get(pubkey).cloned()
    }

    pub fn tier_named(&self, name: &str) -> Option<&Tier> {
        self.tiers.iter().find(|t| t.name == name)
    }

    /// Authorize a write from `pubkey` at `now` (unix seconds): checks
    /// blocked status, access mode / subscription validity, then the
    /// sliding-window rate limit. Matches `membership.rs::check_authorized`'s
    /// ordering (banned -> status -> rate-limit).
    pub fn authorize(&self, pubkey: &str, now: i64) -> Result<(), AccessError> {
        if let Some(reason) = self.blocked.read().get(pubkey) {
            return Err(AccessError::Blocked(reason.clone()));
        }

        match self.mode {
            AccessMode::Public => {}
            AccessMode::Subscription | AccessMode::Exclusive => {
                let subscribers = self.subscribers.read();
                let sub = subscribers.get(pubkey).ok_or(AccessError::SubscriptionRequired)?;
                if let Some(expires_at) = sub.expires_at {
                    if expires_at < now {
                        return Err(AccessError::SubscriptionExpired);
                    }
                }
            }
        }

        self.check_rate_limit(pubkey)
    }

    fn check_rate_limit(&self, pubkey: &str) -> Result<(), AccessError> {
        let mut limits = self.rate_limits.write();
        let now = Instant::now();
        let state = limits.entry(pubkey.to_string()).or_insert_with(|| RateLimitState {
            window_start: now,
            count: 0,
        });
        if now.duration_since(state.window_start) > Duration::from_secs(60) {
            state.window_start = now;
            state.count = 0;
        }
        if state.count >= self.rate_limit_per_minute {
            return Err(AccessError::RateLimited);
        }
        state.count += 1;
        Ok(())
    }

    pub fn record_storage_used(&self, pubkey: &str, bytes: u64) -> crate::kv::Result<()> {
        let updated = {
            let mut subs = self.subscribers.write();
            let Some(sub) = subs.get_mut(pubkey) else { return Ok(()) };
            sub.monthly_bytes_used += bytes;
            sub.clone()
        };
        let encoded = postcard::to_allocvec(&updated).map_err(StoreError::from)?;
        self.kv.set(format!("{SUBSCRIBER_PREFIX}{pubkey}").as_bytes(), &encoded)
    }

    pub fn stats(&self) -> AccessStats {
        AccessStats {
            subscribers: self.subscribers.read().len(),
            blocked: self.blocked.read().len(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AccessStats {
    pub subscribers: usize,
    pub blocked: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(mode: AccessMode, rate_limit_per_minute: u32) -> (tempfile::TempDir, AccessControl) {
        let dir = tempfile::tempdir().unwrap();
        let kv = Kv::open(dir.path()).unwrap();
        let access = AccessControl::new(kv, mode, vec![], rate_limit_per_minute).unwrap();
        (dir, access)
    }

    #[test]
    fn blocked_pubkey_is_rejected_before_rate_limit() {
        let (_dir, access) = access(AccessMode::Public, 100);
        access.block_pubkey("evil", "spam").unwrap();
        assert!(matches!(access.authorize("evil", 0), Err(AccessError::Blocked(_))));
    }

    #[test]
    fn subscription_mode_requires_registration() {
        let (_dir, access) = access(AccessMode::Subscription, 100);
        assert!(matches!(
            access.authorize("nobody", 0),
            Err(AccessError::SubscriptionRequired)
        ));
        access
            .register_subscriber(Subscriber {
                pubkey: "nobody".into(),
                tier: "basic".into(),
                expires_at: Some(1000),
                monthly_bytes_used: 0,
            })
            .unwrap();
        assert!(access.authorize("nobody", 500).is_ok());
        assert!(matches!(
            access.authorize("nobody", 2000),
            Err(AccessError::SubscriptionExpired)
        ));
    }

    #[test]
    fn rate_limit_trips_after_threshold() {
        let (_dir, access) = access(AccessMode::Public, 2);
        assert!(access.authorize("a", 0).is_ok());
        assert!(access.authorize("a", 0).is_ok());
        assert!(matches!(access.authorize("a", 0), Err(AccessError::RateLimited)));
    }

    #[test]
    fn blocked_pubkey_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Kv::open(dir.path()).unwrap();
        let access = AccessControl::new(kv.clone(), AccessMode::Public, vec![], 100).unwrap();
        access.block_pubkey("evil", "spam").unwrap();
        drop(access);

        let reopened = AccessControl::new(kv, AccessMode::Public, vec![], 100).unwrap();
        assert!(reopened.is_blocked("evil"));
        assert!(matches!(reopened.authorize("evil", 0), Err(AccessError::Blocked(_))));
    }

    #[test]
    fn subscriber_quota_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Kv::open(dir.path()).unwrap();
        let access = AccessControl::new(kv.clone(), AccessMode::Public, vec![], 100).unwrap();
        access
            .register_subscriber(Subscriber {
                pubkey: "alice".into(),
                tier: "pro".into(),
                expires_at: None,
                monthly_bytes_used: 0,
            })
            .unwrap();
        access.record_storage_used("alice", 4096).unwrap();
        drop(access);

        let reopened = AccessControl::new(kv, AccessMode::Public, vec![], 100).unwrap();
        assert_eq!(reopened.stats().subscribers, 1);
        assert_eq!(reopened.subscriber("alice").unwrap().monthly_bytes_used, 4096);
    }
}

//! Push-device registry, delivery audit log, and event-tail cursor
//! (SPEC_FULL.md §4.6).
//!
//! Grounded on `blob.rs`'s point get/set-over-`Kv` shape (no cross-key
//! transaction is needed here: device registration, deactivation, and log
//! writes are each a single key). The cursor lets a separate dispatcher
//! process tail the `ets:` timeline without relayd calling into it directly.

use crate::kv::{Kv, StoreError};
use relay_core::canonical::{hex_pad_timestamp, parse_hex_timestamp};
use relay_core::types::Platform;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PushError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Postcard(#[from] postcard::Error),
    #[error("malformed cursor record")]
    MalformedCursor,
}

pub type Result<T> = std::result::Result<T, PushError>;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub pubkey: String,
    pub platform: Platform,
    pub token: String,
    pub registered_at: i64,
    pub active: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DeliveryLogRecord {
    pub token: String,
    pub pubkey: String,
    pub event_id: String,
    pub kind: u32,
    pub success: bool,
    pub attempted_at: i64,
    pub detail: String,
}

fn device_key(pubkey: &str, token: &str) -> Vec<u8> {
    let mut key = format!("device:{pubkey}").into_bytes();
    key.push(0);
    key.extend_from_slice(token.as_bytes());
    key
}

fn device_prefix(pubkey: &str) -> Vec<u8> {
    let mut key = format!("device:{pubkey}").into_bytes();
    key.push(0);
    key
}

fn log_key(ts: i64, token: &str) -> Vec<u8> {
    format!("pushlog:{}:{token}", hex_pad_timestamp(ts)).into_bytes()
}

const CURSOR_KEY: &[u8] = b"push:cursor";

pub struct PushStore {
    kv: Kv,
}

impl PushStore {
    pub fn new(kv: Kv) -> Self {
        Self { kv }
    }

    /// Register or re-register (upsert) a device token for `pubkey`.
    /// Re-registration of a previously-deactivated token reactivates it.
    pub fn register_device(&self, pubkey: &str, platform: Platform, token: &str, now: i64) -> Result<()> {
        let device = Device {
            pubkey: pubkey.to_string(),
            platform,
            token: token.to_string(),
            registered_at: now,
            active: true,
        };
        let bytes = postcard::to_allocvec(&device).map_err(StoreError::from)?;
        self.kv.set(&device_key(pubkey, token), &bytes)?;
        Ok(())
    }

    /// All active devices registered to `pubkey`.
    pub fn devices_for(&self, pubkey: &str) -> Result<Vec<Device>> {
        let prefix = device_prefix(pubkey);
        let mut out = Vec::new();
        for entry in self.kv.iterate_prefix(&prefix, false, None) {
            let (_, value) = entry?;
            let device: Device = postcard::from_bytes(value.as_ref()).map_err(StoreError::from)?;
            if device.active {
                out.push(device);
            }
        }
        Ok(out)
    }

    /// Mark a device inactive after it exceeds the configured retry budget
    /// (repeated-failure eviction, §4.6).
    pub fn deactivate(&self, pubkey: &str, token: &str) -> Result<()> {
        let key = device_key(pubkey, token);
        if let Some(raw) = self.kv.get(&key)? {
            let mut device: Device = postcard::from_bytes(raw.as_ref()).map_err(StoreError::from)?;
            device.active = false;
            let bytes = postcard::to_allocvec(&device).map_err(StoreError::from)?;
            self.kv.set(&key, &bytes)?;
        }
        Ok(())
    }

    /// Append one row to the delivery audit log.
    pub fn log_delivery(&self, record: &DeliveryLogRecord) -> Result<()> {
        let key = log_key(record.attempted_at, &record.token);
        let bytes = postcard::to_allocvec(record).map_err(StoreError::from)?;
        self.kv.set(&key, &bytes)?;
        Ok(())
    }

    /// The `(created_at, id)` of the last event the dispatcher's tail scan
    /// consumed, or `None` before the first tick.
    pub fn cursor(&self) -> Result<Option<(i64, String)>> {
        match self.kv.get(CURSOR_KEY)? {
            Some(raw) => {
                let s = String::from_utf8_lossy(raw.as_ref()).into_owned();
                let (ts_hex, id) = s.split_once(':').ok_or(PushError::MalformedCursor)?;
                let ts = parse_hex_timestamp(ts_hex).ok_or(PushError::MalformedCursor)?;
                Ok(Some((ts, id.to_string())))
            }
            None => Ok(None),
        }
    }

    pub fn advance_cursor(&self, ts: i64, id: &str) -> Result<()> {
        let value = format!("{}:{id}", hex_pad_timestamp(ts));
        self.kv.set(CURSOR_KEY, value.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Kv;

    fn store() -> (tempfile::TempDir, PushStore) {
        let dir = tempfile::tempdir().unwrap();
        let kv = Kv::open(dir.path()).unwrap();
        (dir, PushStore::new(kv))
    }

    #[test]
    fn registered_device_is_listed_until_deactivated() {
        let (_dir, store) = store();
        store.register_device("alice", Platform::Ios, "tok1", 100).unwrap();
        store.register_device("alice", Platform::Android, "tok2", 100).unwrap();
        assert_eq!(store.devices_for("alice").unwrap().len(), 2);

        store.deactivate("alice", "tok1").unwrap();
        let remaining = store.devices_for("alice").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].token, "tok2");
    }

    #[test]
    fn cursor_roundtrips_and_advances() {
        let (_dir, store) = store();
        assert!(store.cursor().unwrap().is_none());
        store.advance_cursor(100, "e1").unwrap();
        assert_eq!(store.cursor().unwrap(), Some((100, "e1".to_string())));
        store.advance_cursor(200, "e2").unwrap();
        assert_eq!(store.cursor().unwrap(), Some((200, "e2".to_string())));
    }
}

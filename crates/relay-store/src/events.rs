//! Event schema and indexes (SPEC_FULL.md §4.2).
//!
//! Grounded on `gossipd/src/event_log.rs`'s append/dedup shape, generalized
//! from a single version-vector counter to the five-keyspace index layout:
//! `evt:`, `eti:`, `eai:`, `ets:`, `tag:`.

use crate::kv::{Kv, RetryPolicy, StoreError};
use relay_core::canonical::{hex_pad_timestamp, parse_hex_timestamp};
use relay_core::types::Event;
use thiserror::Error;

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("schema version mismatch: database has {on_disk}, binary expects {expected}")]
    SchemaMismatch { on_disk: u32, expected: u32 },
    #[error("schema version missing on a non-empty database; migration required")]
    MigrationRequired,
    #[error("event not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, EventStoreError>;

pub struct EventStore {
    kv: Kv,
    retry: RetryPolicy,
}

fn eti_key(kind: u32, ts: i64, id: &str) -> Vec<u8> {
    format!("eti:{kind}:{}:{id}", hex_pad_timestamp(ts)).into_bytes()
}

fn eai_key(pubkey: &str, ts: i64, id: &str) -> Vec<u8> {
    format!("eai:{pubkey}:{}:{id}", hex_pad_timestamp(ts)).into_bytes()
}

fn ets_key(ts: i64, id: &str) -> Vec<u8> {
    format!("ets:{}:{id}", hex_pad_timestamp(ts)).into_bytes()
}

fn evt_key(id: &str) -> Vec<u8> {
    format!("evt:{id}").into_bytes()
}

fn tag_key(name: &str, value: &str, ts: i64, id: &str) -> Vec<u8> {
    let mut key = format!("tag:{name}:{value}").into_bytes();
    key.push(0);
    key.extend_from_slice(format!("{}:{id}", hex_pad_timestamp(ts)).as_bytes());
    key
}

/// All index keys (excluding the primary `evt:` record) for an event.
fn index_keys(event: &Event) -> Vec<Vec<u8>> {
    let mut keys = vec![
        eti_key(event.kind, event.created_at, &event.id),
        eai_key(&event.pubkey, event.created_at, &event.id),
        ets_key(event.created_at, &event.id),
    ];
    for tag in &event.tags {
        if let (Some(name), Some(value)) = (tag.first(), tag.get(1)) {
            if Event::is_indexable_tag_name(name) {
                keys.push(tag_key(name, value, event.created_at, &event.id));
            }
        }
    }
    keys
}

impl EventStore {
    pub fn open(kv: Kv) -> Result<Self> {
        let store = Self {
            kv,
            retry: RetryPolicy::default(),
        };
        store.check_schema()?;
        Ok(store)
    }

    fn check_schema(&self) -> Result<()> {
        match self.kv.get(b"_schema:version")? {
            Some(raw) => {
                let on_disk = u32::from_le_bytes(raw.as_ref().try_into().map_err(|_| {
                    EventStoreError::SchemaMismatch {
                        on_disk: 0,
                        expected: SCHEMA_VERSION,
                    }
                })?);
                if on_disk != SCHEMA_VERSION {
                    return Err(EventStoreError::SchemaMismatch {
                        on_disk,
                        expected: SCHEMA_VERSION,
                    });
                }
                Ok(())
            }
            None => {
                if self.kv.iterate_prefix(b"evt:", false, None).next().is_some() {
                    return Err(EventStoreError::MigrationRequired);
                }
                self.kv.set(b"_schema:version", &SCHEMA_VERSION.to_le_bytes())?;
                Ok(())
            }
        }
    }

    /// Store an event and all its indexes in a single transaction.
    pub fn store_event(&self, event: &Event) -> Result<()> {
        let primary = evt_key(&event.id);
        let primary_bytes = postcard::to_allocvec(event).map_err(StoreError::from)?;
        let indexes = index_keys(event);

        self.kv.transaction(&self.retry, |tx| {
            tx.insert(primary.as_slice(), primary_bytes.as_slice())?;
            for key in &indexes {
                tx.insert(key.as_slice(), &[])?;
            }
            Ok(())
        })?;
        Ok(())
    }

    pub fn get_event(&self, id: &str) -> Result<Option<Event>> {
        match self.kv.get(&evt_key(id))? {
            Some(raw) => {
                let event: Event = postcard::from_bytes(raw.as_ref())?;
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    pub fn has_event(&self, id: &str) -> Result<bool> {
        Ok(self.kv.contains(&evt_key(id))?)
    }

    /// Delete an event and all its indexes transactionally. A no-op (not an
    /// error) if the event is already gone.
    pub fn delete_event(&self, id: &str) -> Result<()> {
        let Some(event) = self.get_event(id)? else {
            return Ok(());
        };
        let primary = evt_key(id);
        let indexes = index_keys(&event);

        self.kv.transaction(&self.retry, |tx| {
            tx.remove(primary.as_slice())?;
            for key in &indexes {
                tx.remove(key.as_slice())?;
            }
            Ok(())
        })?;
        Ok(())
    }

    pub fn kv(&self) -> &Kv {
        &self.kv
    }
}

/// Parse the trailing `{hex-ts}:{id}` suffix of an index key, given the
/// number of bytes the fixed prefix (before the timestamp) occupies.
pub fn parse_index_suffix(key: &[u8], prefix_len: usize) -> Option<(i64, String)> {
    let rest = std::str::from_utf8(&key[prefix_len..]).ok()?;
    let (ts_hex, id) = rest.split_once(':')?;
    let ts = parse_hex_timestamp(ts_hex)?;
    Some((ts, id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Kv;

    fn test_event(id: &str, kind: u32, ts: i64, tags: Vec<Vec<String>>) -> Event {
        Event {
            id: id.to_string(),
            pubkey: "author1".to_string(),
            created_at: ts,
            kind,
            tags,
            content: String::new(),
            sig: "sig".to_string(),
        }
    }

    fn store() -> (tempfile::TempDir, EventStore) {
        let dir = tempfile::tempdir().unwrap();
        let kv = Kv::open(dir.path()).unwrap();
        (dir, EventStore::open(kv).unwrap())
    }

    #[test]
    fn store_and_fetch_roundtrip() {
        let (_dir, store) = store();
        let event = test_event("e1", 1, 100, vec![]);
        store.store_event(&event).unwrap();
        let fetched = store.get_event("e1").unwrap().unwrap();
        assert_eq!(fetched, event);
    }

    #[test]
    fn delete_removes_all_indexes() {
        let (_dir, store) = store();
        let event = test_event("e1", 1, 100, vec![vec!["p".into(), "a".into()]]);
        store.store_event(&event).unwrap();
        assert!(store.kv().contains(&eti_key(1, 100, "e1")).unwrap());
        assert!(store.kv().contains(&tag_key("p", "a", 100, "e1")).unwrap());

        store.delete_event("e1").unwrap();
        assert!(!store.has_event("e1").unwrap());
        assert!(!store.kv().contains(&eti_key(1, 100, "e1")).unwrap());
        assert!(!store.kv().contains(&tag_key("p", "a", 100, "e1")).unwrap());
    }

    #[test]
    fn only_single_char_tags_are_indexed() {
        let (_dir, store) = store();
        let event = test_event(
            "e1",
            1,
            100,
            vec![vec!["client".into(), "myapp".into()], vec!["p".into(), "a".into()]],
        );
        store.store_event(&event).unwrap();
        assert!(store.kv().contains(&tag_key("p", "a", 100, "e1")).unwrap());
        assert!(!store.kv().contains(&tag_key("client", "myapp", 100, "e1")).unwrap());
    }
}

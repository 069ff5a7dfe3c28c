//! Content-addressed opaque blob store (SPEC_FULL.md §4.7).
//!
//! Grounded on `relay-store::kv`'s transaction primitive, the same way
//! `gossipd/src/storage.rs` pairs a content key with a small metadata
//! record. The byte payload is written as a single KV value; sled's own
//! value-threshold config is what routes large values to its log, so no
//! separate chunking is done here.

use crate::kv::{Kv, RetryPolicy, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Postcard(#[from] postcard::Error),
    #[error("blob not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, BlobError>;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobMeta {
    pub hash: String,
    pub owner: String,
    pub media_type: String,
    pub size: u64,
}

fn blob_key(hash: &str) -> Vec<u8> {
    format!("blob:{hash}").into_bytes()
}

fn meta_key(hash: &str) -> Vec<u8> {
    format!("blobmeta:{hash}").into_bytes()
}

fn stats_key() -> &'static [u8] {
    b"stats:blob"
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlobStats {
    pub count: u64,
    pub total_bytes: u64,
}

pub struct BlobStore {
    kv: Kv,
    retry: RetryPolicy,
}

impl BlobStore {
    pub fn new(kv: Kv) -> Self {
        Self {
            kv,
            retry: RetryPolicy::default(),
        }
    }

    /// Store `bytes` under `hash` with `owner`/`media_type`. Idempotent: a
    /// second put of the same hash overwrites the metadata (owner may
    /// differ) but never duplicates the payload.
    pub fn put(&self, hash: &str, bytes: &[u8], owner: &str, media_type: &str) -> Result<()> {
        let already_present = self.kv.contains(&blob_key(hash))?;
        let meta = BlobMeta {
            hash: hash.to_string(),
            owner: owner.to_string(),
            media_type: media_type.to_string(),
            size: bytes.len() as u64,
        };
        let meta_bytes = postcard::to_allocvec(&meta)?;
        let blob_k = blob_key(hash);
        let meta_k = meta_key(hash);

        self.kv.transaction(&self.retry, |tx| {
            tx.insert(blob_k.as_slice(), bytes)?;
            tx.insert(meta_k.as_slice(), meta_bytes.as_slice())?;
            Ok(())
        })?;

        if !already_present {
            self.bump_stats(meta.size)?;
        }
        Ok(())
    }

    pub fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.kv.get(&blob_key(hash))?.map(|v| v.to_vec()))
    }

    pub fn meta(&self, hash: &str) -> Result<Option<BlobMeta>> {
        match self.kv.get(&meta_key(hash))? {
            Some(raw) => Ok(Some(postcard::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, hash: &str) -> Result<()> {
        let meta = self.meta(hash)?;
        let blob_k = blob_key(hash);
        let meta_k = meta_key(hash);
        self.kv.transaction(&self.retry, |tx| {
            tx.remove(blob_k.as_slice())?;
            tx.remove(meta_k.as_slice())?;
            Ok(())
        })?;
        if let Some(meta) = meta {
            self.drop_stats(meta.size)?;
        }
        Ok(())
    }

    fn bump_stats(&self, size: u64) -> Result<()> {
        let mut stats = self.stats()?;
        stats.count += 1;
        stats.total_bytes += size;
        self.kv.set(stats_key(), &postcard::to_allocvec(&stats)?)?;
        Ok(())
    }

    fn drop_stats(&self, size: u64) -> Result<()> {
        let mut stats = self.stats()?;
        stats.count = stats.count.saturating_sub(1);
        stats.total_bytes = stats.total_bytes.saturating_sub(size);
        self.kv.set(stats_key(), &postcard::to_allocvec(&stats)?)?;
        Ok(())
    }

    pub fn stats(&self) -> Result<BlobStats> {
        match self.kv.get(stats_key())? {
            Some(raw) => Ok(postcard::from_bytes(&raw)?),
            None => Ok(BlobStats::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let kv = Kv::open(dir.path()).unwrap();
        (dir, BlobStore::new(kv))
    }

    #[test]
    fn put_get_delete_roundtrip() {
        let (_dir, store) = store();
        store.put("h1", b"hello", "owner1", "image/png").unwrap();
        assert_eq!(store.get("h1").unwrap().unwrap(), b"hello");
        assert_eq!(store.meta("h1").unwrap().unwrap().owner, "owner1");

        store.delete("h1").unwrap();
        assert!(store.get("h1").unwrap().is_none());
        assert!(store.meta("h1").unwrap().is_none());
    }

    #[test]
    fn repeated_put_does_not_double_count_stats() {
        let (_dir, store) = store();
        store.put("h1", b"hello", "owner1", "image/png").unwrap();
        store.put("h1", b"hello", "owner2", "image/png").unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(store.meta("h1").unwrap().unwrap().owner, "owner2");
    }
}

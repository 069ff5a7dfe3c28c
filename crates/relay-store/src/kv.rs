//! Embedded KV engine wrapper (SPEC_FULL.md §4.1).
//!
//! Wraps a single `sled::Db` the way the teacher's `Storage` wrapped a
//! handful of named `sled::Tree`s (see `gossipd/src/storage.rs` in
//! `examples/rng-ops-gossip`); here the schema calls for one flat ordered
//! byte-key namespace (`evt:`, `eti:`, `eai:`, `ets:`, `tag:`, ...) so a
//! single default tree is used and callers supply fully-prefixed keys.
//!
//! sled does not expose BadgerDB's value-log GC ratio knobs directly; the
//! closest available levers are cache capacity, flush interval, and
//! `Db::size_on_disk`. `vlog_gc_interval_secs` drives a periodic
//! `flush_async` instead of an explicit log-rewrite pass (recorded as an
//! Open Question resolution in `DESIGN.md`).

use rand::Rng;
use std::ops::Bound;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
    #[error("key not found")]
    NotFound,
    #[error("transaction conflict budget exhausted")]
    ConflictBudgetExhausted,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Conflict-retry policy for transactional writes (§4.1): base ~20ms
/// doubling, jitter, capped at ~2s, 10 attempts.
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(20),
            cap: Duration::from_secs(2),
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    fn backoff_for(&self, attempt: u32) -> Duration {
        let doubled = self.base.saturating_mul(1u32 << attempt.min(16));
        let capped = doubled.min(self.cap);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis().max(1) as u64 / 4);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// The embedded store. A thin wrapper over `sled::Db` with the operations
/// the schema and query planner need: point get/set/delete, prefix range
/// iteration (forward or reverse), multi-key transactions, and batched
/// writes.
#[derive(Clone)]
pub struct Kv {
    db: sled::Db,
}

impl Kv {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .cache_capacity(128 * 1024 * 1024)
            .flush_every_ms(Some(1000))
            .open()?;
        Ok(Self { db })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<sled::IVec>> {
        Ok(self.db.get(key)?)
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.remove(key)?;
        Ok(())
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.db.contains_key(key)?)
    }

    /// Apply a batch of writes atomically (no cross-key read dependency).
    pub fn batch_write(&self, puts: Vec<(Vec<u8>, Vec<u8>)>, deletes: Vec<Vec<u8>>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for (k, v) in puts {
            batch.insert(k, v);
        }
        for k in deletes {
            batch.remove(k);
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Run `f` inside a sled transaction over the default tree. sled retries
    /// the closure internally on an abort signal; `RetryPolicy` governs an
    /// outer bounded retry for the (rare) case the transaction itself
    /// returns a storage-level conflict error rather than looping forever.
    pub fn transaction<F, T>(&self, policy: &RetryPolicy, mut f: F) -> Result<T>
    where
        F: FnMut(&sled::transaction::TransactionalTree) -> sled::transaction::ConflictableTransactionResult<T, StoreError>,
    {
        let mut attempt = 0;
        loop {
            match self.db.transaction(|tx| f(tx)) {
                Ok(value) => return Ok(value),
                Err(sled::transaction::TransactionError::Abort(e)) => return Err(e),
                Err(sled::transaction::TransactionError::Storage(e)) => {
                    if attempt >= policy.max_attempts {
                        return Err(StoreError::ConflictBudgetExhausted);
                    }
                    std::thread::sleep(policy.backoff_for(attempt));
                    attempt += 1;
                    let _ = e;
                }
            }
        }
    }

    /// Iterate keys with the given prefix, in forward or reverse order,
    /// optionally seeking to start at/after `seek`. Matches the reverse
    /// iteration contract the query planner relies on (§4.3).
    pub fn iterate_prefix<'a>(
        &'a self,
        prefix: &[u8],
        reverse: bool,
        seek: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = Result<(sled::IVec, sled::IVec)>> + 'a> {
        let mut end = prefix.to_vec();
        end.push(0xFF);
        let lower = prefix.to_vec();
        let range = match seek {
            Some(seek_key) if reverse => (Bound::Included(lower), Bound::Included(seek_key.to_vec())),
            Some(seek_key) => (Bound::Included(seek_key.to_vec()), Bound::Excluded(end)),
            None => (Bound::Included(lower), Bound::Excluded(end)),
        };
        let iter = self.db.range(range);
        if reverse {
            Box::new(iter.rev().map(|r| r.map_err(StoreError::from)))
        } else {
            Box::new(iter.map(|r| r.map_err(StoreError::from)))
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub async fn flush_async(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    pub fn size_on_disk(&self) -> Result<u64> {
        Ok(self.db.size_on_disk()?)
    }

    /// Explicit value-log GC / compaction request (§4.1), callable after a
    /// bulk write in addition to the periodic sweep `spawn_gc_ticker` runs.
    /// sled has no separate compaction pass distinct from flushing its log,
    /// so this wraps `flush()`.
    pub fn compact(&self) -> Result<()> {
        self.flush()
    }
}

/// Spawns the periodic value-log GC standin `vlog_gc_interval_secs`
/// configures (§4.1): each tick flushes asynchronously, logs the on-disk
/// size, then runs an explicit `compact()` pass. sled exposes a single
/// flush/compact path rather than BadgerDB's tiered background / post-bulk
/// / compaction phases, so `vlog_gc_background_ratio` and
/// `vlog_gc_post_bulk_ratio` have no distinct behavior to drive here; only
/// the interval itself is load-bearing.
pub fn spawn_gc_ticker(kv: Kv, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            if let Err(e) = kv.flush_async().await {
                tracing::warn!(?e, "periodic vlog GC flush failed");
                continue;
            }
            match kv.size_on_disk() {
                Ok(size) => tracing::debug!(size_bytes = size, "vlog GC tick"),
                Err(e) => tracing::warn!(?e, "size_on_disk failed during vlog GC tick"),
            }
            if let Err(e) = kv.compact() {
                tracing::warn!(?e, "vlog GC compact failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_kv() -> (tempfile::TempDir, Kv) {
        let dir = tempfile::tempdir().unwrap();
        let kv = Kv::open(dir.path()).unwrap();
        (dir, kv)
    }

    #[test]
    fn get_set_delete_roundtrip() {
        let (_dir, kv) = test_kv();
        kv.set(b"evt:abc", b"payload").unwrap();
        assert_eq!(kv.get(b"evt:abc").unwrap().unwrap().as_ref(), b"payload");
        kv.delete(b"evt:abc").unwrap();
        assert!(kv.get(b"evt:abc").unwrap().is_none());
    }

    #[test]
    fn prefix_iteration_respects_order() {
        let (_dir, kv) = test_kv();
        for ts in ["0000000000000001", "0000000000000002", "0000000000000003"] {
            kv.set(format!("ets:{ts}:id").as_bytes(), b"").unwrap();
        }
        let forward: Vec<_> = kv
            .iterate_prefix(b"ets:", false, None)
            .map(|r| String::from_utf8(r.unwrap().0.to_vec()).unwrap())
            .collect();
        assert_eq!(forward.len(), 3);
        assert!(forward[0] < forward[1]);

        let reverse: Vec<_> = kv
            .iterate_prefix(b"ets:", true, None)
            .map(|r| String::from_utf8(r.unwrap().0.to_vec()).unwrap())
            .collect();
        assert!(reverse[0] > reverse[1]);
    }

    #[test]
    fn compact_does_not_lose_data() {
        let (_dir, kv) = test_kv();
        kv.set(b"evt:abc", b"payload").unwrap();
        kv.compact().unwrap();
        assert_eq!(kv.get(b"evt:abc").unwrap().unwrap().as_ref(), b"payload");
    }

    #[test]
    fn batch_write_is_atomic_looking() {
        let (_dir, kv) = test_kv();
        kv.batch_write(
            vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())],
            vec![],
        )
        .unwrap();
        assert_eq!(kv.get(b"a").unwrap().unwrap().as_ref(), b"1");
        assert_eq!(kv.get(b"b").unwrap().unwrap().as_ref(), b"2");
    }
}

//! Content-addressed Merkle leaf store (SPEC_FULL.md §4.8), adjacent to the
//! event core but sharing the same KV engine.
//!
//! Grounded on `relay-store::blob`'s content-hash keying and
//! `gossipd/src/membership.rs`'s per-key registry shape, generalized to a
//! per-root, per-pubkey ownership record plus a separate per-root parent
//! cache (a leaf has different parents in different DAGs, so parents are
//! not stored on the leaf itself).

use crate::kv::{Kv, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MerkleError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Postcard(#[from] postcard::Error),
}

pub type Result<T> = std::result::Result<T, MerkleError>;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MerkleLeaf {
    pub hash: String,
    pub name: String,
    pub item_type: String,
    pub content_hash: Option<String>,
    pub children: Vec<String>,
    pub size: u64,
    pub tags: Vec<Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub root: String,
    pub pubkey: String,
    pub signature: String,
    pub claimed_at: i64,
}

fn leaf_key(hash: &str) -> Vec<u8> {
    format!("mleaf:{hash}").into_bytes()
}

fn ownership_key(root: &str, pubkey: &str) -> Vec<u8> {
    format!("mown:{root}:{pubkey}").into_bytes()
}

fn ownership_prefix(root: &str) -> Vec<u8> {
    format!("mown:{root}:").into_bytes()
}

fn parent_key(root: &str, leaf: &str) -> Vec<u8> {
    format!("mparent:{root}:{leaf}").into_bytes()
}

pub struct MerkleStore {
    kv: Kv,
}

impl MerkleStore {
    pub fn new(kv: Kv) -> Self {
        Self { kv }
    }

    /// Insert a leaf, keyed by content hash so identical content shared
    /// across DAGs is stored once. Overwriting an existing leaf with
    /// identical hash is a no-op write (same bytes, same key).
    pub fn put_leaf(&self, leaf: &MerkleLeaf) -> Result<()> {
        let bytes = postcard::to_allocvec(leaf)?;
        self.kv.set(&leaf_key(&leaf.hash), &bytes)?;
        Ok(())
    }

    pub fn get_leaf(&self, hash: &str) -> Result<Option<MerkleLeaf>> {
        match self.kv.get(&leaf_key(hash))? {
            Some(raw) => Ok(Some(postcard::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn has_leaf(&self, hash: &str) -> Result<bool> {
        Ok(self.kv.contains(&leaf_key(hash))?)
    }

    /// Claim ownership of `root` for `pubkey`: creates a new ownership
    /// record, or updates the signature/timestamp of an existing one. The
    /// DAG itself does not need re-uploading to claim an existing root.
    pub fn claim_ownership(&self, root: &str, pubkey: &str, signature: &str, now: i64) -> Result<()> {
        let record = OwnershipRecord {
            root: root.to_string(),
            pubkey: pubkey.to_string(),
            signature: signature.to_string(),
            claimed_at: now,
        };
        let bytes = postcard::to_allocvec(&record)?;
        self.kv.set(&ownership_key(root, pubkey), &bytes)?;
        Ok(())
    }

    pub fn get_ownership(&self, root: &str, pubkey: &str) -> Result<Option<OwnershipRecord>> {
        match self.kv.get(&ownership_key(root, pubkey))? {
            Some(raw) => Ok(Some(postcard::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn owners_of(&self, root: &str) -> Result<Vec<OwnershipRecord>> {
        let prefix = ownership_prefix(root);
        let mut out = Vec::new();
        for entry in self.kv.iterate_prefix(&prefix, false, None) {
            let (_, value) = entry?;
            out.push(postcard::from_bytes(&value)?);
        }
        Ok(out)
    }

    /// Record that `leaf` has `parent` within the DAG rooted at `root`.
    /// Stored per-root since the same leaf hash can sit at different
    /// positions in different DAGs.
    pub fn record_parent(&self, root: &str, leaf: &str, parent: &str) -> Result<()> {
        let key = parent_key(root, leaf);
        let mut parents: Vec<String> = match self.kv.get(&key)? {
            Some(raw) => postcard::from_bytes(&raw)?,
            None => Vec::new(),
        };
        if !parents.iter().any(|p| p == parent) {
            parents.push(parent.to_string());
            self.kv.set(&key, &postcard::to_allocvec(&parents)?)?;
        }
        Ok(())
    }

    pub fn parents_of(&self, root: &str, leaf: &str) -> Result<Vec<String>> {
        match self.kv.get(&parent_key(root, leaf))? {
            Some(raw) => Ok(postcard::from_bytes(&raw)?),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, MerkleStore) {
        let dir = tempfile::tempdir().unwrap();
        let kv = Kv::open(dir.path()).unwrap();
        (dir, MerkleStore::new(kv))
    }

    fn leaf(hash: &str, children: Vec<&str>) -> MerkleLeaf {
        MerkleLeaf {
            hash: hash.to_string(),
            name: "file.bin".into(),
            item_type: "file".into(),
            content_hash: None,
            children: children.into_iter().map(String::from).collect(),
            size: 10,
            tags: vec![],
        }
    }

    #[test]
    fn leaves_dedupe_by_hash_across_dags() {
        let (_dir, store) = store();
        store.put_leaf(&leaf("shared", vec![])).unwrap();
        assert!(store.has_leaf("shared").unwrap());
        store.record_parent("root-a", "shared", "root-a").unwrap();
        store.record_parent("root-b", "shared", "root-b").unwrap();
        assert_eq!(store.parents_of("root-a", "shared").unwrap(), vec!["root-a"]);
        assert_eq!(store.parents_of("root-b", "shared").unwrap(), vec!["root-b"]);
    }

    #[test]
    fn claiming_existing_root_does_not_require_new_upload() {
        let (_dir, store) = store();
        store.claim_ownership("root-a", "alice", "sig1", 100).unwrap();
        assert!(store.get_ownership("root-a", "alice").unwrap().is_some());

        store.claim_ownership("root-a", "bob", "sig2", 200).unwrap();
        let owners = store.owners_of("root-a").unwrap();
        assert_eq!(owners.len(), 2);
    }
}

//! relay-store - embedded event storage, query, access, moderation, and
//! blob/leaf persistence.
//!
//! This crate provides:
//! - A flat ordered KV engine wrapper over sled
//! - Event storage with kind/author/timestamp/tag indexes
//! - A reverse-iteration query planner over those indexes
//! - Subscriber/pubkey access control and rate limiting
//! - Pending/blocked/dispute moderation queues and retention sweep
//! - Content-addressed blob and Merkle leaf stores
//! - Push-device registry, delivery audit log, and event-tail cursor

pub mod access;
pub mod blob;
pub mod events;
pub mod kv;
pub mod merkle;
pub mod moderation;
pub mod push;
pub mod query;

pub use access::{AccessControl, AccessError, Subscriber};
pub use blob::{BlobError, BlobStore};
pub use events::{EventStore, EventStoreError};
pub use kv::{Kv, StoreError};
pub use merkle::{MerkleError, MerkleStore};
pub use moderation::{ModerationError, ModerationStore};
pub use push::{PushError, PushStore};

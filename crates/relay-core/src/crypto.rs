//! Domain-separated hash derivations used inside the relay core.
//!
//! Signature verification over client-submitted events is assumed to happen
//! ahead of the store (SPEC_FULL.md §1 Non-goals); what lives here are the
//! hash derivations the relay itself computes: content-address hashes for
//! the blob/leaf store and moderation-ticket identifiers.

use blake3::Hasher;

/// Domain prefix for blob content addressing.
pub const DOMAIN_BLOB: &[u8] = b"blob";
/// Domain prefix for Merkle leaf content addressing.
pub const DOMAIN_LEAF: &[u8] = b"leaf";
/// Domain prefix for moderation ticket identifiers.
pub const DOMAIN_MOD_TICKET: &[u8] = b"mod-ticket";

/// Content hash of arbitrary bytes, as used by the blob store (§4.7) and the
/// Merkle leaf store (§4.8).
pub fn content_hash(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(DOMAIN_BLOB);
    hasher.update(bytes);
    *hasher.finalize().as_bytes()
}

/// Content hash for a DAG leaf, distinct domain from a flat blob so the same
/// bytes uploaded as a bare blob and as a DAG leaf don't collide.
pub fn leaf_hash(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(DOMAIN_LEAF);
    hasher.update(bytes);
    *hasher.finalize().as_bytes()
}

/// Deterministic id for a relay-authored moderation ticket, derived from the
/// blocked event id and the decision timestamp so re-running a sweep never
/// produces two tickets for the same decision.
pub fn moderation_ticket_id(event_id: &str, decided_at: i64) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(DOMAIN_MOD_TICKET);
    hasher.update(event_id.as_bytes());
    hasher.update(&decided_at.to_le_bytes());
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_and_leaf_hashes_differ() {
        let bytes = b"same content";
        assert_ne!(content_hash(bytes), leaf_hash(bytes));
    }

    #[test]
    fn ticket_id_is_deterministic() {
        let a = moderation_ticket_id("deadbeef", 100);
        let b = moderation_ticket_id("deadbeef", 100);
        assert_eq!(a, b);
        let c = moderation_ticket_id("deadbeef", 101);
        assert_ne!(a, c);
    }
}

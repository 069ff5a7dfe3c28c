//! Identity signing for the relay.
//!
//! This crate provides:
//! - Ed25519 keypair generation and signing, used by `relayd` and
//!   `relay-moderation` to sign relay-authored events

pub mod crypto;

pub use crypto::{CryptoError, KeyPair};

//! Core event types, key-encoding helpers, and error taxonomy shared by
//! every crate in the relay.
//!
//! # Modules
//!
//! - [`types`]: wire and domain types (`Event`, `Filter`, `ClientMessage`, ...)
//! - [`canonical`]: postcard encoding and hex-padded timestamp keys
//! - [`crypto`]: content-addressing and ticket-id hash derivations
//! - [`error`]: shared error taxonomy

pub mod canonical;
pub mod config;
pub mod crypto;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

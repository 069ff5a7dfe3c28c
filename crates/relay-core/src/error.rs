//! Error taxonomy shared by every relay crate (SPEC_FULL.md §7).

use thiserror::Error;

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Relay error kinds. Every crate defines its own narrower error enum for
/// its own operations and converts into this one at crate boundaries where
/// a caller needs the unified taxonomy (e.g. the wire server mapping a
/// storage error to an `OK false <reason>`).
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found")]
    NotFound,

    #[error("conflict: concurrent write lost the race")]
    Conflict,

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("queue full")]
    QueueFull,

    #[error("external service unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Reason prefix used on the wire for a rejected `EVENT` (§7).
    pub fn wire_reason(&self) -> String {
        match self {
            Error::Invalid(m) => format!("invalid: {m}"),
            Error::Unauthorized(m) => format!("blocked: {m}"),
            Error::QueueFull => "rate-limited: queue full".to_string(),
            _ => format!("error: {self}"),
        }
    }
}

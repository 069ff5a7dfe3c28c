//! Key encoding and postcard helpers shared by the store and query planner.
//!
//! Timestamps embedded in KV keys are 16-character zero-padded lowercase
//! hex so that lexicographic byte order equals numeric order (§4.2).

use crate::error::{Error, Result};
use serde::Serialize;

/// Serialize a value to postcard bytes for KV storage.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(Error::from)
}

/// Encode a timestamp for use inside an index key.
pub fn hex_pad_timestamp(ts: i64) -> String {
    format!("{:016x}", ts as u64)
}

/// Decode a timestamp previously encoded by [`hex_pad_timestamp`].
pub fn parse_hex_timestamp(s: &str) -> Option<i64> {
    u64::from_str_radix(s, 16).ok().map(|v| v as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_timestamps_sort_like_numbers() {
        let a = hex_pad_timestamp(5);
        let b = hex_pad_timestamp(100);
        assert!(a < b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn roundtrip() {
        for ts in [0i64, 1, 1_700_000_000, i64::MAX / 2] {
            let encoded = hex_pad_timestamp(ts);
            assert_eq!(parse_hex_timestamp(&encoded), Some(ts));
        }
    }
}

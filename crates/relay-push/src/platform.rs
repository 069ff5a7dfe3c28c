//! HTTP client to the external push gateway (SPEC_FULL.md §4.6).
//!
//! Grounded on `relay-moderation/src/classifier.rs`'s thin `reqwest::Client`
//! wrapper; the gateway fans a single POST out to APNs/FCM on our behalf,
//! so this crate only ever speaks one wire shape regardless of platform.

use relay_core::types::Platform;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

/// A single notification ready to hand to the gateway: title/body plus the
/// structured fields the client uses to render a rich preview (§4.6 step 5).
#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub token: String,
    pub platform: Platform,
    pub title: String,
    pub body: String,
    pub ref_event_id: String,
    pub ref_kind: u32,
    pub content_snippet: String,
}

pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("gateway http client config is valid");
        Self { http, base_url: base_url.into() }
    }

    /// POST a single message to the gateway's per-platform send endpoint.
    pub async fn send(&self, message: &PushMessage) -> Result<(), GatewayError> {
        let platform_segment = match message.platform {
            Platform::Ios => "ios",
            Platform::Android => "android",
        };
        self.http
            .post(format!("{}/send/{platform_segment}", self.base_url))
            .json(message)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Truncate `content` to at most `max_chars` characters, appending an
/// ellipsis when truncated (§4.6 step 5's content-snippet rule).
pub fn content_snippet(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let mut snippet: String = content.chars().take(max_chars).collect();
    snippet.push('\u{2026}');
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_truncates_long_content_with_ellipsis() {
        let long = "a".repeat(150);
        let snippet = content_snippet(&long, 100);
        assert_eq!(snippet.chars().count(), 101);
        assert!(snippet.ends_with('\u{2026}'));
    }

    #[test]
    fn snippet_leaves_short_content_untouched() {
        assert_eq!(content_snippet("hi", 100), "hi");
    }
}

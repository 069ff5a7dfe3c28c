//! Core event types for the relay protocol.
//!
//! All types here are designed for JSON wire serialization (the client
//! protocol, §6) and for postcard storage encoding (the KV layer,
//! `relay-store`). Field order in the struct matters only for postcard;
//! JSON carries field names.

use serde::{Deserialize, Serialize};

/// Hex-encoded 32-byte event identifier.
pub type EventIdHex = String;
/// Hex-encoded 32-byte public key.
pub type PubkeyHex = String;

/// A single tag: an ordered sequence of short strings, first element is the
/// tag name. Only single-character tag names are indexed (`relay-store`);
/// longer names are stored but not directly queryable.
pub type Tag = Vec<String>;

/// An event as received from or sent to a client. The identifier and
/// signature are stored as received; this crate does not re-derive or
/// verify them (assumed to be handled by the access layer ahead of the
/// store, per the crypto primitives the relay relies on externally).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: EventIdHex,
    pub pubkey: PubkeyHex,
    pub created_at: i64,
    pub kind: u32,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub content: String,
    pub sig: String,
}

impl Event {
    /// First value of the first tag named `name`, if any.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// All values for tags named `name`.
    pub fn tag_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(name))
            .filter_map(|t| t.get(1))
            .map(String::as_str)
    }

    /// The `e` tag event id this event replies to, preferring a tag marked
    /// `reply`, falling back to the last unmarked `e` tag (NIP-10 positional
    /// convention).
    pub fn reply_to(&self) -> Option<&str> {
        let marked = self
            .tags
            .iter()
            .find(|t| {
                t.first().map(String::as_str) == Some("e") && t.get(3).map(String::as_str) == Some("reply")
            })
            .and_then(|t| t.get(1));
        if marked.is_some() {
            return marked.map(String::as_str);
        }
        self.tags
            .iter()
            .filter(|t| t.first().map(String::as_str) == Some("e"))
            .last()
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// Whether the tag name is a single ASCII character (the indexable set).
    pub fn is_indexable_tag_name(name: &str) -> bool {
        name.chars().count() == 1
    }
}

/// A subscription filter (§4.3, §6).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<EventIdHex>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<PubkeyHex>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    /// Tag constraints, keyed by single-character tag name (`#p`, `#e`, ...)
    /// without the `#` prefix.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub tags: std::collections::BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Default and hard-cap result size for a query (§4.3).
pub const DEFAULT_QUERY_LIMIT: usize = 500;

impl Filter {
    pub fn effective_limit(&self) -> usize {
        match self.limit {
            Some(0) | None => DEFAULT_QUERY_LIMIT,
            Some(n) => n,
        }
    }

    /// Whether `event` satisfies every constraint in this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.ids.is_empty() && !self.ids.iter().any(|id| id == &event.id) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.iter().any(|a| a == &event.pubkey) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }
        for (name, values) in &self.tags {
            let has_match = event
                .tag_values(name)
                .any(|v| values.iter().any(|want| want == v));
            if !has_match {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !event.content.to_lowercase().contains(&search.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// Wire message kinds exchanged over the relay websocket (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "verb")]
pub enum ClientMessage {
    #[serde(rename = "EVENT")]
    Event { event: Event },
    #[serde(rename = "REQ")]
    Req { sub_id: String, filters: Vec<Filter> },
    #[serde(rename = "CLOSE")]
    Close { sub_id: String },
    #[serde(rename = "AUTH")]
    Auth { event: Event },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "verb")]
pub enum RelayMessage {
    #[serde(rename = "EVENT")]
    Event { sub_id: String, event: Event },
    #[serde(rename = "OK")]
    Ok { id: EventIdHex, accepted: bool, message: String },
    #[serde(rename = "EOSE")]
    Eose { sub_id: String },
    #[serde(rename = "CLOSED")]
    Closed { sub_id: String, message: String },
    #[serde(rename = "NOTICE")]
    Notice { message: String },
}

/// Content moderation decision levels (§4.5). 0..2 allow, 3..5 block,
/// subject to the configured confidence threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentLevel(pub u8);

impl ContentLevel {
    pub fn is_blockable(self) -> bool {
        self.0 >= 3
    }
}

/// Platform for a registered push device (§4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

/// Subscriber access tier (§3, §4.9).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Tier {
    pub name: String,
    pub price_sats: u64,
    pub monthly_byte_limit: u64,
    pub unlimited: bool,
}

/// User-access mode (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Public,
    Subscription,
    Exclusive,
}

/// Event-filtering mode (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindFilterMode {
    Whitelist,
    Blacklist,
}

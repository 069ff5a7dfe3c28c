//! Per-event notification handling (SPEC_FULL.md §4.6, steps 1-6).
//!
//! Grounded on `relay-moderation/src/worker.rs`'s pool-plus-queue shape:
//! here the "queue" is a bounded `tokio::mpsc` of per-device tasks instead
//! of a KV-backed pending set, since push fan-out is transient work that is
//! fine to drop under backpressure (§4.6 step 6) rather than durable.

use crate::platform::{content_snippet, PushMessage};
use crate::worker::PushTask;
use parking_lot::RwLock;
use relay_core::types::{Event, Filter};
use relay_store::events::EventStore;
use relay_store::push::PushStore;
use relay_store::query;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

const PROFILE_KIND: u32 = 0;
const TEXT_NOTE_KIND: u32 = 1;
const CONTACTS_KIND: u32 = 3;
const DM_KIND: u32 = 4;
const REPOST_KIND: u32 = 6;
const REACTION_KIND: u32 = 7;
const AUDIO_NOTE_KIND: u32 = 1808;
const AUDIO_REPOST_KIND: u32 = 1809;
const GIFT_WRAP_KIND: u32 = 1059;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NotifyKind {
    Reply,
    AudioNote,
    AudioRepost,
    Contacts,
    Dm,
    Repost,
    Reaction,
    GiftWrap,
}

impl NotifyKind {
    fn label(self) -> &'static str {
        match self {
            NotifyKind::Reply => "replied to your note",
            NotifyKind::AudioNote => "posted a new audio note",
            NotifyKind::AudioRepost => "reposted an audio note",
            NotifyKind::Contacts => "updated their contact list",
            NotifyKind::Dm => "sent you a message",
            NotifyKind::Repost => "reposted your note",
            NotifyKind::Reaction => "reacted to your note",
            NotifyKind::GiftWrap => "sent you a private message",
        }
    }
}

/// First `e` tag carrying an explicit `reply` marker (tags[3] == "reply").
/// Distinct from `Event::reply_to`, which falls back to the last unmarked
/// `e` tag; eligibility here requires the marker itself (§4.6 step 1).
fn marked_reply_target(event: &Event) -> Option<&str> {
    event
        .tags
        .iter()
        .find(|t| t.first().map(String::as_str) == Some("e") && t.get(3).map(String::as_str) == Some("reply"))
        .and_then(|t| t.get(1))
        .map(String::as_str)
}

fn eligibility(event: &Event) -> Option<NotifyKind> {
    match event.kind {
        TEXT_NOTE_KIND if marked_reply_target(event).is_some() => Some(NotifyKind::Reply),
        AUDIO_NOTE_KIND => Some(NotifyKind::AudioNote),
        AUDIO_REPOST_KIND => Some(NotifyKind::AudioRepost),
        CONTACTS_KIND => Some(NotifyKind::Contacts),
        DM_KIND => Some(NotifyKind::Dm),
        REPOST_KIND => Some(NotifyKind::Repost),
        REACTION_KIND if event.content.trim() != "-" => Some(NotifyKind::Reaction),
        GIFT_WRAP_KIND => Some(NotifyKind::GiftWrap),
        _ => None,
    }
}

/// Union of every `p`-tagged pubkey plus, for kinds that reference another
/// event, that event's author - minus the event's own author (§4.6 steps
/// 2-3). Missing referenced events are logged and skipped, not an error.
fn resolve_recipients(events: &EventStore, event: &Event, kind: NotifyKind) -> Vec<String> {
    let mut recipients: HashSet<String> = event.tag_values("p").map(String::from).collect();

    let referenced_id = match kind {
        NotifyKind::Reply => marked_reply_target(event),
        NotifyKind::Repost | NotifyKind::Reaction | NotifyKind::AudioRepost => event.tag_value("e"),
        NotifyKind::AudioNote | NotifyKind::Contacts | NotifyKind::Dm | NotifyKind::GiftWrap => None,
    };
    if let Some(ref_id) = referenced_id {
        match events.get_event(ref_id) {
            Ok(Some(ref_event)) => {
                recipients.insert(ref_event.pubkey);
            }
            Ok(None) => {
                warn!(event_id = %event.id, ref_id, "referenced event missing, skipping its author");
            }
            Err(e) => {
                warn!(event_id = %event.id, ref_id, ?e, "failed to look up referenced event");
            }
        }
    }

    recipients.remove(&event.pubkey);
    recipients.into_iter().collect()
}

fn parse_display_name(profile_content: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(profile_content).ok()?;
    value
        .get("display_name")
        .or_else(|| value.get("name"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn short_pubkey(pubkey: &str) -> String {
    pubkey.chars().take(8).collect()
}

/// Decides eligibility, resolves recipients, formats a per-platform message,
/// and enqueues one task per registered device.
pub struct Dispatcher {
    events: Arc<EventStore>,
    devices: Arc<PushStore>,
    profile_cache: RwLock<HashMap<String, String>>,
    tx: mpsc::Sender<PushTask>,
}

impl Dispatcher {
    pub fn new(events: Arc<EventStore>, devices: Arc<PushStore>, tx: mpsc::Sender<PushTask>) -> Self {
        Self {
            events,
            devices,
            profile_cache: RwLock::new(HashMap::new()),
            tx,
        }
    }

    pub fn handle_event(&self, event: &Event) {
        let Some(kind) = eligibility(event) else { return };
        let recipients = resolve_recipients(&self.events, event, kind);
        if recipients.is_empty() {
            return;
        }

        let author_name = self.author_display_name(&event.pubkey);
        let snippet = content_snippet(&event.content, 100);

        for recipient in recipients {
            let devices = match self.devices.devices_for(&recipient) {
                Ok(d) => d,
                Err(e) => {
                    warn!(recipient, ?e, "failed to look up registered devices");
                    continue;
                }
            };
            for device in devices {
                let message = PushMessage {
                    token: device.token.clone(),
                    platform: device.platform,
                    title: format!("{author_name} {}", kind.label()),
                    body: snippet.clone(),
                    ref_event_id: event.id.clone(),
                    ref_kind: event.kind,
                    content_snippet: snippet.clone(),
                };
                let task = PushTask {
                    pubkey: recipient.clone(),
                    token: device.token.clone(),
                    event_id: event.id.clone(),
                    kind: event.kind,
                    message,
                    attempts: 0,
                };
                if self.tx.try_send(task).is_err() {
                    warn!(recipient, token = %device.token, "push queue full, dropping notification task");
                }
            }
        }
    }

    /// Looks up the author's latest kind-0 profile event and caches the
    /// resolved display name. The cache is never invalidated on profile
    /// updates; a stale name is an acceptable tradeoff (§4.6 shared-resource
    /// policy).
    fn author_display_name(&self, pubkey: &str) -> String {
        if let Some(name) = self.profile_cache.read().get(pubkey) {
            return name.clone();
        }
        let filter = Filter {
            authors: vec![pubkey.to_string()],
            kinds: vec![PROFILE_KIND],
            limit: Some(1),
            ..Default::default()
        };
        let name = query::query(&self.events, &filter)
            .into_iter()
            .next()
            .and_then(|e| parse_display_name(&e.content))
            .unwrap_or_else(|| short_pubkey(pubkey));
        self.profile_cache.write().insert(pubkey.to_string(), name.clone());
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_store::kv::Kv;

    fn event(id: &str, pubkey: &str, kind: u32, tags: Vec<Vec<String>>, content: &str) -> Event {
        Event {
            id: id.into(),
            pubkey: pubkey.into(),
            created_at: 100,
            kind,
            tags,
            content: content.into(),
            sig: "sig".into(),
        }
    }

    fn store() -> (tempfile::TempDir, EventStore) {
        let dir = tempfile::tempdir().unwrap();
        let kv = Kv::open(dir.path()).unwrap();
        (dir, EventStore::open(kv).unwrap())
    }

    #[test]
    fn reaction_with_minus_content_is_not_eligible() {
        let e = event("e1", "a", REACTION_KIND, vec![], "-");
        assert!(eligibility(&e).is_none());
    }

    #[test]
    fn reaction_with_other_content_is_eligible() {
        let e = event("e1", "a", REACTION_KIND, vec![], "+");
        assert_eq!(eligibility(&e), Some(NotifyKind::Reaction));
    }

    #[test]
    fn unmarked_reply_e_tag_is_not_eligible() {
        let e = event("e1", "a", TEXT_NOTE_KIND, vec![vec!["e".into(), "parent".into()]], "hi");
        assert!(eligibility(&e).is_none());
    }

    #[test]
    fn recipients_exclude_author_and_include_referenced_author() {
        let (_dir, store) = store();
        store.store_event(&event("parent", "bob", TEXT_NOTE_KIND, vec![], "parent note")).unwrap();
        let reply = event(
            "reply1",
            "alice",
            TEXT_NOTE_KIND,
            vec![
                vec!["e".into(), "parent".into(), "".into(), "reply".into()],
                vec!["p".into(), "alice".into()],
                vec!["p".into(), "carol".into()],
            ],
            "hello",
        );
        let kind = eligibility(&reply).unwrap();
        let mut recipients = resolve_recipients(&store, &reply, kind);
        recipients.sort();
        assert_eq!(recipients, vec!["bob".to_string(), "carol".to_string()]);
    }

    #[test]
    fn missing_referenced_event_is_skipped_not_errored() {
        let (_dir, store) = store();
        let reaction = event(
            "r1",
            "alice",
            REACTION_KIND,
            vec![vec!["e".into(), "nonexistent".into()]],
            "+",
        );
        let kind = eligibility(&reaction).unwrap();
        assert!(resolve_recipients(&store, &reaction, kind).is_empty());
    }
}

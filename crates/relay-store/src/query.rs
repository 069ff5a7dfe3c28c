//! Query planner (SPEC_FULL.md §4.3).
//!
//! Grounded on `gossipd/src/event_log.rs::compute_delta`, which the teacher
//! itself flags as a placeholder full scan truncated to 1000 events; this
//! replaces it with real strategy selection over the index keyspaces in
//! `events.rs`, reverse prefix iteration, and cross-prefix merge.

use crate::events::EventStore;
use relay_core::canonical::hex_pad_timestamp;
use relay_core::types::{Event, Filter};
use std::collections::HashSet;

/// Build the reverse-iteration upper bound for a given prefix and an
/// (optional) `until` timestamp: the lexicographically-last key at or below
/// that timestamp inside the prefix.
fn upper_bound(prefix: &[u8], until: Option<i64>) -> Option<Vec<u8>> {
    let until = until?;
    let mut key = prefix.to_vec();
    key.extend_from_slice(hex_pad_timestamp(until).as_bytes());
    key.push(b':');
    key.push(0xFF);
    Some(key)
}

/// Iterate one index prefix in reverse, stopping at `since`, collecting up
/// to `limit` distinct event ids not already in `seen`.
fn scan_prefix(
    store: &EventStore,
    prefix: &[u8],
    since: Option<i64>,
    until: Option<i64>,
    limit: usize,
    seen: &mut HashSet<String>,
) -> Vec<Event> {
    let seek = upper_bound(prefix, until);
    let mut out = Vec::new();
    for entry in store.kv().iterate_prefix(prefix, true, seek.as_deref()) {
        let Ok((key, _)) = entry else { continue };
        let Some((ts, id)) = crate::events::parse_index_suffix(&key, prefix.len()) else {
            continue;
        };
        if let Some(since) = since {
            // keys are monotonic in timestamp within a single prefix; once
            // we're below `since` nothing further in this prefix qualifies.
            if ts < since {
                break;
            }
        }
        if seen.contains(&id) {
            continue;
        }
        seen.insert(id.clone());
        if let Ok(Some(event)) = store.get_event(&id) {
            out.push(event);
        }
        if out.len() >= limit {
            break;
        }
    }
    out
}

fn prefixes_for(filter: &Filter) -> Vec<Vec<u8>> {
    if !filter.tags.is_empty() {
        // pick the first tag name; multiple values under that name each get
        // their own prefix.
        let (name, values) = filter.tags.iter().next().unwrap();
        return values
            .iter()
            .map(|v| {
                let mut p = format!("tag:{name}:{v}").into_bytes();
                p.push(0);
                p
            })
            .collect();
    }
    if !filter.authors.is_empty() {
        return filter
            .authors
            .iter()
            .map(|a| format!("eai:{a}:").into_bytes())
            .collect();
    }
    if !filter.kinds.is_empty() {
        return filter
            .kinds
            .iter()
            .map(|k| format!("eti:{k}:").into_bytes())
            .collect();
    }
    vec![b"ets:".to_vec()]
}

/// Execute a filter against the store, returning up to `filter.limit()`
/// events newest-first.
pub fn query(store: &EventStore, filter: &Filter) -> Vec<Event> {
    let limit = filter.effective_limit();

    if !filter.ids.is_empty() {
        let mut events: Vec<Event> = filter
            .ids
            .iter()
            .filter_map(|id| store.get_event(id).ok().flatten())
            .filter(|e| filter.matches(e))
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(limit);
        return events;
    }

    let prefixes = prefixes_for(filter);
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for prefix in &prefixes {
        let found = scan_prefix(store, prefix, filter.since, filter.until, limit, &mut seen);
        candidates.extend(found);
    }

    let mut matched: Vec<Event> = candidates.into_iter().filter(|e| filter.matches(e)).collect();
    matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    matched.truncate(limit);
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Kv;
    use relay_core::types::Event;
    use std::collections::BTreeMap;

    fn event(id: &str, pubkey: &str, kind: u32, ts: i64, tags: Vec<Vec<String>>) -> Event {
        Event {
            id: id.into(),
            pubkey: pubkey.into(),
            created_at: ts,
            kind,
            tags,
            content: String::new(),
            sig: "sig".into(),
        }
    }

    fn store() -> (tempfile::TempDir, EventStore) {
        let dir = tempfile::tempdir().unwrap();
        let kv = Kv::open(dir.path()).unwrap();
        (dir, EventStore::open(kv).unwrap())
    }

    #[test]
    fn kind_query_returns_newest_first() {
        let (_dir, store) = store();
        store.store_event(&event("e1", "a", 1, 100, vec![])).unwrap();
        store.store_event(&event("e2", "a", 1, 200, vec![])).unwrap();
        store.store_event(&event("e3", "a", 7, 150, vec![])).unwrap();

        let filter = Filter {
            kinds: vec![1],
            ..Default::default()
        };
        let results = query(&store, &filter);
        assert_eq!(results.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["e2", "e1"]);
    }

    #[test]
    fn tag_query_after_delete_excludes_event() {
        let (_dir, store) = store();
        store
            .store_event(&event("e1", "a", 1, 100, vec![vec!["p".into(), "target".into()]]))
            .unwrap();
        let mut tags = BTreeMap::new();
        tags.insert("p".to_string(), vec!["target".to_string()]);
        let filter = Filter {
            tags,
            ..Default::default()
        };
        assert_eq!(query(&store, &filter).len(), 1);

        store.delete_event("e1").unwrap();
        assert_eq!(query(&store, &filter).len(), 0);
    }

    #[test]
    fn since_bounds_exclude_older_events() {
        let (_dir, store) = store();
        store.store_event(&event("old", "a", 1, 50, vec![])).unwrap();
        store.store_event(&event("new", "a", 1, 500, vec![])).unwrap();
        let filter = Filter {
            kinds: vec![1],
            since: Some(100),
            ..Default::default()
        };
        let results = query(&store, &filter);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "new");
    }

    #[test]
    fn ids_query_is_direct_fetch() {
        let (_dir, store) = store();
        store.store_event(&event("e1", "a", 1, 100, vec![])).unwrap();
        store.store_event(&event("e2", "a", 1, 200, vec![])).unwrap();
        let filter = Filter {
            ids: vec!["e1".into()],
            ..Default::default()
        };
        let results = query(&store, &filter);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "e1");
    }
}

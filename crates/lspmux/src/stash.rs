//! Opaque-handle stash (C5).
//!
//! Code-action and completion items carry a `data` field that a backend
//! expects to see again, unmodified, on a `*/resolve` follow-up. When more
//! than one backend answers the same request, their `data` values collide
//! in meaning. The stash replaces each item's `data` with a freshly minted
//! handle and remembers which backend and original value it stands for.
//!
//! Handles are minted from a process-lifetime counter, never derived from
//! the backend's identity or the wrapped value, so a stale handle can
//! never be mistaken for a fresh one and the editor cannot forge one that
//! happens to collide with a real entry.

use std::collections::HashMap;

use serde_json::Value;

use crate::ids::BackendIndex;

const HANDLE_PREFIX: &str = "stash-";

#[derive(Debug, Clone)]
pub struct StashedItem {
    pub backend: BackendIndex,
    pub original_data: Value,
}

#[derive(Debug, Default)]
pub struct Stash {
    entries: HashMap<String, StashedItem>,
    next_handle: u64,
    /// handles minted while a given document URI was at its current
    /// version, so a document reset can invalidate exactly these.
    by_uri: HashMap<String, Vec<String>>,
}

impl Stash {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint_handle(&mut self) -> String {
        self.next_handle += 1;
        format!("{HANDLE_PREFIX}{}", self.next_handle)
    }

    /// Rewrites `item`'s `data` field (if present) in place, replacing it
    /// with a freshly minted handle, and records the original value.
    pub fn stash_item_data(&mut self, item: &mut Value, backend: BackendIndex, uri: Option<&str>) {
        let Some(obj) = item.as_object_mut() else {
            return;
        };
        let Some(original_data) = obj.remove("data") else {
            return;
        };
        let handle = self.mint_handle();
        obj.insert("data".to_string(), Value::String(handle.clone()));
        if let Some(uri) = uri {
            self.by_uri
                .entry(uri.to_string())
                .or_default()
                .push(handle.clone());
        }
        self.entries.insert(
            handle,
            StashedItem {
                backend,
                original_data,
            },
        );
    }

    /// Looks up a handle previously minted by [`Stash::stash_item_data`].
    /// Non-consuming: the same still-displayed item may legitimately be
    /// resolved more than once (e.g. the editor re-resolves a cached
    /// item). A handle is only invalidated by [`Stash::invalidate_uri`]
    /// on document reset.
    pub fn resolve(&self, handle: &str) -> Option<StashedItem> {
        self.entries.get(handle).cloned()
    }

    pub fn is_handle(value: &Value) -> Option<&str> {
        value.as_str().filter(|s| s.starts_with(HANDLE_PREFIX))
    }

    /// Drops every handle minted for `uri`, as happens when the document
    /// is reopened at a new version.
    pub fn invalidate_uri(&mut self, uri: &str) {
        if let Some(handles) = self.by_uri.remove(uri) {
            for handle in handles {
                self.entries.remove(&handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stashes_and_resolves_data() {
        let mut stash = Stash::new();
        let mut item = json!({"title": "Fix it", "data": {"ax": 1}});
        stash.stash_item_data(&mut item, 0, Some("file:///a"));

        let handle = item["data"].as_str().unwrap().to_string();
        assert!(Stash::is_handle(&Value::String(handle.clone())).is_some());

        let stashed = stash.resolve(&handle).unwrap();
        assert_eq!(stashed.backend, 0);
        assert_eq!(stashed.original_data, json!({"ax": 1}));
        assert!(
            stash.resolve(&handle).is_some(),
            "resolving the same still-displayed item twice must not consume the handle"
        );
    }

    #[test]
    fn leaves_items_without_data_untouched() {
        let mut stash = Stash::new();
        let mut item = json!({"title": "No data here"});
        stash.stash_item_data(&mut item, 0, None);
        assert_eq!(item, json!({"title": "No data here"}));
    }

    #[test]
    fn invalidation_drops_handles_for_that_uri_only() {
        let mut stash = Stash::new();
        let mut a = json!({"data": 1});
        let mut b = json!({"data": 2});
        stash.stash_item_data(&mut a, 0, Some("file:///a"));
        stash.stash_item_data(&mut b, 0, Some("file:///b"));
        let handle_a = a["data"].as_str().unwrap().to_string();
        let handle_b = b["data"].as_str().unwrap().to_string();

        stash.invalidate_uri("file:///a");
        assert!(stash.resolve(&handle_a).is_none());
        assert!(stash.resolve(&handle_b).is_some());
    }
}

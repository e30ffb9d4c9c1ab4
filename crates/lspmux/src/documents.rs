//! Per-document state store (C4): tracks the version and in-flight
//! diagnostic aggregation bookkeeping for every open URI.
//!
//! This module owns no timers and no I/O; it is pure bookkeeping consulted
//! and mutated by the diagnostic reconciler ([`crate::diagnostics`]) and by
//! the dispatcher on `didOpen`/`didChange`/`didClose`.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::ids::BackendIndex;

/// One backend's most recently pushed diagnostics for the document's
/// current version.
#[derive(Debug, Clone)]
pub struct DocumentState {
    pub version: i64,
    pub inflight_pushes: HashMap<BackendIndex, Vec<Value>>,
    pub inflight_pulls: HashSet<BackendIndex>,
    pub dispatched: bool,
    pub timer_armed: bool,
}

impl DocumentState {
    fn new(version: i64) -> Self {
        Self {
            version,
            inflight_pushes: HashMap::new(),
            inflight_pulls: HashSet::new(),
            dispatched: false,
            timer_armed: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: HashMap<String, DocumentState>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uri: &str) -> Option<&DocumentState> {
        self.documents.get(uri)
    }

    pub fn get_mut(&mut self, uri: &str) -> Option<&mut DocumentState> {
        self.documents.get_mut(uri)
    }

    /// Handles `didOpen`/`didChange`: installs a fresh state for `version`,
    /// discarding anything in flight for the previous version. Returns
    /// `true` if a prior entry for this URI was replaced (so the caller
    /// knows to invalidate stashed handles and cancel a pending timer).
    pub fn open_or_change(&mut self, uri: &str, version: i64) -> bool {
        let replaced = self.documents.remove(uri).is_some();
        self.documents
            .insert(uri.to_string(), DocumentState::new(version));
        replaced
    }

    /// Handles `didClose`: removes the entry entirely.
    pub fn close(&mut self, uri: &str) -> Option<DocumentState> {
        self.documents.remove(uri)
    }

}

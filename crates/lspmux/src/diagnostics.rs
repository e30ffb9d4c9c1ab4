//! Diagnostic reconciler (C8): merges asynchronous push diagnostics with
//! pull-diagnostic responses into one coherent stream per document.
//!
//! This module holds no timers itself; it tells the dispatcher what to do
//! (arm a timer, publish now, drop) and the dispatcher owns the actual
//! `tokio::time::sleep` task and the `uri`-keyed cancellation of it.

use serde_json::{json, Value};

use crate::aggregate::attach_default_source;
use crate::documents::DocumentStore;
use crate::ids::BackendIndex;

/// What the dispatcher should do after recording a push diagnostic.
#[derive(Debug, PartialEq, Eq)]
pub enum PushAction {
    /// No `DocumentState` is tracked for this URI at all (no `didOpen`
    /// seen, or the document was already closed). There is nothing to
    /// reconcile against, so the dispatcher should forward the
    /// notification to the editor unchanged rather than drop it.
    NoState,
    /// The push was for a version older than the tracked one; ignored.
    Stale,
    /// Recorded; quorum isn't met yet. If this is the first push recorded
    /// for the document's current version, the dispatcher should arm the
    /// aggregation timer.
    Recorded { arm_timer: bool },
    /// Quorum is met (every backend has either pushed or been asked to
    /// pull); the dispatcher should publish immediately.
    ReadyToPublish,
    /// A push arrived after this version's aggregation was already
    /// published. Whether to act on it depends on the tardy-push policy.
    Tardy,
}

pub struct DiagnosticReconciler {
    drop_tardy: bool,
}

impl DiagnosticReconciler {
    pub fn new(drop_tardy: bool) -> Self {
        Self { drop_tardy }
    }

    /// Records a push notification from `backend` (named `backend_name`)
    /// for `uri` at `version`, attaching a default `source` to any
    /// diagnostic that lacks one, and reports what the dispatcher should
    /// do next.
    pub fn record_push(
        &self,
        store: &mut DocumentStore,
        uri: &str,
        backend: BackendIndex,
        backend_name: &str,
        version: i64,
        mut diagnostics: Vec<Value>,
        total_backends: usize,
    ) -> PushAction {
        let Some(state) = store.get_mut(uri) else {
            return PushAction::NoState;
        };
        if version < state.version {
            return PushAction::Stale;
        }

        for diagnostic in &mut diagnostics {
            attach_default_source(diagnostic, backend_name);
        }

        let first_push_for_version = state.inflight_pushes.is_empty();
        state.inflight_pushes.insert(backend, diagnostics);

        if state.dispatched {
            return PushAction::Tardy;
        }

        let answered = state.inflight_pushes.len() + count_pull_only(state);
        if answered >= total_backends {
            PushAction::ReadyToPublish
        } else {
            let arm_timer = first_push_for_version && !state.timer_armed;
            if arm_timer {
                state.timer_armed = true;
            }
            PushAction::Recorded { arm_timer }
        }
    }

    /// Whether a tardy push should still trigger a republish of the
    /// enhanced aggregation (the default) or be silently dropped
    /// (`--drop-tardy`).
    pub fn should_republish_tardy(&self) -> bool {
        !self.drop_tardy
    }

    /// Registers that `backend` has been asked to answer a
    /// `textDocument/diagnostic` pull for `uri`; this counts toward the
    /// push-quorum the same as an actual push, per the reconciler's
    /// completeness rule.
    pub fn register_pull(&self, store: &mut DocumentStore, uri: &str, backend: BackendIndex) {
        if let Some(state) = store.get_mut(uri) {
            state.inflight_pulls.insert(backend);
        }
    }

    /// Checks whether every backend has now either pushed or been asked
    /// to pull, and the aggregation has not yet been dispatched.
    pub fn quorum_met(&self, store: &DocumentStore, uri: &str, total_backends: usize) -> bool {
        match store.get(uri) {
            Some(state) if !state.dispatched => {
                (state.inflight_pushes.len() + count_pull_only(state)) >= total_backends
            }
            _ => false,
        }
    }

    /// Builds the `textDocument/publishDiagnostics` payload for the
    /// document's current version and marks it dispatched. Returns
    /// `None` if there is nothing tracked for `uri`.
    pub fn publish(&self, store: &mut DocumentStore, uri: &str) -> Option<Value> {
        let state = store.get_mut(uri)?;
        state.dispatched = true;
        state.timer_armed = false;
        let mut diagnostics = Vec::new();
        let mut backends: Vec<&BackendIndex> = state.inflight_pushes.keys().collect();
        backends.sort();
        for backend in backends {
            diagnostics.extend(state.inflight_pushes[backend].iter().cloned());
        }
        Some(json!({
            "uri": uri,
            "version": state.version,
            "diagnostics": diagnostics,
        }))
    }
}

fn count_pull_only(state: &crate::documents::DocumentState) -> usize {
    state
        .inflight_pulls
        .iter()
        .filter(|b| !state.inflight_pushes.contains_key(*b))
        .count()
}

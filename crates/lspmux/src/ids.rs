//! Bidirectional request-ID translation.
//!
//! A client request with external ID `c` is dispatched to one or more
//! backends under an ID private to that backend. A backend's response is
//! translated back to `c`; a backend-originated request is translated to
//! a synthetic external ID and its eventual client response translated
//! back to the backend's own ID.

use std::collections::HashMap;

use serde_json::Value;

/// Index into the dispatcher's backend list. Backends never move once
/// spawned, so an index is a stable, cheap identity.
pub type BackendIndex = usize;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalId(pub String);

impl ExternalId {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(_) | Value::String(_) => Some(Self(value_key(value))),
            _ => None,
        }
    }

    /// Inverse of the encoding used for hashing: recovers a JSON id value
    /// (number or string) suitable for writing back onto the wire.
    pub fn to_value(&self) -> Value {
        key_to_value(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendId(pub BackendIndex, pub String);

/// Tracks one outstanding client-originated request that was routed to a
/// single backend (no aggregation): just enough to translate the reply
/// and to know whether it has been cancelled.
#[derive(Debug, Clone)]
pub struct SingleRoute {
    pub backend: BackendIndex,
    pub backend_id: Value,
    pub method: String,
    pub uri: Option<String>,
    pub cancelled: bool,
}

/// Tracks one client request fanned out to more than one backend: which
/// backend-local id each target was given, so a backend's response can be
/// traced back to the client id the pending aggregation is keyed by.
#[derive(Debug, Clone)]
struct FanoutRoute {
    client_id: ExternalId,
    cancelled: bool,
}

/// The identifier table (C3): owned entirely by the dispatcher.
#[derive(Debug, Default)]
pub struct IdentifierTable {
    /// client id -> (backend, backend-local id) for requests routed to
    /// exactly one backend (fan-out requests are tracked separately below).
    single_routes: HashMap<ExternalId, SingleRoute>,
    /// (backend, backend-local id) -> client id, the inverse of `single_routes`.
    reverse_single: HashMap<BackendId, ExternalId>,
    /// (backend, backend-local id) -> client id, for requests fanned out to
    /// more than one backend and tracked by a `PendingAggregation`.
    fanout_routes: HashMap<BackendId, FanoutRoute>,
    /// client id -> every `(backend, backend-local id)` it was fanned out
    /// to, so the whole fan-out can be torn down together.
    fanout_members: HashMap<ExternalId, Vec<BackendId>>,
    /// synthesized external id -> (backend, backend's own request id), for
    /// server-originated requests forwarded to the editor.
    server_originated: HashMap<ExternalId, BackendId>,
    next_synthetic_id: u64,
    next_backend_request_id: HashMap<BackendIndex, u64>,
}

impl IdentifierTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next internal request ID to use when forwarding a
    /// client request to `backend`. Each backend has its own counter so
    /// that two backends never see colliding IDs.
    pub fn allocate_backend_request_id(&mut self, backend: BackendIndex) -> Value {
        let counter = self.next_backend_request_id.entry(backend).or_insert(1);
        let id = *counter;
        *counter += 1;
        Value::from(id)
    }

    pub fn record_single_route(
        &mut self,
        client_id: ExternalId,
        backend: BackendIndex,
        backend_id: Value,
        method: impl Into<String>,
        uri: Option<String>,
    ) {
        let key = BackendId(backend, value_key(&backend_id));
        self.reverse_single.insert(key, client_id.clone());
        self.single_routes.insert(
            client_id,
            SingleRoute {
                backend,
                backend_id,
                method: method.into(),
                uri,
                cancelled: false,
            },
        );
    }

    pub fn resolve_single_route(
        &mut self,
        backend: BackendIndex,
        backend_id: &Value,
    ) -> Option<(ExternalId, SingleRoute)> {
        let key = BackendId(backend, value_key(backend_id));
        let client_id = self.reverse_single.remove(&key)?;
        let route = self.single_routes.remove(&client_id)?;
        Some((client_id, route))
    }

    /// Records one target of a fan-out request, keyed by `(backend,
    /// backend_id)` so that a later response from that backend can be
    /// traced back to `client_id` (and thus to its `PendingAggregation`).
    pub fn record_fanout_route(
        &mut self,
        client_id: ExternalId,
        backend: BackendIndex,
        backend_id: Value,
    ) {
        let key = BackendId(backend, value_key(&backend_id));
        self.fanout_members
            .entry(client_id.clone())
            .or_default()
            .push(key.clone());
        self.fanout_routes.insert(
            key,
            FanoutRoute {
                client_id,
                cancelled: false,
            },
        );
    }

    /// Looks up the client id a fan-out response belongs to without
    /// consuming the entry (several backends answer the same fan-out).
    pub fn peek_fanout_route(&self, backend: BackendIndex, backend_id: &Value) -> Option<ExternalId> {
        let key = BackendId(backend, value_key(backend_id));
        self.fanout_routes.get(&key).map(|r| r.client_id.clone())
    }

    pub fn is_fanout_cancelled(&self, client_id: &ExternalId) -> bool {
        self.fanout_members
            .get(client_id)
            .and_then(|members| members.first())
            .and_then(|key| self.fanout_routes.get(key))
            .map(|r| r.cancelled)
            .unwrap_or(false)
    }

    /// Tears down every `(backend, backend_id)` entry recorded for a
    /// fan-out request, called once its `PendingAggregation` is
    /// dispatched or cancelled.
    pub fn forget_fanout(&mut self, client_id: &ExternalId) {
        if let Some(members) = self.fanout_members.remove(client_id) {
            for key in members {
                self.fanout_routes.remove(&key);
            }
        }
    }

    /// Marks every route (single, or every member of a fan-out) held by
    /// `client_id` as cancelled, returning the `(backend, backend_id)`
    /// pairs that must receive a translated `$/cancelRequest`.
    pub fn mark_cancelled(&mut self, client_id: &ExternalId) -> Vec<(BackendIndex, Value)> {
        let mut targets = Vec::new();
        if let Some(route) = self.single_routes.get_mut(client_id) {
            route.cancelled = true;
            targets.push((route.backend, route.backend_id.clone()));
        }
        if let Some(members) = self.fanout_members.get(client_id) {
            for key in members {
                if let Some(route) = self.fanout_routes.get_mut(key) {
                    route.cancelled = true;
                    targets.push((key.0, key_to_value(&key.1)));
                }
            }
        }
        targets
    }

    pub fn is_cancelled(&self, client_id: &ExternalId) -> bool {
        self.single_routes
            .get(client_id)
            .map(|r| r.cancelled)
            .unwrap_or(false)
            || self.is_fanout_cancelled(client_id)
    }

    /// Records a server-originated request, synthesizing a fresh external
    /// ID for the editor to see.
    pub fn record_server_originated(&mut self, backend: BackendIndex, backend_id: Value) -> Value {
        self.next_synthetic_id += 1;
        let synthetic = self.next_synthetic_id;
        let external = ExternalId(format!("\"srv-{synthetic}\""));
        self.server_originated
            .insert(external.clone(), BackendId(backend, value_key(&backend_id)));
        Value::String(format!("srv-{synthetic}"))
    }

    pub fn resolve_server_originated(&mut self, external: &Value) -> Option<(BackendIndex, Value)> {
        let key = ExternalId::from_value(external)?;
        let BackendId(backend, backend_id) = self.server_originated.remove(&key)?;
        Some((backend, key_to_value(&backend_id)))
    }
}

fn value_key(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("\"{s}\""),
        other => other.to_string(),
    }
}

fn key_to_value(key: &str) -> Value {
    if let Some(inner) = key.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Value::String(inner.to_string());
    }
    if let Ok(n) = key.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = key.parse::<f64>() {
        return Value::from(f);
    }
    Value::String(key.to_string())
}

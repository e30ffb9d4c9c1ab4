//! Multiplexer loop (C9): the central dispatcher that owns every piece of
//! shared state and is the only task that ever mutates it.
//!
//! One reader task per input (the editor, each backend's decoded
//! messages, each backend's stderr) forwards what it sees onto a single
//! `mpsc` channel; timer tasks for aggregation and diagnostic timeouts do
//! the same. The dispatcher's run loop is the sole consumer of that
//! channel, so policy callbacks and state mutation never interleave
//! across concurrent requests, matching the "single-threaded from the
//! policy's perspective" requirement.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::aggregate::{aggregate_response_payloads, BackendResponse, PendingAggregation};
use crate::backend::Backend;
use crate::codec::{read_message, write_message};
use crate::diagnostics::{DiagnosticReconciler, PushAction};
use crate::documents::DocumentStore;
use crate::error::MultiplexerError;
use crate::ids::{BackendIndex, ExternalId, IdentifierTable};
use crate::json_ext;
use crate::policy::{BackendSummary, RouteDecision, RoutingPolicy, WatcherRegistry};
use crate::stash::Stash;

/// One already-spawned backend, plus the channels the dispatcher polls
/// for what it emits. Produced by [`crate::backend::spawn_subprocess_backend`]
/// or [`crate::internal_backend::spawn_internal_backend`].
pub struct BackendHandle {
    pub backend: Backend,
    pub inbound: mpsc::UnboundedReceiver<Value>,
    pub stderr: Option<mpsc::UnboundedReceiver<String>>,
}

/// Tunables the CLI front-end (A1) collects and the preset loader (A2)
/// may override.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// `--drop-tardy`: suppress a republish triggered by a push diagnostic
    /// that arrives after that document version's aggregation already
    /// published.
    pub drop_tardy: bool,
    /// `--quiet-server`: suppress forwarding of backend stderr lines.
    pub quiet_server: bool,
    /// `--delay-ms`: fixed delay applied to every message written to the
    /// editor, to exercise slow-client handling deterministically.
    pub delay_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            drop_tardy: false,
            quiet_server: false,
            delay_ms: 0,
        }
    }
}

enum Event {
    Editor(Value),
    EditorClosed,
    EditorFramingError(crate::error::FramingError),
    Backend(BackendIndex, Value),
    BackendClosed(BackendIndex),
    BackendStderr(BackendIndex, String),
    AggregationTimeout(ExternalId),
    DiagnosticTimeout(String, i64),
}

/// Runs the multiplexer until the editor initiates a clean shutdown+exit
/// (`Ok(())`) or something fatal happens (`Err`): an unexpected backend
/// EOF outside of shutdown, or the editor connection closing.
pub async fn run<R, W>(
    editor_reader: R,
    editor_writer: W,
    backends: Vec<BackendHandle>,
    policy: Box<dyn RoutingPolicy>,
    config: DispatcherConfig,
) -> Result<(), MultiplexerError>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    if backends.is_empty() {
        return Err(MultiplexerError::NoBackends);
    }

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Event>();
    let (editor_out_tx, editor_out_rx) = mpsc::unbounded_channel::<Value>();

    spawn_editor_reader(editor_reader, events_tx.clone());
    spawn_editor_writer(editor_writer, editor_out_rx, config.delay_ms);

    let mut entries = Vec::with_capacity(backends.len());
    for (index, handle) in backends.into_iter().enumerate() {
        spawn_backend_forwarder(index, handle.inbound, events_tx.clone());
        if let Some(stderr) = handle.stderr {
            spawn_stderr_forwarder(index, stderr, events_tx.clone());
        }
        entries.push(handle.backend);
    }

    let mut dispatcher = Dispatcher {
        backends: entries,
        policy,
        ids: IdentifierTable::new(),
        documents: DocumentStore::new(),
        stash: Stash::new(),
        pending: std::collections::HashMap::new(),
        reconciler: DiagnosticReconciler::new(config.drop_tardy),
        watchers: WatcherRegistry::new(),
        editor_tx: editor_out_tx,
        events_tx,
        shutting_down: false,
        quiet_server: config.quiet_server,
        stream_diagnostics: false,
    };

    let result = dispatcher.drive(&mut events_rx).await;
    dispatcher.teardown().await;
    result
}

/// Owns every piece of shared state; the only task allowed to touch it is
/// the one running [`Dispatcher::drive`].
struct Dispatcher {
    backends: Vec<Backend>,
    policy: Box<dyn RoutingPolicy>,
    ids: IdentifierTable,
    documents: DocumentStore,
    stash: Stash,
    pending: std::collections::HashMap<ExternalId, PendingAggregation>,
    reconciler: DiagnosticReconciler,
    watchers: WatcherRegistry,
    editor_tx: mpsc::UnboundedSender<Value>,
    events_tx: mpsc::UnboundedSender<Event>,
    shutting_down: bool,
    quiet_server: bool,
    /// Whether the editor's `initialize` request advertised support for
    /// the non-standard `$/streamDiagnostics` notification; if so, every
    /// aggregated `publishDiagnostics` is additionally emitted under that
    /// method name (§6, §4.7).
    stream_diagnostics: bool,
}

impl Dispatcher {
    async fn drive(
        &mut self,
        events_rx: &mut mpsc::UnboundedReceiver<Event>,
    ) -> Result<(), MultiplexerError> {
        while let Some(event) = events_rx.recv().await {
            match event {
                Event::Editor(message) => {
                    if self.handle_editor_message(message) {
                        return Ok(());
                    }
                }
                Event::EditorClosed => return Err(MultiplexerError::EditorClosed),
                Event::EditorFramingError(err) => return Err(MultiplexerError::EditorFraming(err)),
                Event::Backend(index, message) => self.handle_backend_message(index, message),
                Event::BackendClosed(index) => {
                    let name = self.backends[index].name.clone();
                    if self.shutting_down {
                        debug!(backend = %name, "backend closed during shutdown, as expected");
                    } else {
                        error!(backend = %name, "backend closed unexpectedly");
                        return Err(MultiplexerError::BackendLost(name));
                    }
                }
                Event::BackendStderr(index, line) => {
                    if !self.quiet_server {
                        let name = &self.backends[index].name;
                        info!(backend = %name, "{line}");
                    }
                }
                Event::AggregationTimeout(client_id) => {
                    if self.pending.contains_key(&client_id) {
                        self.finish_aggregation(client_id);
                    }
                }
                Event::DiagnosticTimeout(uri, version) => {
                    let ready = matches!(self.documents.get(&uri), Some(s) if s.version == version && !s.dispatched);
                    if ready {
                        if let Some(payload) = self.reconciler.publish(&mut self.documents, &uri) {
                            self.publish_diagnostics(payload);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns `true` when the dispatcher should stop (the editor sent
    /// `exit`).
    fn handle_editor_message(&mut self, message: Value) -> bool {
        if json_ext::is_request(&message) {
            self.handle_request(message);
            false
        } else if json_ext::is_notification(&message) {
            self.handle_notification(message)
        } else if json_ext::is_response(&message) {
            self.handle_editor_response(message);
            false
        } else {
            warn!("dropping message the editor sent that is neither a request, notification, nor response");
            false
        }
    }

    fn handle_request(&mut self, message: Value) {
        let Some(method) = json_ext::method(&message).map(str::to_string) else {
            return;
        };
        let Some(id_value) = json_ext::message_id(&message) else {
            return;
        };
        let Some(client_id) = ExternalId::from_value(&id_value) else {
            warn!(method = %method, "request id is neither a number nor a string, dropping");
            return;
        };

        let mut params = message.get("params").cloned().unwrap_or(Value::Null);
        params = self.policy.on_client_request(&method, params);
        if method == "initialize" {
            self.stream_diagnostics = json_ext::supports_stream_diagnostics(&params);
            self.policy.prepare_initialize_params(&mut params);
        }

        if method.ends_with("/resolve") {
            self.handle_resolve(client_id, &method, params);
            return;
        }

        let uri = json_ext::text_document_uri(&params).map(str::to_string);
        let summaries = self.backend_summaries();
        match self.policy.route_request(&method, &params, &summaries) {
            RouteDecision::StashResolve => self.handle_resolve(client_id, &method, params),
            RouteDecision::Backends(targets) => {
                self.dispatch_fanout(client_id, method, params, uri, targets)
            }
        }
    }

    fn handle_resolve(&mut self, client_id: ExternalId, method: &str, params: Value) {
        let handle = params
            .get("data")
            .and_then(Stash::is_handle)
            .map(str::to_string);

        if let Some(handle) = handle {
            if let Some(stashed) = self.stash.resolve(&handle) {
                let mut restored = params.clone();
                if let Some(obj) = restored.as_object_mut() {
                    obj.insert("data".to_string(), stashed.original_data);
                }
                let backend = stashed.backend;
                let backend_id = self.ids.allocate_backend_request_id(backend);
                self.ids.record_single_route(
                    client_id,
                    backend,
                    backend_id.clone(),
                    method.to_string(),
                    None,
                );
                let message = json!({
                    "jsonrpc": "2.0",
                    "id": backend_id,
                    "method": method,
                    "params": restored,
                });
                self.deliver(backend, message);
                return;
            }
        }

        // Stale or never-stashed handle: synthesize a benign fallback
        // rather than forwarding a handle no backend can recognize.
        self.emit_response(client_id.to_value(), params, false);
    }

    fn dispatch_fanout(
        &mut self,
        client_id: ExternalId,
        method: String,
        params: Value,
        uri: Option<String>,
        targets: Vec<BackendIndex>,
    ) {
        if targets.is_empty() {
            let (payload, is_error) = aggregate_response_payloads(&method, &[]);
            self.emit_response(client_id.to_value(), payload, is_error);
            return;
        }

        if targets.len() == 1 {
            let backend = targets[0];
            let backend_id = self.ids.allocate_backend_request_id(backend);
            self.ids.record_single_route(
                client_id,
                backend,
                backend_id.clone(),
                method.clone(),
                uri.clone(),
            );
            if method == "textDocument/diagnostic" {
                if let Some(uri) = &uri {
                    self.reconciler.register_pull(&mut self.documents, uri, backend);
                    self.check_push_quorum(uri);
                }
            }
            let message = build_request(&method, backend_id, params);
            self.deliver(backend, message);
            return;
        }

        let aggregation = PendingAggregation::new(method.clone(), targets.clone(), uri.clone());
        for backend in &targets {
            let backend_id = self.ids.allocate_backend_request_id(*backend);
            self.ids
                .record_fanout_route(client_id.clone(), *backend, backend_id.clone());
            if method == "textDocument/diagnostic" {
                if let Some(uri) = &uri {
                    self.reconciler
                        .register_pull(&mut self.documents, uri, *backend);
                }
            }
            let message = build_request(&method, backend_id, params.clone());
            self.deliver(*backend, message);
        }
        if method == "textDocument/diagnostic" {
            if let Some(uri) = &uri {
                self.check_push_quorum(uri);
            }
        }
        self.pending.insert(client_id.clone(), aggregation);
        let timeout = self.policy.aggregation_timeout(&method);
        self.arm_aggregation_timer(client_id, timeout);
    }

    fn arm_aggregation_timer(&self, client_id: ExternalId, timeout: Duration) {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Event::AggregationTimeout(client_id));
        });
    }

    /// Re-checks push-quorum completeness for `uri` right after a
    /// `textDocument/diagnostic` pull is registered against it, and
    /// publishes immediately if the registration was the missing piece —
    /// a pull in flight satisfies a backend's push obligation the same as
    /// an actual push (§4.7), so dispatching one can complete the
    /// aggregation on its own without waiting for the timer.
    fn check_push_quorum(&mut self, uri: &str) {
        if self.reconciler.quorum_met(&self.documents, uri, self.backends.len()) {
            if let Some(payload) = self.reconciler.publish(&mut self.documents, uri) {
                self.publish_diagnostics(payload);
            }
        }
    }

    fn arm_diagnostic_timer(&self, uri: String, version: i64, timeout: Duration) {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Event::DiagnosticTimeout(uri, version));
        });
    }

    /// Returns `true` when the editor just asked the multiplexer to
    /// `exit`.
    fn handle_notification(&mut self, message: Value) -> bool {
        let Some(method) = json_ext::method(&message).map(str::to_string) else {
            return false;
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        match method.as_str() {
            "$/cancelRequest" => {
                self.handle_cancel(&params);
                false
            }
            "textDocument/didOpen" | "textDocument/didChange" => {
                self.reset_document(&params);
                self.broadcast_notification(&method, params);
                false
            }
            "textDocument/didClose" => {
                if let Some(uri) = json_ext::text_document_uri(&params) {
                    self.documents.close(uri);
                    self.stash.invalidate_uri(uri);
                }
                self.broadcast_notification(&method, params);
                false
            }
            "workspace/didChangeWatchedFiles" => {
                self.broadcast_watched_files(&params);
                false
            }
            "exit" => {
                self.broadcast_notification(&method, params);
                true
            }
            _ => {
                self.broadcast_notification(&method, params);
                false
            }
        }
    }

    fn reset_document(&mut self, params: &Value) {
        let (Some(uri), Some(version)) = (
            json_ext::text_document_uri(params),
            json_ext::text_document_version(params),
        ) else {
            return;
        };
        let uri = uri.to_string();
        if self.documents.open_or_change(&uri, version) {
            self.stash.invalidate_uri(&uri);
        }
    }

    fn handle_cancel(&mut self, params: &Value) {
        let Some(id_value) = params.get("id") else {
            return;
        };
        let Some(client_id) = ExternalId::from_value(id_value) else {
            return;
        };
        let targets = self.ids.mark_cancelled(&client_id);
        if self.pending.remove(&client_id).is_some() {
            self.ids.forget_fanout(&client_id);
        }
        for (backend, backend_id) in targets {
            let message = json!({
                "jsonrpc": "2.0",
                "method": "$/cancelRequest",
                "params": {"id": backend_id},
            });
            self.deliver(backend, message);
        }
    }

    fn broadcast_watched_files(&mut self, params: &Value) {
        let changes = params
            .get("changes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for index in 0..self.backends.len() {
            let matching: Vec<Value> = changes
                .iter()
                .filter(|change| {
                    change
                        .get("uri")
                        .and_then(Value::as_str)
                        .map(|uri| self.watchers.matches(index, uri))
                        .unwrap_or(true)
                })
                .cloned()
                .collect();
            if matching.is_empty() {
                continue;
            }
            let message = json!({
                "jsonrpc": "2.0",
                "method": "workspace/didChangeWatchedFiles",
                "params": {"changes": matching},
            });
            self.deliver(index, message);
        }
    }

    fn broadcast_notification(&mut self, method: &str, params: Value) {
        let summaries = self.backend_summaries();
        for summary in &summaries {
            if !self
                .policy
                .should_broadcast_notification(method, &params, summary)
            {
                continue;
            }
            let message = json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params.clone(),
            });
            self.deliver(summary.index, message);
        }
    }

    fn handle_backend_message(&mut self, index: BackendIndex, message: Value) {
        if json_ext::is_response(&message) {
            self.handle_backend_response(index, message);
        } else if json_ext::is_request(&message) {
            self.handle_backend_request(index, message);
        } else if json_ext::is_notification(&message) {
            self.handle_backend_notification(index, message);
        }
    }

    fn handle_backend_response(&mut self, index: BackendIndex, message: Value) {
        let Some(backend_id) = json_ext::message_id(&message) else {
            return;
        };
        let is_error = json_ext::is_error_response(&message);

        if let Some((client_id, route)) = self.ids.resolve_single_route(index, &backend_id) {
            if route.cancelled {
                debug!(method = %route.method, "discarding response for a cancelled request");
                return;
            }
            if route.method == "initialize" && !is_error {
                if let Some(capabilities) = message.get("result").and_then(|r| r.get("capabilities")) {
                    self.backends[index].capabilities = capabilities.clone();
                }
            }
            let mut translated = message;
            set_field(&mut translated, "id", client_id.to_value());
            if matches!(route.method.as_str(), "textDocument/codeAction" | "textDocument/completion") && !is_error
            {
                if let Some(obj) = translated.as_object_mut() {
                    if let Some(result) = obj.get_mut("result") {
                        stash_payload_items(&mut self.stash, result, index, route.uri.as_deref());
                    }
                }
            }
            let _ = self.editor_tx.send(translated);
            return;
        }

        if let Some(client_id) = self.ids.peek_fanout_route(index, &backend_id) {
            if self.ids.is_fanout_cancelled(&client_id) {
                return;
            }
            let name = self.backends[index].name.clone();
            let payload = if is_error {
                message.get("error").cloned().unwrap_or(Value::Null)
            } else {
                message.get("result").cloned().unwrap_or(Value::Null)
            };

            let mut record_capabilities = None;
            if let Some(agg) = self.pending.get_mut(&client_id) {
                if agg.method == "initialize" && !is_error {
                    record_capabilities = payload.get("capabilities").cloned();
                }
                agg.record(BackendResponse {
                    backend: index,
                    name,
                    payload,
                    is_error,
                });
                let complete = agg.is_complete();
                if let Some(capabilities) = record_capabilities {
                    self.backends[index].capabilities = capabilities;
                }
                if complete {
                    self.finish_aggregation(client_id);
                }
            }
            return;
        }

        debug!(backend = index, ?backend_id, "unknown response id, dropping");
    }

    fn finish_aggregation(&mut self, client_id: ExternalId) {
        let Some(mut aggregation) = self.pending.remove(&client_id) else {
            return;
        };
        self.ids.forget_fanout(&client_id);
        let method = aggregation.method.clone();
        let mut responses = aggregation.finish();

        if matches!(method.as_str(), "textDocument/codeAction" | "textDocument/completion") {
            for response in responses.iter_mut() {
                if !response.is_error {
                    stash_payload_items(
                        &mut self.stash,
                        &mut response.payload,
                        response.backend,
                        aggregation.uri.as_deref(),
                    );
                }
            }
        }

        let (mut payload, is_error) = aggregate_response_payloads(&method, &responses);
        if method == "initialize" && !is_error {
            self.apply_capability_mask(&mut payload);
        }
        if method == "shutdown" {
            self.shutting_down = true;
        }
        self.emit_response(client_id.to_value(), payload, is_error);
    }

    fn handle_backend_request(&mut self, index: BackendIndex, message: Value) {
        let Some(method) = json_ext::method(&message).map(str::to_string) else {
            return;
        };
        let Some(backend_id) = json_ext::message_id(&message) else {
            return;
        };

        if method == "client/registerCapability" {
            self.record_watcher_registrations(index, message.get("params"));
        }

        let external = self.ids.record_server_originated(index, backend_id);
        let mut translated = message;
        set_field(&mut translated, "id", external);
        let _ = self.editor_tx.send(translated);
    }

    fn record_watcher_registrations(&mut self, index: BackendIndex, params: Option<&Value>) {
        let Some(registrations) = params.and_then(|p| p.get("registrations")).and_then(Value::as_array)
        else {
            return;
        };
        for registration in registrations {
            if registration.get("method").and_then(Value::as_str) != Some("workspace/didChangeWatchedFiles")
            {
                continue;
            }
            let Some(watchers) = registration
                .get("registerOptions")
                .and_then(|o| o.get("watchers"))
                .and_then(Value::as_array)
            else {
                continue;
            };
            for watcher in watchers {
                if let Some(pattern) = watcher.get("globPattern").and_then(Value::as_str) {
                    self.watchers.register(index, pattern.to_string());
                }
            }
        }
    }

    fn handle_backend_notification(&mut self, index: BackendIndex, message: Value) {
        let Some(method) = json_ext::method(&message).map(str::to_string) else {
            return;
        };
        if method == "textDocument/publishDiagnostics" {
            self.handle_push_diagnostics(index, message.get("params"));
            return;
        }
        let _ = self.editor_tx.send(message);
    }

    fn handle_push_diagnostics(&mut self, index: BackendIndex, params: Option<&Value>) {
        let Some(params) = params else { return };
        let Some(uri) = json_ext::text_document_uri(params) else {
            return;
        };
        let uri = uri.to_string();
        let version = json_ext::text_document_version(params).unwrap_or(0);
        let diagnostics = params
            .get("diagnostics")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let backend_name = self.backends[index].name.clone();
        let total_backends = self.backends.len();
        let original_params = params.clone();

        let action = self.reconciler.record_push(
            &mut self.documents,
            &uri,
            index,
            &backend_name,
            version,
            diagnostics,
            total_backends,
        );

        match action {
            PushAction::NoState => {
                self.emit_notification("textDocument/publishDiagnostics", original_params);
            }
            PushAction::Stale => {}
            PushAction::Recorded { arm_timer } => {
                if arm_timer {
                    let timeout = self.policy.diagnostic_aggregation_timeout();
                    self.arm_diagnostic_timer(uri, version, timeout);
                }
            }
            PushAction::ReadyToPublish => {
                if let Some(payload) = self.reconciler.publish(&mut self.documents, &uri) {
                    self.publish_diagnostics(payload);
                }
            }
            PushAction::Tardy => {
                if self.reconciler.should_republish_tardy() {
                    if let Some(payload) = self.reconciler.publish(&mut self.documents, &uri) {
                        self.publish_diagnostics(payload);
                    }
                }
            }
        }
    }

    /// Responses the editor sends to requests the multiplexer forwarded
    /// on a backend's behalf (server-originated requests).
    fn handle_editor_response(&mut self, message: Value) {
        let Some(id_value) = json_ext::message_id(&message) else {
            return;
        };
        let Some((backend, backend_id)) = self.ids.resolve_server_originated(&id_value) else {
            debug!("unknown server-originated response id from editor, dropping");
            return;
        };
        let mut translated = message;
        set_field(&mut translated, "id", backend_id);
        self.deliver(backend, translated);
    }

    /// Drops capability keys the policy asked to hide from the merged
    /// `initialize` result, e.g. a preset that would rather show no
    /// `codeLensProvider` at all than a confusing merge of two backends'.
    fn apply_capability_mask(&self, payload: &mut Value) {
        let masked = self.policy.masked_capabilities();
        if masked.is_empty() {
            return;
        }
        if let Some(capabilities) = payload.get_mut("capabilities").and_then(Value::as_object_mut) {
            for key in &masked {
                capabilities.remove(key);
            }
        }
    }

    fn backend_summaries(&self) -> Vec<BackendSummary> {
        self.backends
            .iter()
            .enumerate()
            .map(|(index, entry)| BackendSummary {
                index,
                name: entry.name.clone(),
                capabilities: entry.capabilities.clone(),
            })
            .collect()
    }

    fn deliver(&mut self, backend: BackendIndex, message: Value) {
        if let Err(err) = self.backends[backend].deliver(message) {
            warn!(backend = %self.backends[backend].name, error = %err, "failed delivering to backend");
        }
    }

    fn emit_response(&mut self, id: Value, payload: Value, is_error: bool) {
        let message = if is_error {
            json!({"jsonrpc": "2.0", "id": id, "error": payload})
        } else {
            json!({"jsonrpc": "2.0", "id": id, "result": payload})
        };
        let _ = self.editor_tx.send(message);
    }

    fn emit_notification(&mut self, method: &str, params: Value) {
        let message = json!({"jsonrpc": "2.0", "method": method, "params": params});
        let _ = self.editor_tx.send(message);
    }

    /// Emits an aggregated `publishDiagnostics` payload, and, if the
    /// editor opted into the extension, the same payload again under
    /// `$/streamDiagnostics`.
    fn publish_diagnostics(&mut self, payload: Value) {
        if self.stream_diagnostics {
            self.emit_notification("$/streamDiagnostics", payload.clone());
        }
        self.emit_notification("textDocument/publishDiagnostics", payload);
    }

    async fn teardown(&mut self) {
        for entry in self.backends.iter_mut() {
            entry.close();
        }
        let _ = tokio::time::timeout(Duration::from_millis(500), async {
            for entry in self.backends.iter_mut() {
                entry.wait().await;
            }
        })
        .await;
    }
}

fn build_request(method: &str, id: Value, params: Value) -> Value {
    if params.is_null() {
        json!({"jsonrpc": "2.0", "id": id, "method": method})
    } else {
        json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
    }
}

fn set_field(message: &mut Value, key: &str, value: Value) {
    if let Some(obj) = message.as_object_mut() {
        obj.insert(key.to_string(), value);
    }
}

fn stash_payload_items(stash: &mut Stash, payload: &mut Value, backend: BackendIndex, uri: Option<&str>) {
    match payload {
        Value::Array(items) => {
            for item in items.iter_mut() {
                stash.stash_item_data(item, backend, uri);
            }
        }
        Value::Object(obj) => {
            if let Some(Value::Array(items)) = obj.get_mut("items") {
                for item in items.iter_mut() {
                    stash.stash_item_data(item, backend, uri);
                }
            }
        }
        _ => {}
    }
}

fn spawn_editor_reader<R>(mut reader: R, events_tx: mpsc::UnboundedSender<Event>)
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match read_message(&mut reader).await {
                Ok(Some(message)) => {
                    if events_tx.send(Event::Editor(message)).is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    let _ = events_tx.send(Event::EditorClosed);
                    return;
                }
                Err(err) => {
                    let _ = events_tx.send(Event::EditorFramingError(err));
                    return;
                }
            }
        }
    });
}

fn spawn_editor_writer<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Value>, delay_ms: u64)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            if let Err(err) = write_message(&mut writer, &message).await {
                warn!(error = %err, "failed writing to editor, stopping writer");
                return;
            }
        }
    });
}

fn spawn_backend_forwarder(
    index: BackendIndex,
    mut inbound: mpsc::UnboundedReceiver<Value>,
    events_tx: mpsc::UnboundedSender<Event>,
) {
    tokio::spawn(async move {
        while let Some(message) = inbound.recv().await {
            if events_tx.send(Event::Backend(index, message)).is_err() {
                return;
            }
        }
        let _ = events_tx.send(Event::BackendClosed(index));
    });
}

fn spawn_stderr_forwarder(
    index: BackendIndex,
    mut stderr: mpsc::UnboundedReceiver<String>,
    events_tx: mpsc::UnboundedSender<Event>,
) {
    tokio::spawn(async move {
        while let Some(line) = stderr.recv().await {
            if events_tx.send(Event::BackendStderr(index, line)).is_err() {
                return;
            }
        }
    });
}

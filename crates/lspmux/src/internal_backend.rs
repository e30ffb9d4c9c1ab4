//! Internal backend (C10): a synthetic backend, indistinguishable from a
//! subprocess one from the dispatcher's point of view, that answers its
//! own `initialize`/`shutdown` and implements one example command.
//!
//! Grounded in the reference implementation's `InternalBackend`: a
//! dispatch-by-method-name handler table, an `executeCommand` dispatcher
//! keyed by command name, and one concrete command
//! (`rassumfrassum.set-log-level` there, `lspmux.set-log-level` here)
//! that demonstrates a server-originated request: it sends the editor a
//! `window/showMessageRequest` and changes the active log level once the
//! editor answers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::Backend;

pub const BACKEND_NAME: &str = "lspmux-internal";
pub const SERVER_NAME: &str = "Lspmux";
pub const COMMAND_SET_LOG_LEVEL: &str = "lspmux.set-log-level";

pub fn spawn_internal_backend(index: usize) -> (Backend, mpsc::UnboundedReceiver<Value>) {
    let (deliver_tx, deliver_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(deliver_rx, inbound_tx));
    let backend = Backend::from_parts(BACKEND_NAME.to_string(), index, deliver_tx, vec![task]);
    (backend, inbound_rx)
}

async fn run(mut deliver_rx: mpsc::UnboundedReceiver<Value>, inbound_tx: mpsc::UnboundedSender<Value>) {
    let mut state = InternalState::default();
    while let Some(message) = deliver_rx.recv().await {
        for reply in state.handle(message) {
            if inbound_tx.send(reply).is_err() {
                return;
            }
        }
    }
    debug!("internal backend shutting down");
}

#[derive(Default)]
struct InternalState {
    client_supports_code_action_literals: bool,
    next_outgoing_id: AtomicU64,
    pending_outgoing: HashMap<String, &'static str>,
}

impl InternalState {
    fn handle(&mut self, message: Value) -> Vec<Value> {
        let Some(method) = message.get("method").and_then(Value::as_str).map(str::to_string) else {
            // No `method`: a response to one of our own outgoing requests
            // (e.g. the editor's answer to `window/showMessageRequest`).
            return self.handle_own_response(&message).into_iter().collect();
        };
        let id = message.get("id").cloned();

        match method.as_str() {
            "initialize" => vec![self.handle_initialize(id, message.get("params"))],
            "shutdown" => vec![json!({"jsonrpc": "2.0", "id": id, "result": Value::Null})],
            "exit" | "initialized" => Vec::new(),
            "textDocument/codeAction" => {
                vec![self.handle_code_action(id, message.get("params"))]
            }
            "workspace/executeCommand" => self.handle_execute_command(id, message.get("params")),
            _ => Vec::new(),
        }
    }

    fn handle_initialize(&mut self, id: Option<Value>, params: Option<&Value>) -> Value {
        self.client_supports_code_action_literals = params
            .and_then(|p| p.get("capabilities"))
            .and_then(|c| c.get("textDocument"))
            .and_then(|t| t.get("codeAction"))
            .and_then(|a| a.get("codeActionLiteralSupport"))
            .is_some();

        let mut capabilities = json!({
            "executeCommandProvider": {"commands": [COMMAND_SET_LOG_LEVEL]},
        });
        if self.client_supports_code_action_literals {
            capabilities["codeActionProvider"] = json!(true);
        }

        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "capabilities": capabilities,
                "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
            }
        })
    }

    fn handle_code_action(&self, id: Option<Value>, params: Option<&Value>) -> Value {
        let at_top_of_file = params
            .and_then(|p| p.get("range"))
            .and_then(|r| r.get("start"))
            .and_then(|s| s.get("line"))
            .and_then(Value::as_i64)
            == Some(0);

        let actions = if at_top_of_file {
            vec![json!({
                "title": "Set lspmux log level",
                "command": {
                    "title": "Set lspmux log level",
                    "command": COMMAND_SET_LOG_LEVEL,
                },
            })]
        } else {
            vec![]
        };
        json!({"jsonrpc": "2.0", "id": id, "result": actions})
    }

    fn handle_execute_command(&mut self, id: Option<Value>, params: Option<&Value>) -> Vec<Value> {
        let command = params.and_then(|p| p.get("command")).and_then(Value::as_str);
        match command {
            Some(COMMAND_SET_LOG_LEVEL) => vec![
                json!({"jsonrpc": "2.0", "id": id, "result": Value::Null}),
                self.build_set_log_level_request(),
            ],
            Some(other) => vec![json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("unknown command: {other}")},
            })],
            None => vec![json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32602, "message": "missing command"},
            })],
        }
    }

    /// Sends `window/showMessageRequest` back through the editor, asking
    /// it to pick a new log level; called by the dispatcher after a
    /// successful `lspmux.set-log-level` execution so the request
    /// travels through the normal server-originated-request path (and
    /// therefore through the identifier table's ID translation) rather
    /// than bypassing it.
    fn build_set_log_level_request(&mut self) -> Value {
        let id = self.next_outgoing_id.fetch_add(1, Ordering::SeqCst);
        let key = id.to_string();
        self.pending_outgoing.insert(key, "set-log-level");
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "window/showMessageRequest",
            "params": {
                "type": 3,
                "message": "Select a new lspmux log level",
                "actions": [
                    {"title": "trace"}, {"title": "debug"}, {"title": "info"}, {"title": "warn"}
                ],
            }
        })
    }

    fn handle_own_response(&mut self, message: &Value) -> Option<Value> {
        let id = message.get("id")?.as_u64()?.to_string();
        match self.pending_outgoing.remove(&id) {
            Some("set-log-level") => {
                let chosen = message
                    .get("result")
                    .and_then(|r| r.get("title"))
                    .and_then(Value::as_str);
                if let Some(level) = chosen {
                    debug!(level, "internal backend: editor chose a new log level");
                } else {
                    warn!("internal backend: log level request dismissed without a choice");
                }
                None
            }
            _ => None,
        }
    }
}

//! Shared integration-test harness (A4): wires the dispatcher up against
//! an in-memory duplex pipe standing in for the editor's stdio, and
//! against one `BackendHandle` per fake backend whose "subprocess" is
//! just a pair of channels the test drives directly.
//!
//! Every test file in this directory includes this module with
//! `mod support;` and calls [`start`].

use std::time::Duration;

use serde_json::Value;
use tokio::io::{BufReader, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use lspmux::backend::Backend;
use lspmux::codec::{read_message, write_message};
use lspmux::dispatcher::{run, BackendHandle, DispatcherConfig};
use lspmux::error::MultiplexerError;
use lspmux::policy::RoutingPolicy;

// Comfortably longer than `DEFAULT_RESPONSE_TIMEOUT` (2.5s) so aggregation-
// timeout tests racing this against a real reply don't spuriously time out
// here first.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A backend that exists purely as a pair of channels the test drives:
/// `send` plays the part of a message the backend emits, and `recv`
/// plays the part of the backend receiving whatever the dispatcher
/// delivered to it.
pub struct FakeBackend {
    inbound_tx: mpsc::UnboundedSender<Value>,
    deliver_rx: mpsc::UnboundedReceiver<Value>,
}

impl FakeBackend {
    /// Sends `message` to the dispatcher as if this backend had written
    /// it to its stdout.
    pub fn send(&self, message: Value) {
        self.inbound_tx
            .send(message)
            .expect("dispatcher dropped this backend's inbound channel");
    }

    /// Waits for the next message the dispatcher delivered to this
    /// backend (as if writing it to the backend's stdin).
    pub async fn recv(&mut self) -> Value {
        tokio::time::timeout(RECV_TIMEOUT, self.deliver_rx.recv())
            .await
            .expect("backend did not receive a message in time")
            .expect("dispatcher closed this backend's delivery channel")
    }

    /// Like [`FakeBackend::recv`], but fails the test if a message
    /// arrives within the window instead of timing out quietly.
    pub async fn assert_nothing_received(&mut self, within: Duration) {
        if tokio::time::timeout(within, self.deliver_rx.recv()).await.is_ok() {
            panic!("backend unexpectedly received a message");
        }
    }
}

/// Builds a [`BackendHandle`] (to hand to [`start`]) paired with the
/// [`FakeBackend`] handle the test keeps to drive it.
pub fn fake_backend(name: &str, index: usize) -> (BackendHandle, FakeBackend) {
    let (deliver_tx, deliver_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let backend = Backend::from_parts(name.to_string(), index, deliver_tx, Vec::new());
    (
        BackendHandle {
            backend,
            inbound: inbound_rx,
            stderr: None,
        },
        FakeBackend {
            inbound_tx,
            deliver_rx,
        },
    )
}

/// The editor side of a running dispatcher: a duplex pipe standing in
/// for its framed stdin/stdout, plus the dispatcher's own join handle so
/// shutdown-path tests can observe its final `Result`.
pub struct Harness {
    editor_writer: DuplexStream,
    editor_reader: BufReader<DuplexStream>,
    pub task: JoinHandle<Result<(), MultiplexerError>>,
}

impl Harness {
    pub async fn send(&mut self, message: Value) {
        write_message(&mut self.editor_writer, &message)
            .await
            .expect("writing to the dispatcher's editor pipe");
    }

    /// Waits for the next message the dispatcher wrote to the editor.
    pub async fn recv(&mut self) -> Value {
        tokio::time::timeout(RECV_TIMEOUT, read_message(&mut self.editor_reader))
            .await
            .expect("editor did not receive a message in time")
            .expect("framing error reading the dispatcher's output")
            .expect("dispatcher closed the editor connection")
    }

    pub async fn assert_nothing_received(&mut self, within: Duration) {
        let outcome = tokio::time::timeout(within, read_message(&mut self.editor_reader)).await;
        if outcome.is_ok() {
            panic!("editor unexpectedly received a message");
        }
    }
}

pub fn start(
    backends: Vec<BackendHandle>,
    policy: Box<dyn RoutingPolicy>,
    config: DispatcherConfig,
) -> Harness {
    let (test_writer, dispatcher_reader) = tokio::io::duplex(64 * 1024);
    let (dispatcher_writer, test_reader) = tokio::io::duplex(64 * 1024);

    let task = tokio::spawn(run(
        BufReader::new(dispatcher_reader),
        dispatcher_writer,
        backends,
        policy,
        config,
    ));

    Harness {
        editor_writer: test_writer,
        editor_reader: BufReader::new(test_reader),
        task,
    }
}

pub fn did_open(uri: &str, version: i64) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": "textDocument/didOpen",
        "params": {"textDocument": {"uri": uri, "version": version, "languageId": "rust", "text": ""}},
    })
}

pub fn did_change(uri: &str, version: i64) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": "textDocument/didChange",
        "params": {"textDocument": {"uri": uri, "version": version}, "contentChanges": []},
    })
}

pub fn publish_diagnostics(uri: &str, version: i64, diagnostics: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": "textDocument/publishDiagnostics",
        "params": {"uri": uri, "version": version, "diagnostics": diagnostics},
    })
}

//! Backend process management: spawning a single language server, framing
//! its stdio, and exposing it to the dispatcher as a uniform handle.
//!
//! The dispatcher never distinguishes a subprocess backend from the
//! [internal backend](crate::internal_backend): both are represented by a
//! [`Backend`] plus an inbound channel of decoded messages.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::{read_message, write_message};
use crate::error::BackendError;

const SPAWN_RETRY_ATTEMPTS: u32 = 5;
const SPAWN_RETRY_BASE_DELAY: Duration = Duration::from_millis(2);
const SPAWN_RETRY_MAX_DELAY: Duration = Duration::from_millis(50);

/// What to spawn for one backend language server.
#[derive(Debug, Clone)]
pub struct BackendSpawnSpec {
    pub argv: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl BackendSpawnSpec {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            current_dir: None,
            env: Vec::new(),
        }
    }
}

/// A running backend: subprocess or internal, presented uniformly.
///
/// `deliver` hands a message to the backend; the other half of the
/// conversation arrives on the `mpsc::UnboundedReceiver<Value>` returned
/// alongside this handle by the spawn function that created it.
pub struct Backend {
    pub name: String,
    pub index: usize,
    deliver_tx: Option<mpsc::UnboundedSender<Value>>,
    child: Option<Child>,
    tasks: Vec<JoinHandle<()>>,
    pub capabilities: Value,
}

impl Backend {
    /// Builds a handle around channels and tasks already wired up by the
    /// caller; used for backends that aren't subprocesses (see
    /// [`crate::internal_backend`], and the in-process fake backends the
    /// integration test harness drives).
    pub fn from_parts(
        name: String,
        index: usize,
        deliver_tx: mpsc::UnboundedSender<Value>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            name,
            index,
            deliver_tx: Some(deliver_tx),
            child: None,
            tasks,
            capabilities: Value::Null,
        }
    }

    pub fn deliver(&self, message: Value) -> Result<(), BackendError> {
        match &self.deliver_tx {
            Some(tx) => tx
                .send(message)
                .map_err(|_| BackendError::StdinClosed(self.name.clone())),
            None => Err(BackendError::StdinClosed(self.name.clone())),
        }
    }

    /// Signals orderly shutdown: dropping the sender closes the writer
    /// task's channel, which for a subprocess backend closes its stdin.
    pub fn close(&mut self) {
        self.deliver_tx = None;
    }

    pub async fn wait(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.wait().await;
        }
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// Derives the stable, human-readable identity of a backend: the argv's
/// basename, suffixed with `#index` for every back-end after the first
/// sharing that basename.
pub fn backend_name(program: &str, index: usize) -> String {
    let base = PathBuf::from(program)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string());
    if index == 0 {
        base
    } else {
        format!("{base}#{index}")
    }
}

/// Spawns a subprocess backend and returns its handle along with the
/// channels the dispatcher polls for decoded messages and stderr lines.
pub async fn spawn_subprocess_backend(
    spec: BackendSpawnSpec,
    index: usize,
) -> Result<(Backend, mpsc::UnboundedReceiver<Value>, mpsc::UnboundedReceiver<String>), BackendError>
{
    let (program, args) = spec.argv.split_first().ok_or_else(|| BackendError::Spawn {
        command: String::new(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty backend argv"),
    })?;
    let name = backend_name(program, index);

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.current_dir {
        command.current_dir(dir);
    }
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    let command_debug = format!("{command:?}");
    let mut backoff = SPAWN_RETRY_BASE_DELAY;
    let mut child = None;
    for attempt in 0..SPAWN_RETRY_ATTEMPTS {
        match command.spawn() {
            Ok(spawned) => {
                child = Some(spawned);
                break;
            }
            Err(source) => {
                let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt + 1 < SPAWN_RETRY_ATTEMPTS {
                    warn!(backend = %name, attempt, ?backoff, "backend binary busy, retrying spawn");
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, SPAWN_RETRY_MAX_DELAY);
                    continue;
                }
                return Err(BackendError::Spawn {
                    command: command_debug,
                    source,
                });
            }
        }
    }
    let mut child = child.expect("spawn loop returns or yields an error");

    let stdin = child.stdin.take().expect("piped stdin");
    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let (deliver_tx, deliver_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();

    let writer_task = tokio::spawn(writer_loop(stdin, deliver_rx, name.clone()));
    let reader_task = tokio::spawn(reader_loop(
        BufReader::new(stdout),
        inbound_tx,
        name.clone(),
    ));
    let stderr_task = tokio::spawn(stderr_loop(BufReader::new(stderr), stderr_tx, name.clone()));

    let backend = Backend {
        name,
        index,
        deliver_tx: Some(deliver_tx),
        child: Some(child),
        tasks: vec![writer_task, reader_task, stderr_task],
        capabilities: Value::Null,
    };
    Ok((backend, inbound_rx, stderr_rx))
}

async fn writer_loop(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<Value>, name: String) {
    while let Some(message) = rx.recv().await {
        if let Err(err) = write_message(&mut stdin, &message).await {
            warn!(backend = %name, error = %err, "failed writing to backend, dropping it");
            return;
        }
    }
    debug!(backend = %name, "writer channel closed, closing backend stdin");
}

async fn reader_loop<R>(mut stdout: R, tx: mpsc::UnboundedSender<Value>, name: String)
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        match read_message(&mut stdout).await {
            Ok(Some(message)) => {
                if tx.send(message).is_err() {
                    return;
                }
            }
            Ok(None) => {
                debug!(backend = %name, "backend closed its output");
                return;
            }
            Err(err) => {
                warn!(backend = %name, error = %err, "malformed frame from backend, closing");
                return;
            }
        }
    }
}

async fn stderr_loop<R>(stderr: R, tx: mpsc::UnboundedSender<String>, name: String)
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    use tokio::io::AsyncBufReadExt;
    let mut lines = stderr.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                debug!(backend = %name, error = %err, "stderr stream error");
                return;
            }
        }
    }
}

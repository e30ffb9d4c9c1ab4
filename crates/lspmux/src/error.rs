use std::io;

use thiserror::Error;

/// Errors raised while reading or writing a `Content-Length`-framed JSON-RPC stream.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),
    #[error("body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while spawning or talking to a single backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn { command: String, source: io::Error },
    #[error("backend `{0}` closed its output unexpectedly")]
    UnexpectedEof(String),
    #[error("backend `{0}` stdin is already closed")]
    StdinClosed(String),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("io error talking to backend `{backend}`: {source}")]
    Io { backend: String, source: io::Error },
}

/// Top level error returned from the multiplexer's run loop.
///
/// `main` matches on this to choose an exit code: any fatal backend loss
/// outside of a client-initiated shutdown becomes a non-zero exit.
#[derive(Debug, Error)]
pub enum MultiplexerError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("backend `{0}` exited unexpectedly while not shutting down")]
    BackendLost(String),
    #[error("editor closed its connection unexpectedly")]
    EditorClosed,
    #[error("editor sent a malformed frame: {0}")]
    EditorFraming(FramingError),
    #[error("no backend command lines were supplied")]
    NoBackends,
    #[error("join failure: {0}")]
    Join(#[from] tokio::task::JoinError),
}

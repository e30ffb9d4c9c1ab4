//! `lspmux`: a Language Server Protocol multiplexer.
//!
//! Fans one editor connection out to several backend language servers,
//! presenting the aggregate as a single LSP server. See [`dispatcher`]
//! for the central run loop and [`policy`] for how routing decisions are
//! made and can be customized by a preset.

pub mod aggregate;
pub mod backend;
pub mod codec;
pub mod diagnostics;
pub mod dispatcher;
pub mod documents;
pub mod error;
pub mod ids;
pub mod internal_backend;
pub mod json_ext;
pub mod policy;
pub mod stash;

pub use backend::{spawn_subprocess_backend, Backend, BackendSpawnSpec};
pub use dispatcher::{run, BackendHandle, DispatcherConfig};
pub use error::{BackendError, FramingError, MultiplexerError};
pub use policy::{DefaultPolicy, RoutingPolicy};

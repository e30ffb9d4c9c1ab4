//! CLI front-end (A1): splits `argv` into the multiplexer's own options
//! and one argv per backend, wires up `tracing`, spawns every backend,
//! and runs the dispatcher against real stdio.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lspmux::backend::{spawn_subprocess_backend, BackendSpawnSpec};
use lspmux::dispatcher::{run, BackendHandle, DispatcherConfig};
use lspmux::error::MultiplexerError;
use lspmux::internal_backend::spawn_internal_backend;
use lspmux::policy::{DefaultPolicy, RoutingPolicy};

/// A Language Server Protocol multiplexer: one editor channel fanned out
/// to many backend servers.
///
/// Invocation splits on the literal token `--`: options before the first
/// `--` belong to lspmux itself; each subsequent `--`-delimited segment
/// is one backend's command line, the first of which becomes the
/// primary backend.
#[derive(Debug, Parser)]
#[command(name = "lspmux", version)]
struct Cli {
    /// Suppress forwarding of backend stderr lines to lspmux's own stderr.
    #[arg(long)]
    quiet_server: bool,

    /// Fixed delay, in milliseconds, applied before every message sent
    /// to the editor.
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Suppress republishing aggregated diagnostics when a push arrives
    /// after that document version's aggregation already published.
    #[arg(long)]
    drop_tardy: bool,

    /// Resolve a built-in preset's backend argvs (and policy decorator,
    /// if any) by name. Composes with trailing `--` segments rather than
    /// replacing them.
    #[arg(long)]
    preset: Option<String>,

    /// `tracing` filter directive; defaults to `info` (or `RUST_LOG` if set).
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let mut raw_args: Vec<String> = std::env::args().collect();
    let program = raw_args.remove(0);
    let segments = split_on_double_dash(raw_args);

    let cli = match Cli::try_parse_from(std::iter::once(program).chain(segments.options)) {
        Ok(cli) => cli,
        Err(err) => {
            err.print().ok();
            return ExitCode::from(2);
        }
    };

    init_logging(cli.log_level.as_deref());

    let mut backend_argvs = Vec::new();
    if let Some(preset_name) = &cli.preset {
        match lspmux_presets::load_preset(preset_name) {
            Ok(preset) => backend_argvs.extend(preset.backend_argvs),
            Err(err) => {
                eprintln!("lspmux: unknown preset `{preset_name}`: {err}");
                return ExitCode::from(2);
            }
        }
    }
    backend_argvs.extend(segments.backends);

    if backend_argvs.is_empty() {
        eprintln!("lspmux: no backend command lines supplied (use `--` segments or --preset)");
        return ExitCode::from(2);
    }

    let policy: Box<dyn RoutingPolicy> = match &cli.preset {
        Some(name) => match lspmux_presets::load_preset(name) {
            Ok(preset) => preset.policy.unwrap_or_else(|| Box::new(DefaultPolicy)),
            Err(_) => Box::new(DefaultPolicy),
        },
        None => Box::new(DefaultPolicy),
    };

    let config = DispatcherConfig {
        drop_tardy: cli.drop_tardy,
        quiet_server: cli.quiet_server,
        delay_ms: cli.delay_ms,
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("lspmux: failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run_multiplexer(backend_argvs, policy, config));
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "lspmux exiting with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run_multiplexer(
    backend_argvs: Vec<Vec<String>>,
    policy: Box<dyn RoutingPolicy>,
    config: DispatcherConfig,
) -> Result<(), MultiplexerError> {
    let mut handles = Vec::with_capacity(backend_argvs.len() + 1);
    for (index, argv) in backend_argvs.into_iter().enumerate() {
        let spec = BackendSpawnSpec::new(argv);
        let (backend, inbound, stderr) = spawn_subprocess_backend(spec, index).await?;
        handles.push(BackendHandle {
            backend,
            inbound,
            stderr: Some(stderr),
        });
    }
    let internal_index = handles.len();
    let (internal, internal_inbound) = spawn_internal_backend(internal_index);
    handles.push(BackendHandle {
        backend: internal,
        inbound: internal_inbound,
        stderr: None,
    });

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    run(stdin, stdout, handles, policy, config).await
}

struct Segments {
    options: Vec<String>,
    backends: Vec<Vec<String>>,
}

/// Splits `args` on every literal `--` token: everything before the
/// first one are lspmux's own options, everything after is one argv per
/// `--`-delimited segment.
fn split_on_double_dash(args: Vec<String>) -> Segments {
    let mut segments: Vec<Vec<String>> = vec![Vec::new()];
    for arg in args {
        if arg == "--" {
            segments.push(Vec::new());
        } else {
            segments.last_mut().expect("always at least one segment").push(arg);
        }
    }
    let mut iter = segments.into_iter();
    let options = iter.next().unwrap_or_default();
    let backends: Vec<Vec<String>> = iter.filter(|segment| !segment.is_empty()).collect();
    Segments { options, backends }
}

fn init_logging(log_level: Option<&str>) {
    let filter = match (log_level, std::env::var("RUST_LOG")) {
        (_, Ok(from_env)) if !from_env.is_empty() => EnvFilter::new(from_env),
        (Some(level), _) => EnvFilter::new(level),
        (None, _) => EnvFilter::new("info"),
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_options_from_backend_segments() {
        let args = vec![
            "--quiet-server".to_string(),
            "--".to_string(),
            "basedpyright-langserver".to_string(),
            "--stdio".to_string(),
            "--".to_string(),
            "ruff".to_string(),
            "server".to_string(),
        ];
        let segments = split_on_double_dash(args);
        assert_eq!(segments.options, vec!["--quiet-server".to_string()]);
        assert_eq!(segments.backends.len(), 2);
        assert_eq!(segments.backends[0], vec!["basedpyright-langserver", "--stdio"]);
        assert_eq!(segments.backends[1], vec!["ruff", "server"]);
    }

    #[test]
    fn no_backend_segments_when_no_double_dash_present() {
        let segments = split_on_double_dash(vec!["--quiet-server".to_string()]);
        assert!(segments.backends.is_empty());
        assert_eq!(segments.options, vec!["--quiet-server".to_string()]);
    }
}

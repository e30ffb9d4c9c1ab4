//! Routing policy (C6): for each client request, decides which backends
//! receive it and whether the result is synthesized rather than routed.
//!
//! Expressed as a trait with a default implementation so presets can wrap
//! one `DefaultPolicy` instance and override a handful of hooks —
//! composition over inheritance, the same shape the reference
//! implementation's custom preset logic classes use (subclassing only to
//! intercept `on_client_request` before delegating to the parent).

use std::time::Duration;

use serde_json::Value;

use crate::ids::BackendIndex;

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(2500);
pub const DEFAULT_DIAGNOSTIC_TIMEOUT: Duration = Duration::from_millis(1000);

/// What the dispatcher knows about one live backend when making a
/// routing decision: its index/name and its declared `initialize`
/// capabilities.
#[derive(Debug, Clone)]
pub struct BackendSummary {
    pub index: BackendIndex,
    pub name: String,
    pub capabilities: Value,
}

impl BackendSummary {
    pub fn capability(&self, path: &str) -> Option<&Value> {
        self.capabilities.get(path)
    }

    pub fn has_truthy_capability(&self, path: &str) -> bool {
        match self.capabilities.get(path) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }
}

/// Routing outcome for a client request.
#[derive(Debug, Clone)]
pub enum RouteDecision {
    /// Dispatch to these backends (by index). A single entry means no
    /// aggregation is needed; more than one means the response(s) are
    /// combined by the aggregator.
    Backends(Vec<BackendIndex>),
    /// This is a `*/resolve` call; the stash must be consulted to find
    /// the one backend that owns the handle in `params.data`.
    StashResolve,
}

/// The method names the default policy gives special treatment to
/// request routing is handled in [`DefaultPolicy::route_request`].
pub trait RoutingPolicy: Send + Sync {
    fn route_request(&self, method: &str, params: &Value, backends: &[BackendSummary]) -> RouteDecision;

    /// Whether `method`, a client notification, should be forwarded to
    /// `backend`. Almost always `true`; the two exceptions the
    /// specification calls out (`$/cancelRequest` and filtered
    /// `workspace/didChangeWatchedFiles`) are handled by the dispatcher
    /// itself before this hook is consulted for the remaining backends.
    fn should_broadcast_notification(
        &self,
        _method: &str,
        _params: &Value,
        _backend: &BackendSummary,
    ) -> bool {
        true
    }

    /// Per-method response aggregation timeout.
    fn aggregation_timeout(&self, _method: &str) -> Duration {
        DEFAULT_RESPONSE_TIMEOUT
    }

    /// Push-diagnostic aggregation timeout.
    fn diagnostic_aggregation_timeout(&self) -> Duration {
        DEFAULT_DIAGNOSTIC_TIMEOUT
    }

    /// Hook presets use to rewrite a client request's params before
    /// routing, e.g. injecting `initializationOptions` into `initialize`.
    fn on_client_request(&self, _method: &str, params: Value) -> Value {
        params
    }

    /// Capability keys to drop from the merged `initialize` result before
    /// it reaches the editor, e.g. a preset hiding `codeLensProvider`
    /// because its backends' code lenses would be more confusing merged
    /// than absent. Empty by default.
    fn masked_capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Forces protocol-wide agreement that can't be left to individual
    /// backends, e.g. pinning the position encoding so backends never
    /// disagree about how columns are counted.
    fn prepare_initialize_params(&self, params: &mut Value) {
        if let Some(obj) = params.as_object_mut() {
            let capabilities = obj
                .entry("capabilities")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(capabilities) = capabilities.as_object_mut() {
                let general = capabilities
                    .entry("general")
                    .or_insert_with(|| Value::Object(Default::default()));
                if let Some(general) = general.as_object_mut() {
                    general.insert(
                        "positionEncodings".to_string(),
                        Value::Array(vec![Value::String("utf-16".to_string())]),
                    );
                }
            }
        }
    }
}

/// The routing table from §4.5 of the specification.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPolicy;

impl RoutingPolicy for DefaultPolicy {
    fn route_request(&self, method: &str, params: &Value, backends: &[BackendSummary]) -> RouteDecision {
        if method.ends_with("/resolve") {
            return RouteDecision::StashResolve;
        }

        match method {
            "initialize" | "shutdown" => {
                RouteDecision::Backends(backends.iter().map(|b| b.index).collect())
            }
            "textDocument/codeAction" => RouteDecision::Backends(
                backends
                    .iter()
                    .filter(|b| b.has_truthy_capability("codeActionProvider"))
                    .map(|b| b.index)
                    .collect(),
            ),
            "textDocument/completion" => {
                let candidates: Vec<&BackendSummary> = backends
                    .iter()
                    .filter(|b| b.has_truthy_capability("completionProvider"))
                    .collect();
                if candidates.len() <= 1 {
                    // A lone completion backend gets the request regardless of
                    // trigger character; there's nobody else to narrow against.
                    return RouteDecision::Backends(candidates.iter().map(|b| b.index).collect());
                }
                let trigger = crate::json_ext::trigger_character(params);
                RouteDecision::Backends(
                    candidates
                        .into_iter()
                        .filter(|b| match trigger {
                            Some(ch) => backend_accepts_trigger_character(b, ch),
                            None => true,
                        })
                        .map(|b| b.index)
                        .collect(),
                )
            }
            "textDocument/diagnostic" => RouteDecision::Backends(
                backends
                    .iter()
                    .filter(|b| b.has_truthy_capability("diagnosticProvider"))
                    .map(|b| b.index)
                    .collect(),
            ),
            "textDocument/rename" => {
                first_with_capability(backends, "renameProvider")
            }
            "textDocument/formatting" => {
                first_with_capability(backends, "documentFormattingProvider")
            }
            "textDocument/rangeFormatting" => {
                first_with_capability(backends, "documentRangeFormattingProvider")
            }
            _ => RouteDecision::Backends(backends.first().map(|b| vec![b.index]).unwrap_or_default()),
        }
    }
}

/// Routes to the first backend declaring `capability`, or to no backend at
/// all if none does — the routing table names no fallback, and forwarding
/// to a backend that never advertised the capability would typically come
/// back as a method-not-found error the editor wasn't expecting.
fn first_with_capability(backends: &[BackendSummary], capability: &str) -> RouteDecision {
    let chosen = backends
        .iter()
        .find(|b| b.has_truthy_capability(capability))
        .map(|b| vec![b.index])
        .unwrap_or_default();
    RouteDecision::Backends(chosen)
}

fn backend_accepts_trigger_character(backend: &BackendSummary, trigger: &str) -> bool {
    backend
        .capability("completionProvider")
        .and_then(|cp| cp.get("triggerCharacters"))
        .and_then(Value::as_array)
        .map(|chars| chars.iter().any(|c| c.as_str() == Some(trigger)))
        .unwrap_or(false)
}

/// Registry of the dynamic file-watcher globs each backend has
/// registered via `client/registerCapability` for
/// `workspace/didChangeWatchedFiles`, used to filter the broadcast of
/// that notification so a backend only sees the file events it asked
/// for.
#[derive(Debug, Default)]
pub struct WatcherRegistry {
    globs: Vec<(BackendIndex, String)>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: BackendIndex, glob_pattern: String) {
        self.globs.push((backend, glob_pattern));
    }

    /// Whether `backend` registered a glob pattern matching `uri`. A
    /// backend with no registrations at all is treated as "matches
    /// everything" so that backends which never call
    /// `registerCapability` (the common case for simple servers) keep
    /// receiving every watched-file event.
    pub fn matches(&self, backend: BackendIndex, uri: &str) -> bool {
        let mut has_registration = false;
        for (b, pattern) in &self.globs {
            if *b == backend {
                has_registration = true;
                if glob_match(pattern, uri) {
                    return true;
                }
            }
        }
        !has_registration
    }
}

/// Minimal glob matcher supporting `**` (any number of path segments),
/// `*` (any run of characters within a segment) and literal text —
/// enough for the patterns language servers register in practice
/// (`**/*.py`, `**/node_modules/**`, …).
fn glob_match(pattern: &str, text: &str) -> bool {
    fn helper(pattern: &[u8], text: &[u8]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (None, Some(_)) => false,
            (Some(b'*'), _) if pattern.get(1) == Some(&b'*') => {
                // `**` matches zero or more characters, including `/`.
                let rest = &pattern[2..];
                let rest = rest.strip_prefix(b"/").unwrap_or(rest);
                (0..=text.len()).any(|i| helper(rest, &text[i..]))
            }
            (Some(b'*'), _) => {
                let rest = &pattern[1..];
                (0..=text.len())
                    .take_while(|&i| i == 0 || text[i - 1] != b'/')
                    .any(|i| helper(rest, &text[i..]))
            }
            (Some(p), Some(t)) if p == t => helper(&pattern[1..], &text[1..]),
            _ => false,
        }
    }
    helper(pattern.as_bytes(), text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend(index: BackendIndex, capabilities: Value) -> BackendSummary {
        BackendSummary {
            index,
            name: format!("b{index}"),
            capabilities,
        }
    }

    #[test]
    fn initialize_routes_to_every_backend() {
        let policy = DefaultPolicy;
        let backends = vec![backend(0, json!({})), backend(1, json!({}))];
        let RouteDecision::Backends(ids) = policy.route_request("initialize", &json!({}), &backends)
        else {
            panic!("expected Backends");
        };
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn code_action_filters_by_capability() {
        let policy = DefaultPolicy;
        let backends = vec![
            backend(0, json!({"codeActionProvider": true})),
            backend(1, json!({})),
        ];
        let RouteDecision::Backends(ids) =
            policy.route_request("textDocument/codeAction", &json!({}), &backends)
        else {
            panic!("expected Backends");
        };
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn completion_filters_by_trigger_character() {
        let policy = DefaultPolicy;
        let backends = vec![
            backend(
                0,
                json!({"completionProvider": {"triggerCharacters": ["."]}}),
            ),
            backend(
                1,
                json!({"completionProvider": {"triggerCharacters": ["<"]}}),
            ),
        ];
        let params = json!({"context": {"triggerCharacter": "."}});
        let RouteDecision::Backends(ids) =
            policy.route_request("textDocument/completion", &params, &backends)
        else {
            panic!("expected Backends");
        };
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn completion_skips_trigger_filter_with_a_single_candidate() {
        let policy = DefaultPolicy;
        let backends = vec![
            backend(
                0,
                json!({"completionProvider": {"triggerCharacters": ["<"]}}),
            ),
            backend(1, json!({})),
        ];
        let params = json!({"context": {"triggerCharacter": "."}});
        let RouteDecision::Backends(ids) =
            policy.route_request("textDocument/completion", &params, &backends)
        else {
            panic!("expected Backends");
        };
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn rename_picks_first_capable_backend() {
        let policy = DefaultPolicy;
        let backends = vec![
            backend(0, json!({})),
            backend(1, json!({"renameProvider": true})),
        ];
        let RouteDecision::Backends(ids) =
            policy.route_request("textDocument/rename", &json!({}), &backends)
        else {
            panic!("expected Backends");
        };
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn rename_routes_to_no_backend_when_none_capable() {
        let policy = DefaultPolicy;
        let backends = vec![backend(0, json!({})), backend(1, json!({}))];
        let RouteDecision::Backends(ids) =
            policy.route_request("textDocument/rename", &json!({}), &backends)
        else {
            panic!("expected Backends");
        };
        assert!(ids.is_empty());
    }

    #[test]
    fn resolve_methods_go_through_the_stash() {
        let policy = DefaultPolicy;
        let backends = vec![backend(0, json!({}))];
        assert!(matches!(
            policy.route_request("codeAction/resolve", &json!({}), &backends),
            RouteDecision::StashResolve
        ));
    }

    #[test]
    fn glob_matches_double_star() {
        assert!(glob_match("**/*.py", "file:///a/b/c.py"));
        assert!(!glob_match("**/*.py", "file:///a/b/c.rs"));
    }

    #[test]
    fn watcher_registry_defaults_to_matching_everything() {
        let registry = WatcherRegistry::new();
        assert!(registry.matches(0, "file:///anything"));
    }

    #[test]
    fn watcher_registry_filters_once_registered() {
        let mut registry = WatcherRegistry::new();
        registry.register(0, "**/*.py".to_string());
        assert!(registry.matches(0, "file:///a.py"));
        assert!(!registry.matches(0, "file:///a.rs"));
        assert!(registry.matches(1, "file:///a.rs"));
    }
}

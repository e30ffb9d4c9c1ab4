//! The `vue` preset's custom logic: vue-language-server needs a
//! TypeScript SDK path it cannot discover on its own, so this decorator
//! injects one into `initialize`'s `initializationOptions` before
//! delegating everything else to the wrapped policy.
//!
//! Grounded in `rassumfrassum.presets.vue.VueLogic`, which overrides only
//! `on_client_request` and calls `super().on_client_request(...)` for
//! everything else — the same composition-over-inheritance shape
//! [`RoutingPolicy`] was designed to support.

use std::process::Command;
use std::time::Duration;

use lspmux::aggregate::dmerge;
use lspmux::policy::{BackendSummary, RouteDecision, RoutingPolicy};
use serde_json::{json, Value};

const FALLBACK_TSDK_PATH: &str = "/usr/local/lib/node_modules/typescript/lib";

pub struct VuePolicy<P> {
    inner: P,
}

impl<P: RoutingPolicy> VuePolicy<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: RoutingPolicy> RoutingPolicy for VuePolicy<P> {
    fn route_request(&self, method: &str, params: &Value, backends: &[BackendSummary]) -> RouteDecision {
        self.inner.route_request(method, params, backends)
    }

    fn should_broadcast_notification(
        &self,
        method: &str,
        params: &Value,
        backend: &BackendSummary,
    ) -> bool {
        self.inner.should_broadcast_notification(method, params, backend)
    }

    fn aggregation_timeout(&self, method: &str) -> Duration {
        self.inner.aggregation_timeout(method)
    }

    fn diagnostic_aggregation_timeout(&self) -> Duration {
        self.inner.diagnostic_aggregation_timeout()
    }

    fn masked_capabilities(&self) -> Vec<String> {
        self.inner.masked_capabilities()
    }

    fn on_client_request(&self, method: &str, mut params: Value) -> Value {
        if method == "initialize" {
            let tsdk_path = discover_typescript_sdk_path();
            if let Some(obj) = params.as_object_mut() {
                let existing = obj.remove("initializationOptions").unwrap_or(json!({}));
                let injected = json!({
                    "typescript": {"tsdk": tsdk_path},
                    "vue": {"hybridMode": false},
                });
                obj.insert("initializationOptions".to_string(), dmerge(existing, injected));
            }
        }
        self.inner.on_client_request(method, params)
    }

    fn prepare_initialize_params(&self, params: &mut Value) {
        self.inner.prepare_initialize_params(params);
    }
}

/// Shells out to `npm list --global --parseable typescript` to find
/// where a global TypeScript install lives, the same discovery the
/// reference implementation's `VueLogic` performs with `subprocess.run`.
/// Any failure (npm missing, no global TypeScript, unexpected output)
/// falls back to the conventional install path rather than failing
/// `initialize` outright.
fn discover_typescript_sdk_path() -> String {
    let output = Command::new("npm")
        .args(["list", "--global", "--parseable", "typescript"])
        .output();

    match output {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            match stdout.lines().next() {
                Some(first_line) if !first_line.trim().is_empty() => {
                    format!("{}/lib", first_line.trim())
                }
                _ => FALLBACK_TSDK_PATH.to_string(),
            }
        }
        Err(_) => FALLBACK_TSDK_PATH.to_string(),
    }
}

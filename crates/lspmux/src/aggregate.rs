//! Aggregator (C7): combines several backends' responses (or push
//! notifications) for one logical operation into a single payload.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::ids::BackendIndex;

/// One backend's contribution to a pending aggregation.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub backend: BackendIndex,
    pub name: String,
    pub payload: Value,
    pub is_error: bool,
}

/// Tracks one client request fanned out to more than one backend, as
/// described by the `PendingAggregation` entry in the data model.
#[derive(Debug)]
pub struct PendingAggregation {
    pub method: String,
    pub expected_backends: Vec<BackendIndex>,
    /// `textDocument.uri` of the originating request, when it carried
    /// one; needed at dispatch time to stash code-action/completion
    /// items and to invalidate them together with the document.
    pub uri: Option<String>,
    received: HashMap<BackendIndex, BackendResponse>,
    pub dispatched: bool,
}

impl PendingAggregation {
    pub fn new(
        method: impl Into<String>,
        expected_backends: Vec<BackendIndex>,
        uri: Option<String>,
    ) -> Self {
        Self {
            method: method.into(),
            expected_backends,
            uri,
            received: HashMap::new(),
            dispatched: false,
        }
    }

    pub fn record(&mut self, response: BackendResponse) {
        self.received.insert(response.backend, response);
    }

    pub fn is_complete(&self) -> bool {
        self.expected_backends
            .iter()
            .all(|b| self.received.contains_key(b))
    }

    /// Consumes whatever has been received, in `expected_backends` order,
    /// for a timeout-driven or complete dispatch. Marks the aggregation
    /// dispatched.
    pub fn finish(&mut self) -> Vec<BackendResponse> {
        self.dispatched = true;
        self.expected_backends
            .iter()
            .filter_map(|b| self.received.get(b).cloned())
            .collect()
    }
}

/// Combines the responses of a finished (or timed-out) aggregation into
/// the single payload the editor sees.
///
/// If every response errored, the first error is surfaced. Otherwise
/// errored entries are dropped and the successes are combined by a
/// method-specific rule, falling back to the generic deep-merge for
/// anything not enumerated here.
pub fn aggregate_response_payloads(method: &str, responses: &[BackendResponse]) -> (Value, bool) {
    if !responses.is_empty() && responses.iter().all(|r| r.is_error) {
        return (responses[0].payload.clone(), true);
    }
    let successes: Vec<&BackendResponse> = responses.iter().filter(|r| !r.is_error).collect();

    let merged = match method {
        "initialize" => merge_initialize_results(&successes),
        "shutdown" => Value::Object(Map::new()),
        "textDocument/completion" => merge_completion_results(&successes),
        "textDocument/codeAction" => merge_code_action_results(&successes),
        "textDocument/diagnostic" => merge_pull_diagnostic_results(&successes),
        _ => merge_generic(&successes),
    };
    (merged, false)
}

fn merge_generic(successes: &[&BackendResponse]) -> Value {
    successes
        .iter()
        .fold(Value::Null, |acc, r| match acc {
            Value::Null => r.payload.clone(),
            other => dmerge(other, r.payload.clone()),
        })
}

/// Deep-merges `other` into `primary`: `primary` wins scalar conflicts;
/// a structured value (object/array) always beats a scalar regardless of
/// which side it came from; objects recurse; arrays concatenate.
///
/// Mirrors the reference implementation's `dmerge(d1, d2)`, generalized
/// from dict-only to arbitrary JSON values.
pub fn dmerge(primary: Value, other: Value) -> Value {
    match (primary, other) {
        (Value::Object(mut a), Value::Object(b)) => {
            for (key, v2) in b {
                match a.remove(&key) {
                    None => {
                        a.insert(key, v2);
                    }
                    Some(v1) => {
                        a.insert(key, dmerge(v1, v2));
                    }
                }
            }
            Value::Object(a)
        }
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Value::Array(a)
        }
        (a, b) if is_scalar(&a) && !is_scalar(&b) => b,
        (a, b) if !is_scalar(&a) && is_scalar(&b) => a,
        (a, _b) => a,
    }
}

fn is_scalar(v: &Value) -> bool {
    !matches!(v, Value::Object(_) | Value::Array(_))
}

fn merge_initialize_results(successes: &[&BackendResponse]) -> Value {
    let mut capabilities = Value::Object(Map::new());
    let mut sync_values = Vec::new();
    let mut server_names = Vec::new();
    let mut server_versions = Vec::new();
    let mut semantic_tokens_provider: Option<Value> = None;

    for response in successes {
        let Some(result) = response.payload.as_object() else {
            continue;
        };
        if let Some(caps) = result.get("capabilities").and_then(Value::as_object) {
            let mut caps = caps.clone();
            if let Some(sync) = caps.remove("textDocumentSync") {
                sync_values.push(sync);
            }
            if let Some(semantic) = caps.remove("semanticTokensProvider") {
                semantic_tokens_provider.get_or_insert(semantic);
            }
            capabilities = dmerge(capabilities, Value::Object(caps));
        }
        if let Some(info) = result.get("serverInfo").and_then(Value::as_object) {
            if let Some(name) = info.get("name").and_then(Value::as_str) {
                server_names.push(name.to_string());
            }
            if let Some(version) = info.get("version").and_then(Value::as_str) {
                server_versions.push(version.to_string());
            }
        }
    }

    if let Some(obj) = capabilities.as_object_mut() {
        if let Some(semantic) = semantic_tokens_provider {
            obj.insert("semanticTokensProvider".to_string(), semantic);
        }
        if let Some(sync) = merge_text_document_sync(sync_values) {
            obj.insert("textDocumentSync".to_string(), sync);
        }
    }

    let mut result = Map::new();
    result.insert("capabilities".to_string(), capabilities);
    if !server_names.is_empty() || !server_versions.is_empty() {
        let mut server_info = Map::new();
        server_info.insert(
            "name".to_string(),
            Value::String(server_names.join("+")),
        );
        server_info.insert(
            "version".to_string(),
            Value::String(server_versions.join(",")),
        );
        result.insert("serverInfo".to_string(), Value::Object(server_info));
    }
    Value::Object(result)
}

/// If any backend only supports full-document sync, the merged
/// capability degrades to that form rather than trying to reconcile
/// incremental-sync details across backends.
fn merge_text_document_sync(values: Vec<Value>) -> Option<Value> {
    if values.is_empty() {
        return None;
    }
    if values.iter().any(is_full_text_sync) {
        return Some(json!(1));
    }
    values.into_iter().next()
}

fn is_full_text_sync(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_i64() == Some(1),
        Value::Object(obj) => obj.get("change").and_then(Value::as_i64) == Some(1),
        _ => false,
    }
}

fn merge_completion_results(successes: &[&BackendResponse]) -> Value {
    let mut items = Vec::new();
    let mut is_incomplete = false;
    for response in successes {
        match &response.payload {
            Value::Array(list) => items.extend(list.iter().cloned()),
            Value::Object(obj) => {
                if let Some(Value::Array(list)) = obj.get("items") {
                    items.extend(list.iter().cloned());
                }
                if obj.get("isIncomplete").and_then(Value::as_bool) == Some(true) {
                    is_incomplete = true;
                }
            }
            _ => {}
        }
    }
    json!({"isIncomplete": is_incomplete, "items": items})
}

fn merge_code_action_results(successes: &[&BackendResponse]) -> Value {
    let mut items = Vec::new();
    for response in successes {
        if let Value::Array(list) = &response.payload {
            items.extend(list.iter().cloned());
        }
    }
    Value::Array(items)
}

fn merge_pull_diagnostic_results(successes: &[&BackendResponse]) -> Value {
    let mut items = Vec::new();
    for response in successes {
        let diagnostics = match &response.payload {
            Value::Object(obj) => obj.get("items").and_then(Value::as_array),
            _ => None,
        };
        if let Some(diagnostics) = diagnostics {
            for diagnostic in diagnostics {
                let mut diagnostic = diagnostic.clone();
                attach_default_source(&mut diagnostic, &response.name);
                items.push(diagnostic);
            }
        }
    }
    json!({"kind": "full", "items": items})
}

pub fn attach_default_source(diagnostic: &mut Value, backend_name: &str) {
    if let Some(obj) = diagnostic.as_object_mut() {
        obj.entry("source")
            .or_insert_with(|| Value::String(backend_name.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(backend: BackendIndex, name: &str, payload: Value) -> BackendResponse {
        BackendResponse {
            backend,
            name: name.to_string(),
            payload,
            is_error: false,
        }
    }

    #[test]
    fn dmerge_scalar_conflict_primary_wins() {
        let merged = dmerge(json!({"a": 1}), json!({"a": 2}));
        assert_eq!(merged, json!({"a": 1}));
    }

    #[test]
    fn dmerge_structured_beats_scalar_regardless_of_side() {
        let merged = dmerge(json!({"a": true}), json!({"a": {"nested": 1}}));
        assert_eq!(merged, json!({"a": {"nested": 1}}));
        let merged = dmerge(json!({"a": {"nested": 1}}), json!({"a": true}));
        assert_eq!(merged, json!({"a": {"nested": 1}}));
    }

    #[test]
    fn dmerge_concatenates_lists() {
        let merged = dmerge(json!({"a": [1]}), json!({"a": [2]}));
        assert_eq!(merged, json!({"a": [1, 2]}));
    }

    #[test]
    fn initialize_merge_from_scenario() {
        let a = ok(
            0,
            "a",
            json!({"capabilities": {"hoverProvider": true, "textDocumentSync": 2}, "serverInfo": {"name": "A"}}),
        );
        let b = ok(
            1,
            "b",
            json!({
                "capabilities": {
                    "hoverProvider": {"workDoneProgress": true},
                    "completionProvider": {"triggerCharacters": ["."]},
                    "textDocumentSync": 1
                },
                "serverInfo": {"name": "B"}
            }),
        );
        let (merged, is_error) = aggregate_response_payloads("initialize", &[a, b]);
        assert!(!is_error);
        assert_eq!(merged["capabilities"]["hoverProvider"], json!({"workDoneProgress": true}));
        assert_eq!(
            merged["capabilities"]["completionProvider"]["triggerCharacters"],
            json!(["."])
        );
        assert_eq!(merged["capabilities"]["textDocumentSync"], json!(1));
        assert_eq!(merged["serverInfo"]["name"], json!("A+B"));
    }

    #[test]
    fn all_errors_surfaces_first() {
        let a = BackendResponse {
            backend: 0,
            name: "a".into(),
            payload: json!({"code": -1, "message": "boom"}),
            is_error: true,
        };
        let (merged, is_error) = aggregate_response_payloads("textDocument/rename", &[a]);
        assert!(is_error);
        assert_eq!(merged["message"], "boom");
    }

    #[test]
    fn diagnostics_get_default_source_attribution() {
        let a = ok(0, "A", json!({"items": [{"message": "bad"}]}));
        let b = ok(1, "R", json!({"items": [{"message": "warn", "source": "R"}]}));
        let (merged, _) = aggregate_response_payloads("textDocument/diagnostic", &[a, b]);
        let items = merged["items"].as_array().unwrap();
        assert_eq!(items[0]["source"], "A");
        assert_eq!(items[1]["source"], "R");
    }
}

//! Narrow, read-only accessors over the handful of fields the multiplexer
//! actually inspects. Everything else travels as an opaque [`serde_json::Value`]
//! and is round-tripped unchanged.

use serde_json::Value;

/// `id` field of a JSON-RPC request or response, if present and a plain
/// number or string (the only two shapes the spec allows).
pub fn message_id(message: &Value) -> Option<Value> {
    message.get("id").filter(|v| !v.is_null()).cloned()
}

pub fn method(message: &Value) -> Option<&str> {
    message.get("method").and_then(Value::as_str)
}

pub fn is_request(message: &Value) -> bool {
    method(message).is_some() && message_id(message).is_some()
}

pub fn is_notification(message: &Value) -> bool {
    method(message).is_some() && message_id(message).is_none()
}

pub fn is_response(message: &Value) -> bool {
    method(message).is_none() && (message.get("result").is_some() || message.get("error").is_some())
}

pub fn is_error_response(message: &Value) -> bool {
    message.get("error").is_some()
}

pub fn text_document_uri(params: &Value) -> Option<&str> {
    params
        .get("textDocument")
        .and_then(|td| td.get("uri"))
        .and_then(Value::as_str)
}

pub fn text_document_version(params: &Value) -> Option<i64> {
    params
        .get("textDocument")
        .and_then(|td| td.get("version"))
        .and_then(Value::as_i64)
}

/// Whether an `initialize` request's `params.capabilities.experimental`
/// advertises support for the non-standard `$/streamDiagnostics`
/// notification (the one wire extension the multiplexer may introduce).
pub fn supports_stream_diagnostics(initialize_params: &Value) -> bool {
    initialize_params
        .get("capabilities")
        .and_then(|c| c.get("experimental"))
        .and_then(|e| e.get("streamDiagnostics"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub fn trigger_character(params: &Value) -> Option<&str> {
    params
        .get("context")
        .and_then(|c| c.get("triggerCharacter"))
        .and_then(Value::as_str)
}

mod support;

use std::time::Duration;

use serde_json::json;

use lspmux::dispatcher::DispatcherConfig;
use lspmux::policy::DefaultPolicy;
use support::fake_backend;

/// Scenario 5: the editor cancels a fanned-out request before any backend
/// answers. Both backends receive a translated `$/cancelRequest`, and even
/// if they go on to answer anyway, the editor never sees a reply for that id.
#[tokio::test]
async fn cancelling_a_fanout_request_suppresses_its_reply() {
    let (handle_a, mut a) = fake_backend("a", 0);
    let (handle_b, mut b) = fake_backend("b", 1);

    let mut harness = support::start(
        vec![handle_a, handle_b],
        Box::new(DefaultPolicy),
        DispatcherConfig::default(),
    );

    harness
        .send(json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {}}))
        .await;
    let init_a = a.recv().await;
    let init_b = b.recv().await;
    a.send(json!({"jsonrpc": "2.0", "id": init_a["id"].clone(), "result": {"capabilities": {"completionProvider": true}}}));
    b.send(json!({"jsonrpc": "2.0", "id": init_b["id"].clone(), "result": {"capabilities": {"completionProvider": true}}}));
    harness.recv().await;

    harness
        .send(json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "textDocument/completion",
            "params": {"textDocument": {"uri": "f://t"}, "position": {"line": 0, "character": 0}}
        }))
        .await;
    let req_a = a.recv().await;
    let req_b = b.recv().await;
    assert_eq!(req_a["method"], "textDocument/completion");

    harness
        .send(json!({"jsonrpc": "2.0", "method": "$/cancelRequest", "params": {"id": 7}}))
        .await;

    let cancel_a = a.recv().await;
    assert_eq!(cancel_a["method"], "$/cancelRequest");
    assert_eq!(cancel_a["params"]["id"], req_a["id"]);
    let cancel_b = b.recv().await;
    assert_eq!(cancel_b["params"]["id"], req_b["id"]);

    a.send(json!({"jsonrpc": "2.0", "id": req_a["id"].clone(), "result": [{"label": "too_late_a"}]}));
    b.send(json!({"jsonrpc": "2.0", "id": req_b["id"].clone(), "result": [{"label": "too_late_b"}]}));

    harness
        .assert_nothing_received(Duration::from_millis(300))
        .await;
}

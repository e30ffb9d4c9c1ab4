mod support;

use serde_json::json;

use lspmux::dispatcher::DispatcherConfig;
use lspmux::policy::DefaultPolicy;
use support::fake_backend;

async fn initialize_with_code_actions(
    harness: &mut support::Harness,
    a: &mut support::FakeBackend,
    b: &mut support::FakeBackend,
) {
    harness
        .send(json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {}}))
        .await;
    let req_a = a.recv().await;
    let req_b = b.recv().await;
    a.send(json!({
        "jsonrpc": "2.0",
        "id": req_a["id"].clone(),
        "result": {"capabilities": {"codeActionProvider": true}}
    }));
    b.send(json!({
        "jsonrpc": "2.0",
        "id": req_b["id"].clone(),
        "result": {"capabilities": {"codeActionProvider": true}}
    }));
    harness.recv().await;
}

/// Scenario 4: two backends answer `textDocument/codeAction` with actions
/// carrying colliding `data` shapes; the editor sees rewritten opaque
/// handles, and resolving one routes back to its originating backend with
/// the original `data` restored.
#[tokio::test]
async fn stashes_code_action_data_and_routes_resolve_by_handle() {
    let (handle_a, mut a) = fake_backend("a", 0);
    let (handle_b, mut b) = fake_backend("b", 1);

    let mut harness = support::start(
        vec![handle_a, handle_b],
        Box::new(DefaultPolicy),
        DispatcherConfig::default(),
    );
    initialize_with_code_actions(&mut harness, &mut a, &mut b).await;

    harness
        .send(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "textDocument/codeAction",
            "params": {"textDocument": {"uri": "f://t"}}
        }))
        .await;

    let req_a = a.recv().await;
    let req_b = b.recv().await;

    a.send(json!({
        "jsonrpc": "2.0",
        "id": req_a["id"].clone(),
        "result": [{"title": "Fix from A", "data": {"index": 0}}]
    }));
    b.send(json!({
        "jsonrpc": "2.0",
        "id": req_b["id"].clone(),
        "result": [{"title": "Fix from B", "data": {"index": 0}}]
    }));

    let reply = harness.recv().await;
    let actions = reply["result"].as_array().unwrap();
    assert_eq!(actions.len(), 2);
    let handle_from_a = actions[0]["data"].as_str().unwrap().to_string();
    let handle_from_b = actions[1]["data"].as_str().unwrap().to_string();
    assert!(handle_from_a.starts_with("stash-"));
    assert_ne!(handle_from_a, handle_from_b);

    harness
        .send(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "codeAction/resolve",
            "params": {"title": "Fix from A", "data": handle_from_a}
        }))
        .await;

    let resolve_req = a.recv().await;
    assert_eq!(resolve_req["method"], "codeAction/resolve");
    assert_eq!(resolve_req["params"]["data"], json!({"index": 0}));
    b.assert_nothing_received(std::time::Duration::from_millis(150))
        .await;

    a.send(json!({
        "jsonrpc": "2.0",
        "id": resolve_req["id"].clone(),
        "result": {"title": "Fix from A", "data": {"index": 0}, "edit": {}}
    }));

    let resolved = harness.recv().await;
    assert_eq!(resolved["id"], 2);
    assert_eq!(resolved["result"]["data"], json!({"index": 0}));
}

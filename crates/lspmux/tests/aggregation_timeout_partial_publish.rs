mod support;

use serde_json::json;

use lspmux::dispatcher::DispatcherConfig;
use lspmux::policy::DefaultPolicy;
use support::fake_backend;

/// A fanned-out request whose backends don't all answer still resolves:
/// once the per-method aggregation timeout elapses, the editor gets
/// whatever responses came in. Uses paused time so the 2.5s default
/// timeout doesn't make the test slow.
#[tokio::test(start_paused = true)]
async fn unanswered_backend_does_not_block_the_response_forever() {
    let (handle_a, mut a) = fake_backend("a", 0);
    let (handle_b, _b) = fake_backend("b", 1);

    let mut harness = support::start(
        vec![handle_a, handle_b],
        Box::new(DefaultPolicy),
        DispatcherConfig::default(),
    );

    harness
        .send(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
        .await;

    let req_a = a.recv().await;
    a.send(json!({
        "jsonrpc": "2.0",
        "id": req_a["id"].clone(),
        "result": {"capabilities": {"hoverProvider": true}, "serverInfo": {"name": "A"}}
    }));
    // backend "b" never answers.

    let reply = harness.recv().await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["capabilities"]["hoverProvider"], true);
    assert_eq!(reply["result"]["serverInfo"]["name"], "A");
}

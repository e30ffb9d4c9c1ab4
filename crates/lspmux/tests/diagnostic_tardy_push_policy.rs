mod support;

use std::time::Duration;

use serde_json::json;

use lspmux::dispatcher::DispatcherConfig;
use lspmux::policy::DefaultPolicy;
use support::{did_open, fake_backend};

/// By default, a push diagnostic that arrives for a version already
/// published triggers a republish with the enhanced set.
#[tokio::test]
async fn tardy_push_republishes_by_default() {
    let (handle_a, mut a) = fake_backend("a", 0);
    let (handle_b, mut b) = fake_backend("b", 1);

    let mut harness = support::start(
        vec![handle_a, handle_b],
        Box::new(DefaultPolicy),
        DispatcherConfig::default(),
    );

    harness.send(did_open("f://t", 1)).await;
    a.recv().await;
    b.recv().await;

    let push = |diagnostics: serde_json::Value| {
        json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {"uri": "f://t", "version": 1, "diagnostics": diagnostics}
        })
    };

    a.send(push(json!([{"message": "first"}])));
    b.send(push(json!([{"message": "only-one"}])));
    let first_publish = harness.recv().await;
    assert_eq!(first_publish["params"]["diagnostics"].as_array().unwrap().len(), 2);

    a.send(push(json!([{"message": "second"}])));
    let republish = harness.recv().await;
    // The reconciler keeps every backend's most recent push for the
    // version, so the republish carries `a`'s update alongside `b`'s
    // still-retained contribution, not `a`'s update alone.
    let diagnostics = republish["params"]["diagnostics"].as_array().unwrap();
    assert_eq!(diagnostics.len(), 2);
    assert_eq!(diagnostics[0]["message"], "second");
    assert_eq!(diagnostics[1]["message"], "only-one");
}

/// With `--drop-tardy`, the same late push is silently dropped instead.
#[tokio::test]
async fn drop_tardy_suppresses_the_republish() {
    let (handle_a, mut a) = fake_backend("a", 0);
    let (handle_b, mut b) = fake_backend("b", 1);

    let mut harness = support::start(
        vec![handle_a, handle_b],
        Box::new(DefaultPolicy),
        DispatcherConfig {
            drop_tardy: true,
            ..DispatcherConfig::default()
        },
    );

    harness.send(did_open("f://t", 1)).await;
    a.recv().await;
    b.recv().await;

    let push = |diagnostics: serde_json::Value| {
        json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {"uri": "f://t", "version": 1, "diagnostics": diagnostics}
        })
    };

    a.send(push(json!([{"message": "first"}])));
    b.send(push(json!([{"message": "only-one"}])));
    harness.recv().await;

    a.send(push(json!([{"message": "tardy"}])));
    harness
        .assert_nothing_received(Duration::from_millis(200))
        .await;
}

use std::time::Duration;

use perimesh_core::{Message, MessageKind, NodeId};
use perimesh_services::{CallError, Transport};
use serde_json::json;

use crate::*;

const TIMEOUT: Duration = Duration::from_millis(150);

#[tokio::test]
async fn proxy_call_returns_values() {
    let mesh = Mesh::new();
    let watcher = mesh.client(1);
    let _host = mesh.host_with(10, &["left"]);
    settle().await;

    let left = watcher.client.wrap("left").unwrap();
    assert_eq!(left.kind(), "energy_detector");
    assert_eq!(left.invoke_first("getTransferRate", vec![]).await, Some(json!(512)));
    assert_eq!(left.invoke("setLimit", vec![json!(64)]).await, Some(vec![json!(64)]));
    assert!(left.is_connected());
}

#[tokio::test]
async fn unknown_capability_is_not_found() {
    let mesh = Mesh::new();
    let watcher = mesh.client(1);
    let _host = mesh.host_with(10, &["left"]);
    settle().await;

    let err = watcher
        .client
        .call(NodeId(10), "nowhere", "getTransferRate", vec![], TIMEOUT)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));

    let err = watcher
        .client
        .call(NodeId(10), "left", "nothing", vec![], TIMEOUT)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn peripheral_failure_is_an_error_not_a_crash() {
    let mesh = Mesh::new();
    let watcher = mesh.client(1);
    let _host = mesh.host_with(10, &["left"]);
    settle().await;

    let err = watcher
        .client
        .call(NodeId(10), "left", "setLimit", vec![json!("lots")], TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(err, CallError::Remote("bad arguments: limit must be a number".into()));

    // Host keeps serving.
    let ok = watcher
        .client
        .call(NodeId(10), "left", "getTransferRate", vec![], TIMEOUT)
        .await
        .unwrap();
    assert_eq!(ok, vec![json!(512)]);
}

#[tokio::test]
async fn proxy_hides_remote_errors_as_absence() {
    let mesh = Mesh::new();
    let watcher = mesh.client(1);
    let _host = mesh.host_with(10, &["left"]);
    settle().await;

    let left = watcher.client.wrap("left").unwrap();
    assert!(left.invoke("setLimit", vec![json!("lots")]).await.is_none());
    assert_eq!(left.health().consecutive_failures, 1);
}

#[tokio::test]
async fn lossy_link_never_leaks_pending_requests() {
    let mesh = Mesh::new();
    let watcher = mesh.client(1);
    let _host = mesh.host_with(10, &["left"]);
    settle().await;
    mesh.net.set_drop_rate(0.3);

    let mut ok = 0;
    for _ in 0..20 {
        if watcher
            .client
            .call(NodeId(10), "left", "getTransferRate", vec![], TIMEOUT)
            .await
            .is_ok()
        {
            ok += 1;
        }
    }
    assert!(ok > 0, "some calls should get through at 30% loss");
    assert_eq!(watcher.client.pending_len(), 0);
}

#[tokio::test]
async fn duplicate_replies_resolve_once() {
    let mesh = Mesh::new();
    mesh.net.set_duplicate_rate(1.0);
    let watcher = mesh.client(1);
    let _host = mesh.host_with(10, &["left"]);
    settle().await;

    for _ in 0..5 {
        let results = watcher
            .client
            .call(NodeId(10), "left", "getTransferRate", vec![], TIMEOUT)
            .await
            .unwrap();
        assert_eq!(results, vec![json!(512)]);
    }
    settle().await;
    assert_eq!(watcher.client.pending_len(), 0);
}

#[tokio::test]
async fn late_reply_after_timeout_is_dropped() {
    let mesh = Mesh::new();
    let watcher = mesh.client(1);

    // A hand-driven host that answers far too late.
    let slow = mesh.net.join(NodeId(30));
    let responder = tokio::spawn(async move {
        let inbound = loop {
            let inbound = slow.poll(Duration::from_secs(2)).await.unwrap().unwrap();
            if inbound.message.kind == MessageKind::Call {
                break inbound;
            }
        };
        tokio::time::sleep(Duration::from_millis(300)).await;
        let reply: Message = inbound.message.result_reply(vec![json!("late")]);
        slow.send(inbound.sender, &reply).unwrap();
    });

    let err = watcher
        .client
        .call(NodeId(30), "left", "getTransferRate", vec![], Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Timeout(_)));
    assert_eq!(watcher.client.pending_len(), 0);

    responder.await.unwrap();
    settle().await;
    assert_eq!(watcher.client.pending_len(), 0);

    // Still works afterwards.
    let _host = mesh.host_with(10, &["left"]);
    let ok = watcher
        .client
        .call(NodeId(10), "left", "getTransferRate", vec![], TIMEOUT)
        .await;
    assert!(ok.is_ok());
}

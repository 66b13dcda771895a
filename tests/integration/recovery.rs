use std::time::Duration;

use perimesh_core::message::ListPayload;
use perimesh_core::{CapabilityDescriptor, Message, MessageKind, NodeId};
use perimesh_services::Transport;
use serde_json::json;

use crate::*;

#[tokio::test]
async fn proxy_moves_to_surviving_host() {
    let mesh = Mesh::new();
    let watcher = mesh.client(1);
    let _a = mesh.host_with(10, &["left"]);
    let _b = mesh.host_with(20, &["left"]);
    settle().await;

    let left = watcher.client.wrap("left").unwrap();
    assert_eq!(left.invoke_first("whereAmI", vec![]).await, Some(json!(10)));

    // Host 10 drops off the link.
    mesh.net.leave(NodeId(10));

    for _ in 0..2 {
        assert!(left.invoke("whereAmI", vec![]).await.is_none());
        assert!(left.is_connected());
    }
    assert!(left.invoke("whereAmI", vec![]).await.is_none());
    assert!(!left.is_connected());

    // Inside the cooldown: immediate absence.
    let started = tokio::time::Instant::now();
    assert!(left.invoke("whereAmI", vec![]).await.is_none());
    assert!(started.elapsed() < Duration::from_millis(100));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(left.invoke_first("whereAmI", vec![]).await, Some(json!(20)));
    assert!(left.is_connected());
    assert_eq!(left.owner(), NodeId(20));
    assert_eq!(left.health().consecutive_failures, 0);
}

#[tokio::test]
async fn explicit_reconnect_skips_the_wait() {
    let mesh = Mesh::new();
    let watcher = mesh.client(1);
    let _a = mesh.host_with(10, &["left"]);
    settle().await;

    let left = watcher.client.wrap("left").unwrap();
    mesh.net.leave(NodeId(10));
    for _ in 0..3 {
        left.invoke("whereAmI", vec![]).await;
    }
    assert!(!left.is_connected());

    // Nobody has it yet.
    assert!(!left.reconnect().await);

    let _b = mesh.host_with(20, &["left"]);
    assert!(left.reconnect().await);
    assert_eq!(left.owner(), NodeId(20));
    assert_eq!(left.invoke_first("whereAmI", vec![]).await, Some(json!(20)));
}

#[tokio::test]
async fn rediscovery_with_no_owner_stays_disconnected() {
    let mesh = Mesh::new();
    let watcher = mesh.client(1);
    let (host, bench) = mesh.host_with(10, &["left"]);
    settle().await;

    let left = watcher.client.wrap("left").unwrap();
    bench.detach("left");
    host.host.scan();

    // Host answers "not found" now; errors count like timeouts.
    for _ in 0..3 {
        assert!(left.invoke("whereAmI", vec![]).await.is_none());
    }
    assert!(!left.is_connected());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(left.invoke("whereAmI", vec![]).await.is_none());
    assert!(!left.is_connected());
    // The rediscovery round refreshed the registry from the host's reply.
    assert!(!watcher.client.is_present("10::left"));
}

#[tokio::test]
async fn rediscovery_prefers_smallest_owner_over_first_reply() {
    let mesh = Mesh::new();
    let watcher = mesh.client(1);
    let _fast = mesh.host_with(20, &["left"]);

    // Node 10 is driven by hand so its replies arrive after node 20's.
    let slow = mesh.net.join(NodeId(10));
    let list = ListPayload {
        node: NodeId(10),
        label: "node-10".to_string(),
        capabilities: vec![CapabilityDescriptor {
            name: "left".to_string(),
            kind: "energy_detector".to_string(),
            methods: vec!["whereAmI".to_string()],
        }],
    };
    slow.broadcast(&Message::announce(&list)).unwrap();
    settle().await;
    assert_eq!(watcher.client.wrap("left").unwrap().owner(), NodeId(10));

    let responder = tokio::spawn(async move {
        let request = loop {
            let inbound = slow.poll(Duration::from_secs(2)).await.unwrap().unwrap();
            if inbound.message.kind == MessageKind::Discover {
                break inbound;
            }
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        slow.send(request.sender, &request.message.list_reply(&list))
            .unwrap();
    });

    let found = watcher.client.rediscover("left").await.unwrap();
    responder.await.unwrap();
    assert_eq!(found.owner, NodeId(10));
    assert_eq!(found.owner, watcher.client.wrap("left").unwrap().owner());
}

use perimesh_core::NodeId;

use crate::*;

#[tokio::test]
async fn same_name_on_two_hosts() {
    let mesh = Mesh::new();
    let watcher = mesh.client(1);
    let _a = mesh.host_with(20, &["left"]);
    let _b = mesh.host_with(10, &["left"]);
    settle().await;

    let client = &watcher.client;
    assert_eq!(client.get_count(), 2);
    let names = client.get_names();
    assert!(names.contains(&"10::left".to_string()));
    assert!(names.contains(&"20::left".to_string()));
    assert_eq!(client.wrap("left").unwrap().owner(), NodeId(10));
    assert_eq!(client.wrap("20::left").unwrap().owner(), NodeId(20));
}

#[tokio::test]
async fn reannounce_withdraws_missing_entries() {
    let mesh = Mesh::new();
    let watcher = mesh.client(1);
    let (host, bench) = mesh.host_with(42, &["left", "right"]);
    settle().await;
    assert_eq!(watcher.client.get_count(), 2);

    bench.detach("left");
    assert!(host.refresh());
    settle().await;

    let client = &watcher.client;
    assert!(!client.is_present("42::left"));
    assert!(client.is_present("42::right"));
    assert_eq!(client.get_count(), 1);
}

#[tokio::test]
async fn late_joiner_finds_everything_by_discovery() {
    let mesh = Mesh::new();
    let _a = mesh.host_with(10, &["left"]);
    let _b = mesh.host_with(20, &["right", "top"]);
    settle().await;

    // Joined after both announced: sees nothing until it asks.
    let watcher = mesh.client(1);
    assert_eq!(watcher.client.get_count(), 0);

    assert!(watcher.client.discover().await.is_some());
    settle().await;
    assert_eq!(watcher.client.get_names(), vec!["10::left", "20::right", "20::top"]);
    assert_eq!(watcher.client.owner_label(NodeId(20)).as_deref(), Some("node-20"));
}

#[tokio::test]
async fn infrastructure_stays_local() {
    let mesh = Mesh::new();
    let watcher = mesh.client(1);
    let bench = LocalBench::new();
    bench.attach(detector("left", 10));
    bench.attach(std::sync::Arc::new(TablePeripheral::new("back", "modem")));
    bench.attach(std::sync::Arc::new(TablePeripheral::new("screen", "monitor")));
    let _host = mesh.node(10, &bench);
    settle().await;

    assert_eq!(watcher.client.get_names(), vec!["10::left"]);
    assert!(watcher.client.find("modem").is_none());
}

#[tokio::test]
async fn duplicated_announces_do_not_duplicate_entries() {
    let mesh = Mesh::new();
    mesh.net.set_duplicate_rate(1.0);
    let watcher = mesh.client(1);
    let (host, _) = mesh.host_with(10, &["left", "right"]);
    host.host.announce().unwrap();
    settle().await;

    assert_eq!(watcher.client.get_count(), 2);
    assert_eq!(watcher.client.find_all("energy_detector").len(), 2);
}

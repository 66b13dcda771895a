//! perimesh integration test harness.
//!
//! Every test builds a small mesh of full nodes (Host + Client + event
//! loop) over one in-process [`MemoryNetwork`]. Loss and duplication are
//! dialed in per test. Each mesh shuts its nodes down when dropped.

use std::sync::Arc;
use std::time::Duration;

use perimesh_core::config::ClientConfig;
use perimesh_core::{NodeId, NodeIdentity};
use perimesh_services::{
    LocalBench, MemoryNetwork, Node, Peripheral, PeripheralError, SharingPolicy, TablePeripheral,
};
use serde_json::json;
use tokio::sync::broadcast;

mod calls;
mod recovery;
mod registry;

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct Mesh {
    pub net: MemoryNetwork,
    settings: ClientConfig,
    shutdown: broadcast::Sender<()>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::with_settings(fast_settings())
    }

    pub fn with_settings(settings: ClientConfig) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            net: MemoryNetwork::new(),
            settings,
            shutdown,
        }
    }

    /// Start a node with the given bench attached. No periodic announces.
    pub fn node(&self, id: u32, bench: &LocalBench) -> Node {
        let node = Node::new(
            NodeIdentity::new(NodeId(id), format!("node-{id}")),
            Arc::new(bench.clone()),
            SharingPolicy::default(),
            Arc::new(self.net.join(NodeId(id))),
            self.settings.clone(),
        );
        node.start(Duration::ZERO, &self.shutdown);
        node
    }

    /// Start a node exposing one energy detector per name.
    pub fn host_with(&self, id: u32, names: &[&str]) -> (Node, LocalBench) {
        let bench = LocalBench::new();
        for name in names {
            bench.attach(detector(name, id));
        }
        (self.node(id, &bench), bench)
    }

    pub fn client(&self, id: u32) -> Node {
        self.node(id, &LocalBench::new())
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

pub fn fast_settings() -> ClientConfig {
    ClientConfig {
        call_timeout_ms: 150,
        discover_wait_ms: 150,
        cooldown_secs: 1,
        ..ClientConfig::default()
    }
}

/// An energy detector that reports which node it lives on.
pub fn detector(name: &str, owner: u32) -> Arc<dyn Peripheral> {
    Arc::new(
        TablePeripheral::new(name, "energy_detector")
            .method("getTransferRate", |_| Ok(vec![json!(512)]))
            .method("whereAmI", move |_| Ok(vec![json!(owner)]))
            .method("setLimit", |args| match args.first() {
                Some(v) if v.is_u64() => Ok(vec![v.clone()]),
                _ => Err(PeripheralError::BadArguments("limit must be a number".into())),
            }),
    )
}

/// Let in-flight datagrams land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

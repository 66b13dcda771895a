//! Link transport: how Host and Client put messages on the wire.
//!
//! The link is unreliable: sends are best-effort and never block, datagrams
//! may be dropped or duplicated, and there is no ordering across senders.
//! Nothing above this layer assumes otherwise.
//!
//! [`MemoryNetwork`] is an in-process link with tunable loss. The daemon
//! uses a UDP multicast implementation of the same trait.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use perimesh_core::{Datagram, Message, NodeId, WireError};
use rand::Rng;
use tokio::sync::{mpsc, Mutex};

/// A message received from the link, with the sender stamped by the transport.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub sender: NodeId,
    pub message: Message,
}

impl From<Datagram> for Inbound {
    fn from(d: Datagram) -> Self {
        Self {
            sender: d.sender,
            message: d.message,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// This node's identity on the link.
    fn local_id(&self) -> NodeId;

    /// Send to one node. Best-effort.
    fn send(&self, target: NodeId, message: &Message) -> Result<(), TransportError>;

    /// Send to every node. Best-effort.
    fn broadcast(&self, message: &Message) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next message addressed to this node.
    /// `Ok(None)` means nothing arrived in time.
    async fn poll(&self, timeout: Duration) -> Result<Option<Inbound>, TransportError>;
}

// ── In-memory link ────────────────────────────────────────────────────────────

/// An in-process broadcast medium with configurable loss and duplication.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    nodes: DashMap<NodeId, mpsc::UnboundedSender<Vec<u8>>>,
    /// Per-mille probability a delivery is dropped.
    drop_per_mille: AtomicU32,
    /// Per-mille probability a delivery is duplicated.
    duplicate_per_mille: AtomicU32,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node. Re-joining with the same id replaces the old endpoint.
    pub fn join(&self, id: NodeId) -> MemoryEndpoint {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.nodes.insert(id, tx);
        MemoryEndpoint {
            id,
            network: self.clone(),
            rx: Mutex::new(rx),
        }
    }

    /// Detach a node. Anything sent to it afterwards is lost.
    pub fn leave(&self, id: NodeId) {
        self.inner.nodes.remove(&id);
    }

    /// Probability in `[0, 1]` that any single delivery is dropped.
    pub fn set_drop_rate(&self, rate: f64) {
        self.inner
            .drop_per_mille
            .store(per_mille(rate), Ordering::Relaxed);
    }

    /// Probability in `[0, 1]` that any single delivery arrives twice.
    pub fn set_duplicate_rate(&self, rate: f64) {
        self.inner
            .duplicate_per_mille
            .store(per_mille(rate), Ordering::Relaxed);
    }

    fn deliver(&self, datagram: &Datagram) -> Result<(), TransportError> {
        let bytes = datagram.encode()?;
        let drop = self.inner.drop_per_mille.load(Ordering::Relaxed);
        let dup = self.inner.duplicate_per_mille.load(Ordering::Relaxed);
        let mut rng = rand::thread_rng();

        for node in self.inner.nodes.iter() {
            if !datagram.is_for(*node.key()) {
                continue;
            }
            if drop > 0 && rng.gen_range(0..1000) < drop {
                tracing::trace!(to = %node.key(), kind = %datagram.message.kind, "datagram dropped");
                continue;
            }
            let copies = if dup > 0 && rng.gen_range(0..1000) < dup { 2 } else { 1 };
            for _ in 0..copies {
                // A closed receiver is a node that went away; same as loss.
                let _ = node.value().send(bytes.clone());
            }
        }
        Ok(())
    }
}

fn per_mille(rate: f64) -> u32 {
    (rate.clamp(0.0, 1.0) * 1000.0).round() as u32
}

/// One node's attachment to a [`MemoryNetwork`].
pub struct MemoryEndpoint {
    id: NodeId,
    network: MemoryNetwork,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

#[async_trait]
impl Transport for MemoryEndpoint {
    fn local_id(&self) -> NodeId {
        self.id
    }

    fn send(&self, target: NodeId, message: &Message) -> Result<(), TransportError> {
        self.network
            .deliver(&Datagram::addressed(self.id, target, message.clone()))
    }

    fn broadcast(&self, message: &Message) -> Result<(), TransportError> {
        self.network
            .deliver(&Datagram::broadcast(self.id, message.clone()))
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<Inbound>, TransportError> {
        let mut rx = self.rx.lock().await;
        let bytes = match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_) => return Ok(None),
            Ok(None) => return Err(TransportError::Closed),
            Ok(Some(bytes)) => bytes,
        };
        match Datagram::decode(&bytes) {
            Ok(datagram) => Ok(Some(datagram.into())),
            Err(e) => {
                tracing::warn!(node = %self.id, error = %e, "discarding undecodable datagram");
                Ok(None)
            }
        }
    }
}

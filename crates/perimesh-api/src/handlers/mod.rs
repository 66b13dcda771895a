//! HTTP API handlers: exposes node state as JSON.

pub mod peripherals;
pub mod status;

use perimesh_services::Node;

#[derive(Clone)]
pub struct ApiState {
    pub node: Node,
    /// Signals graceful daemon shutdown.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl ApiState {
    pub fn new(node: Node, shutdown_tx: tokio::sync::broadcast::Sender<()>) -> Self {
        Self { node, shutdown_tx }
    }
}

// Re-export handler functions for use in router setup.
pub use peripherals::{handle_call, handle_discover, handle_local, handle_remote, handle_rescan};
pub use status::{handle_shutdown, handle_status};

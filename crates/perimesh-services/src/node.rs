//! A node: one Host and one Client sharing a transport and an event loop.

use std::sync::Arc;
use std::time::Duration;

use perimesh_core::config::ClientConfig;
use perimesh_core::NodeIdentity;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::client::{sweep_loop, Client};
use crate::dispatch::{run_event_loop, Dispatcher};
use crate::host::{announce_loop, Host};
use crate::peripheral::{PeripheralSource, SharingPolicy};
use crate::transport::Transport;

#[derive(Clone)]
pub struct Node {
    pub identity: NodeIdentity,
    pub host: Arc<Host>,
    pub client: Arc<Client>,
    pub transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
}

impl Node {
    pub fn new(
        identity: NodeIdentity,
        source: Arc<dyn PeripheralSource>,
        policy: SharingPolicy,
        transport: Arc<dyn Transport>,
        settings: ClientConfig,
    ) -> Self {
        let host = Arc::new(Host::new(
            identity.clone(),
            source,
            policy,
            transport.clone(),
        ));
        let client = Client::new(identity.id, transport.clone(), settings);

        let mut dispatcher = Dispatcher::new();
        host.register_handlers(&mut dispatcher);
        client.register_handlers(&mut dispatcher);

        Self {
            identity,
            host,
            client,
            transport,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Scan, announce, and spawn the event, announce and sweep loops.
    /// Every task stops when `shutdown` fires.
    pub fn start(
        &self,
        announce_interval: Duration,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        let exposed = self.host.scan();
        tracing::info!(
            node = %self.identity.id,
            label = %self.identity.label,
            exposed,
            "node starting"
        );

        let transport = self.transport.clone();
        let dispatcher = self.dispatcher.clone();
        let rx = shutdown.subscribe();
        let events = tokio::spawn(async move {
            if let Err(e) = run_event_loop(transport, dispatcher, rx).await {
                tracing::error!(error = %e, "event loop exited");
            }
        });

        if let Err(e) = self.host.announce() {
            tracing::warn!(error = %e, "initial announce failed");
        }

        vec![
            events,
            tokio::spawn(announce_loop(
                self.host.clone(),
                announce_interval,
                shutdown.subscribe(),
            )),
            tokio::spawn(sweep_loop(self.client.clone(), shutdown.subscribe())),
        ]
    }

    /// Rescan and announce if anything changed.
    pub fn refresh(&self) -> bool {
        let changed = self.host.rescan();
        if changed {
            if let Err(e) = self.host.announce() {
                tracing::warn!(error = %e, "announce after rescan failed");
            }
        }
        changed
    }
}

//! Host: serves this node's shareable peripherals to the rest of the link.
//!
//! The exposed set is a cache rebuilt only by [`Host::scan`]. Requests are
//! answered from the cache, which holds each peripheral by reference: one
//! detached since the last scan keeps serving calls until the next scan
//! drops it.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use perimesh_core::message::{CallPayload, ListPayload};
use perimesh_core::{CapabilityDescriptor, Message, MessageKind, NodeId, NodeIdentity};
use tokio::sync::broadcast;

use crate::dispatch::Dispatcher;
use crate::peripheral::{Peripheral, PeripheralSource, SharingPolicy};
use crate::transport::{Transport, TransportError};

struct Exposed {
    descriptor: CapabilityDescriptor,
    peripheral: Arc<dyn Peripheral>,
}

pub struct Host {
    identity: NodeIdentity,
    source: Arc<dyn PeripheralSource>,
    policy: SharingPolicy,
    transport: Arc<dyn Transport>,
    exposed: RwLock<BTreeMap<String, Exposed>>,
}

impl Host {
    pub fn new(
        identity: NodeIdentity,
        source: Arc<dyn PeripheralSource>,
        policy: SharingPolicy,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            identity,
            source,
            policy,
            transport,
            exposed: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Rebuild the exposed set from what is attached now. Returns how many
    /// peripherals are exposed.
    pub fn scan(&self) -> usize {
        let mut fresh = BTreeMap::new();
        for peripheral in self.source.attached() {
            let kind = peripheral.kind();
            if !self.policy.allows(kind) {
                tracing::trace!(name = peripheral.name(), kind, "peripheral kept local");
                continue;
            }
            let name = peripheral.name().to_string();
            if fresh.contains_key(&name) {
                tracing::warn!(name = %name, "duplicate peripheral name, keeping the first");
                continue;
            }
            fresh.insert(
                name,
                Exposed {
                    descriptor: peripheral.descriptor(),
                    peripheral,
                },
            );
        }

        let count = fresh.len();
        *self.exposed.write().unwrap_or_else(|e| e.into_inner()) = fresh;
        tracing::debug!(node = %self.identity.id, exposed = count, "peripheral scan complete");
        count
    }

    /// Scan again after a hardware change. Returns true if the exposed set
    /// differs from before, in which case the caller should announce.
    pub fn rescan(&self) -> bool {
        let before = self.capability_list();
        self.scan();
        let changed = before != self.capability_list();
        if changed {
            tracing::info!(node = %self.identity.id, "exposed peripherals changed");
        }
        changed
    }

    /// Exposed descriptors, ordered by name.
    pub fn capability_list(&self) -> Vec<CapabilityDescriptor> {
        self.exposed
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|e| e.descriptor.clone())
            .collect()
    }

    pub fn list_payload(&self) -> ListPayload {
        ListPayload {
            node: self.identity.id,
            label: self.identity.label.clone(),
            capabilities: self.capability_list(),
        }
    }

    /// Broadcast the full exposed set, unsolicited.
    pub fn announce(&self) -> Result<(), TransportError> {
        let payload = self.list_payload();
        tracing::debug!(
            node = %self.identity.id,
            capabilities = payload.capabilities.len(),
            "announcing"
        );
        self.transport.broadcast(&Message::announce(&payload))
    }

    pub fn handle_discover(&self, sender: NodeId, request: &Message) {
        let reply = request.list_reply(&self.list_payload());
        self.reply(sender, &reply);
    }

    pub fn handle_call(&self, sender: NodeId, request: &Message) {
        let reply = match request.payload_as::<CallPayload>() {
            Ok(call) => match self.invoke(&call) {
                Ok(results) => request.result_reply(results),
                Err(text) => request.error_reply(text),
            },
            Err(e) => request.error_reply(e.to_string()),
        };
        self.reply(sender, &reply);
    }

    fn invoke(&self, call: &CallPayload) -> Result<Vec<serde_json::Value>, String> {
        let peripheral = {
            let exposed = self.exposed.read().unwrap_or_else(|e| e.into_inner());
            let entry = exposed
                .get(&call.capability)
                .ok_or_else(|| format!("not found: capability '{}'", call.capability))?;
            if !entry.descriptor.methods.iter().any(|m| m == &call.method) {
                return Err(format!(
                    "not found: method '{}' on '{}'",
                    call.method, call.capability
                ));
            }
            entry.peripheral.clone()
        };

        match catch_unwind(AssertUnwindSafe(|| {
            peripheral.invoke(&call.method, &call.args)
        })) {
            Ok(Ok(results)) => Ok(results),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => {
                let text = panic_text(panic.as_ref());
                tracing::error!(
                    capability = %call.capability,
                    method = %call.method,
                    panic = %text,
                    "peripheral panicked"
                );
                Err(text)
            }
        }
    }

    fn reply(&self, target: NodeId, message: &Message) {
        if let Err(e) = self.transport.send(target, message) {
            tracing::warn!(to = %target, kind = %message.kind, error = %e, "reply not sent");
        }
    }

    pub fn register_handlers(self: &Arc<Self>, dispatcher: &mut Dispatcher) {
        let host = Arc::clone(self);
        dispatcher.on(MessageKind::Discover, move |sender, msg| {
            host.handle_discover(sender, msg)
        });
        let host = Arc::clone(self);
        dispatcher.on(MessageKind::Call, move |sender, msg| host.handle_call(sender, msg));
    }
}

fn panic_text(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "peripheral panicked".to_string()
    }
}

/// Announce on a fixed interval until shutdown. A zero interval disables
/// periodic announces.
pub async fn announce_loop(
    host: Arc<Host>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    if interval.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; startup announces on its own.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = ticker.tick() => {
                if let Err(e) = host.announce() {
                    tracing::warn!(error = %e, "periodic announce failed");
                }
            }
        }
    }
}

//! Routes inbound messages to handlers by message kind.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use perimesh_core::{Message, MessageKind, NodeId};
use tokio::sync::broadcast;

use crate::transport::{Inbound, Transport, TransportError};

/// A message handler. Runs to completion before the next message is dispatched.
pub type Handler = Arc<dyn Fn(NodeId, &Message) + Send + Sync>;

/// How long one poll of the transport blocks before checking for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Maps message kinds to handlers.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<MessageKind, Vec<Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to one message kind.
    pub fn on<F>(&mut self, kind: MessageKind, handler: F)
    where
        F: Fn(NodeId, &Message) + Send + Sync + 'static,
    {
        self.handlers.entry(kind).or_default().push(Arc::new(handler));
    }

    pub fn handles(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Validate and dispatch one inbound message.
    /// Returns false if it was invalid or nobody handles its kind.
    pub fn dispatch(&self, inbound: &Inbound) -> bool {
        if let Err(e) = inbound.message.validate() {
            tracing::warn!(sender = %inbound.sender, error = %e, "dropping invalid message");
            return false;
        }
        match self.handlers.get(&inbound.message.kind) {
            Some(handlers) => {
                for handler in handlers {
                    handler(inbound.sender, &inbound.message);
                }
                true
            }
            None => {
                tracing::trace!(kind = %inbound.message.kind, "no handler for message kind");
                false
            }
        }
    }
}

/// The node's single control loop: poll the link, dispatch, repeat.
///
/// Runs until `shutdown` fires or the transport closes.
pub async fn run_event_loop(
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), TransportError> {
    tracing::info!(node = %transport.local_id(), "event loop starting");
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(node = %transport.local_id(), "event loop stopping");
                return Ok(());
            }
            polled = transport.poll(POLL_INTERVAL) => {
                if let Some(inbound) = polled? {
                    tracing::trace!(
                        sender = %inbound.sender,
                        kind = %inbound.message.kind,
                        "message received"
                    );
                    dispatcher.dispatch(&inbound);
                }
            }
        }
    }
}

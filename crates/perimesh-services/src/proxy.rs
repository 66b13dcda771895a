//! Proxy: the handle application code holds for one remote peripheral.
//!
//! A proxy looks like a local peripheral: invoke a method, get values back
//! or get nothing. Behind that it tracks connection health and recovers on
//! its own.
//!
//! ```text
//!   Connected ──(threshold consecutive failures)──▶ Disconnected
//!       ▲                                              │
//!       └──── rediscover found an owner (after cooldown, or reconnect()) ┘
//! ```
//!
//! Timeouts and remote errors count the same toward the threshold. A
//! missing method looks exactly like an unreachable host from here.

use std::sync::{Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use perimesh_core::config::ClientConfig;
use perimesh_core::{CapabilityDescriptor, NodeId};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::client::CallError;

/// The call path a proxy goes through. Implemented by [`crate::Client`].
#[async_trait]
pub trait Router: Send + Sync {
    async fn call(
        &self,
        owner: NodeId,
        capability: &str,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Vec<Value>, CallError>;

    /// Actively look for a peripheral by bare name. Returns its owner and
    /// the descriptor that owner advertises.
    async fn relocate(&self, name: &str) -> Option<(NodeId, CapabilityDescriptor)>;
}

/// Failure-handling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub disconnect_threshold: u32,
    pub cooldown: Duration,
    pub call_timeout: Duration,
}

impl From<&ClientConfig> for HealthPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            disconnect_threshold: config.disconnect_threshold.max(1),
            cooldown: config.cooldown(),
            call_timeout: config.call_timeout(),
        }
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// Diagnostic snapshot of a proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyHealth {
    pub owner: NodeId,
    pub connected: bool,
    pub consecutive_failures: u32,
}

struct ProxyState {
    owner: NodeId,
    kind: String,
    methods: Vec<String>,
    connected: bool,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
}

pub struct Proxy {
    name: String,
    router: Weak<dyn Router>,
    policy: HealthPolicy,
    state: Mutex<ProxyState>,
}

impl Proxy {
    pub fn new(
        router: Weak<dyn Router>,
        owner: NodeId,
        descriptor: &CapabilityDescriptor,
        policy: HealthPolicy,
    ) -> Self {
        Self {
            name: descriptor.name.clone(),
            router,
            policy,
            state: Mutex::new(ProxyState {
                owner,
                kind: descriptor.kind.clone(),
                methods: descriptor.methods.clone(),
                connected: true,
                consecutive_failures: 0,
                last_failure_at: None,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ProxyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> String {
        self.state().kind.clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.state().methods.clone()
    }

    pub fn owner(&self) -> NodeId {
        self.state().owner
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn health(&self) -> ProxyHealth {
        let state = self.state();
        ProxyHealth {
            owner: state.owner,
            connected: state.connected,
            consecutive_failures: state.consecutive_failures,
        }
    }

    /// Refresh type and methods from a new announce. Health is untouched.
    pub(crate) fn refresh(&self, descriptor: &CapabilityDescriptor) {
        let mut state = self.state();
        state.kind = descriptor.kind.clone();
        state.methods = descriptor.methods.clone();
    }

    /// Invoke a method on the remote peripheral.
    ///
    /// Returns `None` on any failure: timeout, remote error, unknown method,
    /// or a disconnected proxy still inside its cooldown.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Option<Vec<Value>> {
        if !self.state().methods.iter().any(|m| m == method) {
            tracing::debug!(peripheral = %self.name, method, "method not advertised");
            return None;
        }

        if !self.is_connected() {
            if !self.cooldown_elapsed() {
                tracing::trace!(peripheral = %self.name, "disconnected, still cooling down");
                return None;
            }
            if !self.reconnect().await {
                return None;
            }
        }

        let Some(router) = self.router.upgrade() else {
            self.record_failure(&CallError::Closed);
            return None;
        };
        let owner = self.owner();
        match router
            .call(owner, &self.name, method, args, self.policy.call_timeout)
            .await
        {
            Ok(results) => {
                self.record_success();
                Some(results)
            }
            Err(e) => {
                self.record_failure(&e);
                None
            }
        }
    }

    /// Invoke and keep only the first returned value.
    pub async fn invoke_first(&self, method: &str, args: Vec<Value>) -> Option<Value> {
        self.invoke(method, args)
            .await
            .and_then(|results| results.into_iter().next())
    }

    /// Rediscover the peripheral now, ignoring the cooldown.
    /// On success the proxy points at whichever owner was found and takes
    /// on that owner's type and methods.
    pub async fn reconnect(&self) -> bool {
        let found = match self.router.upgrade() {
            Some(router) => router.relocate(&self.name).await,
            None => None,
        };

        let mut state = self.state();
        match found {
            Some((owner, descriptor)) => {
                if owner != state.owner {
                    tracing::info!(
                        peripheral = %self.name,
                        from = %state.owner,
                        to = %owner,
                        "peripheral moved to a new owner"
                    );
                }
                state.owner = owner;
                state.kind = descriptor.kind;
                state.methods = descriptor.methods;
                state.connected = true;
                state.consecutive_failures = 0;
                tracing::info!(peripheral = %self.name, owner = %owner, "peripheral reconnected");
                true
            }
            None => {
                state.last_failure_at = Some(Instant::now());
                tracing::debug!(peripheral = %self.name, "rediscovery found nothing");
                false
            }
        }
    }

    fn cooldown_elapsed(&self) -> bool {
        self.state()
            .last_failure_at
            .map_or(true, |at| at.elapsed() >= self.policy.cooldown)
    }

    fn record_success(&self) {
        let mut state = self.state();
        state.consecutive_failures = 0;
        state.connected = true;
    }

    fn record_failure(&self, error: &CallError) {
        let mut state = self.state();
        state.consecutive_failures += 1;
        state.last_failure_at = Some(Instant::now());
        tracing::debug!(
            peripheral = %self.name,
            owner = %state.owner,
            failures = state.consecutive_failures,
            error = %error,
            "remote call failed"
        );
        if state.connected && state.consecutive_failures >= self.policy.disconnect_threshold {
            state.connected = false;
            tracing::warn!(
                peripheral = %self.name,
                owner = %state.owner,
                failures = state.consecutive_failures,
                "peripheral disconnected"
            );
        }
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let health = self.health();
        f.debug_struct("Proxy")
            .field("name", &self.name)
            .field("owner", &health.owner)
            .field("connected", &health.connected)
            .finish()
    }
}

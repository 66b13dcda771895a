//! Client: registry of remote peripherals and the call path to them.
//!
//! Entries are keyed by `(owner, name)`. A bare name is a secondary index
//! that always points at the smallest owner currently exposing that name.
//!
//! Registry updates are replace-by-owner: an ANNOUNCE or LIST from owner O
//! makes O's entries exactly equal to the set it carries. Proxies for names
//! that survive the update are kept, so handles held by application code
//! stay valid across re-announces.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use perimesh_core::config::ClientConfig;
use perimesh_core::message::{ErrorPayload, ListPayload, ResultPayload};
use perimesh_core::{CapabilityDescriptor, Message, MessageKind, NodeId, RemoteKey};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::dispatch::Dispatcher;
use crate::pending::{Expect, Outcome, PendingTable};
use crate::proxy::{HealthPolicy, Proxy, Router};
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Error text from the remote Host, verbatim.
    #[error("{0}")]
    Remote(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("request abandoned")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub owner: NodeId,
    pub name: String,
    pub kind: String,
    pub methods: Vec<String>,
    pub proxy: Arc<Proxy>,
}

impl RemoteEntry {
    pub fn key(&self) -> RemoteKey {
        RemoteKey::qualified(self.owner, self.name.clone())
    }

    pub fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: self.name.clone(),
            kind: self.kind.clone(),
            methods: self.methods.clone(),
        }
    }
}

type Rounds = DashMap<String, mpsc::UnboundedSender<(NodeId, Vec<String>)>>;

/// Closes a discovery round however its future ends.
struct RoundGuard<'a> {
    rounds: &'a Rounds,
    id: String,
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        self.rounds.remove(&self.id);
    }
}

pub struct Client {
    local: NodeId,
    transport: Arc<dyn Transport>,
    settings: ClientConfig,
    entries: DashMap<(NodeId, String), RemoteEntry>,
    /// Bare name → smallest owner exposing it.
    aliases: DashMap<String, NodeId>,
    labels: DashMap<NodeId, String>,
    pending: PendingTable,
    /// Open discovery rounds: correlation id → responders.
    rounds: Rounds,
    me: Weak<Client>,
}

impl Client {
    pub fn new(
        local: NodeId,
        transport: Arc<dyn Transport>,
        settings: ClientConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            local,
            transport,
            settings,
            entries: DashMap::new(),
            aliases: DashMap::new(),
            labels: DashMap::new(),
            pending: PendingTable::new(),
            rounds: DashMap::new(),
            me: me.clone(),
        })
    }

    pub fn settings(&self) -> &ClientConfig {
        &self.settings
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    pub fn handle_announce(&self, owner: NodeId, message: &Message) {
        match message.payload_as::<ListPayload>() {
            Ok(list) => self.register_list(owner, list),
            Err(e) => tracing::warn!(owner = %owner, error = %e, "bad announce payload"),
        }
    }

    pub fn handle_list(&self, owner: NodeId, message: &Message) {
        let list = match message.payload_as::<ListPayload>() {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(owner = %owner, error = %e, "bad list payload");
                return;
            }
        };
        let names: Vec<String> = list.capabilities.iter().map(|c| c.name.clone()).collect();
        self.register_list(owner, list);

        if let Some(round) = self.rounds.get(&message.id) {
            let _ = round.send((owner, names));
        }
        self.pending.resolve(
            &message.id,
            MessageKind::List,
            Outcome::Results(vec![Value::from(owner.0)]),
        );
    }

    pub fn handle_result(&self, owner: NodeId, message: &Message) {
        let results = match message.payload_as::<ResultPayload>() {
            Ok(p) => p.results,
            Err(e) => {
                tracing::warn!(owner = %owner, error = %e, "bad result payload");
                return;
            }
        };
        let resolved = self
            .pending
            .resolve(&message.id, MessageKind::Result, Outcome::Results(results));
        if !resolved {
            tracing::trace!(owner = %owner, id = %message.id, "late or duplicate result ignored");
        }
    }

    pub fn handle_error(&self, owner: NodeId, message: &Message) {
        let text = match message.payload_as::<ErrorPayload>() {
            Ok(p) => p.error,
            Err(e) => e.to_string(),
        };
        let resolved = self
            .pending
            .resolve(&message.id, MessageKind::Error, Outcome::Failed(text));
        if !resolved {
            tracing::trace!(owner = %owner, id = %message.id, "late or duplicate error ignored");
        }
    }

    fn register_list(&self, owner: NodeId, list: ListPayload) {
        if list.node != owner {
            tracing::debug!(sender = %owner, claimed = %list.node, "list claims another owner, using sender");
        }
        if !list.label.is_empty() {
            self.labels.insert(owner, list.label.clone());
        }
        self.replace_owner(owner, &list.capabilities);
    }

    /// Make `owner`'s entries exactly equal to `capabilities`.
    fn replace_owner(&self, owner: NodeId, capabilities: &[CapabilityDescriptor]) {
        let stale: Vec<(NodeId, String)> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == owner)
            .filter(|e| !capabilities.iter().any(|c| c.name == e.key().1))
            .map(|e| e.key().clone())
            .collect();

        let mut touched: Vec<String> = Vec::new();
        for key in stale {
            self.entries.remove(&key);
            tracing::debug!(owner = %owner, name = %key.1, "remote peripheral withdrawn");
            touched.push(key.1);
        }

        for descriptor in capabilities {
            let key = (owner, descriptor.name.clone());
            if let Some(mut existing) = self.entries.get_mut(&key) {
                existing.kind = descriptor.kind.clone();
                existing.methods = descriptor.methods.clone();
                existing.proxy.refresh(descriptor);
                continue;
            }
            let router: Weak<dyn Router> = self.me.clone();
            let proxy = Arc::new(Proxy::new(
                router,
                owner,
                descriptor,
                HealthPolicy::from(&self.settings),
            ));
            self.entries.insert(
                key,
                RemoteEntry {
                    owner,
                    name: descriptor.name.clone(),
                    kind: descriptor.kind.clone(),
                    methods: descriptor.methods.clone(),
                    proxy,
                },
            );
            tracing::info!(owner = %owner, name = %descriptor.name, kind = %descriptor.kind, "remote peripheral registered");
            touched.push(descriptor.name.clone());
        }

        for name in touched {
            self.recompute_alias(&name);
        }
    }

    fn recompute_alias(&self, name: &str) {
        let smallest = self
            .entries
            .iter()
            .filter(|e| e.key().1 == name)
            .map(|e| e.key().0)
            .min();
        match smallest {
            Some(owner) => {
                self.aliases.insert(name.to_string(), owner);
            }
            None => {
                self.aliases.remove(name);
            }
        }
    }

    // ── Calls ─────────────────────────────────────────────────────────────────

    /// Invoke `method` on `owner`'s peripheral and wait for the reply.
    pub async fn call(
        &self,
        owner: NodeId,
        capability: &str,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Vec<Value>, CallError> {
        let request = Message::call(capability, method, args);
        let reply = self.pending.register(&request.id, Expect::Invocation, timeout);

        if let Err(e) = self.transport.send(owner, &request) {
            self.pending.cancel(&request.id);
            return Err(CallError::Send(e.to_string()));
        }
        tracing::trace!(owner = %owner, capability, method, id = %request.id, "call sent");

        match tokio::time::timeout(timeout, reply).await {
            Err(_) => {
                self.pending.cancel(&request.id);
                Err(CallError::Timeout(timeout))
            }
            Ok(Err(_)) => Err(CallError::Closed),
            Ok(Ok(Outcome::Results(results))) => Ok(results),
            Ok(Ok(Outcome::Failed(text))) => Err(CallError::Remote(text)),
            Ok(Ok(Outcome::Expired)) => Err(CallError::Timeout(timeout)),
        }
    }

    /// Broadcast DISCOVER and wait for the first LIST, up to the discovery
    /// wait. Returns the first responder. Later replies still register.
    pub async fn discover(&self) -> Option<NodeId> {
        let request = Message::discover();
        let wait = self.settings.discover_wait();
        let reply = self.pending.register(&request.id, Expect::Listing, wait);

        if let Err(e) = self.transport.broadcast(&request) {
            self.pending.cancel(&request.id);
            tracing::warn!(error = %e, "discover not sent");
            return None;
        }

        match tokio::time::timeout(wait, reply).await {
            Ok(Ok(Outcome::Results(results))) => results
                .first()
                .and_then(Value::as_u64)
                .and_then(|id| u32::try_from(id).ok())
                .map(NodeId),
            Err(_) => {
                self.pending.cancel(&request.id);
                None
            }
            Ok(_) => None,
        }
    }

    /// Actively look for a peripheral by bare name. Only nodes that answer
    /// this round count; an owner that has gone quiet is never returned.
    ///
    /// The round stays open until every owner known when it started has
    /// answered, or the discovery wait runs out. Among the responders that
    /// expose `name`, the smallest owner wins, as with bare-name lookup.
    pub async fn rediscover(&self, name: &str) -> Option<RemoteEntry> {
        let request = Message::discover();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.rounds.insert(request.id.clone(), tx);
        let _round = RoundGuard {
            rounds: &self.rounds,
            id: request.id.clone(),
        };

        if let Err(e) = self.transport.broadcast(&request) {
            tracing::warn!(error = %e, "rediscover not sent");
            return None;
        }

        let known: BTreeSet<NodeId> = self.entries.iter().map(|e| e.key().0).collect();
        let mut heard = BTreeSet::new();
        let mut best: Option<NodeId> = None;

        let deadline = tokio::time::Instant::now() + self.settings.discover_wait();
        while let Ok(Some((owner, names))) = tokio::time::timeout_at(deadline, rx.recv()).await {
            heard.insert(owner);
            if names.iter().any(|n| n == name) {
                best = Some(best.map_or(owner, |b| b.min(owner)));
            }
            if best.is_some() && known.is_subset(&heard) {
                break;
            }
        }

        let found = best.and_then(|owner| {
            self.entries
                .get(&(owner, name.to_string()))
                .map(|e| e.clone())
        });
        match &found {
            Some(entry) => tracing::debug!(name, owner = %entry.owner, "rediscovered"),
            None => tracing::debug!(name, "rediscovery found no owner"),
        }
        found
    }

    // ── Lookup ────────────────────────────────────────────────────────────────

    /// First remote peripheral of the given type, by smallest `(owner, name)`.
    pub fn find(&self, kind: &str) -> Option<Arc<Proxy>> {
        self.find_all(kind).into_iter().next()
    }

    pub fn find_all(&self, kind: &str) -> Vec<Arc<Proxy>> {
        self.entries()
            .into_iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.proxy)
            .collect()
    }

    pub fn wrap(&self, key: &str) -> Option<Arc<Proxy>> {
        self.entry(&RemoteKey::parse(key)).map(|e| e.proxy)
    }

    pub fn entry(&self, key: &RemoteKey) -> Option<RemoteEntry> {
        let (owner, name) = match key {
            RemoteKey::Qualified { owner, name } => (*owner, name.as_str()),
            RemoteKey::Bare(name) => (*self.aliases.get(name)?, name.as_str()),
        };
        self.entries.get(&(owner, name.to_string())).map(|e| e.clone())
    }

    pub fn is_present(&self, key: &str) -> bool {
        self.entry(&RemoteKey::parse(key)).is_some()
    }

    /// Owner-qualified keys of every entry, ordered by owner then name.
    pub fn get_names(&self) -> Vec<String> {
        self.entries().iter().map(|e| e.key().to_string()).collect()
    }

    pub fn get_count(&self) -> usize {
        self.entries.len()
    }

    /// Snapshot of all entries ordered by owner then name.
    pub fn entries(&self) -> Vec<RemoteEntry> {
        let mut all: Vec<RemoteEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| (a.owner, &a.name).cmp(&(b.owner, &b.name)));
        all
    }

    pub fn owner_label(&self, owner: NodeId) -> Option<String> {
        self.labels.get(&owner).map(|l| l.clone())
    }

    /// Forget every remote peripheral. Outstanding calls are unaffected.
    pub fn clear(&self) {
        self.entries.clear();
        self.aliases.clear();
        self.labels.clear();
        tracing::debug!(node = %self.local, "remote registry cleared");
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn sweep_expired(&self) -> usize {
        self.pending.sweep_expired()
    }

    pub fn register_handlers(self: &Arc<Self>, dispatcher: &mut Dispatcher) {
        let client = Arc::clone(self);
        dispatcher.on(MessageKind::Announce, move |s, m| client.handle_announce(s, m));
        let client = Arc::clone(self);
        dispatcher.on(MessageKind::List, move |s, m| client.handle_list(s, m));
        let client = Arc::clone(self);
        dispatcher.on(MessageKind::Result, move |s, m| client.handle_result(s, m));
        let client = Arc::clone(self);
        dispatcher.on(MessageKind::Error, move |s, m| client.handle_error(s, m));
    }
}

#[async_trait]
impl Router for Client {
    async fn call(
        &self,
        owner: NodeId,
        capability: &str,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Vec<Value>, CallError> {
        Client::call(self, owner, capability, method, args, timeout).await
    }

    async fn relocate(&self, name: &str) -> Option<(NodeId, CapabilityDescriptor)> {
        self.rediscover(name)
            .await
            .map(|e| (e.owner, e.descriptor()))
    }
}

/// Periodically fail pending requests whose deadline has passed.
pub async fn sweep_loop(client: Arc<Client>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(client.settings.sweep_interval());
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = ticker.tick() => {
                client.sweep_expired();
            }
        }
    }
}

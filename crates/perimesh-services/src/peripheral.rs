//! Local peripherals, the things a Host can expose.
//!
//! A [`Peripheral`] is invoked purely by method name. The Host never looks
//! past [`Peripheral::methods`]; anything not listed there cannot be called
//! from another node.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use perimesh_core::config::DEFAULT_EXCLUDED_TYPES;
use perimesh_core::CapabilityDescriptor;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeripheralError {
    #[error("no such method: {0}")]
    NoSuchMethod(String),
    #[error("bad arguments: {0}")]
    BadArguments(String),
    #[error("{0}")]
    Failed(String),
}

/// A named, typed, method-bounded piece of local hardware.
pub trait Peripheral: Send + Sync {
    fn name(&self) -> &str;

    /// Peripheral type, e.g. `"energy_detector"`.
    fn kind(&self) -> &str;

    /// The closed set of invocable methods.
    fn methods(&self) -> Vec<String>;

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Vec<Value>, PeripheralError>;

    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: self.name().to_string(),
            kind: self.kind().to_string(),
            methods: self.methods(),
        }
    }
}

/// Whatever enumerates the peripherals physically attached to this node.
pub trait PeripheralSource: Send + Sync {
    fn attached(&self) -> Vec<Arc<dyn Peripheral>>;
}

// ── Bench ─────────────────────────────────────────────────────────────────────

/// In-process attachment point. Attach and detach at runtime, then have the
/// Host rescan.
#[derive(Clone, Default)]
pub struct LocalBench {
    slots: Arc<DashMap<String, Arc<dyn Peripheral>>>,
}

impl LocalBench {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a peripheral, replacing any with the same name.
    pub fn attach(&self, peripheral: Arc<dyn Peripheral>) -> Option<Arc<dyn Peripheral>> {
        let name = peripheral.name().to_string();
        tracing::debug!(name = %name, kind = peripheral.kind(), "peripheral attached");
        self.slots.insert(name, peripheral)
    }

    pub fn detach(&self, name: &str) -> Option<Arc<dyn Peripheral>> {
        let removed = self.slots.remove(name).map(|(_, p)| p);
        if removed.is_some() {
            tracing::debug!(name, "peripheral detached");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl PeripheralSource for LocalBench {
    fn attached(&self) -> Vec<Arc<dyn Peripheral>> {
        let mut all: Vec<Arc<dyn Peripheral>> =
            self.slots.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }
}

// ── Sharing policy ────────────────────────────────────────────────────────────

/// Deny-list of peripheral types that stay local.
#[derive(Debug, Clone)]
pub struct SharingPolicy {
    excluded: HashSet<String>,
}

impl Default for SharingPolicy {
    fn default() -> Self {
        Self::excluding(DEFAULT_EXCLUDED_TYPES.iter().copied())
    }
}

impl SharingPolicy {
    pub fn excluding<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: kinds.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, kind: &str) -> bool {
        !self.excluded.contains(kind)
    }
}

// ── Table-driven peripheral ───────────────────────────────────────────────────

type MethodFn = Arc<dyn Fn(&[Value]) -> Result<Vec<Value>, PeripheralError> + Send + Sync>;

/// A peripheral defined by a method lookup table.
///
/// ```ignore
/// let detector = TablePeripheral::new("left", "energy_detector")
///     .method("getTransferRate", |_| Ok(vec![json!(512)]));
/// ```
#[derive(Clone)]
pub struct TablePeripheral {
    name: String,
    kind: String,
    table: BTreeMap<String, MethodFn>,
}

impl TablePeripheral {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            table: BTreeMap::new(),
        }
    }

    pub fn method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, PeripheralError> + Send + Sync + 'static,
    {
        self.table.insert(name.to_string(), Arc::new(f));
        self
    }
}

impl Peripheral for TablePeripheral {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn methods(&self) -> Vec<String> {
        self.table.keys().cloned().collect()
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Vec<Value>, PeripheralError> {
        let f = self
            .table
            .get(method)
            .ok_or_else(|| PeripheralError::NoSuchMethod(method.to_string()))?;
        f(args)
    }
}

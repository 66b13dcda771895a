//! perimesh-services: the peripheral-sharing RPC subsystem.
//!
//! - [`Host`] owns this node's local peripherals and serves DISCOVER/CALL.
//! - [`Client`] keeps the registry of remote peripherals and routes calls.
//! - [`Proxy`] is the per-peripheral handle handed to application code.
//!
//! Everything talks to the link through the [`Transport`] trait and
//! receives through a [`Dispatcher`] driven by [`run_event_loop`].

pub mod client;
pub mod dispatch;
pub mod host;
pub mod node;
pub mod pending;
pub mod peripheral;
pub mod proxy;
pub mod transport;

pub use client::{sweep_loop, CallError, Client, RemoteEntry};
pub use dispatch::{run_event_loop, Dispatcher};
pub use host::{announce_loop, Host};
pub use node::Node;
pub use pending::{Expect, Outcome, PendingTable};
pub use peripheral::{
    LocalBench, Peripheral, PeripheralError, PeripheralSource, SharingPolicy, TablePeripheral,
};
pub use proxy::{HealthPolicy, Proxy, ProxyHealth, Router};
pub use transport::{Inbound, MemoryEndpoint, MemoryNetwork, Transport, TransportError};

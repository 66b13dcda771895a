//! perimesh-core: shared types, wire format, and configuration.
//! All other perimesh crates depend on this one.

pub mod config;
pub mod message;
pub mod wire;

pub use message::{
    CapabilityDescriptor, Message, MessageKind, NodeId, NodeIdentity, ProtocolError, RemoteKey,
};
pub use wire::{Datagram, WireError};

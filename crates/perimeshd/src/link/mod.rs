//! UDP multicast implementation of the link transport.
//!
//! Broadcasts go to the multicast group. Addressed sends go straight to the
//! target's last seen socket address, or to the group if it has never been
//! heard from; receivers drop datagrams addressed to someone else.

mod socket;

use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use perimesh_core::wire::{Datagram, MAX_DATAGRAM};
use perimesh_core::{Message, NodeId};
use perimesh_services::{Inbound, Transport, TransportError};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

pub use socket::if_index;

pub struct UdpTransport {
    local: NodeId,
    socket: UdpSocket,
    group: SocketAddr,
    /// Last source address each peer was heard from.
    peers: DashMap<NodeId, SocketAddr>,
    buf: Mutex<Vec<u8>>,
}

impl UdpTransport {
    pub fn bind(local: NodeId, group: Ipv6Addr, port: u16, interface_index: u32) -> Result<Self> {
        let socket = socket::make_link_socket(group, port, interface_index)
            .context("failed to create link socket")?;
        let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;
        tracing::info!(node = %local, port, interface_index, "link socket ready");
        Ok(Self {
            local,
            socket,
            group: SocketAddr::V6(SocketAddrV6::new(group, port, 0, interface_index)),
            peers: DashMap::new(),
            buf: Mutex::new(vec![0u8; MAX_DATAGRAM]),
        })
    }

    fn send_datagram(&self, datagram: &Datagram, dest: SocketAddr) -> Result<(), TransportError> {
        let bytes = datagram.encode()?;
        match self.socket.try_send_to(&bytes, dest) {
            Ok(n) => {
                tracing::trace!(bytes = n, to = %dest, kind = %datagram.message.kind, "datagram sent");
                Ok(())
            }
            // Best-effort: a full send buffer is the same as loss.
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                tracing::debug!(to = %dest, "send buffer full, datagram dropped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_id(&self) -> NodeId {
        self.local
    }

    fn send(&self, target: NodeId, message: &Message) -> Result<(), TransportError> {
        let dest = self.peers.get(&target).map(|a| *a).unwrap_or(self.group);
        self.send_datagram(&Datagram::addressed(self.local, target, message.clone()), dest)
    }

    fn broadcast(&self, message: &Message) -> Result<(), TransportError> {
        self.send_datagram(&Datagram::broadcast(self.local, message.clone()), self.group)
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<Inbound>, TransportError> {
        let mut buf = self.buf.lock().await;
        let (len, from) = match tokio::time::timeout(timeout, self.socket.recv_from(&mut buf)).await {
            Err(_) => return Ok(None),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "recv_from failed");
                return Ok(None);
            }
            Ok(Ok(r)) => r,
        };

        let datagram = match Datagram::decode(&buf[..len]) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(from = %from, error = %e, "discarding undecodable datagram");
                return Ok(None);
            }
        };
        if !datagram.is_for(self.local) {
            tracing::trace!(from = %from, "datagram not for us");
            return Ok(None);
        }
        self.peers.insert(datagram.sender, from);
        Ok(Some(datagram.into()))
    }
}

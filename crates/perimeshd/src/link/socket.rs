//! Multicast socket setup for the link-local segment.

use std::net::{Ipv6Addr, SocketAddrV6};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};

/// Create a UDP socket bound to `port`, joined to `group` on the given
/// interface, and configured to send multicast out of that interface only.
pub fn make_link_socket(group: Ipv6Addr, port: u16, interface_index: u32) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_only_v6(true).context("IPV6_V6ONLY")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;

    socket
        .join_multicast_v6(&group, interface_index)
        .context("IPV6_JOIN_GROUP")?;
    socket
        .set_multicast_if_v6(interface_index)
        .context("IPV6_MULTICAST_IF")?;
    // Link-local only.
    socket.set_multicast_hops_v6(1).context("IPV6_MULTICAST_HOPS")?;
    socket.set_multicast_loop_v6(false).context("IPV6_MULTICAST_LOOP")?;

    Ok(socket.into())
}

/// OS interface index for a named interface. An empty name means "let the
/// kernel pick" and maps to index 0.
pub fn if_index(name: &str) -> Result<u32> {
    if name.is_empty() {
        return Ok(0);
    }
    let name_cstr = std::ffi::CString::new(name).context("interface name contains null byte")?;
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        anyhow::bail!("interface '{}' not found", name);
    }
    Ok(index)
}

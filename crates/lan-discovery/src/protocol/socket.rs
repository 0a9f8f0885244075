//! UDP socket construction shared by the probe transports.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Bind a non-blocking UDP socket with `SO_REUSEADDR` set.
///
/// Broadcast and multicast responders both listen on the discovery port, so
/// several of them can share one host. Must be called inside a tokio runtime.
pub fn bind_reusable(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

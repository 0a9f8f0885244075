//! Resolved endpoints and local address selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// An (ip, port) pair handed to the connection handler after resolution.
///
/// This is a plain value; it has no lifecycle of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Advertised IP address.
    pub ip: IpAddr,
    /// Advertised service port.
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    #[must_use]
    pub fn new(ip: impl Into<IpAddr>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// Socket address for connecting.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// An endpoint with port 0 cannot be connected to.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.port != 0 && !self.ip.is_unspecified()
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// Whether an address is usable as an advertised LAN address.
fn is_advertisable(ip: &Ipv4Addr) -> bool {
    !ip.is_loopback() && !ip.is_link_local() && !ip.is_unspecified()
}

/// Pick the IPv4 address this host should advertise.
///
/// Prefers the primary interface address, then any other non-loopback,
/// non-link-local IPv4 interface, and finally falls back to loopback.
#[must_use]
pub fn local_ipv4() -> Ipv4Addr {
    match local_ip_address::local_ip() {
        Ok(IpAddr::V4(ip)) if is_advertisable(&ip) => return ip,
        Ok(other) => tracing::debug!("Primary local address {} not advertisable", other),
        Err(e) => tracing::debug!("Failed to read primary local address: {}", e),
    }

    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => {
            for (name, ip) in interfaces {
                if let IpAddr::V4(v4) = ip {
                    if is_advertisable(&v4) {
                        tracing::debug!("Using address {} from interface {}", v4, name);
                        return v4;
                    }
                }
            }
        }
        Err(e) => tracing::warn!("Failed to list network interfaces: {}", e),
    }

    tracing::warn!("No LAN IPv4 address found, advertising loopback");
    Ipv4Addr::LOCALHOST
}

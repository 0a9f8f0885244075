//! Server side of the probe exchange.
//!
//! A [`ProbeResponder`] owns one bound UDP socket and answers every exact
//! probe with the advertised endpoint, unicast to the probe's source. It keeps
//! no per-client state. Bad datagrams and socket errors are logged and the
//! loop carries on; only shutdown ends it.

use crate::endpoint::Endpoint;
use crate::protocol::wire::{self, MAX_DATAGRAM, WireFormat};
use crate::shutdown::Shutdown;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Pause after a failed receive before reading again.
pub const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Multicast group membership released when dropped.
///
/// Release failures are logged at debug level and otherwise ignored.
#[derive(Debug)]
pub struct GroupMembership {
    socket: Arc<UdpSocket>,
    group: Ipv4Addr,
    interface: Ipv4Addr,
    joined: bool,
}

impl GroupMembership {
    /// Join `group` on `interface` through `socket`.
    pub fn join(
        socket: Arc<UdpSocket>,
        group: Ipv4Addr,
        interface: Ipv4Addr,
    ) -> std::io::Result<Self> {
        socket.join_multicast_v4(group, interface)?;
        debug!("Joined multicast group {} on {}", group, interface);
        Ok(Self {
            socket,
            group,
            interface,
            joined: true,
        })
    }

    /// Group address.
    #[must_use]
    pub fn group(&self) -> Ipv4Addr {
        self.group
    }

    /// Leave the group now instead of at drop.
    pub fn leave(mut self) {
        self.release();
    }

    /// Returns whether this call actually left the group.
    fn release(&mut self) -> bool {
        if !self.joined {
            return false;
        }
        self.joined = false;
        match self.socket.leave_multicast_v4(self.group, self.interface) {
            Ok(()) => debug!("Left multicast group {}", self.group),
            Err(e) => debug!("Ignoring failure to leave group {}: {}", self.group, e),
        }
        true
    }
}

impl Drop for GroupMembership {
    fn drop(&mut self) {
        self.release();
    }
}

/// Answers probes on a bound socket.
#[derive(Debug)]
pub struct ProbeResponder {
    socket: Arc<UdpSocket>,
    advertised: Endpoint,
    format: WireFormat,
    membership: Option<GroupMembership>,
}

impl ProbeResponder {
    /// Wrap a bound socket.
    #[must_use]
    pub fn new(socket: Arc<UdpSocket>, advertised: Endpoint, format: WireFormat) -> Self {
        Self {
            socket,
            advertised,
            format,
            membership: None,
        }
    }

    /// Attach a group membership that is released when the responder stops.
    #[must_use]
    pub fn with_membership(mut self, membership: GroupMembership) -> Self {
        self.membership = Some(membership);
        self
    }

    /// Address the discovery socket is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Endpoint sent back in responses.
    #[must_use]
    pub fn advertised(&self) -> Endpoint {
        self.advertised
    }

    /// Reply to send for `datagram`, or `None` if it is not a probe.
    #[must_use]
    pub fn reply_for(&self, datagram: &[u8]) -> Option<String> {
        wire::is_probe(datagram).then(|| self.format.encode_response(&self.advertised))
    }

    /// Answer probes until `shutdown` fires.
    pub async fn serve(mut self, shutdown: Shutdown) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match self.socket.local_addr() {
            Ok(addr) => info!(
                "Discovery responder listening on {}, advertising {}",
                addr, self.advertised
            ),
            Err(_) => info!("Discovery responder advertising {}", self.advertised),
        }

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            let (len, peer) = match received {
                Ok(r) => r,
                Err(e) => {
                    warn!("Discovery receive error: {}", e);
                    if !backoff(&shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            let datagram = &buf[..len];
            debug!(
                "Datagram from {}: {:?}",
                peer,
                String::from_utf8_lossy(datagram)
            );

            let Some(reply) = self.reply_for(datagram) else {
                continue;
            };

            match self.socket.send_to(reply.as_bytes(), peer).await {
                Ok(_) => debug!("Sent discovery response to {}", peer),
                Err(e) => warn!("Failed to answer {}: {}", peer, e),
            }
        }

        if let Some(membership) = self.membership.take() {
            membership.leave();
        }
        info!("Discovery responder stopped");
    }
}

/// Wait out [`RECV_ERROR_BACKOFF`]. Returns `false` if shutdown fired first.
async fn backoff(shutdown: &Shutdown) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => true,
    }
}

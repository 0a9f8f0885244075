//! Broadcast probe transport.

use crate::config::{BroadcastConfig, ResolverConfig};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::protocol::resolver::{ClientResolver, Resolved, UdpProbeTransport};
use crate::protocol::responder::ProbeResponder;
use crate::protocol::socket::bind_reusable;
use crate::protocol::wire::WireFormat;
use crate::protocol::{Announce, DiscoveryMode, Resolve};
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Bind the responder socket for broadcast probes.
pub async fn bind_responder(config: &BroadcastConfig, advertised: Endpoint) -> Result<ProbeResponder> {
    let socket = bind_reusable(config.bind_addr())?;
    socket.set_broadcast(true)?;
    Ok(ProbeResponder::new(
        Arc::new(socket),
        advertised,
        WireFormat::Delimited,
    ))
}

/// Announces an endpoint by answering broadcast probes.
#[derive(Debug, Clone)]
pub struct BroadcastAnnouncer {
    config: BroadcastConfig,
    advertised: Endpoint,
}

impl BroadcastAnnouncer {
    /// Create an announcer for `advertised`.
    #[must_use]
    pub fn new(config: BroadcastConfig, advertised: Endpoint) -> Self {
        Self { config, advertised }
    }
}

#[async_trait]
impl Announce for BroadcastAnnouncer {
    fn mode(&self) -> DiscoveryMode {
        DiscoveryMode::Broadcast
    }

    async fn announce(&self, shutdown: Shutdown) -> Result<()> {
        let responder = bind_responder(&self.config, self.advertised).await?;
        responder.serve(shutdown).await;
        Ok(())
    }
}

/// Resolves by broadcasting probes and waiting for a unicast reply.
#[derive(Debug, Clone)]
pub struct BroadcastResolver {
    config: BroadcastConfig,
    resolver: ClientResolver,
}

impl BroadcastResolver {
    /// Create a resolver from its transport and retry settings.
    #[must_use]
    pub fn new(config: BroadcastConfig, retry: &ResolverConfig) -> Self {
        Self {
            config,
            resolver: ClientResolver::new(retry.attempts, retry.attempt_timeout),
        }
    }
}

#[async_trait]
impl Resolve for BroadcastResolver {
    fn mode(&self) -> DiscoveryMode {
        DiscoveryMode::Broadcast
    }

    async fn resolve(&self, service: &str, shutdown: &Shutdown) -> Result<Resolved> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
        socket.set_broadcast(true)?;
        let mut transport = UdpProbeTransport::new(Arc::new(socket), self.config.target_addr());

        self.resolver
            .resolve(service, &mut transport, &WireFormat::Delimited, shutdown)
            .await
    }
}

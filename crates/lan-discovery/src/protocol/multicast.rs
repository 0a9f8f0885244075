//! Multicast probe transport.
//!
//! Like the broadcast transport, but probes go to a group address and
//! responses carry a JSON record with a schema tag. Group membership is held
//! by a [`GroupMembership`] guard, so it is released on every exit path,
//! including errors and cancellation.

use crate::config::{MulticastConfig, ResolverConfig};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::protocol::resolver::{ClientResolver, Resolved, UdpProbeTransport};
use crate::protocol::responder::{GroupMembership, ProbeResponder};
use crate::protocol::socket::bind_reusable;
use crate::protocol::wire::WireFormat;
use crate::protocol::{Announce, DiscoveryMode, Resolve};
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

fn wire_format(config: &MulticastConfig) -> WireFormat {
    WireFormat::Json {
        schema: config.schema.clone(),
    }
}

/// Bind the discovery port and join the group.
pub async fn bind_responder(config: &MulticastConfig, advertised: Endpoint) -> Result<ProbeResponder> {
    let socket = Arc::new(bind_reusable(SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port)))?);
    let membership = GroupMembership::join(socket.clone(), config.group, config.interface)?;
    Ok(ProbeResponder::new(socket, advertised, wire_format(config)).with_membership(membership))
}

/// Announces an endpoint by answering probes sent to the group.
#[derive(Debug, Clone)]
pub struct MulticastAnnouncer {
    config: MulticastConfig,
    advertised: Endpoint,
}

impl MulticastAnnouncer {
    /// Create an announcer for `advertised`.
    #[must_use]
    pub fn new(config: MulticastConfig, advertised: Endpoint) -> Self {
        Self { config, advertised }
    }
}

#[async_trait]
impl Announce for MulticastAnnouncer {
    fn mode(&self) -> DiscoveryMode {
        DiscoveryMode::Multicast
    }

    async fn announce(&self, shutdown: Shutdown) -> Result<()> {
        let responder = bind_responder(&self.config, self.advertised).await?;
        responder.serve(shutdown).await;
        Ok(())
    }
}

/// Resolves by probing the group and waiting for a unicast reply.
#[derive(Debug, Clone)]
pub struct MulticastResolver {
    config: MulticastConfig,
    resolver: ClientResolver,
}

impl MulticastResolver {
    /// Create a resolver from its transport and retry settings.
    #[must_use]
    pub fn new(config: MulticastConfig, retry: &ResolverConfig) -> Self {
        Self {
            config,
            resolver: ClientResolver::new(retry.attempts, retry.attempt_timeout),
        }
    }

    /// Resolve over an already bound socket.
    ///
    /// The group membership taken here is released before returning, on
    /// success, failure and cancellation alike.
    pub async fn resolve_with(
        &self,
        socket: Arc<UdpSocket>,
        service: &str,
        shutdown: &Shutdown,
    ) -> Result<Resolved> {
        socket.set_multicast_ttl_v4(self.config.ttl)?;

        // Replies are unicast, so membership is not required to receive them.
        let _membership =
            match GroupMembership::join(socket.clone(), self.config.group, self.config.interface) {
                Ok(membership) => Some(membership),
                Err(e) => {
                    warn!("Could not join {}: {}", self.config.group, e);
                    None
                }
            };

        let mut transport = UdpProbeTransport::new(socket, self.config.group_addr());
        let result = self
            .resolver
            .resolve(service, &mut transport, &wire_format(&self.config), shutdown)
            .await;
        debug!("Multicast resolution finished, releasing socket");
        result
    }
}

#[async_trait]
impl Resolve for MulticastResolver {
    fn mode(&self) -> DiscoveryMode {
        DiscoveryMode::Multicast
    }

    async fn resolve(&self, service: &str, shutdown: &Shutdown) -> Result<Resolved> {
        let socket = bind_reusable(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
        self.resolve_with(Arc::new(socket), service, shutdown).await
    }
}

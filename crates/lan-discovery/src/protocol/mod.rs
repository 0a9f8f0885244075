//! Discovery protocols.
//!
//! Every transport implements two roles:
//!
//! - [`Announce`]: server side, makes an endpoint discoverable until shutdown.
//! - [`Resolve`]: client side, turns a service name into an [`Endpoint`].
//!
//! | Mode        | Announce                        | Resolve                          |
//! |-------------|---------------------------------|----------------------------------|
//! | `registry`  | re-register with the registry   | one `GET /discover`, first lease |
//! | `broadcast` | answer probes on UDP 15000      | broadcast probe, retry loop      |
//! | `multicast` | join 239.0.0.222, answer probes | group probe, retry loop          |
//!
//! The probe transports share [`ClientResolver`] and [`ProbeResponder`]; a new
//! transport only needs a [`ProbeTransport`] and a [`WireFormat`].

pub mod broadcast;
pub mod multicast;
pub mod pull_registry;
pub mod resolver;
pub mod responder;
pub mod socket;
pub mod wire;

pub use broadcast::{BroadcastAnnouncer, BroadcastResolver};
pub use multicast::{MulticastAnnouncer, MulticastResolver};
pub use pull_registry::{RegistryAnnouncer, RegistryResolver};
pub use resolver::{ClientResolver, ProbeTransport, Resolved, UdpProbeTransport};
pub use responder::{GroupMembership, ProbeResponder};
pub use wire::{Advertisement, ServiceRecord, WireFormat};

use crate::config::DiscoveryConfig;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::registry::RegistryClient;
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which discovery mechanism to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Central lease registry over HTTP.
    Registry,
    /// UDP broadcast probe.
    Broadcast,
    /// UDP multicast probe.
    Multicast,
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscoveryMode::Registry => "registry",
            DiscoveryMode::Broadcast => "broadcast",
            DiscoveryMode::Multicast => "multicast",
        };
        f.write_str(name)
    }
}

/// Server-side role: keep an endpoint discoverable until shutdown.
#[async_trait]
pub trait Announce: Send + Sync {
    /// Transport this announcer uses.
    fn mode(&self) -> DiscoveryMode;

    /// Run until `shutdown` fires. Errors only on setup failure.
    async fn announce(&self, shutdown: Shutdown) -> Result<()>;
}

/// Client-side role: find an endpoint for a service.
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Transport this resolver uses.
    fn mode(&self) -> DiscoveryMode;

    /// Resolve `service`, or fail with `ServiceNotFound` / `Cancelled`.
    ///
    /// Probe transports carry no service name on the wire, so any responder
    /// on the segment may answer.
    async fn resolve(&self, service: &str, shutdown: &Shutdown) -> Result<Resolved>;
}

/// Build the announcer for `mode`.
pub fn announcer(
    mode: DiscoveryMode,
    config: &DiscoveryConfig,
    advertised: Endpoint,
) -> Result<Box<dyn Announce>> {
    let announcer: Box<dyn Announce> = match mode {
        DiscoveryMode::Registry => {
            let client = RegistryClient::new(&config.registry.url, config.registry.request_timeout)?;
            let mut metadata = config.announce.metadata.clone();
            if let Ok(host) = hostname::get() {
                metadata
                    .entry("host".to_string())
                    .or_insert_with(|| host.to_string_lossy().into_owned());
            }
            Box::new(RegistryAnnouncer::new(
                client,
                &config.announce.service,
                advertised,
                config.announce.ttl_secs,
                metadata,
                config.announce.refresh_interval,
            ))
        }
        DiscoveryMode::Broadcast => Box::new(BroadcastAnnouncer::new(
            config.broadcast.clone(),
            advertised,
        )),
        DiscoveryMode::Multicast => Box::new(MulticastAnnouncer::new(
            config.multicast.clone(),
            advertised,
        )),
    };
    Ok(announcer)
}

/// Build the resolver for `mode`.
pub fn resolver(mode: DiscoveryMode, config: &DiscoveryConfig) -> Result<Box<dyn Resolve>> {
    let resolver: Box<dyn Resolve> = match mode {
        DiscoveryMode::Registry => Box::new(RegistryResolver::new(RegistryClient::new(
            &config.registry.url,
            config.registry.request_timeout,
        )?)),
        DiscoveryMode::Broadcast => Box::new(BroadcastResolver::new(
            config.broadcast.clone(),
            &config.resolver,
        )),
        DiscoveryMode::Multicast => Box::new(MulticastResolver::new(
            config.multicast.clone(),
            &config.resolver,
        )),
    };
    Ok(resolver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_factories_pick_matching_mode() {
        let config = DiscoveryConfig::default();
        let advertised = Endpoint::new(Ipv4Addr::new(10, 0, 0, 5), 16000);

        for mode in [
            DiscoveryMode::Registry,
            DiscoveryMode::Broadcast,
            DiscoveryMode::Multicast,
        ] {
            assert_eq!(announcer(mode, &config, advertised).unwrap().mode(), mode);
            assert_eq!(resolver(mode, &config).unwrap().mode(), mode);
        }
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(DiscoveryMode::Multicast.to_string(), "multicast");
        let parsed: DiscoveryMode = serde_json::from_str("\"broadcast\"").unwrap();
        assert_eq!(parsed, DiscoveryMode::Broadcast);
    }
}

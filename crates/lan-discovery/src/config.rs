//! Configuration for the registry, announcers and resolvers.
//!
//! Every section has working defaults matching the well-known ports and
//! addresses, so an empty YAML file (or no file at all) is a valid config.
//!
//! ```yaml
//! registry:
//!   bind_addr: "0.0.0.0:5000"
//!   url: "http://registry.lan:5000"
//!   sweep_interval: 5s
//! announce:
//!   service: my-service
//!   service_port: 16000
//!   ttl_secs: 30
//!   refresh_interval: 10s
//!   metadata:
//!     version: "1.0"
//! resolver:
//!   attempts: 3
//!   attempt_timeout: 1s
//! ```

use crate::error::{DiscoveryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Well-known UDP port for broadcast and multicast probes.
pub const DEFAULT_DISCOVERY_PORT: u16 = 15000;

/// Well-known multicast group for probes.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 0, 0, 222);

/// Default port of the advertised service.
pub const DEFAULT_SERVICE_PORT: u16 = 16000;

/// Default registry HTTP port.
pub const DEFAULT_REGISTRY_PORT: u16 = 5000;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Pull-registry server and client settings.
    pub registry: RegistryConfig,
    /// What a server announces about itself.
    pub announce: AnnounceConfig,
    /// Broadcast probe settings.
    pub broadcast: BroadcastConfig,
    /// Multicast probe settings.
    pub multicast: MulticastConfig,
    /// Client retry policy.
    pub resolver: ResolverConfig,
}

impl DiscoveryConfig {
    /// Load a YAML config file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| DiscoveryError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&raw)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse YAML text and validate it.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values no loop can run with.
    pub fn validate(&self) -> Result<()> {
        if self.announce.service.is_empty() {
            return Err(DiscoveryError::InvalidConfig(
                "announce.service must not be empty".to_string(),
            ));
        }
        if self.registry.sweep_interval.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "registry.sweep_interval must be positive".to_string(),
            ));
        }
        if self.announce.refresh_interval.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "announce.refresh_interval must be positive".to_string(),
            ));
        }
        if self.resolver.attempts == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "resolver.attempts must be at least 1".to_string(),
            ));
        }
        if self.resolver.attempt_timeout.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "resolver.attempt_timeout must be positive".to_string(),
            ));
        }
        if !self.multicast.group.is_multicast() {
            return Err(DiscoveryError::InvalidConfig(format!(
                "multicast.group {} is not a multicast address",
                self.multicast.group
            )));
        }
        Ok(())
    }
}

/// Registry server and client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Address the registry HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Base URL clients and announcers use to reach the registry.
    pub url: String,
    /// How often expired leases are swept.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Timeout for a single registry HTTP call.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_REGISTRY_PORT)),
            url: format!("http://localhost:{}", DEFAULT_REGISTRY_PORT),
            sweep_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// What an announcing server advertises.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnounceConfig {
    /// Service name registered with the pull registry.
    pub service: String,
    /// Port of the advertised TCP service.
    pub service_port: u16,
    /// Address to advertise. Detected from local interfaces when unset.
    pub advertise_ip: Option<IpAddr>,
    /// Lease TTL requested from the registry.
    pub ttl_secs: u64,
    /// How often the registration is refreshed.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    /// Extra key/value pairs attached to the registration.
    pub metadata: BTreeMap<String, String>,
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            service: "my-service".to_string(),
            service_port: DEFAULT_SERVICE_PORT,
            advertise_ip: None,
            ttl_secs: 30,
            refresh_interval: Duration::from_secs(10),
            metadata: BTreeMap::new(),
        }
    }
}

/// Broadcast probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Discovery port responders listen on.
    pub port: u16,
    /// Local address responders bind to.
    pub bind_ip: Ipv4Addr,
    /// Destination of client probes, normally the limited broadcast address.
    pub target_ip: Ipv4Addr,
}

impl BroadcastConfig {
    /// Address probes are sent to.
    #[must_use]
    pub fn target_addr(&self) -> SocketAddr {
        SocketAddr::from((self.target_ip, self.port))
    }

    /// Address the responder binds to.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((self.bind_ip, self.port))
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DISCOVERY_PORT,
            bind_ip: Ipv4Addr::UNSPECIFIED,
            target_ip: Ipv4Addr::BROADCAST,
        }
    }
}

/// Multicast probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MulticastConfig {
    /// Group address probes are sent to.
    pub group: Ipv4Addr,
    /// Discovery port.
    pub port: u16,
    /// Interface used for group membership; unspecified lets the OS choose.
    pub interface: Ipv4Addr,
    /// Protocol tag placed in responses.
    pub schema: String,
    /// Hop limit for outgoing probes. 1 keeps traffic on the local segment.
    pub ttl: u32,
}

impl MulticastConfig {
    /// Address probes are sent to.
    #[must_use]
    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::from((self.group, self.port))
    }
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_DISCOVERY_PORT,
            interface: Ipv4Addr::UNSPECIFIED,
            schema: "tcp".to_string(),
            ttl: 1,
        }
    }
}

/// Client retry policy for probe-based resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Number of probes sent before giving up.
    pub attempts: u32,
    /// How long each probe waits for a response.
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Duration,
    /// Timeout for the TCP connect after resolution.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            attempt_timeout: Duration::from_millis(1000),
            connect_timeout: Duration::from_millis(2000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = DiscoveryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.broadcast.port, 15000);
        assert_eq!(config.multicast.group, Ipv4Addr::new(239, 0, 0, 222));
        assert_eq!(config.resolver.attempts, 3);
        assert_eq!(config.registry.sweep_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = DiscoveryConfig::from_yaml(
            "announce:\n  service: billing\n  ttl_secs: 60\nresolver:\n  attempt_timeout: 250ms\n",
        )
        .unwrap();
        assert_eq!(config.announce.service, "billing");
        assert_eq!(config.announce.ttl_secs, 60);
        assert_eq!(config.announce.service_port, DEFAULT_SERVICE_PORT);
        assert_eq!(config.resolver.attempt_timeout, Duration::from_millis(250));
        assert_eq!(config.resolver.attempts, 3);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = DiscoveryConfig::from_yaml("  \n").unwrap();
        assert_eq!(config.announce.service, "my-service");
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = DiscoveryConfig::from_yaml("resolver:\n  attempts: 0\n").unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidConfig(_)));
    }

    #[test]
    fn test_non_multicast_group_rejected() {
        let err = DiscoveryConfig::from_yaml("multicast:\n  group: 10.0.0.1\n").unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "registry:\n  url: http://10.0.0.2:5000\n  sweep_interval: 2s").unwrap();

        let config = DiscoveryConfig::load(file.path()).unwrap();
        assert_eq!(config.registry.url, "http://10.0.0.2:5000");
        assert_eq!(config.registry.sweep_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_load_missing_file() {
        let err = DiscoveryConfig::load(Path::new("/nonexistent/discovery.yaml")).unwrap_err();
        assert!(matches!(err, DiscoveryError::ConfigRead { .. }));
    }
}

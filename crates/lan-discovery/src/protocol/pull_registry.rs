//! Pull-registry transport: keepalive registration and single-shot lookup.

use crate::endpoint::Endpoint;
use crate::error::{DiscoveryError, Result};
use crate::protocol::resolver::Resolved;
use crate::protocol::{Announce, DiscoveryMode, Resolve};
use crate::registry::{DeregistrationRequest, RegistrationRequest, RegistryClient};
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

/// Upper bound on the farewell deregistration sent at shutdown.
pub const DEREGISTER_TIMEOUT: Duration = Duration::from_secs(1);

/// Keeps a lease alive by re-registering on a fixed interval.
#[derive(Debug, Clone)]
pub struct RegistryAnnouncer {
    client: RegistryClient,
    registration: RegistrationRequest,
    refresh_interval: Duration,
}

impl RegistryAnnouncer {
    /// Create an announcer registering `endpoint` under `service`.
    #[must_use]
    pub fn new(
        client: RegistryClient,
        service: &str,
        endpoint: Endpoint,
        ttl_secs: u64,
        metadata: BTreeMap<String, String>,
        refresh_interval: Duration,
    ) -> Self {
        let registration = RegistrationRequest {
            service: service.to_string(),
            ip: endpoint.ip,
            port: endpoint.port,
            ttl_seconds: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
            metadata: (!metadata.is_empty()).then_some(metadata),
        };
        Self {
            client,
            registration,
            refresh_interval,
        }
    }

    /// Registration pushed on every tick.
    #[must_use]
    pub fn registration(&self) -> &RegistrationRequest {
        &self.registration
    }

    async fn register_once(&self) {
        match self.client.register(&self.registration).await {
            Ok(ack) => debug!(
                "Registered {} at {}:{}, expires {}",
                self.registration.service, self.registration.ip, self.registration.port, ack.expires_at
            ),
            Err(e) => warn!(
                "Registration with {} failed, retrying in {:?}: {}",
                self.client.base_url(),
                self.refresh_interval,
                e
            ),
        }
    }
}

#[async_trait]
impl Announce for RegistryAnnouncer {
    fn mode(&self) -> DiscoveryMode {
        DiscoveryMode::Registry
    }

    async fn announce(&self, shutdown: Shutdown) -> Result<()> {
        info!(
            "Announcing {} at {}:{} to {} every {:?}",
            self.registration.service,
            self.registration.ip,
            self.registration.port,
            self.client.base_url(),
            self.refresh_interval
        );

        let mut ticker = interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    // Let shutdown interrupt a slow registry call.
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.register_once() => {}
                    }
                }
            }
        }

        let dereg = DeregistrationRequest::from(&self.registration);
        match timeout(DEREGISTER_TIMEOUT, self.client.deregister(&dereg)).await {
            Ok(Ok(_)) => info!("Deregistered {} from {}", dereg.service, self.client.base_url()),
            Ok(Err(e)) => debug!("Best-effort deregistration failed: {}", e),
            Err(_) => debug!(
                "Deregistration from {} timed out after {:?}",
                self.client.base_url(),
                DEREGISTER_TIMEOUT
            ),
        }
        Ok(())
    }
}

/// Looks a service up with a single registry query.
///
/// No retries happen here; the first active lease wins.
#[derive(Debug, Clone)]
pub struct RegistryResolver {
    client: RegistryClient,
}

impl RegistryResolver {
    /// Create a resolver backed by `client`.
    #[must_use]
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Resolve for RegistryResolver {
    fn mode(&self) -> DiscoveryMode {
        DiscoveryMode::Registry
    }

    async fn resolve(&self, service: &str, shutdown: &Shutdown) -> Result<Resolved> {
        let not_found = || DiscoveryError::ServiceNotFound {
            service: service.to_string(),
            attempts: 1,
        };

        let leases = tokio::select! {
            _ = shutdown.cancelled() => return Err(DiscoveryError::Cancelled),
            leases = self.client.discover(service) => leases,
        };

        let leases = match leases {
            Ok(leases) => leases,
            Err(e) => {
                warn!("Registry lookup of {} failed: {}", service, e);
                return Err(not_found());
            }
        };

        let Some(first) = leases.into_iter().next() else {
            info!("Registry has no active lease for {}", service);
            return Err(not_found());
        };

        let endpoint = Endpoint::new(first.ip, first.port);
        info!(
            "Resolved {} to {} (ttl {}s)",
            service, endpoint, first.ttl_seconds
        );
        Ok(Resolved {
            endpoint,
            schema: None,
            ttl_secs: Some(first.ttl_seconds),
            attempt: 1,
            responder: None,
        })
    }
}

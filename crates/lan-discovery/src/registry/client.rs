//! HTTP client for a remote registry.

use crate::error::Result;
use crate::registry::types::{
    DeregisterAck, DeregistrationRequest, HealthResponse, LeaseInfo, RegisterAck,
    RegistrationRequest,
};
use std::time::Duration;

/// Thin typed wrapper over the registry HTTP API.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: String,
    http: reqwest::Client,
}

impl RegistryClient {
    /// Create a client for the registry at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Register or refresh a lease.
    pub async fn register(&self, registration: &RegistrationRequest) -> Result<RegisterAck> {
        let ack = self
            .http
            .post(self.url("register"))
            .json(registration)
            .send()
            .await?
            .error_for_status()?
            .json::<RegisterAck>()
            .await?;
        Ok(ack)
    }

    /// Drop a lease.
    pub async fn deregister(&self, deregistration: &DeregistrationRequest) -> Result<DeregisterAck> {
        let ack = self
            .http
            .post(self.url("deregister"))
            .json(deregistration)
            .send()
            .await?
            .error_for_status()?
            .json::<DeregisterAck>()
            .await?;
        Ok(ack)
    }

    /// Active leases for `service`, in registry order.
    pub async fn discover(&self, service: &str) -> Result<Vec<LeaseInfo>> {
        let leases = self
            .http
            .get(self.url("discover"))
            .query(&[("service", service)])
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<LeaseInfo>>()
            .await?;
        Ok(leases)
    }

    /// Registry health summary.
    pub async fn health(&self) -> Result<HealthResponse> {
        let health = self
            .http
            .get(self.url("health"))
            .send()
            .await?
            .error_for_status()?
            .json::<HealthResponse>()
            .await?;
        Ok(health)
    }
}

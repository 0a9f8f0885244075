//! Wire types for the pull registry HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Body of `POST /register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    /// Service name.
    pub service: String,
    /// Address the service is reachable on.
    pub ip: IpAddr,
    /// Service port.
    pub port: u16,
    /// Requested lease TTL in seconds. Values below the floor, including
    /// negative ones, are raised to it.
    pub ttl_seconds: i64,
    /// Optional key/value metadata.
    #[serde(default, alias = "meta", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// Body of `POST /deregister`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeregistrationRequest {
    /// Service name.
    pub service: String,
    /// Registered address.
    pub ip: IpAddr,
    /// Registered port.
    pub port: u16,
}

impl From<&RegistrationRequest> for DeregistrationRequest {
    fn from(reg: &RegistrationRequest) -> Self {
        Self {
            service: reg.service.clone(),
            ip: reg.ip,
            port: reg.port,
        }
    }
}

/// Query string of `GET /discover`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverQuery {
    /// Service name to look up.
    pub service: String,
}

/// Acknowledgement returned by `POST /register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAck {
    /// Always `"registered"`.
    pub status: String,
    /// When the lease expires unless refreshed.
    pub expires_at: DateTime<Utc>,
}

/// Acknowledgement returned by `POST /deregister`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeregisterAck {
    /// Always `"deregistered"`.
    pub status: String,
}

/// One active lease as returned by `GET /discover`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseInfo {
    /// Service name.
    pub service: String,
    /// Registered address.
    pub ip: IpAddr,
    /// Registered port.
    pub port: u16,
    /// Whole seconds until expiry, never negative.
    pub ttl_seconds: u64,
    /// Metadata supplied at registration.
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// Entry of `GET /services`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSummary {
    /// Service name.
    pub service: String,
    /// Number of leases currently held.
    pub leases: usize,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: String,
    /// Number of services with at least one lease.
    pub services: usize,
    /// Total leases held.
    pub leases: usize,
}

/// Body of a 400 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionBody {
    /// Always `"rejected"`.
    pub status: String,
    /// Why the request was rejected.
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_accepts_legacy_meta_key() {
        let reg: RegistrationRequest = serde_json::from_str(
            r#"{"service":"my-service","ip":"10.0.0.5","port":8080,"ttlSeconds":30,"meta":{"version":"1.0"}}"#,
        )
        .unwrap();
        assert_eq!(reg.ttl_seconds, 30);
        assert_eq!(
            reg.metadata.unwrap().get("version").map(String::as_str),
            Some("1.0")
        );
    }

    #[test]
    fn test_registration_without_metadata() {
        let reg: RegistrationRequest = serde_json::from_str(
            r#"{"service":"my-service","ip":"10.0.0.5","port":8080,"ttlSeconds":30}"#,
        )
        .unwrap();
        assert!(reg.metadata.is_none());
    }

    #[test]
    fn test_lease_info_field_names() {
        let info = LeaseInfo {
            service: "my-service".to_string(),
            ip: "10.0.0.5".parse().unwrap(),
            port: 8080,
            ttl_seconds: 29,
            metadata: None,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["ttlSeconds"], 29);
        assert_eq!(json["ip"], "10.0.0.5");
        assert!(json["metadata"].is_null());
    }
}

//! Concurrent lease store.
//!
//! Leases are bucketed per service in a [`DashMap`]. Every mutation of a
//! bucket (upsert, remove, sweep) runs while holding that key's shard write
//! lock, so two registrations racing on the same service can never drop each
//! other's entries. Within a bucket, leases keep their first-insertion order;
//! refreshing a lease updates it in place.

use crate::error::{DiscoveryError, Result};
use crate::registry::types::{LeaseInfo, ServiceSummary};
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Minimum lease TTL. Shorter requests are raised to this.
pub const MIN_TTL_SECS: u64 = 5;

/// A time-bounded claim that `(ip, port)` serves a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Registered address.
    pub ip: IpAddr,
    /// Registered port.
    pub port: u16,
    /// Absolute expiry time.
    pub expires_at: DateTime<Utc>,
    /// Metadata supplied at registration.
    pub metadata: Option<BTreeMap<String, String>>,
}

impl Lease {
    fn matches(&self, ip: IpAddr, port: u16) -> bool {
        self.ip == ip && self.port == port
    }

    fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Whole seconds left at `now`, zero once expired.
    #[must_use]
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.expires_at - now).num_seconds()).unwrap_or(0)
    }
}

/// Process-wide map from service name to its active leases.
#[derive(Debug, Default)]
pub struct LeaseStore {
    services: DashMap<String, Vec<Lease>>,
}

impl LeaseStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a lease, returning its expiry.
    pub fn upsert(
        &self,
        service: &str,
        ip: IpAddr,
        port: u16,
        ttl_secs: i64,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Result<DateTime<Utc>> {
        self.upsert_at(Utc::now(), service, ip, port, ttl_secs, metadata)
    }

    /// [`LeaseStore::upsert`] with an explicit clock reading.
    pub fn upsert_at(
        &self,
        now: DateTime<Utc>,
        service: &str,
        ip: IpAddr,
        port: u16,
        ttl_secs: i64,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Result<DateTime<Utc>> {
        if service.is_empty() {
            return Err(DiscoveryError::EmptyServiceName);
        }
        if port == 0 {
            return Err(DiscoveryError::InvalidPort);
        }

        // Zero, negative and tiny TTLs all get the floor.
        let ttl = ttl_secs.max(MIN_TTL_SECS as i64);
        let expires_at = TimeDelta::try_seconds(ttl)
            .and_then(|delta| now.checked_add_signed(delta))
            .ok_or(DiscoveryError::TtlOutOfRange(ttl_secs))?;

        let lease = Lease {
            ip,
            port,
            expires_at,
            metadata,
        };

        // The entry guard holds the shard write lock for the whole replace.
        let mut bucket = self.services.entry(service.to_string()).or_default();
        match bucket.iter_mut().find(|l| l.matches(ip, port)) {
            Some(existing) => *existing = lease,
            None => bucket.push(lease),
        }

        Ok(expires_at)
    }

    /// Drop the lease for `(service, ip, port)`. Returns whether one existed.
    pub fn remove(&self, service: &str, ip: IpAddr, port: u16) -> bool {
        match self.services.entry(service.to_string()) {
            Entry::Occupied(mut bucket) => {
                let before = bucket.get().len();
                bucket.get_mut().retain(|l| !l.matches(ip, port));
                let removed = bucket.get().len() != before;
                if bucket.get().is_empty() {
                    bucket.remove();
                }
                removed
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Active leases for `service` at `now`, in insertion order.
    #[must_use]
    pub fn query(&self, service: &str, now: DateTime<Utc>) -> Vec<LeaseInfo> {
        let Some(bucket) = self.services.get(service) else {
            return Vec::new();
        };

        bucket
            .iter()
            .filter(|l| l.is_active(now))
            .map(|l| LeaseInfo {
                service: service.to_string(),
                ip: l.ip,
                port: l.port,
                ttl_seconds: l.remaining_secs(now),
                metadata: l.metadata.clone(),
            })
            .collect()
    }

    /// Remove every lease expired at `now` and any bucket left empty.
    ///
    /// Returns the number of leases removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.services.retain(|_, leases| {
            let before = leases.len();
            leases.retain(|l| l.is_active(now));
            removed += before - leases.len();
            !leases.is_empty()
        });
        removed
    }

    /// Number of services holding at least one lease (expired or not).
    #[must_use]
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Total number of leases held.
    #[must_use]
    pub fn lease_count(&self) -> usize {
        self.services.iter().map(|bucket| bucket.len()).sum()
    }

    /// Service names with their lease counts, sorted by name.
    #[must_use]
    pub fn services(&self) -> Vec<ServiceSummary> {
        let mut summaries: Vec<ServiceSummary> = self
            .services
            .iter()
            .map(|bucket| ServiceSummary {
                service: bucket.key().clone(),
                leases: bucket.len(),
            })
            .collect();
        summaries.sort_by(|a, b| a.service.cmp(&b.service));
        summaries
    }
}

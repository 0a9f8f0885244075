//! Pull Registry Module
//!
//! A central, lease-based registry. Servers register their endpoint with a
//! TTL and refresh it periodically; clients look a service up by name and get
//! back every lease that has not yet expired. A background sweeper prunes
//! expired leases.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────────────┐
//!                     │    Registry Server      │
//!                     │                         │
//!                     │  POST /register         │
//!                     │  POST /deregister       │
//!                     │  GET  /discover         │
//!                     │  GET  /services         │
//!                     │  GET  /health           │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │ register every 10s    │                       │ discover once
//!         ▼                       ▼                       ▼
//!    ┌──────────┐           ┌──────────┐            ┌──────────┐
//!    │ Service A│           │ Service B│            │  Client  │
//!    └──────────┘           └──────────┘            └──────────┘
//! ```
//!
//! # Usage
//!
//! ## Running the Registry
//!
//! ```bash
//! lan-discovery registry --bind 0.0.0.0:5000
//! ```
//!
//! ## Registering and Looking Up
//!
//! ```rust,ignore
//! use lan_discovery::registry::{RegistryClient, RegistrationRequest};
//!
//! let client = RegistryClient::new("http://localhost:5000", Duration::from_secs(5))?;
//!
//! let ack = client.register(&RegistrationRequest { /* ... */ }).await?;
//! let leases = client.discover("my-service").await?;
//! ```

mod api;
mod client;
mod store;
mod sweeper;
mod types;

pub use api::{RegistryServer, registry_routes};
pub use client::RegistryClient;
pub use store::{Lease, LeaseStore, MIN_TTL_SECS};
pub use sweeper::ExpirySweeper;
pub use types::{
    DeregisterAck, DeregistrationRequest, DiscoverQuery, HealthResponse, LeaseInfo, RegisterAck,
    RegistrationRequest, RejectionBody, ServiceSummary,
};

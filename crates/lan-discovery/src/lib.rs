//! LAN Service Discovery
//!
//! Lets a client on a local network find the (ip, port) of a named service
//! without preconfiguration, then hands the endpoint to a connection handler.
//! Three interchangeable mechanisms are provided:
//!
//! - **Pull Registry**: a central HTTP registry of TTL leases; servers keep
//!   their lease alive, clients query once.
//! - **Broadcast**: clients broadcast a probe on UDP; servers answer unicast
//!   with `DISCOVER_RESPONSE;<ip>;<port>`.
//! - **Multicast**: like broadcast, but on group `239.0.0.222` with a JSON
//!   response carrying a schema tag.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Client                                  │
//! │                                                                   │
//! │   Resolve(service) ──► Endpoint ──► ConnectionHandler (greeting)  │
//! │        │                                                          │
//! └────────┼──────────────────────────────────────────────────────────┘
//!          │
//!    ┌─────┴──────────────┬───────────────────────────┐
//!    │ GET /discover      │ DISCOVER_REQUEST          │ DISCOVER_REQUEST
//!    ▼                    ▼ (255.255.255.255:15000)   ▼ (239.0.0.222:15000)
//! ┌───────────────┐  ┌──────────────────┐      ┌──────────────────┐
//! │   Registry    │  │ ProbeResponder   │      │ ProbeResponder   │
//! │ LeaseStore    │  │ (broadcast)      │      │ (multicast)      │
//! │ ExpirySweeper │  └──────────────────┘      └──────────────────┘
//! └───────────────┘
//!        ▲
//!        │ POST /register every 10s
//!   RegistryAnnouncer
//! ```
//!
//! # Usage
//!
//! ```bash
//! lan-discovery registry
//! lan-discovery announce --mode broadcast
//! lan-discovery resolve --mode broadcast --service my-service
//! ```
//!
//! Every long-running loop observes a [`Shutdown`] and exits promptly when it
//! fires; nothing is left bound after stop.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod handoff;
pub mod protocol;
pub mod registry;
pub mod shutdown;

// Re-export key types for convenience
pub use config::{
    AnnounceConfig, BroadcastConfig, DiscoveryConfig, MulticastConfig, RegistryConfig,
    ResolverConfig,
};
pub use endpoint::{Endpoint, local_ipv4};
pub use error::{DiscoveryError, Result};
pub use handoff::{ConnectionHandler, Exchange, GreetingClient, GreetingService};
pub use protocol::{
    Announce, BroadcastAnnouncer, BroadcastResolver, ClientResolver, DiscoveryMode,
    MulticastAnnouncer, MulticastResolver, RegistryAnnouncer, RegistryResolver, Resolve, Resolved,
    announcer, resolver,
};
pub use registry::{LeaseStore, RegistryClient, RegistryServer};
pub use shutdown::{Shutdown, ShutdownTrigger, Supervised};

//! Error types for discovery operations.

use std::path::PathBuf;

/// Errors surfaced by the discovery library.
///
/// Per-attempt failures (timeouts, malformed datagrams, transient socket
/// errors) are absorbed inside the loops and never show up here. Callers see
/// either a setup failure, a cancellation, or [`DiscoveryError::ServiceNotFound`].
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// A registration or lookup used an empty service name.
    #[error("service name must not be empty")]
    EmptyServiceName,

    /// A registration used port 0.
    #[error("port must be non-zero")]
    InvalidPort,

    /// The requested TTL cannot be represented as an expiry timestamp.
    #[error("ttl of {0}s is out of range")]
    TtlOutOfRange(i64),

    /// Resolution finished without a usable endpoint.
    #[error("service `{service}` not found after {attempts} attempt(s)")]
    ServiceNotFound {
        /// Service that was being resolved.
        service: String,
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// The operation was interrupted by a shutdown signal.
    #[error("operation cancelled")]
    Cancelled,

    /// Socket setup failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Registry HTTP client failure.
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Registry HTTP server failed to start.
    #[error("registry server error: {0}")]
    Server(#[from] warp::Error),

    /// Configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Configuration file is not valid YAML for [`crate::DiscoveryConfig`].
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Configuration parsed but holds unusable values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

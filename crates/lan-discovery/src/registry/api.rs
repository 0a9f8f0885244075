//! HTTP surface of the pull registry.

use crate::config::RegistryConfig;
use crate::error::{DiscoveryError, Result};
use crate::registry::store::LeaseStore;
use crate::registry::sweeper::ExpirySweeper;
use crate::registry::types::{
    DeregisterAck, DeregistrationRequest, DiscoverQuery, HealthResponse, RegisterAck,
    RegistrationRequest, RejectionBody,
};
use crate::shutdown::Shutdown;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use warp::Filter;
use warp::http::StatusCode;
use warp::reply::Reply;

/// Maximum accepted JSON body size.
const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Build the registry routes over `store`.
pub fn registry_routes(
    store: Arc<LeaseStore>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let register = warp::path("register")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json::<RegistrationRequest>())
        .and(with_store(store.clone()))
        .and_then(handle_register);

    let deregister = warp::path("deregister")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json::<DeregistrationRequest>())
        .and(with_store(store.clone()))
        .and_then(handle_deregister);

    let discover = warp::path("discover")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<DiscoverQuery>())
        .and(with_store(store.clone()))
        .and_then(handle_discover);

    let services = warp::path("services")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_store(store.clone()))
        .and_then(handle_services);

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_store(store))
        .and_then(handle_health);

    register
        .or(deregister)
        .or(discover)
        .or(services)
        .or(health)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

fn with_store(
    store: Arc<LeaseStore>,
) -> impl Filter<Extract = (Arc<LeaseStore>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || store.clone())
}

fn rejected(error: impl ToString) -> warp::reply::Response {
    let body = RejectionBody {
        status: "rejected".to_string(),
        error: error.to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), StatusCode::BAD_REQUEST).into_response()
}

/// Turn body and query parse failures into the JSON rejection body.
///
/// Everything else (unknown path, wrong method) keeps warp's default reply.
async fn handle_rejection(
    err: warp::Rejection,
) -> std::result::Result<warp::reply::Response, warp::Rejection> {
    if let Some(e) = err.find::<warp::body::BodyDeserializeError>() {
        debug!("Rejected malformed body: {}", e);
        return Ok(rejected(e));
    }
    if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        debug!("Rejected malformed query: {}", e);
        return Ok(rejected(e));
    }
    Err(err)
}

async fn handle_register(
    reg: RegistrationRequest,
    store: Arc<LeaseStore>,
) -> std::result::Result<warp::reply::Response, warp::Rejection> {
    match store.upsert(&reg.service, reg.ip, reg.port, reg.ttl_seconds, reg.metadata) {
        Ok(expires_at) => {
            debug!(
                "Registered {} at {}:{} until {}",
                reg.service, reg.ip, reg.port, expires_at
            );
            let ack = RegisterAck {
                status: "registered".to_string(),
                expires_at,
            };
            Ok(warp::reply::json(&ack).into_response())
        }
        Err(e) => {
            warn!("Rejected registration for {:?}: {}", reg.service, e);
            Ok(rejected(e))
        }
    }
}

async fn handle_deregister(
    dereg: DeregistrationRequest,
    store: Arc<LeaseStore>,
) -> std::result::Result<warp::reply::Response, warp::Rejection> {
    if store.remove(&dereg.service, dereg.ip, dereg.port) {
        info!(
            "Deregistered {} at {}:{}",
            dereg.service, dereg.ip, dereg.port
        );
    }
    let ack = DeregisterAck {
        status: "deregistered".to_string(),
    };
    Ok(warp::reply::json(&ack).into_response())
}

async fn handle_discover(
    query: DiscoverQuery,
    store: Arc<LeaseStore>,
) -> std::result::Result<impl warp::Reply, warp::Rejection> {
    let leases = store.query(&query.service, Utc::now());
    debug!(
        "Discover {} -> {} active lease(s)",
        query.service,
        leases.len()
    );
    Ok(warp::reply::json(&leases))
}

async fn handle_services(
    store: Arc<LeaseStore>,
) -> std::result::Result<impl warp::Reply, warp::Rejection> {
    Ok(warp::reply::json(&store.services()))
}

async fn handle_health(
    store: Arc<LeaseStore>,
) -> std::result::Result<impl warp::Reply, warp::Rejection> {
    let health = HealthResponse {
        status: "ok".to_string(),
        services: store.service_count(),
        leases: store.lease_count(),
    };
    Ok(warp::reply::json(&health))
}

/// A running registry: bound HTTP server plus its sweeper.
pub struct RegistryServer {
    local_addr: SocketAddr,
    store: Arc<LeaseStore>,
    server: tokio::task::JoinHandle<()>,
    sweeper: crate::shutdown::Supervised<usize>,
}

impl RegistryServer {
    /// Bind the HTTP server and start the sweeper.
    ///
    /// Both stop when `shutdown` fires; use [`RegistryServer::wait`] to join
    /// them.
    pub async fn start(config: &RegistryConfig, shutdown: Shutdown) -> Result<Self> {
        let store = Arc::new(LeaseStore::new());
        let sweeper = ExpirySweeper::new(store.clone(), config.sweep_interval).spawn(&shutdown);

        let routes = registry_routes(store.clone());
        let signal = shutdown.clone();
        let (local_addr, server) = match warp::serve(routes)
            .try_bind_with_graceful_shutdown(config.bind_addr, async move {
                signal.cancelled().await;
            }) {
            Ok(bound) => bound,
            Err(e) => {
                // Don't leave the sweeper running without a server.
                if let Err(join) = sweeper.stop().await {
                    warn!("Sweeper task failed: {}", join);
                }
                return Err(DiscoveryError::Server(e));
            }
        };

        info!("Registry listening on http://{}", local_addr);
        Ok(Self {
            local_addr,
            store,
            server: tokio::spawn(server),
            sweeper,
        })
    }

    /// Address the HTTP server is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL for [`crate::registry::RegistryClient`].
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Shared lease store.
    #[must_use]
    pub fn store(&self) -> Arc<LeaseStore> {
        self.store.clone()
    }

    /// Wait for the server and sweeper to exit after shutdown.
    pub async fn wait(self) {
        if let Err(e) = self.server.await {
            warn!("Registry server task failed: {}", e);
        }
        match self.sweeper.stop().await {
            Ok(removed) => debug!("Sweeper removed {} lease(s) over its lifetime", removed),
            Err(e) => warn!("Sweeper task failed: {}", e),
        }
        info!("Registry stopped");
    }
}

//! Background expiry of leases.

use crate::registry::store::LeaseStore;
use crate::shutdown::{Shutdown, Supervised};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

/// Periodically prunes expired leases from a [`LeaseStore`].
#[derive(Debug)]
pub struct ExpirySweeper {
    store: Arc<LeaseStore>,
    interval: Duration,
}

impl ExpirySweeper {
    /// Create a sweeper for `store` that wakes every `interval`.
    #[must_use]
    pub fn new(store: Arc<LeaseStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Spawn the sweep loop under supervision.
    ///
    /// The loop exits when [`Supervised::stop`] is called or `parent` fires,
    /// and returns the total number of leases it removed.
    pub fn spawn(self, parent: &Shutdown) -> Supervised<usize> {
        Supervised::spawn("expiry-sweeper", parent, move |shutdown| self.run(shutdown))
    }

    /// Run the sweep loop until `shutdown` fires.
    pub async fn run(self, shutdown: Shutdown) -> usize {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the first sweep
        // happens one interval after start.
        ticker.tick().await;

        info!("Lease sweeper started (interval {:?})", self.interval);
        let mut total = 0;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = self.store.sweep(Utc::now());
                    if removed > 0 {
                        info!("Expired {} lease(s), {} service(s) remain", removed, self.store.service_count());
                    } else {
                        debug!("Sweep found no expired leases");
                    }
                    total += removed;
                }
            }
        }
        info!("Lease sweeper stopped");
        total
    }
}

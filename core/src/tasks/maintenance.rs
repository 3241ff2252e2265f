//! Maintenance tasks
//!
//! Periodic sweep of expired messages and idle rate-limit windows. Expiry is
//! otherwise lazy (reads filter on expiration), so the sweep only reclaims
//! space.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::data;
use crate::node::core::ServiceNode;

impl ServiceNode {
    /// Run the cleanup loop
    pub(crate) async fn run_cleanup_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.cleanup_interval_secs);
        info!(interval_secs = interval.as_secs(), "cleanup loop started");

        loop {
            if !*self.running.read().await {
                break;
            }

            tokio::time::sleep(interval).await;

            self.cleanup_tick().await;
        }

        info!("cleanup loop stopped");
    }

    pub(crate) async fn cleanup_tick(&self) {
        let now = data::current_timestamp_ms();

        {
            let db = self.db.lock().await;
            match data::cleanup_expired(&db, now) {
                Ok(deleted) if deleted > 0 => {
                    debug!(deleted, "removed expired messages");
                }
                Ok(_) => {
                    trace!("no expired messages");
                }
                Err(e) => {
                    warn!(error = %e, "failed to clean expired messages");
                }
            }
        }

        self.rate_limiter.lock().await.prune_idle();
    }
}

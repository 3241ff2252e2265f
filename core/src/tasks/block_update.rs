//! Daemon poll loop
//!
//! Polls havend for the network composition and block status. On a new
//! block: apply the swarm diff, kick off salvage or bootstrap transfers, and
//! seed the peer tests for that block.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::node::core::ServiceNode;

impl ServiceNode {
    /// Run the daemon poll loop
    pub(crate) async fn run_block_update_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.daemon_poll_interval_secs);

        loop {
            if !*self.running.read().await {
                break;
            }

            tokio::time::sleep(interval).await;

            if let Err(e) = Self::block_update_tick(&self).await {
                warn!(error = %e, "block update tick failed");
            }
        }

        debug!("block update loop stopped");
    }

    async fn block_update_tick(node: &Arc<Self>) -> Result<(), crate::node::error::NodeError> {
        let update = node.daemon.get_service_nodes().await?;
        let height = update.height;
        let block_hash = update.block_hash.clone();

        let Some(events) = node.apply_block_update(update).await else {
            return Ok(());
        };

        debug!(
            height,
            dissolved = events.dissolved,
            new_swarms = events.new_swarms.len(),
            new_snodes = events.new_snodes.len(),
            "processed block update"
        );

        if events.dissolved {
            let salvager = node.clone();
            tokio::spawn(async move {
                salvager.salvage_stale_data().await;
            });
        } else if !events.new_swarms.is_empty() {
            let bootstrapper = node.clone();
            let new_swarms = events.new_swarms.clone();
            tokio::spawn(async move {
                bootstrapper.bootstrap_swarms(new_swarms).await;
            });
        }

        // Each block seeds one round of peer tests.
        let tester = node.clone();
        tokio::spawn(async move {
            tester.initiate_peer_tests(height, &block_hash).await;
        });

        Ok(())
    }
}

//! Peer-exchange gossip loop
//!
//! Once a second (jittered), pick the sibling we have not talked to for the
//! longest and run one exchange: push our pending delta, ingest whatever the
//! peer hands back. Convergence follows from idempotent inserts plus every
//! sibling being visited until its cursor catches up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, trace, warn};

use crate::data;
use crate::node::core::ServiceNode;
use crate::swarm::record::SnodeRecord;

/// Inflight kind for exchanges; one per peer at a time.
const KIND_EXCHANGE: &str = "exchange";

impl ServiceNode {
    /// Run the gossip loop
    pub(crate) async fn run_gossip_loop(self: Arc<Self>) {
        loop {
            if !*self.running.read().await {
                break;
            }

            // Jitter the period by ±25% so sibling loops drift apart.
            let base = self.config.gossip_interval_ms;
            let jitter = rand::thread_rng().gen_range(0..=base / 2);
            tokio::time::sleep(Duration::from_millis(base * 3 / 4 + jitter)).await;

            self.gossip_tick().await;
        }

        debug!("gossip loop stopped");
    }

    /// One exchange with the stalest sibling, if any.
    pub(crate) async fn gossip_tick(&self) {
        let Some(peer) = self.pick_exchange_peer().await else {
            return;
        };
        let peer_pk = peer.pubkey_hex();

        // At most one exchange in flight per peer; further ticks coalesce.
        {
            let mut gossip = self.gossip.lock().await;
            if !gossip.inflight.insert((peer_pk.clone(), KIND_EXCHANGE)) {
                trace!(peer = %peer, "exchange already in flight");
                return;
            }
        }

        self.exchange_with(&peer).await;

        self.gossip
            .lock()
            .await
            .inflight
            .remove(&(peer_pk, KIND_EXCHANGE));
    }

    /// The sibling with the oldest last-contact.
    async fn pick_exchange_peer(&self) -> Option<SnodeRecord> {
        let swarm = self.swarm.read().await;
        let peers = swarm.other_nodes();
        if peers.is_empty() {
            return None;
        }

        let gossip = self.gossip.lock().await;
        peers
            .iter()
            .min_by_key(|p| gossip.last_contact.get(&p.pubkey_hex()).copied())
            .cloned()
    }

    async fn exchange_with(&self, peer: &SnodeRecord) {
        let peer_pk = peer.pubkey_hex();
        let now = data::current_timestamp_ms();
        let (batch, cursor) = self.delta_for_peer(&peer_pk, now).await;

        match self.snode_client.push_batch(peer, &batch).await {
            Ok(reply) => {
                self.commit_delta_cursor(&peer_pk, cursor).await;
                self.process_push_batch(&reply, None).await;

                let mut gossip = self.gossip.lock().await;
                gossip.last_contact.insert(peer_pk.clone(), Instant::now());
                gossip.fail_counts.remove(&peer_pk);
                drop(gossip);

                self.reachability.lock().await.expire(&peer_pk);
                self.stats.lock().await.push_batches_sent += 1;
                trace!(peer = %peer, "exchange complete");
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "exchange failed");

                let mut gossip = self.gossip.lock().await;
                *gossip.fail_counts.entry(peer_pk.clone()).or_insert(0) += 1;
                // Failed contact still counts as an attempt; otherwise the
                // loop would hammer one dead peer forever.
                gossip.last_contact.insert(peer_pk.clone(), Instant::now());
                drop(gossip);

                self.stats.lock().await.push_batch_failures += 1;
                self.note_unreachable(&peer_pk).await;
            }
        }
    }

    /// Feed a failed contact into the reachability tracker, reporting
    /// upstream when the grace period has run out.
    pub(crate) async fn note_unreachable(&self, peer_pk_hex: &str) {
        let should_report = self
            .reachability
            .lock()
            .await
            .record_unreachable(peer_pk_hex);

        if should_report {
            match self.daemon.report_peer_down(peer_pk_hex).await {
                Ok(()) => {
                    self.reachability.lock().await.set_reported(peer_pk_hex);
                    self.stats.lock().await.peers_reported_down += 1;
                    warn!(peer = peer_pk_hex, "reported unreachable peer to daemon");
                }
                Err(e) => warn!(error = %e, "failed to report unreachable peer"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::network::wire;
    use crate::testing::{
        make_block_update, make_node_with, make_record, pk_for_swarm, stored_message,
        MockDaemon, MockSnodeClient,
    };

    #[tokio::test]
    async fn test_gossip_tick_pushes_delta_to_sibling() {
        let daemon = Arc::new(MockDaemon::new());
        let client = Arc::new(MockSnodeClient::new());
        let node = make_node_with(1, daemon, client.clone()).await;
        node.apply_block_update(make_block_update(1, "a", &[(7, vec![1, 2])]))
            .await;

        let msg = stored_message(&pk_for_swarm(7, 64), "gossip me");
        let batch = wire::serialize_messages(std::slice::from_ref(&msg));
        node.process_push_batch(&batch, None).await;

        node.gossip_tick().await;

        let pushes = client.pushes.lock().await;
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, make_record(2).pubkey_hex());
        let sent = wire::deserialize_messages(&pushes[0].1);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data, b"gossip me");
    }

    #[tokio::test]
    async fn test_gossip_does_not_resend_acknowledged_delta() {
        let daemon = Arc::new(MockDaemon::new());
        let client = Arc::new(MockSnodeClient::new());
        let node = make_node_with(1, daemon, client.clone()).await;
        node.apply_block_update(make_block_update(1, "a", &[(7, vec![1, 2])]))
            .await;

        let msg = stored_message(&pk_for_swarm(7, 64), "once");
        let batch = wire::serialize_messages(std::slice::from_ref(&msg));
        node.process_push_batch(&batch, None).await;

        node.gossip_tick().await;
        node.gossip_tick().await;

        let pushes = client.pushes.lock().await;
        assert_eq!(pushes.len(), 2);
        // Second exchange carries an empty delta
        assert!(pushes[1].1.is_empty());
    }

    #[tokio::test]
    async fn test_gossip_ingests_reply_delta() {
        let daemon = Arc::new(MockDaemon::new());
        let client = Arc::new(MockSnodeClient::new());
        let node = make_node_with(1, daemon, client.clone()).await;
        node.apply_block_update(make_block_update(1, "a", &[(7, vec![1, 2])]))
            .await;

        let msg = stored_message(&pk_for_swarm(7, 64), "from peer");
        client
            .reply_batches
            .lock()
            .await
            .push_back(wire::serialize_messages(std::slice::from_ref(&msg)));

        node.gossip_tick().await;

        let all = node.get_all_messages().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].data, b"from peer");
    }

    #[tokio::test]
    async fn test_failed_exchange_retries_next_tick() {
        let daemon = Arc::new(MockDaemon::new());
        let client = Arc::new(MockSnodeClient::new());
        let node = make_node_with(1, daemon, client.clone()).await;
        node.apply_block_update(make_block_update(1, "a", &[(7, vec![1, 2])]))
            .await;

        let msg = stored_message(&pk_for_swarm(7, 64), "retry me");
        let batch = wire::serialize_messages(std::slice::from_ref(&msg));
        node.process_push_batch(&batch, None).await;

        let sibling = make_record(2);
        client.fail_peer(&sibling).await;
        node.gossip_tick().await;
        assert_eq!(node.stats.lock().await.push_batch_failures, 1);

        // Cursor was not committed; the peer gets the delta on recovery.
        client.restore_peer(&sibling).await;
        node.gossip_tick().await;

        let pushes = client.pushes.lock().await;
        assert_eq!(pushes.len(), 1);
        assert_eq!(wire::deserialize_messages(&pushes[0].1).len(), 1);
    }

    #[tokio::test]
    async fn test_exchange_rotates_through_siblings() {
        let daemon = Arc::new(MockDaemon::new());
        let client = Arc::new(MockSnodeClient::new());
        let node = make_node_with(1, daemon, client.clone()).await;
        node.apply_block_update(make_block_update(1, "a", &[(7, vec![1, 2, 3])]))
            .await;

        node.gossip_tick().await;
        node.gossip_tick().await;

        let pushes = client.pushes.lock().await;
        let mut peers: Vec<&str> = pushes.iter().map(|(pk, _)| pk.as_str()).collect();
        peers.sort();
        peers.dedup();
        assert_eq!(peers.len(), 2, "both siblings should have been visited");
    }
}

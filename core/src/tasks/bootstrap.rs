//! Bootstrap transfers and stale-data salvage
//!
//! Two flavors of the same movement:
//! - a swarm that newly appeared in the map gets a copy of every message we
//!   hold that now belongs to it
//! - when our own swarm dissolves, everything we hold is re-keyed through
//!   placement and handed to its new owners
//!
//! Local copies of messages no longer ours are deleted only after at least
//! one member of the owning swarm accepted the push.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::data;
use crate::network::wire;
use crate::node::core::ServiceNode;
use crate::node::types::Message;
use crate::swarm::placement::{get_swarm_by_pk, INVALID_SWARM_ID};
use crate::swarm::record::SnodeRecord;

impl ServiceNode {
    /// Push our holdings for each newly appeared swarm, pruning what is no
    /// longer ours.
    pub(crate) async fn bootstrap_swarms(&self, new_swarms: Vec<u64>) {
        info!(count = new_swarms.len(), "bootstrapping new swarms");
        let groups = self.group_messages_by_swarm().await;
        for swarm_id in new_swarms {
            if let Some(messages) = groups.get(&swarm_id) {
                self.push_group(swarm_id, messages).await;
            }
        }
    }

    /// Our swarm dissolved: re-key everything and hand it to the new owners.
    pub(crate) async fn salvage_stale_data(&self) {
        let groups = self.group_messages_by_swarm().await;
        info!(swarms = groups.len(), "salvaging stale data");
        for (swarm_id, messages) in &groups {
            self.push_group(*swarm_id, messages).await;
        }
    }

    /// Re-key every stored message through placement under the current map.
    /// Messages already ours are left out.
    async fn group_messages_by_swarm(&self) -> HashMap<u64, Vec<Message>> {
        let messages = {
            let now = data::current_timestamp_ms();
            let db = self.db.lock().await;
            match data::messages_since_rowid(&db, 0, now, usize::MAX) {
                Ok(rows) => rows.into_iter().map(|(_, m)| m).collect::<Vec<_>>(),
                Err(e) => {
                    warn!(error = %e, "failed to scan log for salvage");
                    return HashMap::new();
                }
            }
        };

        let swarm = self.swarm.read().await;
        let our_id = swarm.our_swarm_id();

        let mut groups: HashMap<u64, Vec<Message>> = HashMap::new();
        for msg in messages {
            let owner = get_swarm_by_pk(swarm.all_valid_swarms(), &msg.pub_key);
            if owner == INVALID_SWARM_ID || owner == our_id {
                continue;
            }
            groups.entry(owner).or_default().push(msg);
        }
        groups
    }

    /// Deterministic bootstrap targets: the lowest legacy pubkeys of the
    /// swarm, so every holder of the data picks the same heads.
    fn bootstrap_targets(members: &[SnodeRecord], count: usize) -> Vec<SnodeRecord> {
        let mut sorted: Vec<SnodeRecord> = members.to_vec();
        sorted.sort_by(|a, b| a.pubkey_legacy().cmp(b.pubkey_legacy()));
        sorted.truncate(count);
        sorted
    }

    /// Push one swarm's worth of messages; delete local copies once any
    /// target accepted them.
    async fn push_group(&self, swarm_id: u64, messages: &[Message]) {
        let members = self.swarm.read().await.swarm_members(swarm_id);
        if members.is_empty() {
            warn!(swarm_id, "no members known for target swarm");
            return;
        }

        let targets = Self::bootstrap_targets(&members, self.config.bootstrap_targets);
        let batch = wire::serialize_messages(messages);

        let mut delivered = false;
        for target in &targets {
            match self.snode_client.push_batch(target, &batch).await {
                Ok(_) => {
                    debug!(swarm_id, target = %target, count = messages.len(), "bootstrap push accepted");
                    self.reachability.lock().await.expire(&target.pubkey_hex());
                    delivered = true;
                }
                Err(e) => {
                    warn!(swarm_id, target = %target, error = %e, "bootstrap push failed");
                    self.note_unreachable(&target.pubkey_hex()).await;
                }
            }
        }

        if !delivered {
            warn!(swarm_id, "bootstrap push reached no member; keeping local copies");
            return;
        }

        let db = self.db.lock().await;
        for msg in messages {
            if let Err(e) = data::delete_message(&db, &msg.pub_key, &msg.hash) {
                warn!(error = %e, "failed to prune salvaged message");
            }
        }
        debug!(swarm_id, pruned = messages.len(), "pruned salvaged messages");
    }
}

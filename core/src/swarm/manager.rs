//! Swarm diff engine
//!
//! Keeps the node's view of the current swarm map and derives the events the
//! supervisor acts on when the daemon delivers a new composition: our swarm
//! id, whether our old swarm dissolved, which swarms are brand new (and may
//! need bootstrapping from us), and which peers joined our swarm.

use std::collections::HashSet;

use tracing::{debug, info};

use super::mapping::{SwarmEvents, SwarmInfo};
use super::placement::{get_swarm_by_pk, INVALID_SWARM_ID};
use super::record::SnodeRecord;

/// The node's swarm state, replaced atomically on each block update.
#[derive(Debug)]
pub struct Swarm {
    cur_swarm_id: u64,
    all_valid_swarms: Vec<SwarmInfo>,
    our_address: SnodeRecord,
    /// Our swarm siblings, excluding ourselves
    swarm_peers: Vec<SnodeRecord>,
    /// Flat union of members across all swarms; authenticates peer requests
    all_funded_nodes: Vec<SnodeRecord>,
    /// Registered but not serving; still allowed to sign requests
    decommissioned: Vec<SnodeRecord>,
}

impl Swarm {
    pub fn new(our_address: SnodeRecord) -> Self {
        Self {
            cur_swarm_id: INVALID_SWARM_ID,
            all_valid_swarms: Vec::new(),
            our_address,
            swarm_peers: Vec::new(),
            all_funded_nodes: Vec::new(),
            decommissioned: Vec::new(),
        }
    }

    fn is_existing_swarm(&self, swarm_id: u64) -> bool {
        self.all_valid_swarms.iter().any(|s| s.swarm_id == swarm_id)
    }

    /// Extract relevant information from an incoming swarm composition.
    ///
    /// Pure with respect to the stored state; `update_state` must be called
    /// afterwards to commit.
    pub fn derive_swarm_events(&self, swarms: &[SwarmInfo]) -> SwarmEvents {
        let mut events = SwarmEvents::default();

        let our_swarm = swarms
            .iter()
            .find(|s| s.snodes.contains(&self.our_address));

        if let Some(our_swarm) = our_swarm {
            events.our_swarm_id = our_swarm.swarm_id;
            events.our_swarm_members = our_swarm.snodes.clone();

            // Siblings present now but not under the previous map.
            let known: HashSet<&SnodeRecord> = self.swarm_peers.iter().collect();
            events.new_snodes = our_swarm
                .snodes
                .iter()
                .filter(|sn| **sn != self.our_address && !known.contains(sn))
                .cloned()
                .collect();
        }

        // Swarms that did not exist under the previous map. Our own current
        // swarm is excluded: we already hold its data.
        let ours = events.our_swarm_id;
        events.new_swarms = swarms
            .iter()
            .map(|s| s.swarm_id)
            .filter(|&sid| sid != ours && !self.is_existing_swarm(sid))
            .collect();

        events.dissolved =
            self.cur_swarm_id != INVALID_SWARM_ID && !swarms.iter().any(|s| s.swarm_id == self.cur_swarm_id);

        events
    }

    /// Commit a new composition derived by `derive_swarm_events`.
    pub fn update_state(
        &mut self,
        swarms: Vec<SwarmInfo>,
        decommissioned: Vec<SnodeRecord>,
        events: &SwarmEvents,
    ) {
        if events.our_swarm_id != self.cur_swarm_id {
            info!(
                old = self.cur_swarm_id,
                new = events.our_swarm_id,
                "our swarm id changed"
            );
        }

        self.cur_swarm_id = events.our_swarm_id;
        self.swarm_peers = events
            .our_swarm_members
            .iter()
            .filter(|sn| **sn != self.our_address)
            .cloned()
            .collect();

        self.all_funded_nodes = swarms
            .iter()
            .flat_map(|s| s.snodes.iter().cloned())
            .collect();
        self.all_valid_swarms = swarms;
        self.decommissioned = decommissioned;

        debug!(
            swarms = self.all_valid_swarms.len(),
            funded = self.all_funded_nodes.len(),
            peers = self.swarm_peers.len(),
            "swarm state updated"
        );
    }

    /// Whether this pubkey's messages belong to our swarm.
    pub fn is_pubkey_for_us(&self, pubkey_hex: &str) -> bool {
        self.cur_swarm_id != INVALID_SWARM_ID
            && get_swarm_by_pk(&self.all_valid_swarms, pubkey_hex) == self.cur_swarm_id
    }

    /// Members of the swarm owning this pubkey.
    pub fn snodes_for_pubkey(&self, pubkey_hex: &str) -> Vec<SnodeRecord> {
        let swarm_id = get_swarm_by_pk(&self.all_valid_swarms, pubkey_hex);
        self.all_valid_swarms
            .iter()
            .find(|s| s.swarm_id == swarm_id)
            .map(|s| s.snodes.clone())
            .unwrap_or_default()
    }

    /// A known node (funded or decommissioned) by its bare snode address.
    /// Used to authenticate signed peer requests.
    pub fn find_node_by_address(&self, address: &str) -> Option<&SnodeRecord> {
        self.all_funded_nodes
            .iter()
            .chain(self.decommissioned.iter())
            .find(|sn| sn.address() == address)
    }

    pub fn is_snode_address_known(&self, address: &str) -> bool {
        self.find_node_by_address(address).is_some()
    }

    /// A known node by its legacy pubkey hex.
    pub fn find_node_by_pubkey(&self, pubkey_hex: &str) -> Option<&SnodeRecord> {
        self.all_funded_nodes
            .iter()
            .chain(self.decommissioned.iter())
            .find(|sn| sn.pubkey_hex() == pubkey_hex)
    }

    pub fn our_address(&self) -> &SnodeRecord {
        &self.our_address
    }

    pub fn our_swarm_id(&self) -> u64 {
        self.cur_swarm_id
    }

    pub fn is_valid(&self) -> bool {
        self.cur_swarm_id != INVALID_SWARM_ID
    }

    /// Our swarm siblings, excluding ourselves.
    pub fn other_nodes(&self) -> &[SnodeRecord] {
        &self.swarm_peers
    }

    pub fn all_valid_swarms(&self) -> &[SwarmInfo] {
        &self.all_valid_swarms
    }

    /// Members of an arbitrary swarm; empty if it does not exist.
    pub fn swarm_members(&self, swarm_id: u64) -> Vec<SnodeRecord> {
        self.all_valid_swarms
            .iter()
            .find(|s| s.swarm_id == swarm_id)
            .map(|s| s.snodes.clone())
            .unwrap_or_default()
    }
}

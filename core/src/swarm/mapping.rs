//! Swarm map snapshots
//!
//! The daemon feed delivers the full network composition atomically on each
//! block: every swarm with its members, the decommissioned set, and the block
//! status. Snapshots are immutable; the node swaps them wholesale.

use super::record::SnodeRecord;

/// One swarm and its members.
#[derive(Debug, Clone)]
pub struct SwarmInfo {
    pub swarm_id: u64,
    pub snodes: Vec<SnodeRecord>,
}

/// Full network composition as of one block.
#[derive(Debug, Clone)]
pub struct BlockUpdate {
    pub swarms: Vec<SwarmInfo>,
    /// Registered but not currently serving; excluded from gossip targets
    /// but still signature-authenticated.
    pub decommissioned: Vec<SnodeRecord>,
    pub height: u64,
    pub block_hash: String,
    pub hardfork: u32,
}

/// Changes derived from comparing two consecutive swarm maps.
/// Never stored; consumed immediately by the supervisor.
#[derive(Debug, Clone)]
pub struct SwarmEvents {
    /// Our (potentially new) swarm id
    pub our_swarm_id: u64,
    /// Our previous swarm no longer exists; stale data needs salvaging
    pub dissolved: bool,
    /// Swarms that exist now but not before, excluding our own
    pub new_swarms: Vec<u64>,
    /// Peers newly added to our swarm
    pub new_snodes: Vec<SnodeRecord>,
    /// Our swarm members under the new map
    pub our_swarm_members: Vec<SnodeRecord>,
}

impl Default for SwarmEvents {
    fn default() -> Self {
        Self {
            our_swarm_id: super::placement::INVALID_SWARM_ID,
            dissolved: false,
            new_swarms: Vec::new(),
            new_snodes: Vec::new(),
            our_swarm_members: Vec::new(),
        }
    }
}

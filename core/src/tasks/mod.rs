//! Background automation
//!
//! Each loop is a spawned task on the supervisor, gated on its shared
//! `running` flag:
//! - `block_update`: daemon poll, swarm diffing, test seeding
//! - `peer_exchange`: the 1 s gossip loop
//! - `bootstrap`: new-swarm transfers and dissolution salvage
//! - `testing`: storage/blockchain test driver and reachability re-tests
//! - `maintenance`: expiry sweep

pub(crate) mod block_update;
pub(crate) mod bootstrap;
pub(crate) mod maintenance;
pub(crate) mod peer_exchange;
pub(crate) mod testing;

//! Haven Storage Server core
//!
//! One node of the Haven swarm-replicated message relay. Clients push short,
//! TTL-bounded, proof-of-work-gated messages addressed to a recipient public
//! key; every node in the recipient's swarm stores a replica and serves the
//! recipient's polls. Swarm membership comes from the local havend daemon;
//! nodes in a swarm gossip to converge their stores, bootstrap newly formed
//! swarms, and test each other's storage and daemon reachability.
//!
//! # Module Structure
//!
//! - `node/`: Public interface (ServiceNode, config, types, stats)
//! - `swarm/`: Placement function and swarm diff engine
//! - `tasks/`: Background automation (block poll, gossip, tests, cleanup)
//! - `network/`: Wire formats, HTTP plumbing, daemon and peer clients
//! - `data/`: SQLite persistence
//! - `security/`: Signatures and snode addresses
//! - `resilience/`: Anti-abuse (PoW, rate limits, reachability)
//! - `testing/`: Test utilities

// Public interface
pub mod node;

// Internal modules
pub(crate) mod tasks;

// Infrastructure modules (pub for flexibility)
pub mod data;
pub mod logging;
pub mod network;
pub mod resilience;
pub mod security;
pub mod swarm;
pub mod testing;

// Re-export main API types for convenience
pub use node::{
    Message, Network, NodeConfig, NodeError, NodeStats, ServiceNode, StoreOutcome, UserPubkey,
};
pub use swarm::{SnodeRecord, SwarmEvents, SwarmInfo, INVALID_SWARM_ID};

//! Swarm membership and placement
//!
//! - `record`: service node records from the daemon feed
//! - `mapping`: swarm map snapshots and derived events
//! - `placement`: the network-wide pubkey-to-swarm assignment
//! - `manager`: the diff engine driven by block updates

pub mod manager;
pub mod mapping;
pub mod placement;
pub mod record;

pub use manager::Swarm;
pub use mapping::{BlockUpdate, SwarmEvents, SwarmInfo};
pub use placement::{get_swarm_by_pk, pubkey_to_target, INVALID_SWARM_ID};
pub use record::SnodeRecord;

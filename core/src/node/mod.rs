//! Node supervisor and public interface
//!
//! Implementation is split across:
//! - `node/` (this module): core struct, config, types, stats, long-poll
//! - `tasks/`: background automation driving the supervisor
//! - `network/server`: the request layer calling into it

pub mod config;
pub mod core;
pub mod error;
pub mod listeners;
pub mod stats;
pub mod types;

pub use config::NodeConfig;
pub use self::core::{ClientError, ServiceNode};
pub use error::NodeError;
pub use stats::NodeStats;
pub use types::{Message, MessageTestStatus, Network, NodeState, StoreOutcome, UserPubkey};

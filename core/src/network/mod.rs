//! Wire formats and network plumbing
//!
//! - `wire`: the length-prefixed message batch codec
//! - `http`: minimal HTTP/1.1 client and server helpers
//! - `daemon`: JSON-RPC client against the local havend
//! - `client`: signed requests to sibling snodes
//! - `server`: the request-layer endpoint router

pub mod client;
pub mod daemon;
pub mod http;
pub mod server;
pub mod wire;

pub use client::{HttpSnodeClient, SnodeClient, StorageTestReply};
pub use daemon::{DaemonClient, DaemonRpc};
pub use wire::{deserialize_messages, serialize_messages};

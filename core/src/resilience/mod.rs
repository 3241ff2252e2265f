//! Anti-abuse mechanisms
//!
//! Proof of work and admission windows for client stores, request rate
//! limiting, and tracking of unreachable peers.

pub mod pow;
pub mod rate_limit;
pub mod reachability;

pub use pow::{check_pow, compute_pow, message_hash, valid_timestamp, valid_ttl, DEFAULT_DIFFICULTY};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use reachability::{ReachabilityRecords, UNREACH_GRACE_PERIOD};

//! Offline peer tracking
//!
//! Failed peer contacts accumulate here. A peer that stays unreachable past
//! the grace period is reported to the daemon once; a successful contact
//! wipes its record.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

/// How long a peer may stay unreachable before we report it.
pub const UNREACH_GRACE_PERIOD: Duration = Duration::from_secs(120 * 60);

#[derive(Debug, Clone)]
struct ReachRecord {
    first_failure: Instant,
    last_tested: Instant,
    reported: bool,
}

impl ReachRecord {
    fn new(now: Instant) -> Self {
        Self {
            first_failure: now,
            last_tested: now,
            reported: false,
        }
    }
}

/// Per-pubkey records of currently offline peers.
#[derive(Debug, Default)]
pub struct ReachabilityRecords {
    offline_nodes: HashMap<String, ReachRecord>,
}

impl ReachabilityRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed contact. Returns true when the node has been failing
    /// longer than the grace period and has not been reported yet.
    pub fn record_unreachable(&mut self, pubkey_hex: &str) -> bool {
        self.record_unreachable_at(pubkey_hex, Instant::now())
    }

    fn record_unreachable_at(&mut self, pubkey_hex: &str, now: Instant) -> bool {
        match self.offline_nodes.get_mut(pubkey_hex) {
            None => {
                debug!(node = pubkey_hex, "adding node to unreachable list");
                self.offline_nodes
                    .insert(pubkey_hex.to_string(), ReachRecord::new(now));
                false
            }
            Some(record) => {
                record.last_tested = now;
                let elapsed = record.last_tested.duration_since(record.first_failure);
                debug!(
                    node = pubkey_hex,
                    elapsed_secs = elapsed.as_secs(),
                    "node is still unreachable"
                );
                !record.reported && elapsed > UNREACH_GRACE_PERIOD
            }
        }
    }

    /// Forget a node after a successful contact. Returns whether an entry
    /// was removed.
    pub fn expire(&mut self, pubkey_hex: &str) -> bool {
        let erased = self.offline_nodes.remove(pubkey_hex).is_some();
        if erased {
            debug!(node = pubkey_hex, "removed unreachable entry");
        }
        erased
    }

    /// Mark a node as reported so we do not report it again.
    pub fn set_reported(&mut self, pubkey_hex: &str) {
        if let Some(record) = self.offline_nodes.get_mut(pubkey_hex) {
            record.reported = true;
        }
    }

    /// The least recently tested offline node, if any.
    pub fn next_to_test(&self) -> Option<String> {
        self.offline_nodes
            .iter()
            .min_by_key(|(_, record)| record.last_tested)
            .map(|(pk, _)| pk.clone())
    }

    pub fn len(&self) -> usize {
        self.offline_nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offline_nodes.is_empty()
    }
}

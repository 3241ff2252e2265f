//! Node statistics
//!
//! Plain counters, bumped by the request handlers and background tasks and
//! served verbatim on `/get_stats/v1`.

use serde::Serialize;

#[derive(Debug, Default, Clone, Serialize)]
pub struct NodeStats {
    pub client_store_requests: u64,
    pub client_retrieve_requests: u64,
    pub store_committed: u64,
    pub store_duplicates: u64,
    pub pushes_received: u64,
    pub push_batches_received: u64,
    pub push_batches_sent: u64,
    pub push_batch_failures: u64,
    pub storage_tests_served: u64,
    pub storage_tests_performed: u64,
    pub storage_test_failures: u64,
    pub blockchain_tests_served: u64,
    pub peers_reported_down: u64,
    pub connections_in: u64,
}

impl NodeStats {
    pub fn bump_store_requests(&mut self) {
        self.client_store_requests += 1;
    }

    pub fn bump_retrieve_requests(&mut self) {
        self.client_retrieve_requests += 1;
    }
}

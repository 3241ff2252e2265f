//! Peer testing
//!
//! Every block seeds a storage test and a blockchain test. Tester and
//! testee are derived from the block hash and the sorted swarm membership,
//! so every member computes the same pair without coordination. The tested
//! message is drawn from the local log with the same seed.
//!
//! The storage test is asymmetric: the tester records a failure only on
//! transport failure or an `other` verdict; `retry` answers are repeated on
//! a 50 ms cadence until the 60 s window runs out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::data;
use crate::network::client::StorageTestReply;
use crate::node::core::ServiceNode;
use crate::swarm::record::SnodeRecord;

/// Split a block hash digest into independent test seeds.
fn test_seeds(block_hash: &str) -> [u64; 4] {
    let digest = blake3::hash(block_hash.as_bytes());
    let bytes = digest.as_bytes();
    let mut seeds = [0u64; 4];
    for (i, seed) in seeds.iter_mut().enumerate() {
        let chunk: [u8; 8] = bytes[i * 8..(i + 1) * 8].try_into().unwrap();
        *seed = u64::from_be_bytes(chunk);
    }
    seeds
}

/// Derive the (tester, testee) pair for this block from the sorted members.
/// Needs at least two members; the offset construction guarantees the two
/// are distinct.
fn derive_test_pair(seeds: &[u64; 4], member_count: usize) -> Option<(usize, usize)> {
    if member_count < 2 {
        return None;
    }
    let tester = (seeds[0] % member_count as u64) as usize;
    let offset = 1 + (seeds[1] % (member_count as u64 - 1)) as usize;
    let testee = (tester + offset) % member_count;
    Some((tester, testee))
}

impl ServiceNode {
    /// Run one round of peer tests for a freshly seen block, if we are the
    /// derived tester.
    pub(crate) async fn initiate_peer_tests(&self, height: u64, block_hash: &str) {
        let (members, our_pk) = {
            let swarm = self.swarm.read().await;
            let mut members: Vec<SnodeRecord> = swarm.other_nodes().to_vec();
            members.push(swarm.our_address().clone());
            members.sort_by(|a, b| a.pubkey_legacy().cmp(b.pubkey_legacy()));
            (members, swarm.our_address().clone())
        };

        let seeds = test_seeds(block_hash);
        let Some((tester_idx, testee_idx)) = derive_test_pair(&seeds, members.len()) else {
            trace!("swarm too small for peer tests");
            return;
        };

        if members[tester_idx] != our_pk {
            trace!("not the tester for this block");
            return;
        }
        let testee = members[testee_idx].clone();

        debug!(height, testee = %testee, "we are the tester for this block");
        self.run_storage_test(&testee, height, seeds[2]).await;
        self.run_blockchain_test(&testee, height, seeds[3]).await;
    }

    /// Pick the message under test deterministically from the local log.
    async fn pick_test_message(&self, seed: u64) -> Option<String> {
        let now = data::current_timestamp_ms();
        let db = self.db.lock().await;
        let rows = data::messages_since_rowid(&db, 0, now, usize::MAX).ok()?;
        if rows.is_empty() {
            return None;
        }
        let idx = (seed % rows.len() as u64) as usize;
        Some(rows[idx].1.hash.clone())
    }

    /// Drive one storage test against `testee`, retrying `retry` answers on
    /// the configured cadence inside the elapsed-time window.
    pub(crate) async fn run_storage_test(&self, testee: &SnodeRecord, height: u64, seed: u64) {
        let Some(msg_hash) = self.pick_test_message(seed).await else {
            trace!("no messages stored; skipping storage test");
            return;
        };

        let window = Duration::from_secs(self.config.storage_test_window_secs);
        let retry_period = Duration::from_millis(self.config.storage_test_retry_ms);
        let started = Instant::now();
        let mut attempts = 0u32;

        while started.elapsed() < window {
            attempts += 1;
            match self.snode_client.storage_test(testee, height, &msg_hash).await {
                Ok(StorageTestReply::Ok(_value)) => {
                    info!(testee = %testee, attempts, "storage test succeeded");
                    self.reachability.lock().await.expire(&testee.pubkey_hex());
                    self.stats.lock().await.storage_tests_performed += 1;
                    return;
                }
                Ok(StorageTestReply::Retry) => {
                    tokio::time::sleep(retry_period).await;
                }
                Ok(StorageTestReply::WrongRequest) => {
                    // Height drift or membership skew; not the peer's fault.
                    debug!(testee = %testee, "storage test answered wrong request");
                    return;
                }
                Ok(StorageTestReply::Other) => {
                    warn!(testee = %testee, attempts, "storage test failed");
                    self.stats.lock().await.storage_test_failures += 1;
                    self.note_unreachable(&testee.pubkey_hex()).await;
                    return;
                }
                Err(e) => {
                    warn!(testee = %testee, error = %e, "storage test transport failure");
                    self.stats.lock().await.storage_test_failures += 1;
                    self.note_unreachable(&testee.pubkey_hex()).await;
                    return;
                }
            }
        }

        // Only retries inside the window: the peer is alive but has not
        // replicated the message. Not counted against it.
        debug!(testee = %testee, attempts, "storage test window exhausted");
    }

    /// Drive one blockchain test against `testee`.
    pub(crate) async fn run_blockchain_test(&self, testee: &SnodeRecord, max_height: u64, seed: u64) {
        match self.snode_client.blockchain_test(testee, max_height, seed).await {
            Ok(res_height) => {
                let expected = seed % max_height.max(1);
                if res_height == expected {
                    debug!(testee = %testee, res_height, "blockchain test succeeded");
                } else {
                    // Same inputs must derive the same height on both sides.
                    warn!(
                        testee = %testee,
                        res_height,
                        expected,
                        "blockchain test height mismatch"
                    );
                }
                self.reachability.lock().await.expire(&testee.pubkey_hex());
            }
            Err(e) => {
                warn!(testee = %testee, error = %e, "blockchain test transport failure");
                self.note_unreachable(&testee.pubkey_hex()).await;
            }
        }
    }

    /// Run the reachability re-test loop: ping the least recently tested
    /// offline peer and expire or escalate its record.
    pub(crate) async fn run_reachability_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.reachability_interval_secs);

        loop {
            if !*self.running.read().await {
                break;
            }

            tokio::time::sleep(interval).await;
            self.reachability_tick().await;
        }

        debug!("reachability loop stopped");
    }

    pub(crate) async fn reachability_tick(&self) {
        let Some(pk) = self.reachability.lock().await.next_to_test() else {
            return;
        };

        let record = self.swarm.read().await.find_node_by_pubkey(&pk).cloned();
        let Some(record) = record else {
            // Gone from the network registry; nothing left to test.
            self.reachability.lock().await.expire(&pk);
            return;
        };

        match self.snode_client.ping(&record).await {
            Ok(()) => {
                debug!(peer = %record, "offline peer is reachable again");
                self.reachability.lock().await.expire(&pk);
            }
            Err(_) => {
                self.note_unreachable(&pk).await;
            }
        }
    }
}

//! Test utilities
//!
//! Fixtures shared by unit tests across the crate: synthetic records and
//! block updates, an in-memory node, and doubles for the daemon and peer
//! clients.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::data;
use crate::network::client::{SnodeClient, StorageTestReply};
use crate::network::daemon::{DaemonRpc, PrivkeyResponse};
use crate::node::config::NodeConfig;
use crate::node::core::ServiceNode;
use crate::node::error::NodeError;
use crate::node::types::{Message, UserPubkey};
use crate::resilience::pow;
use crate::security::NodeKeys;
use crate::swarm::mapping::{BlockUpdate, SwarmInfo};
use crate::swarm::record::SnodeRecord;

/// A deterministic snode record. Records built from the same seed are the
/// same node.
pub fn make_record(seed: u8) -> SnodeRecord {
    SnodeRecord::new(
        format!("10.0.0.{}", seed),
        20000 + seed as u16,
        [seed; 32],
        [seed.wrapping_add(100); 32],
        [seed.wrapping_add(200); 32],
    )
}

/// A block update with the given `(swarm_id, member_seeds)` pairs.
pub fn make_block_update(height: u64, block_hash: &str, swarms: &[(u64, Vec<u8>)]) -> BlockUpdate {
    BlockUpdate {
        swarms: swarms
            .iter()
            .map(|(swarm_id, seeds)| SwarmInfo {
                swarm_id: *swarm_id,
                snodes: seeds.iter().map(|&s| make_record(s)).collect(),
            })
            .collect(),
        decommissioned: vec![],
        height,
        block_hash: block_hash.to_string(),
        hardfork: 16,
    }
}

/// A user pubkey whose placement target is exactly `swarm_id`.
pub fn pk_for_swarm(swarm_id: u64, pubkey_size: usize) -> UserPubkey {
    let pk = format!(
        "05{}{:016x}",
        "0".repeat(pubkey_size - 2 - 16),
        swarm_id
    );
    UserPubkey::create(&pk, pubkey_size).expect("synthetic pubkey is valid")
}

/// A live message with a correct dedup hash, as another snode would
/// replicate it.
pub fn stored_message(pk: &UserPubkey, text: &str) -> Message {
    let timestamp = data::current_timestamp_ms();
    let ttl = 3_600_000;
    let nonce = "test-nonce".to_string();
    let data = text.as_bytes().to_vec();
    let hash = pow::message_hash(timestamp, ttl, pk.as_str(), &data, &nonce);
    Message {
        pub_key: pk.as_str().to_string(),
        data,
        hash,
        ttl,
        timestamp,
        nonce,
    }
}

/// Daemon double: serves a configurable block update and records reports.
#[derive(Default)]
pub struct MockDaemon {
    pub update: Mutex<Option<BlockUpdate>>,
    pub reported: Mutex<Vec<String>>,
}

impl MockDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_update(&self, update: BlockUpdate) {
        *self.update.lock().await = Some(update);
    }
}

#[async_trait]
impl DaemonRpc for MockDaemon {
    async fn get_service_node_privkey(&self) -> Result<PrivkeyResponse, NodeError> {
        Ok(PrivkeyResponse {
            legacy: hex::encode([1u8; 32]),
            ed25519: hex::encode([2u8; 32]),
            x25519: hex::encode([3u8; 32]),
        })
    }

    async fn get_service_nodes(&self) -> Result<BlockUpdate, NodeError> {
        self.update
            .lock()
            .await
            .clone()
            .ok_or_else(|| NodeError::Daemon("no update configured".to_string()))
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, NodeError> {
        Ok(format!("block-hash-{}", height))
    }

    async fn report_peer_down(&self, pubkey_hex: &str) -> Result<(), NodeError> {
        self.reported.lock().await.push(pubkey_hex.to_string());
        Ok(())
    }
}

/// Peer client double: records outbound traffic, can fail selected peers,
/// and serves scripted storage test replies.
#[derive(Default)]
pub struct MockSnodeClient {
    /// `(peer legacy pubkey hex, batch bytes)` per push/push_batch
    pub pushes: Mutex<Vec<(String, Vec<u8>)>>,
    /// Peers whose requests fail with a network error
    pub fail_peers: Mutex<HashSet<String>>,
    /// Scripted storage test replies, consumed front to back
    pub storage_replies: Mutex<VecDeque<StorageTestReply>>,
    /// Reply batches handed back on push_batch, consumed front to back
    pub reply_batches: Mutex<VecDeque<Vec<u8>>>,
}

impl MockSnodeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_peer(&self, record: &SnodeRecord) {
        self.fail_peers.lock().await.insert(record.pubkey_hex());
    }

    pub async fn restore_peer(&self, record: &SnodeRecord) {
        self.fail_peers.lock().await.remove(&record.pubkey_hex());
    }

    async fn check_up(&self, peer: &SnodeRecord) -> Result<(), NodeError> {
        if self.fail_peers.lock().await.contains(&peer.pubkey_hex()) {
            Err(NodeError::Network(format!("{} unreachable", peer)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SnodeClient for MockSnodeClient {
    async fn push_batch(&self, peer: &SnodeRecord, batch: &[u8]) -> Result<Vec<u8>, NodeError> {
        self.check_up(peer).await?;
        self.pushes
            .lock()
            .await
            .push((peer.pubkey_hex(), batch.to_vec()));
        Ok(self
            .reply_batches
            .lock()
            .await
            .pop_front()
            .unwrap_or_default())
    }

    async fn push(&self, peer: &SnodeRecord, batch: &[u8]) -> Result<(), NodeError> {
        self.check_up(peer).await?;
        self.pushes
            .lock()
            .await
            .push((peer.pubkey_hex(), batch.to_vec()));
        Ok(())
    }

    async fn storage_test(
        &self,
        peer: &SnodeRecord,
        _height: u64,
        _msg_hash: &str,
    ) -> Result<StorageTestReply, NodeError> {
        self.check_up(peer).await?;
        Ok(self
            .storage_replies
            .lock()
            .await
            .pop_front()
            .unwrap_or(StorageTestReply::Ok(Vec::new())))
    }

    async fn blockchain_test(
        &self,
        peer: &SnodeRecord,
        max_height: u64,
        seed: u64,
    ) -> Result<u64, NodeError> {
        self.check_up(peer).await?;
        Ok(seed % max_height.max(1))
    }

    async fn ping(&self, peer: &SnodeRecord) -> Result<(), NodeError> {
        self.check_up(peer).await
    }
}

/// A node over an in-memory database and the doubles above, identified by
/// `make_record(seed)`.
pub async fn make_node(seed: u8) -> ServiceNode {
    make_node_with(seed, Arc::new(MockDaemon::new()), Arc::new(MockSnodeClient::new())).await
}

/// Like `make_node` but with caller-held doubles, for tests that inspect
/// or script them.
pub async fn make_node_with(
    seed: u8,
    daemon: Arc<MockDaemon>,
    client: Arc<MockSnodeClient>,
) -> ServiceNode {
    let keys = NodeKeys::from_secrets(
        [seed; 32],
        [seed.wrapping_add(1); 32],
        [seed.wrapping_add(2); 32],
    );
    let db = data::start_db_in_memory().expect("in-memory db");
    ServiceNode::new(
        NodeConfig::for_testing(),
        keys,
        make_record(seed),
        db,
        daemon,
        client,
    )
}

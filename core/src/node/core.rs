//! The node supervisor
//!
//! `ServiceNode` owns the authoritative state: our record and keys, the
//! swarm view, the message log handle, the long-poll registry, reachability
//! records, and the gossip bookkeeping. The request layer and the background
//! tasks both drive it through the methods here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rusqlite::Connection;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::data;
use crate::network::client::SnodeClient;
use crate::network::daemon::DaemonRpc;
use crate::network::wire;
use crate::resilience::pow;
use crate::resilience::rate_limit::RateLimiter;
use crate::resilience::reachability::ReachabilityRecords;
use crate::security::NodeKeys;
use crate::swarm::mapping::{BlockUpdate, SwarmEvents};
use crate::swarm::record::SnodeRecord;
use crate::swarm::{Swarm, INVALID_SWARM_ID};

use super::config::NodeConfig;
use super::error::NodeError;
use super::listeners::Listeners;
use super::stats::NodeStats;
use super::types::{
    Message, MessageTestStatus, NodeState, StoreOutcome, UserPubkey, MAX_MESSAGE_BODY,
};

/// Why a client store was refused. The request layer maps these onto HTTP
/// status codes.
#[derive(Debug)]
pub enum ClientError {
    /// 503 with a human-readable reason
    NotReady(String),
    /// 421; carries the members of the owning swarm
    WrongSwarm(Vec<SnodeRecord>),
    /// 400
    BodyTooLarge,
    /// 403
    BadTtl,
    /// 406
    BadTimestamp,
    /// 432; carries the difficulty the client must meet
    BadPow { difficulty: u8 },
    /// 500
    Storage(String),
}

/// Per-peer gossip bookkeeping. Lives on the supervisor because both the
/// exchange loop (we initiate) and the push_batch handler (peer initiates)
/// advance the same delta cursors.
#[derive(Debug, Default)]
pub(crate) struct GossipState {
    /// Last log rowid already sent to each peer (by legacy pubkey hex)
    pub(crate) last_sent_rowid: HashMap<String, i64>,
    /// Last successful contact per peer
    pub(crate) last_contact: HashMap<String, Instant>,
    /// Consecutive send failures per peer
    pub(crate) fail_counts: HashMap<String, u32>,
    /// Requests currently in flight, keyed by (peer, kind)
    pub(crate) inflight: std::collections::HashSet<(String, &'static str)>,
}

/// The node supervisor.
pub struct ServiceNode {
    pub(crate) config: NodeConfig,
    pub(crate) keys: NodeKeys,
    pub(crate) daemon: Arc<dyn DaemonRpc>,
    pub(crate) snode_client: Arc<dyn SnodeClient>,

    pub(crate) swarm: RwLock<Swarm>,
    state: RwLock<NodeState>,
    pub(crate) db: Arc<Mutex<Connection>>,
    pub(crate) listeners: Mutex<Listeners>,
    pub(crate) reachability: Mutex<ReachabilityRecords>,
    pub(crate) rate_limiter: Mutex<RateLimiter>,
    pub(crate) gossip: Mutex<GossipState>,
    pub(crate) stats: Mutex<NodeStats>,

    pow_difficulty: AtomicU8,
    block_height: AtomicU64,
    block_hash: RwLock<String>,

    /// Signals background loops to wind down
    pub(crate) running: Arc<RwLock<bool>>,
}

impl ServiceNode {
    pub fn new(
        config: NodeConfig,
        keys: NodeKeys,
        our_record: SnodeRecord,
        db: Connection,
        daemon: Arc<dyn DaemonRpc>,
        snode_client: Arc<dyn SnodeClient>,
    ) -> Self {
        Self {
            config,
            keys,
            daemon,
            snode_client,
            swarm: RwLock::new(Swarm::new(our_record)),
            state: RwLock::new(NodeState::AwaitingSwarm),
            db: Arc::new(Mutex::new(db)),
            listeners: Mutex::new(Listeners::new()),
            reachability: Mutex::new(ReachabilityRecords::new()),
            rate_limiter: Mutex::new(RateLimiter::default()),
            gossip: Mutex::new(GossipState::default()),
            stats: Mutex::new(NodeStats::default()),
            pow_difficulty: AtomicU8::new(pow::DEFAULT_DIFFICULTY),
            block_height: AtomicU64::new(0),
            block_hash: RwLock::new(String::new()),
            running: Arc::new(RwLock::new(true)),
        }
    }

    // ===== readiness and swarm metadata =====

    pub async fn state(&self) -> NodeState {
        *self.state.read().await
    }

    /// Whether the node can serve requests; on refusal carries a reason for
    /// the 503 body.
    pub async fn snode_ready(&self) -> Result<(), String> {
        if self.config.force_start {
            return Ok(());
        }
        match *self.state.read().await {
            NodeState::Ready => Ok(()),
            NodeState::AwaitingSwarm => Err("initial swarm map not received yet".to_string()),
            NodeState::Dissolved => Err("our swarm was dissolved".to_string()),
        }
    }

    pub async fn is_pubkey_for_us(&self, pk: &UserPubkey) -> bool {
        self.swarm.read().await.is_pubkey_for_us(pk.as_str())
    }

    pub async fn get_snodes_by_pk(&self, pk: &UserPubkey) -> Vec<SnodeRecord> {
        self.swarm.read().await.snodes_for_pubkey(pk.as_str())
    }

    pub async fn is_snode_address_known(&self, address: &str) -> bool {
        self.swarm.read().await.is_snode_address_known(address)
    }

    /// Verify a signed peer request: the sender must be a known (funded or
    /// decommissioned) node and the signature must check out against its
    /// ed25519 key.
    pub async fn verify_snode_signature(
        &self,
        sender_address: &str,
        signature_b64: &str,
        body: &[u8],
    ) -> bool {
        let swarm = self.swarm.read().await;
        let Some(record) = swarm.find_node_by_address(sender_address) else {
            debug!(sender = sender_address, "signature from unknown snode");
            return false;
        };
        crate::security::verify_body(signature_b64, body, record.pubkey_ed25519())
    }

    pub fn get_curr_pow_difficulty(&self) -> u8 {
        self.pow_difficulty.load(Ordering::Relaxed)
    }

    pub fn set_pow_difficulty(&self, difficulty: u8) {
        self.pow_difficulty.store(difficulty, Ordering::Relaxed);
    }

    pub fn block_height(&self) -> u64 {
        self.block_height.load(Ordering::Relaxed)
    }

    pub async fn block_hash(&self) -> String {
        self.block_hash.read().await.clone()
    }

    // ===== block updates =====

    /// Apply a fresh composition from the daemon. Returns the derived events
    /// when the block changed, so the caller can run bootstrap and tests.
    pub async fn apply_block_update(&self, update: BlockUpdate) -> Option<SwarmEvents> {
        {
            let seen = self.block_hash.read().await;
            if *seen == update.block_hash {
                return None;
            }
        }

        self.block_height.store(update.height, Ordering::Relaxed);
        *self.block_hash.write().await = update.block_hash.clone();

        let events = {
            let mut swarm = self.swarm.write().await;
            let events = swarm.derive_swarm_events(&update.swarms);
            swarm.update_state(update.swarms, update.decommissioned, &events);
            events
        };

        let mut state = self.state.write().await;
        let next = match (*state, events.our_swarm_id) {
            (NodeState::AwaitingSwarm, id) if id != INVALID_SWARM_ID => {
                info!(swarm_id = id, height = update.height, "node is ready");
                NodeState::Ready
            }
            (NodeState::Ready, INVALID_SWARM_ID) if events.dissolved => {
                warn!("our swarm dissolved; salvaging stale data");
                NodeState::Dissolved
            }
            (NodeState::Dissolved, id) if id != INVALID_SWARM_ID => {
                info!(swarm_id = id, "rejoined a swarm");
                NodeState::Ready
            }
            (current, _) => current,
        };
        *state = next;

        Some(events)
    }

    // ===== client operations =====

    /// Serve a client `store`. Validation order matters: cheap shape checks,
    /// then ownership, then admission windows, then PoW.
    pub async fn process_store(
        &self,
        pk: &UserPubkey,
        data: Vec<u8>,
        ttl: u64,
        timestamp: u64,
        nonce: String,
    ) -> Result<StoreOutcome, ClientError> {
        self.stats.lock().await.bump_store_requests();

        if let Err(reason) = self.snode_ready().await {
            return Err(ClientError::NotReady(reason));
        }

        if data.len() > MAX_MESSAGE_BODY {
            return Err(ClientError::BodyTooLarge);
        }

        if !self.is_pubkey_for_us(pk).await {
            return Err(ClientError::WrongSwarm(self.get_snodes_by_pk(pk).await));
        }

        if !pow::valid_ttl(ttl) {
            return Err(ClientError::BadTtl);
        }

        let now = data::current_timestamp_ms();
        if !pow::valid_timestamp(timestamp, ttl, now) {
            return Err(ClientError::BadTimestamp);
        }

        let difficulty = self.get_curr_pow_difficulty();
        let Some(hash) = pow::check_pow(&nonce, timestamp, ttl, pk.as_str(), &data, difficulty)
        else {
            debug!(pk = %pk, "store rejected: invalid PoW nonce");
            return Err(ClientError::BadPow { difficulty });
        };

        let msg = Message {
            pub_key: pk.as_str().to_string(),
            data,
            hash,
            ttl,
            timestamp,
            nonce,
        };

        let outcome = self
            .commit(&msg)
            .await
            .map_err(|e| ClientError::Storage(e.to_string()))?;

        trace!(pk = %pk, "successfully stored message");
        Ok(outcome)
    }

    /// Serve a client `retrieve`. Allowed while dissolved: the data is still
    /// ours to serve until it has been salvaged away.
    pub async fn retrieve(
        &self,
        pk: &UserPubkey,
        last_hash: &str,
    ) -> Result<Vec<Message>, ClientError> {
        self.stats.lock().await.bump_retrieve_requests();

        match *self.state.read().await {
            NodeState::Ready | NodeState::Dissolved => {}
            NodeState::AwaitingSwarm if self.config.force_start => {}
            NodeState::AwaitingSwarm => {
                return Err(ClientError::NotReady(
                    "initial swarm map not received yet".to_string(),
                ))
            }
        }

        let owned = self.is_pubkey_for_us(pk).await;
        let dissolved = *self.state.read().await == NodeState::Dissolved;
        if !owned && !dissolved && !self.config.force_start {
            return Err(ClientError::WrongSwarm(self.get_snodes_by_pk(pk).await));
        }

        let now = data::current_timestamp_ms();
        let db = self.db.lock().await;
        data::retrieve_messages(&db, pk.as_str(), last_hash, now)
            .map_err(|e| ClientError::Storage(e.to_string()))
    }

    /// Every stored message. Integration-test only.
    pub async fn get_all_messages(&self) -> Result<Vec<Message>, NodeError> {
        let db = self.db.lock().await;
        Ok(data::get_all_messages(&db)?)
    }

    // ===== commit path =====

    /// Insert into the log; on a fresh commit wake the recipient's waiters.
    async fn commit(&self, msg: &Message) -> Result<StoreOutcome, NodeError> {
        let inserted = {
            let db = self.db.lock().await;
            data::store_message(&db, msg)?
        };

        let mut stats = self.stats.lock().await;
        if inserted {
            stats.store_committed += 1;
        } else {
            stats.store_duplicates += 1;
        }
        drop(stats);

        if inserted {
            self.listeners.lock().await.notify(&msg.pub_key, msg);
            Ok(StoreOutcome::Committed)
        } else {
            Ok(StoreOutcome::Duplicate)
        }
    }

    // ===== gossip ingest =====

    /// Validate and commit one replicated message. Rejections never abort
    /// the surrounding batch.
    async fn ingest_message(&self, msg: Message, now_ms: u64) -> Option<StoreOutcome> {
        if msg.data.len() > MAX_MESSAGE_BODY || msg.hash.is_empty() {
            trace!("dropping malformed replicated message");
            return None;
        }
        if UserPubkey::create(&msg.pub_key, self.config.network.user_pubkey_size()).is_none() {
            trace!("dropping replicated message with malformed recipient");
            return None;
        }
        if !pow::valid_ttl(msg.ttl) || !pow::valid_timestamp(msg.timestamp, msg.ttl, now_ms) {
            trace!("dropping expired or out-of-window replicated message");
            return None;
        }

        // Only keep data our swarm serves; while dissolved we keep salvaging
        // our old data, so nothing new is accepted either way.
        {
            let swarm = self.swarm.read().await;
            if !swarm.is_pubkey_for_us(&msg.pub_key) {
                trace!("dropping replicated message for another swarm");
                return None;
            }
        }

        self.commit(&msg).await.ok()
    }

    /// Handle a single-message push from a sibling.
    pub async fn process_push(&self, body: &[u8]) -> Result<(), NodeError> {
        self.stats.lock().await.pushes_received += 1;
        let now = data::current_timestamp_ms();
        let mut messages = wire::deserialize_messages(body);
        let Some(msg) = messages.pop() else {
            return Err(NodeError::Wire("push carried no message".to_string()));
        };
        self.ingest_message(msg, now).await;
        Ok(())
    }

    /// Handle a batch push from `sender`. Ingests the batch and answers with
    /// our own pending delta for that peer, so one exchange converges both
    /// sides.
    pub async fn process_push_batch(&self, body: &[u8], sender_pk_hex: Option<&str>) -> Vec<u8> {
        self.stats.lock().await.push_batches_received += 1;

        let now = data::current_timestamp_ms();
        let messages = wire::deserialize_messages(body);
        let count = messages.len();
        for msg in messages {
            self.ingest_message(msg, now).await;
        }
        debug!(count, "ingested push batch");

        match sender_pk_hex {
            Some(sender) => {
                let (batch, _cursor) = self.delta_for_peer(sender, now).await;
                batch
            }
            None => Vec::new(),
        }
    }

    /// Our pending messages for `peer`, serialized, plus the cursor the
    /// caller should commit once delivery is confirmed. Reply deltas never
    /// commit (delivery is unconfirmed there); repeats are harmless because
    /// ingest is idempotent.
    pub(crate) async fn delta_for_peer(&self, peer_pk_hex: &str, now_ms: u64) -> (Vec<u8>, i64) {
        let cursor = {
            let gossip = self.gossip.lock().await;
            gossip.last_sent_rowid.get(peer_pk_hex).copied().unwrap_or(0)
        };

        let rows = {
            let db = self.db.lock().await;
            match data::messages_since_rowid(&db, cursor, now_ms, self.config.batch_max_messages) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, "failed to read gossip delta");
                    return (Vec::new(), cursor);
                }
            }
        };

        if rows.is_empty() {
            return (Vec::new(), cursor);
        }

        let new_cursor = rows.last().map(|(rowid, _)| *rowid).unwrap_or(cursor);
        let messages: Vec<Message> = rows.into_iter().map(|(_, m)| m).collect();
        (wire::serialize_messages(&messages), new_cursor)
    }

    /// Commit a delta cursor after the peer acknowledged the batch.
    pub(crate) async fn commit_delta_cursor(&self, peer_pk_hex: &str, cursor: i64) {
        let mut gossip = self.gossip.lock().await;
        let entry = gossip
            .last_sent_rowid
            .entry(peer_pk_hex.to_string())
            .or_insert(0);
        if cursor > *entry {
            *entry = cursor;
        }
    }

    // ===== peer tests =====

    /// Serve one attempt of a storage test. The request layer retries
    /// `Retry` answers on its 50 ms cadence.
    pub async fn process_storage_test_req(
        &self,
        height: u64,
        tester_address: &str,
        msg_hash: &str,
    ) -> MessageTestStatus {
        self.stats.lock().await.storage_tests_served += 1;

        let our_height = self.block_height();
        if height > our_height {
            // We have not seen that block yet; the tester may be ahead.
            return MessageTestStatus::Retry;
        }
        if our_height.saturating_sub(height) > 10 {
            debug!(height, our_height, "storage test for a stale height");
            return MessageTestStatus::WrongReq;
        }

        if !self.is_snode_address_known(tester_address).await {
            return MessageTestStatus::WrongReq;
        }

        let db = self.db.lock().await;
        match data::find_message_by_hash(&db, msg_hash) {
            Ok(Some(msg)) => MessageTestStatus::Success(msg.data),
            Ok(None) => MessageTestStatus::Retry,
            Err(e) => {
                warn!(error = %e, "storage test lookup failed");
                MessageTestStatus::Other
            }
        }
    }

    /// Serve a blockchain test: derive a height from the seed and prove our
    /// daemon can resolve it. The derivation must match what the tester
    /// computes from the same inputs; a daemon that trails the tester's
    /// height fails the lookup and the error reaches the tester as a 500.
    pub async fn perform_blockchain_test(
        &self,
        max_height: u64,
        seed: u64,
    ) -> Result<u64, NodeError> {
        self.stats.lock().await.blockchain_tests_served += 1;

        let derived_height = seed % max_height.max(1);
        self.daemon.get_block_hash(derived_height).await?;
        Ok(derived_height)
    }

    // ===== long-poll =====

    pub async fn register_listener(
        &self,
        pk: &UserPubkey,
    ) -> (u64, tokio::sync::oneshot::Receiver<Message>) {
        self.listeners.lock().await.register(pk.as_str())
    }

    pub async fn remove_listener(&self, pk: &UserPubkey, id: u64) {
        self.listeners.lock().await.remove(pk.as_str(), id);
    }

    // ===== stats =====

    pub async fn get_stats(&self) -> serde_json::Value {
        let stats = self.stats.lock().await.clone();
        let swarm = self.swarm.read().await;
        let message_count = {
            let db = self.db.lock().await;
            data::message_count(&db).unwrap_or(0)
        };

        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "pubkey": hex::encode(self.keys.legacy_pubkey()),
            "height": self.block_height(),
            "swarm_id": swarm.our_swarm_id(),
            "swarm_peers": swarm.other_nodes().len(),
            "total_stored": message_count,
            "pow_difficulty": self.get_curr_pow_difficulty(),
            "counters": serde_json::to_value(&stats).unwrap_or_default(),
        })
    }

    /// Spawn every background loop: daemon poll, gossip, cleanup, and
    /// reachability re-tests. Loops exit when `stop` drops the running flag.
    pub fn spawn_background_tasks(node: &Arc<Self>) {
        tokio::spawn(node.clone().run_block_update_loop());
        tokio::spawn(node.clone().run_gossip_loop());
        tokio::spawn(node.clone().run_cleanup_loop());
        tokio::spawn(node.clone().run_reachability_loop());
    }

    /// Signal background loops to stop.
    pub async fn stop(&self) {
        *self.running.write().await = false;
        info!("service node stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        make_block_update, make_node, make_record, pk_for_swarm, stored_message,
    };

    #[tokio::test]
    async fn test_not_ready_before_first_map() {
        let node = make_node(1).await;
        assert!(node.snode_ready().await.is_err());
        assert_eq!(node.state().await, NodeState::AwaitingSwarm);
    }

    #[tokio::test]
    async fn test_ready_after_map_containing_us() {
        let node = make_node(1).await;
        let update = make_block_update(1, "hash-a", &[(7, vec![1, 2])]);
        let events = node.apply_block_update(update).await.unwrap();

        assert_eq!(events.our_swarm_id, 7);
        assert!(node.snode_ready().await.is_ok());
        assert_eq!(node.state().await, NodeState::Ready);
    }

    #[tokio::test]
    async fn test_same_block_hash_is_skipped() {
        let node = make_node(1).await;
        let update = make_block_update(1, "hash-a", &[(7, vec![1, 2])]);
        assert!(node.apply_block_update(update.clone()).await.is_some());
        assert!(node.apply_block_update(update).await.is_none());
    }

    #[tokio::test]
    async fn test_dissolution_transitions_state() {
        let node = make_node(1).await;
        node.apply_block_update(make_block_update(1, "a", &[(7, vec![1, 2])]))
            .await;
        let events = node
            .apply_block_update(make_block_update(2, "b", &[(9, vec![2])]))
            .await
            .unwrap();

        assert!(events.dissolved);
        assert_eq!(node.state().await, NodeState::Dissolved);

        // Stores are rejected while dissolved
        let pk = pk_for_swarm(7, 64);
        let err = node
            .process_store(&pk, b"hi".to_vec(), 60_000, data::current_timestamp_ms(), "n".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_store_and_retrieve_round_trip() {
        let node = make_node(1).await;
        node.apply_block_update(make_block_update(1, "a", &[(7, vec![1])]))
            .await;

        let pk = pk_for_swarm(7, 64);
        let now = data::current_timestamp_ms();
        let nonce = pow::compute_pow(now, 60_000, pk.as_str(), b"hello", node.get_curr_pow_difficulty());

        let outcome = node
            .process_store(&pk, b"hello".to_vec(), 60_000, now, nonce.clone())
            .await
            .unwrap();
        assert_eq!(outcome, StoreOutcome::Committed);

        // Same message again is a duplicate
        let outcome = node
            .process_store(&pk, b"hello".to_vec(), 60_000, now, nonce)
            .await
            .unwrap();
        assert_eq!(outcome, StoreOutcome::Duplicate);

        let messages = node.retrieve(&pk, "").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data, b"hello");
    }

    #[tokio::test]
    async fn test_store_rejects_bad_ttl_and_timestamp() {
        let node = make_node(1).await;
        node.apply_block_update(make_block_update(1, "a", &[(7, vec![1])]))
            .await;
        let pk = pk_for_swarm(7, 64);
        let now = data::current_timestamp_ms();

        let err = node
            .process_store(&pk, b"x".to_vec(), 0, now, "n".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::BadTtl));

        let future = now + pow::SKEW_TOLERANCE_MS + 60_000;
        let err = node
            .process_store(&pk, b"x".to_vec(), 60_000, future, "n".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::BadTimestamp));
    }

    #[tokio::test]
    async fn test_store_rejects_wrong_swarm_with_members() {
        let node = make_node(1).await;
        node.apply_block_update(make_block_update(
            1,
            "a",
            &[(1000, vec![1]), (u64::MAX / 2, vec![2, 3])],
        ))
        .await;

        let foreign = pk_for_swarm(u64::MAX / 2, 64);
        let err = node
            .process_store(&foreign, b"x".to_vec(), 60_000, data::current_timestamp_ms(), "n".into())
            .await
            .unwrap_err();
        match err {
            ClientError::WrongSwarm(members) => {
                assert_eq!(members.len(), 2);
                assert!(members.contains(&make_record(2)));
            }
            other => panic!("expected WrongSwarm, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_store_rejects_bad_pow() {
        let node = make_node(1).await;
        node.set_pow_difficulty(20);
        node.apply_block_update(make_block_update(1, "a", &[(7, vec![1])]))
            .await;

        let pk = pk_for_swarm(7, 64);
        let err = node
            .process_store(&pk, b"x".to_vec(), 60_000, data::current_timestamp_ms(), "nope".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::BadPow { difficulty: 20 }));
    }

    #[tokio::test]
    async fn test_push_batch_ingest_is_idempotent() {
        let node = make_node(1).await;
        node.apply_block_update(make_block_update(1, "a", &[(7, vec![1])]))
            .await;

        let msg = stored_message(&pk_for_swarm(7, 64), "data");
        let batch = wire::serialize_messages(std::slice::from_ref(&msg));

        node.process_push_batch(&batch, None).await;
        node.process_push_batch(&batch, None).await;

        let all = node.get_all_messages().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_push_batch_drops_foreign_swarm_messages() {
        let node = make_node(1).await;
        node.apply_block_update(make_block_update(
            1,
            "a",
            &[(1000, vec![1]), (u64::MAX / 2, vec![2])],
        ))
        .await;

        let foreign = stored_message(&pk_for_swarm(u64::MAX / 2, 64), "data");
        let batch = wire::serialize_messages(std::slice::from_ref(&foreign));
        node.process_push_batch(&batch, None).await;

        assert!(node.get_all_messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_push_batch_reply_repeats_until_acknowledged() {
        let node = make_node(1).await;
        node.apply_block_update(make_block_update(1, "a", &[(7, vec![1])]))
            .await;

        let msg = stored_message(&pk_for_swarm(7, 64), "data");
        let batch = wire::serialize_messages(std::slice::from_ref(&msg));
        node.process_push_batch(&batch, None).await;

        // Reply deltas do not commit the cursor: delivery is unconfirmed.
        let peer = hex::encode([2u8; 32]);
        let reply = node.process_push_batch(&[], Some(&peer)).await;
        assert_eq!(wire::deserialize_messages(&reply).len(), 1);
        let reply = node.process_push_batch(&[], Some(&peer)).await;
        assert_eq!(wire::deserialize_messages(&reply).len(), 1);

        // A confirmed exchange commits it and silences the delta.
        let (_batch, cursor) = node.delta_for_peer(&peer, data::current_timestamp_ms()).await;
        node.commit_delta_cursor(&peer, cursor).await;
        let reply = node.process_push_batch(&[], Some(&peer)).await;
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_two_nodes_converge_after_one_exchange_cycle() {
        // N1 holds {M1, M2}, N2 holds {M2, M3}; one round trip of
        // push_batch in each direction leaves both with {M1, M2, M3}.
        let n1 = make_node(1).await;
        let n2 = make_node(2).await;
        let map = make_block_update(1, "a", &[(7, vec![1, 2])]);
        n1.apply_block_update(map.clone()).await;
        n2.apply_block_update(map).await;

        let pk = pk_for_swarm(7, 64);
        let m1 = stored_message(&pk, "m1");
        let m2 = stored_message(&pk, "m2");
        let m3 = stored_message(&pk, "m3");

        n1.process_push_batch(&wire::serialize_messages(&[m1.clone(), m2.clone()]), None)
            .await;
        n2.process_push_batch(&wire::serialize_messages(&[m2, m3]), None)
            .await;

        // N1 initiates: its delta reaches N2, and N2's reply delta for N1
        // comes back in the same exchange.
        let n1_pk = hex::encode([1u8; 32]);
        let n2_pk = hex::encode([2u8; 32]);
        let now = data::current_timestamp_ms();
        let (n1_delta, cursor) = n1.delta_for_peer(&n2_pk, now).await;
        let reply = n2.process_push_batch(&n1_delta, Some(&n1_pk)).await;
        n1.commit_delta_cursor(&n2_pk, cursor).await;
        n1.process_push_batch(&reply, None).await;

        let mut h1: Vec<String> = n1
            .get_all_messages()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.hash)
            .collect();
        let mut h2: Vec<String> = n2
            .get_all_messages()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.hash)
            .collect();
        h1.sort();
        h2.sort();
        assert_eq!(h1.len(), 3);
        assert_eq!(h1, h2);
    }

    #[tokio::test]
    async fn test_commit_wakes_long_poll_waiter() {
        let node = make_node(1).await;
        node.apply_block_update(make_block_update(1, "a", &[(7, vec![1])]))
            .await;

        let pk = pk_for_swarm(7, 64);
        let (_id, rx) = node.register_listener(&pk).await;

        let msg = stored_message(&pk, "wake up");
        let batch = wire::serialize_messages(std::slice::from_ref(&msg));
        node.process_push_batch(&batch, None).await;

        let delivered = rx.await.unwrap();
        assert_eq!(delivered.data, b"wake up");
    }

    #[tokio::test]
    async fn test_storage_test_success_and_retry() {
        let node = make_node(1).await;
        node.apply_block_update(make_block_update(5, "a", &[(7, vec![1, 2])]))
            .await;

        let tester = make_record(2);
        let msg = stored_message(&pk_for_swarm(7, 64), "tested");
        let batch = wire::serialize_messages(std::slice::from_ref(&msg));
        node.process_push_batch(&batch, None).await;

        let status = node
            .process_storage_test_req(5, tester.address(), &msg.hash)
            .await;
        assert_eq!(status, MessageTestStatus::Success(b"tested".to_vec()));

        let status = node
            .process_storage_test_req(5, tester.address(), "unknown-hash")
            .await;
        assert_eq!(status, MessageTestStatus::Retry);

        // Block we have not seen yet
        let status = node
            .process_storage_test_req(99, tester.address(), &msg.hash)
            .await;
        assert_eq!(status, MessageTestStatus::Retry);
    }

    #[tokio::test]
    async fn test_storage_test_rejects_unknown_tester() {
        let node = make_node(1).await;
        node.apply_block_update(make_block_update(5, "a", &[(7, vec![1])]))
            .await;

        let status = node
            .process_storage_test_req(5, "notarealaddress", "hash")
            .await;
        assert_eq!(status, MessageTestStatus::WrongReq);
    }

    #[tokio::test]
    async fn test_blockchain_test_derives_height() {
        let node = make_node(1).await;
        node.apply_block_update(make_block_update(100, "a", &[(7, vec![1])]))
            .await;

        let height = node.perform_blockchain_test(50, 1234).await.unwrap();
        assert_eq!(height, 1234 % 50);

        // The derivation depends only on the tester's inputs, never on our
        // own chain height.
        let height = node.perform_blockchain_test(1000, 250).await.unwrap();
        assert_eq!(height, 250);
    }
}

//! Outbound peer requests
//!
//! All snode-to-snode requests are signed: the body is hashed with blake3
//! and signed with our ed25519 key; the sender address and signature travel
//! in headers. The client is a capability trait so gossip and the tester can
//! run against a double in tests.

use async_trait::async_trait;
use serde_json::json;
use tracing::trace;

use crate::node::error::NodeError;
use crate::security::{sign, NodeKeys};
use crate::swarm::record::SnodeRecord;

use super::http;

/// A peer's answer to a storage test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTestReply {
    /// Peer holds the message; carries the payload
    Ok(Vec<u8>),
    /// Peer has not replicated it yet
    Retry,
    /// Peer considers the request malformed or impossible
    WrongRequest,
    /// Peer gave up
    Other,
}

/// Capability interface for talking to sibling snodes.
#[async_trait]
pub trait SnodeClient: Send + Sync {
    /// Push a message batch; the peer answers with its own pending delta
    /// for us (possibly empty).
    async fn push_batch(&self, peer: &SnodeRecord, batch: &[u8]) -> Result<Vec<u8>, NodeError>;

    /// Push a single-message batch (no reply delta expected).
    async fn push(&self, peer: &SnodeRecord, batch: &[u8]) -> Result<(), NodeError>;

    /// Ask the peer to prove it stores the message with `msg_hash`.
    async fn storage_test(
        &self,
        peer: &SnodeRecord,
        height: u64,
        msg_hash: &str,
    ) -> Result<StorageTestReply, NodeError>;

    /// Ask the peer to derive a block height from `seed` and look it up on
    /// its daemon.
    async fn blockchain_test(
        &self,
        peer: &SnodeRecord,
        max_height: u64,
        seed: u64,
    ) -> Result<u64, NodeError>;

    /// Unsigned liveness probe.
    async fn ping(&self, peer: &SnodeRecord) -> Result<(), NodeError>;
}

/// HTTP client used in production.
pub struct HttpSnodeClient {
    keys: NodeKeys,
    our_address: String,
}

impl HttpSnodeClient {
    pub fn new(keys: NodeKeys, our_address: String) -> Self {
        Self { keys, our_address }
    }

    fn signed_headers(&self, body: &[u8]) -> Vec<(String, String)> {
        vec![
            (
                sign::SENDER_SNODE_PUBKEY_HEADER.to_string(),
                self.our_address.clone(),
            ),
            (
                sign::SNODE_SIGNATURE_HEADER.to_string(),
                sign::sign_body(&self.keys, body),
            ),
        ]
    }

    async fn post_signed(
        &self,
        peer: &SnodeRecord,
        target: &str,
        body: &[u8],
    ) -> Result<http::HttpMessage, NodeError> {
        trace!(peer = %peer, target, "outbound snode request");
        let headers = self.signed_headers(body);
        let response = http::post(peer.ip(), peer.port(), target, &headers, body)
            .await
            .map_err(|e| NodeError::Network(format!("{} to {}: {}", target, peer, e)))?;
        if response.status != 200 {
            return Err(NodeError::Network(format!(
                "{} to {}: status {}",
                target, peer, response.status
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl SnodeClient for HttpSnodeClient {
    async fn push_batch(&self, peer: &SnodeRecord, batch: &[u8]) -> Result<Vec<u8>, NodeError> {
        let response = self.post_signed(peer, "/swarms/push_batch/v1", batch).await?;
        Ok(response.body)
    }

    async fn push(&self, peer: &SnodeRecord, batch: &[u8]) -> Result<(), NodeError> {
        self.post_signed(peer, "/swarms/push/v1", batch).await?;
        Ok(())
    }

    async fn storage_test(
        &self,
        peer: &SnodeRecord,
        height: u64,
        msg_hash: &str,
    ) -> Result<StorageTestReply, NodeError> {
        let body = json!({ "height": height, "hash": msg_hash }).to_string();
        let response = self
            .post_signed(peer, "/swarms/storage_test/v1", body.as_bytes())
            .await?;

        let parsed: serde_json::Value = serde_json::from_slice(&response.body)
            .map_err(|e| NodeError::Network(format!("storage test reply: bad json: {}", e)))?;

        match parsed.get("status").and_then(|s| s.as_str()) {
            Some("OK") => {
                let value = parsed
                    .get("value")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                Ok(StorageTestReply::Ok(value.as_bytes().to_vec()))
            }
            Some("retry") => Ok(StorageTestReply::Retry),
            Some("wrong request") => Ok(StorageTestReply::WrongRequest),
            _ => Ok(StorageTestReply::Other),
        }
    }

    async fn blockchain_test(
        &self,
        peer: &SnodeRecord,
        max_height: u64,
        seed: u64,
    ) -> Result<u64, NodeError> {
        let body = json!({ "max_height": max_height, "seed": seed }).to_string();
        let response = self
            .post_signed(peer, "/swarms/blockchain_test/v1", body.as_bytes())
            .await?;

        let parsed: serde_json::Value = serde_json::from_slice(&response.body)
            .map_err(|e| NodeError::Network(format!("blockchain test reply: bad json: {}", e)))?;

        parsed
            .get("res_height")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| NodeError::Network("blockchain test reply: no res_height".into()))
    }

    async fn ping(&self, peer: &SnodeRecord) -> Result<(), NodeError> {
        let response = http::post(peer.ip(), peer.port(), "/swarms/ping_test/v1", &[], b"")
            .await
            .map_err(|e| NodeError::Network(format!("ping to {}: {}", peer, e)))?;
        if response.status != 200 {
            return Err(NodeError::Network(format!(
                "ping to {}: status {}",
                peer, response.status
            )));
        }
        Ok(())
    }
}

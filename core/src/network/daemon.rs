//! havend RPC client
//!
//! The daemon is the node's source of truth: it hands out the service node
//! keys at startup and the full swarm composition on every poll. All calls
//! are JSON-RPC 2.0 POSTs to `/json_rpc` on the local daemon.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::trace;

use crate::node::error::NodeError;
use crate::swarm::mapping::{BlockUpdate, SwarmInfo};
use crate::swarm::record::SnodeRecord;

use super::http;

/// The three hex-encoded secrets returned by `get_service_node_privkey`.
#[derive(Debug, Clone)]
pub struct PrivkeyResponse {
    pub legacy: String,
    pub ed25519: String,
    pub x25519: String,
}

/// Capability interface over the daemon, so the supervisor and tasks can be
/// driven by a test double.
#[async_trait]
pub trait DaemonRpc: Send + Sync {
    /// One-shot at startup; the caller retries until the daemon answers.
    async fn get_service_node_privkey(&self) -> Result<PrivkeyResponse, NodeError>;

    /// Full network composition plus block status.
    async fn get_service_nodes(&self) -> Result<BlockUpdate, NodeError>;

    /// Hash of the block at `height`, for blockchain tests.
    async fn get_block_hash(&self, height: u64) -> Result<String, NodeError>;

    /// Report a persistently unreachable peer. Fire-and-forget semantics.
    async fn report_peer_down(&self, pubkey_hex: &str) -> Result<(), NodeError>;
}

/// JSON-RPC client against a real havend.
pub struct DaemonClient {
    rpc_ip: String,
    rpc_port: u16,
}

impl DaemonClient {
    pub fn new(rpc_ip: String, rpc_port: u16) -> Self {
        Self { rpc_ip, rpc_port }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, NodeError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "0",
            "method": method,
            "params": params,
        });

        trace!(method, "making havend request");

        let response = http::post(
            &self.rpc_ip,
            self.rpc_port,
            "/json_rpc",
            &[],
            body.to_string().as_bytes(),
        )
        .await
        .map_err(|e| NodeError::Daemon(format!("{} failed: {}", method, e)))?;

        if response.status != 200 {
            return Err(NodeError::Daemon(format!(
                "{} returned status {}",
                method, response.status
            )));
        }

        let parsed: Value = serde_json::from_slice(&response.body)
            .map_err(|e| NodeError::Daemon(format!("{}: bad json: {}", method, e)))?;

        parsed
            .get("result")
            .cloned()
            .ok_or_else(|| NodeError::Daemon(format!("{}: no result field", method)))
    }
}

#[async_trait]
impl DaemonRpc for DaemonClient {
    async fn get_service_node_privkey(&self) -> Result<PrivkeyResponse, NodeError> {
        let result = self.call("get_service_node_privkey", json!({})).await?;
        parse_privkey_response(&result)
    }

    async fn get_service_nodes(&self) -> Result<BlockUpdate, NodeError> {
        let result = self.call("get_n_service_nodes", json!({})).await?;
        parse_block_update(&result)
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, NodeError> {
        let result = self
            .call("get_block_hash", json!({ "height": height }))
            .await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .or_else(|| result.get("hash").and_then(|h| h.as_str()).map(|s| s.to_string()))
            .ok_or_else(|| NodeError::Daemon("get_block_hash: no hash in result".into()))
    }

    async fn report_peer_down(&self, pubkey_hex: &str) -> Result<(), NodeError> {
        self.call(
            "report_peer_storage_server_down",
            json!({ "pubkey": pubkey_hex }),
        )
        .await
        .map(|_| ())
    }
}

fn get_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, NodeError> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| NodeError::Daemon(format!("missing field `{}`", field)))
}

fn hex32(hex_str: &str) -> Result<[u8; 32], NodeError> {
    let bytes = hex::decode(hex_str)
        .map_err(|_| NodeError::Daemon(format!("key is not hex: {}", hex_str)))?;
    bytes
        .try_into()
        .map_err(|_| NodeError::Daemon("key is not 32 bytes".into()))
}

/// Parse the `get_service_node_privkey` result, validating that all three
/// keys are 64 hex characters.
pub fn parse_privkey_response(result: &Value) -> Result<PrivkeyResponse, NodeError> {
    let legacy = get_str(result, "service_node_privkey")?.to_string();
    let ed25519 = get_str(result, "service_node_ed25519_privkey")?.to_string();
    let x25519 = get_str(result, "service_node_x25519_privkey")?.to_string();

    for key in [&legacy, &ed25519, &x25519] {
        hex32(key)?;
    }

    Ok(PrivkeyResponse {
        legacy,
        ed25519,
        x25519,
    })
}

/// Parse a `get_n_service_nodes` result into a block update.
///
/// Unfunded entries are skipped; funded-but-inactive ones land in the
/// decommissioned list. Entries with missing keys or an unparsable IP are
/// skipped individually rather than failing the whole update.
pub fn parse_block_update(result: &Value) -> Result<BlockUpdate, NodeError> {
    let height = result
        .get("height")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| NodeError::Daemon("missing field `height`".into()))?;
    let block_hash = get_str(result, "block_hash")?.to_string();
    let hardfork = result
        .get("hardfork")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

    let states = result
        .get("service_node_states")
        .and_then(|v| v.as_array())
        .ok_or_else(|| NodeError::Daemon("missing field `service_node_states`".into()))?;

    let mut swarms: Vec<SwarmInfo> = Vec::new();
    let mut decommissioned = Vec::new();

    for state in states {
        let funded = state.get("funded").and_then(|v| v.as_bool()).unwrap_or(false);
        if !funded {
            continue;
        }

        let record = match parse_record(state) {
            Ok(r) => r,
            Err(e) => {
                trace!(error = %e, "skipping malformed service node state");
                continue;
            }
        };

        let active = state.get("active").and_then(|v| v.as_bool()).unwrap_or(true);
        if !active {
            decommissioned.push(record);
            continue;
        }

        let swarm_id = state
            .get("swarm_id")
            .and_then(|v| v.as_u64())
            .unwrap_or(crate::swarm::INVALID_SWARM_ID);
        if swarm_id == crate::swarm::INVALID_SWARM_ID {
            continue;
        }

        match swarms.iter_mut().find(|s| s.swarm_id == swarm_id) {
            Some(swarm) => swarm.snodes.push(record),
            None => swarms.push(SwarmInfo {
                swarm_id,
                snodes: vec![record],
            }),
        }
    }

    swarms.sort_by_key(|s| s.swarm_id);

    Ok(BlockUpdate {
        swarms,
        decommissioned,
        height,
        block_hash,
        hardfork,
    })
}

fn parse_record(state: &Value) -> Result<SnodeRecord, NodeError> {
    let pubkey = hex32(get_str(state, "service_node_pubkey")?)?;
    let x25519 = hex32(get_str(state, "pubkey_x25519")?)?;
    let ed25519 = hex32(get_str(state, "pubkey_ed25519")?)?;
    let ip = get_str(state, "public_ip")?.to_string();
    let port = state
        .get("storage_port")
        .and_then(|v| v.as_u64())
        .filter(|&p| p > 0 && p <= u16::MAX as u64)
        .ok_or_else(|| NodeError::Daemon("missing or invalid `storage_port`".into()))? as u16;

    Ok(SnodeRecord::new(ip, port, pubkey, x25519, ed25519))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(seed: u8, swarm_id: u64, funded: bool, active: bool) -> Value {
        json!({
            "service_node_pubkey": hex::encode([seed; 32]),
            "pubkey_x25519": hex::encode([seed; 32]),
            "pubkey_ed25519": hex::encode([seed; 32]),
            "public_ip": format!("10.0.0.{}", seed),
            "storage_port": 22020,
            "swarm_id": swarm_id,
            "funded": funded,
            "active": active,
        })
    }

    #[test]
    fn test_parse_block_update_groups_by_swarm() {
        let result = json!({
            "height": 1234,
            "block_hash": "abcd",
            "hardfork": 16,
            "service_node_states": [
                state(1, 7, true, true),
                state(2, 7, true, true),
                state(3, 9, true, true),
            ],
        });

        let update = parse_block_update(&result).unwrap();
        assert_eq!(update.height, 1234);
        assert_eq!(update.block_hash, "abcd");
        assert_eq!(update.swarms.len(), 2);
        assert_eq!(update.swarms[0].swarm_id, 7);
        assert_eq!(update.swarms[0].snodes.len(), 2);
        assert_eq!(update.swarms[1].snodes.len(), 1);
    }

    #[test]
    fn test_parse_block_update_filters_unfunded() {
        let result = json!({
            "height": 1,
            "block_hash": "x",
            "service_node_states": [
                state(1, 7, false, true),
                state(2, 7, true, true),
            ],
        });

        let update = parse_block_update(&result).unwrap();
        assert_eq!(update.swarms[0].snodes.len(), 1);
    }

    #[test]
    fn test_parse_block_update_decommissioned() {
        let result = json!({
            "height": 1,
            "block_hash": "x",
            "service_node_states": [
                state(1, 7, true, true),
                state(2, 7, true, false),
            ],
        });

        let update = parse_block_update(&result).unwrap();
        assert_eq!(update.swarms[0].snodes.len(), 1);
        assert_eq!(update.decommissioned.len(), 1);
    }

    #[test]
    fn test_parse_block_update_skips_malformed_entry() {
        let result = json!({
            "height": 1,
            "block_hash": "x",
            "service_node_states": [
                { "funded": true, "service_node_pubkey": "zz" },
                state(2, 7, true, true),
            ],
        });

        let update = parse_block_update(&result).unwrap();
        assert_eq!(update.swarms.len(), 1);
        assert_eq!(update.swarms[0].snodes.len(), 1);
    }

    #[test]
    fn test_parse_block_update_requires_height() {
        let result = json!({ "block_hash": "x", "service_node_states": [] });
        assert!(parse_block_update(&result).is_err());
    }

    #[test]
    fn test_parse_privkey_response() {
        let result = json!({
            "service_node_privkey": hex::encode([1u8; 32]),
            "service_node_ed25519_privkey": hex::encode([2u8; 32]),
            "service_node_x25519_privkey": hex::encode([3u8; 32]),
        });
        let keys = parse_privkey_response(&result).unwrap();
        assert_eq!(keys.legacy, hex::encode([1u8; 32]));
    }

    #[test]
    fn test_parse_privkey_response_rejects_bad_hex() {
        let result = json!({
            "service_node_privkey": "nothex",
            "service_node_ed25519_privkey": hex::encode([2u8; 32]),
            "service_node_x25519_privkey": hex::encode([3u8; 32]),
        });
        assert!(parse_privkey_response(&result).is_err());
    }
}

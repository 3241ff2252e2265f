//! Request layer
//!
//! Routes the snode endpoints onto the supervisor. One request per
//! connection; every connection runs under the session deadline, and the
//! accept loop backs off briefly when the process runs out of descriptors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, trace, warn};

use crate::logging::LogBuffer;
use crate::node::core::{ClientError, ServiceNode};
use crate::node::types::{MessageTestStatus, StoreOutcome, UserPubkey};
use crate::security::{SENDER_SNODE_PUBKEY_HEADER, SNODE_SIGNATURE_HEADER};
use crate::swarm::record::SnodeRecord;

use super::http::{self, HttpMessage};

/// Header a client sets to park an empty retrieve.
pub const LONG_POLL_HEADER: &str = "X-Haven-Long-Poll";

/// Delay before accepting again after an fd-exhaustion error.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Minimum spacing between `/get_logs/v1` responses.
const LOGS_MIN_INTERVAL: Duration = Duration::from_secs(1);

struct ServerState {
    node: Arc<ServiceNode>,
    log_buffer: Arc<LogBuffer>,
    logs_last_served: tokio::sync::Mutex<Option<Instant>>,
}

/// A response ready for serialization.
struct Reply {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Reply {
    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.into().into_bytes(),
        }
    }

    fn json(status: u16, value: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }

    fn empty(status: u16) -> Self {
        Self::text(status, "")
    }
}

/// Bind and serve until the node stops.
pub async fn run_server(
    node: Arc<ServiceNode>,
    log_buffer: Arc<LogBuffer>,
) -> std::io::Result<()> {
    let addr = (node.config.ip.as_str(), node.config.port);
    let listener = TcpListener::bind(addr).await?;
    info!(ip = %node.config.ip, port = node.config.port, "listening");

    let state = Arc::new(ServerState {
        node: node.clone(),
        log_buffer,
        logs_last_served: tokio::sync::Mutex::new(None),
    });

    loop {
        if !*node.running.read().await {
            break;
        }

        match listener.accept().await {
            Ok((socket, remote)) => {
                // The accept time is the shared origin for the session
                // deadline and the storage-test retry window.
                let accepted_at = Instant::now();
                trace!(remote = %remote, "connection accepted");
                state.node.stats.lock().await.connections_in += 1;

                let state = state.clone();
                let deadline = Duration::from_secs(state.node.config.session_deadline_secs);
                tokio::spawn(async move {
                    let remote_ip = remote.ip().to_string();
                    if tokio::time::timeout(
                        deadline,
                        handle_connection(state, socket, remote_ip, accepted_at),
                    )
                    .await
                    .is_err()
                    {
                        debug!(remote = %remote, "closing connection: session deadline");
                    }
                });
            }
            Err(e) => {
                // EMFILE-class errors clear up once connections drain; keep
                // the acceptor alive and retry shortly.
                warn!(error = %e, "accept failed, backing off");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }

    Ok(())
}

async fn handle_connection(
    state: Arc<ServerState>,
    mut socket: TcpStream,
    remote_ip: String,
    accepted_at: Instant,
) {
    let request = match http::read_message(&mut socket).await {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "failed to read request");
            return;
        }
    };

    let reply = process_request(&state, &request, &remote_ip, accepted_at).await;
    let bytes = http::build_response(reply.status, reply.content_type, &[], &reply.body);
    if let Err(e) = socket.write_all(&bytes).await {
        debug!(error = %e, "failed to write response");
    }
    let _ = socket.shutdown().await;
}

async fn process_request(
    state: &ServerState,
    request: &HttpMessage,
    remote_ip: &str,
    accepted_at: Instant,
) -> Reply {
    match (request.method.as_str(), request.target.as_str()) {
        // Liveness probe works regardless of node state.
        ("POST", "/swarms/ping_test/v1") => Reply::empty(200),

        ("POST", "/storage_rpc/v1") => process_client_req(state, request, remote_ip).await,

        ("POST", "/swarms/push/v1")
        | ("POST", "/swarms/push_batch/v1")
        | ("POST", "/swarms/storage_test/v1")
        | ("POST", "/swarms/blockchain_test/v1") => {
            if let Err(reason) = state.node.snode_ready().await {
                debug!(reason = %reason, "ignoring snode request; not ready");
                return Reply::text(503, format!("Service node is not ready: {}\n", reason));
            }
            process_swarm_req(state, request, accepted_at).await
        }

        ("GET", "/get_stats/v1") => Reply::json(200, state.node.get_stats().await),

        ("GET", "/get_logs/v1") => process_get_logs(state).await,

        ("POST", target) => {
            debug!(target, "unknown target for POST");
            Reply::text(404, format!("unknown target for POST: {}", target))
        }
        ("GET", target) => Reply::text(404, format!("unknown target for GET: {}", target)),
        _ => Reply::empty(400),
    }
}

// ===== signed peer endpoints =====

/// Check the signature headers of a peer request. Returns the sender's bare
/// snode address.
async fn validate_snode_request(state: &ServerState, request: &HttpMessage) -> Result<String, Reply> {
    let (Some(sender), Some(signature)) = (
        request.header(SENDER_SNODE_PUBKEY_HEADER),
        request.header(SNODE_SIGNATURE_HEADER),
    ) else {
        debug!("missing signature headers on snode request");
        return Err(Reply::text(401, "Missing signature headers\n"));
    };

    if !state.node.is_snode_address_known(sender).await {
        debug!(sender, "discarding signature from unknown service node");
        return Err(Reply::text(401, "Unknown service node\n"));
    }

    if !state
        .node
        .verify_snode_signature(sender, signature, &request.body)
        .await
    {
        debug!(sender, "could not verify snode signature");
        return Err(Reply::text(401, "Could not verify batch signature\n"));
    }

    if state
        .node
        .rate_limiter
        .lock()
        .await
        .should_rate_limit_snode(sender)
    {
        return Err(Reply::text(429, "Too many requests\n"));
    }

    Ok(sender.to_string())
}

async fn process_swarm_req(
    state: &ServerState,
    request: &HttpMessage,
    accepted_at: Instant,
) -> Reply {
    let sender = match validate_snode_request(state, request).await {
        Ok(sender) => sender,
        Err(reply) => return reply,
    };

    match request.target.as_str() {
        "/swarms/push/v1" => match state.node.process_push(&request.body).await {
            Ok(()) => Reply::empty(200),
            Err(e) => Reply::text(400, format!("{}\n", e)),
        },

        "/swarms/push_batch/v1" => {
            let sender_pk = state
                .node
                .swarm
                .read()
                .await
                .find_node_by_address(&sender)
                .map(|r| r.pubkey_hex());
            let reply_batch = state
                .node
                .process_push_batch(&request.body, sender_pk.as_deref())
                .await;
            Reply {
                status: 200,
                content_type: "application/octet-stream",
                body: reply_batch,
            }
        }

        "/swarms/storage_test/v1" => {
            process_storage_test(state, request, &sender, accepted_at).await
        }

        "/swarms/blockchain_test/v1" => process_blockchain_test(state, request).await,

        target => Reply::text(404, format!("unknown target: {}", target)),
    }
}

async fn process_storage_test(
    state: &ServerState,
    request: &HttpMessage,
    sender: &str,
    accepted_at: Instant,
) -> Reply {
    let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
        debug!("bad snode test request: invalid json");
        return Reply::text(400, "invalid json\n");
    };
    let (Some(height), Some(msg_hash)) = (
        body.get("height").and_then(|v| v.as_u64()),
        body.get("hash").and_then(|v| v.as_str()),
    ) else {
        debug!("bad snode test request: missing fields in json");
        return Reply::text(400, "Bad snode test request: missing fields in json\n");
    };

    // Answer `retry` by holding the request and re-testing on a fixed
    // cadence. The window is measured from the connection's accept time,
    // the same origin as the session deadline, and another retry is only
    // scheduled while its wake-up still falls inside the window, so the
    // final reply is written before the deadline can cancel us.
    let retry_period = Duration::from_millis(state.node.config.storage_test_retry_ms);
    let window = Duration::from_secs(state.node.config.storage_test_window_secs);
    let mut attempts = 0u64;

    loop {
        attempts += 1;
        match state
            .node
            .process_storage_test_req(height, sender, msg_hash)
            .await
        {
            MessageTestStatus::Success(value) => {
                debug!(attempts, "storage test success");
                return Reply::json(
                    200,
                    json!({
                        "status": "OK",
                        "value": String::from_utf8_lossy(&value),
                    }),
                );
            }
            MessageTestStatus::WrongReq => {
                return Reply::json(200, json!({ "status": "wrong request" }));
            }
            MessageTestStatus::Retry if accepted_at.elapsed() + retry_period < window => {
                tokio::time::sleep(retry_period).await;
            }
            MessageTestStatus::Retry | MessageTestStatus::Other => {
                debug!(attempts, "storage test failed");
                return Reply::json(200, json!({ "status": "other" }));
            }
        }
    }
}

async fn process_blockchain_test(state: &ServerState, request: &HttpMessage) -> Reply {
    let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
        return Reply::text(400, "invalid json\n");
    };
    let (Some(max_height), Some(seed)) = (
        body.get("max_height").and_then(|v| v.as_u64()),
        body.get("seed").and_then(|v| v.as_u64()),
    ) else {
        return Reply::text(400, "Bad snode test request: missing fields in json\n");
    };

    match state.node.perform_blockchain_test(max_height, seed).await {
        Ok(res_height) => Reply::json(200, json!({ "res_height": res_height })),
        Err(e) => {
            warn!(error = %e, "blockchain test failed against our daemon");
            Reply::text(500, "daemon unavailable\n")
        }
    }
}

// ===== client RPC =====

fn snodes_to_json(snodes: &[SnodeRecord]) -> Value {
    let entries: Vec<Value> = snodes
        .iter()
        .map(|sn| {
            json!({
                "address": sn.snode_address(),
                "pubkey_x25519": hex::encode(sn.pubkey_x25519()),
                "pubkey_ed25519": hex::encode(sn.pubkey_ed25519()),
                "port": sn.port().to_string(),
                "ip": sn.ip(),
            })
        })
        .collect();
    json!({ "snodes": entries })
}

fn client_error_reply(err: ClientError) -> Reply {
    match err {
        ClientError::NotReady(reason) => {
            Reply::text(503, format!("Service node is not ready: {}\n", reason))
        }
        ClientError::WrongSwarm(members) => Reply::json(421, snodes_to_json(&members)),
        ClientError::BodyTooLarge => Reply::text(
            400,
            format!(
                "Message body exceeds maximum allowed length of {}\n",
                crate::node::types::MAX_MESSAGE_BODY
            ),
        ),
        ClientError::BadTtl => Reply::text(403, "Provided TTL is not valid.\n"),
        ClientError::BadTimestamp => Reply::text(406, "Timestamp error: check your clock\n"),
        ClientError::BadPow { difficulty } => Reply::json(432, json!({ "difficulty": difficulty })),
        ClientError::Storage(e) => Reply::text(500, format!("{}\n", e)),
    }
}

/// A `ttl`/`timestamp` field arrives as a decimal string from most clients;
/// accept a bare number too.
fn param_u64(params: &Value, field: &str) -> Option<u64> {
    match params.get(field)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn param_str<'a>(params: &'a Value, field: &str) -> Option<&'a str> {
    params.get(field).and_then(|v| v.as_str())
}

async fn process_client_req(state: &ServerState, request: &HttpMessage, remote_ip: &str) -> Reply {
    if state
        .node
        .rate_limiter
        .lock()
        .await
        .should_rate_limit_client(remote_ip)
    {
        debug!("rate limiting client request");
        return Reply::text(429, "too many requests\n");
    }

    let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
        debug!("bad client request: invalid json");
        return Reply::text(400, "invalid json\n");
    };

    let Some(method) = body.get("method").and_then(|m| m.as_str()) else {
        return Reply::text(400, "invalid json: no `method` field\n");
    };
    let Some(params) = body.get("params").filter(|p| p.is_object()) else {
        return Reply::text(400, "invalid json: no `params` field\n");
    };

    match method {
        "store" => process_store(state, params).await,
        "retrieve" => process_retrieve(state, request, params).await,
        "get_snodes_for_pubkey" => process_snodes_by_pk(state, params).await,
        other => {
            debug!(method = other, "bad client request: unknown method");
            Reply::text(400, format!("no method {}\n", other))
        }
    }
}

fn parse_pubkey(state: &ServerState, params: &Value) -> Result<UserPubkey, Reply> {
    let size = state.node.config.network.user_pubkey_size();
    let Some(pk) = param_str(params, "pubKey") else {
        return Err(Reply::text(400, "invalid json: no `pubKey` field\n"));
    };
    UserPubkey::create(pk, size)
        .ok_or_else(|| Reply::text(400, format!("Pubkey must be {} characters long\n", size)))
}

async fn process_store(state: &ServerState, params: &Value) -> Reply {
    for field in ["pubKey", "ttl", "nonce", "timestamp", "data"] {
        if params.get(field).is_none() {
            debug!(field, "bad client request: missing field");
            return Reply::text(400, format!("invalid json: no `{}` field\n", field));
        }
    }

    let pk = match parse_pubkey(state, params) {
        Ok(pk) => pk,
        Err(reply) => return reply,
    };
    let Some(ttl) = param_u64(params, "ttl") else {
        return Reply::text(403, "Provided TTL is not valid.\n");
    };
    let Some(timestamp) = param_u64(params, "timestamp") else {
        return Reply::text(406, "Timestamp error: check your clock\n");
    };
    let data = param_str(params, "data").unwrap_or_default().as_bytes().to_vec();
    let nonce = param_str(params, "nonce").unwrap_or_default().to_string();

    match state.node.process_store(&pk, data, ttl, timestamp, nonce).await {
        Ok(StoreOutcome::Committed) | Ok(StoreOutcome::Duplicate) => Reply::json(
            200,
            json!({ "difficulty": state.node.get_curr_pow_difficulty() }),
        ),
        Err(err) => client_error_reply(err),
    }
}

async fn process_retrieve(state: &ServerState, request: &HttpMessage, params: &Value) -> Reply {
    for field in ["pubKey", "lastHash"] {
        if params.get(field).is_none() {
            return Reply::text(400, format!("invalid json: no `{}` field\n", field));
        }
    }

    let pk = match parse_pubkey(state, params) {
        Ok(pk) => pk,
        Err(reply) => return reply,
    };
    let last_hash = param_str(params, "lastHash").unwrap_or_default();

    let messages = match state.node.retrieve(&pk, last_hash).await {
        Ok(messages) => messages,
        Err(err) => return client_error_reply(err),
    };

    let long_poll = request.header(LONG_POLL_HEADER).is_some();
    if messages.is_empty() && long_poll {
        return long_poll_wait(state, &pk).await;
    }

    respond_with_messages(&messages)
}

/// Park until a commit for this recipient or the long-poll deadline.
async fn long_poll_wait(state: &ServerState, pk: &UserPubkey) -> Reply {
    let (waiter_id, rx) = state.node.register_listener(pk).await;
    let deadline = Duration::from_secs(state.node.config.long_poll_timeout_secs);

    let reply = match tokio::time::timeout(deadline, rx).await {
        Ok(Ok(msg)) => {
            trace!("long poll woken by store");
            respond_with_messages(std::slice::from_ref(&msg))
        }
        // Deadline passed, or the notifier dropped us: empty result either way
        _ => respond_with_messages(&[]),
    };

    state.node.remove_listener(pk, waiter_id).await;
    reply
}

fn respond_with_messages(messages: &[crate::node::types::Message]) -> Reply {
    let entries: Vec<Value> = messages
        .iter()
        .map(|m| {
            json!({
                "hash": m.hash,
                "expiration": m.expiration(),
                "data": String::from_utf8_lossy(&m.data),
            })
        })
        .collect();
    Reply::json(200, json!({ "messages": entries }))
}

async fn process_snodes_by_pk(state: &ServerState, params: &Value) -> Reply {
    let pk = match parse_pubkey(state, params) {
        Ok(pk) => pk,
        Err(reply) => return reply,
    };
    let nodes = state.node.get_snodes_by_pk(&pk).await;
    Reply::json(200, snodes_to_json(&nodes))
}

// ===== diagnostics =====

async fn process_get_logs(state: &ServerState) -> Reply {
    let mut last = state.logs_last_served.lock().await;
    let now = Instant::now();
    if let Some(prev) = *last {
        if now.duration_since(prev) < LOGS_MIN_INTERVAL {
            return Reply::text(429, "too many requests\n");
        }
    }
    *last = Some(now);

    Reply::json(200, json!({ "log": state.log_buffer.snapshot() }))
}

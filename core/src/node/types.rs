//! Shared node types
//!
//! User pubkeys, stored messages, and the small enums passed between the
//! request layer and the node.

use serde::{Deserialize, Serialize};

/// Maximum decoded client message body in bytes.
///
/// Roughly corresponds to 2000 characters of plaintext after client-side
/// encoding, rounded up.
pub const MAX_MESSAGE_BODY: usize = 3100;

/// Which network this node serves. Affects the expected user pubkey
/// length and the default daemon RPC port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Stagenet,
}

impl Network {
    /// Expected user pubkey length in hex characters, including the
    /// leading network-tag byte.
    pub fn user_pubkey_size(&self) -> usize {
        match self {
            Network::Mainnet => 64,
            Network::Stagenet => 64,
        }
    }

    /// Default havend JSON-RPC port.
    pub fn default_daemon_rpc_port(&self) -> u16 {
        match self {
            Network::Mainnet => 19994,
            Network::Stagenet => 39994,
        }
    }
}

/// A validated recipient public key.
///
/// Stored as the lowercase hex string clients submit. The first byte is a
/// network tag and is ignored by swarm placement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserPubkey(String);

impl UserPubkey {
    /// Validate and wrap a client-supplied pubkey.
    ///
    /// Rejects anything that is not exactly `pubkey_size` lowercase hex
    /// characters.
    pub fn create(pk: &str, pubkey_size: usize) -> Option<Self> {
        if pk.len() != pubkey_size {
            return None;
        }
        if !pk
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return None;
        }
        Some(UserPubkey(pk.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Log output hides most of the key.
impl std::fmt::Display for UserPubkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pk = &self.0;
        if pk.len() > 5 {
            write!(f, "{}...{}", &pk[..2], &pk[pk.len() - 3..])
        } else {
            write!(f, "{}", pk)
        }
    }
}

/// A message as received from a client and replicated between snodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Recipient pubkey (hex)
    pub pub_key: String,
    /// Opaque ciphertext payload
    pub data: Vec<u8>,
    /// Deduplication hash, set by the PoW checker
    pub hash: String,
    /// Lifetime in milliseconds
    pub ttl: u64,
    /// Client wall clock at submission, milliseconds since epoch
    pub timestamp: u64,
    /// Proof-of-work nonce
    pub nonce: String,
}

impl Message {
    /// Expiry instant in milliseconds since epoch.
    pub fn expiration(&self) -> u64 {
        self.timestamp.saturating_add(self.ttl)
    }
}

/// Outcome of a client store request against the local log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// New entry committed; long-poll waiters were woken
    Committed,
    /// Entry already present, silently dropped
    Duplicate,
}

/// Result of serving a storage test request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageTestStatus {
    /// Message found; carries the stored payload
    Success(Vec<u8>),
    /// Not replicated yet (or block not seen yet), caller should retry
    Retry,
    /// Malformed or impossible request
    WrongReq,
    /// Gave up
    Other,
}

/// Node lifecycle, as observed by `snode_ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Keys are set but no swarm map containing us has arrived
    AwaitingSwarm,
    /// Serving requests
    Ready,
    /// Our swarm disappeared from the map; stores rejected, retrieves served
    Dissolved,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_pubkey_accepts_valid_hex() {
        let pk = "05".repeat(32);
        assert!(UserPubkey::create(&pk, 64).is_some());
    }

    #[test]
    fn test_user_pubkey_rejects_wrong_length() {
        assert!(UserPubkey::create("abcd", 64).is_none());
        let long = "0".repeat(65);
        assert!(UserPubkey::create(&long, 64).is_none());
    }

    #[test]
    fn test_user_pubkey_rejects_non_hex() {
        let pk = "zz".repeat(32);
        assert!(UserPubkey::create(&pk, 64).is_none());
        let upper = "AB".repeat(32);
        assert!(UserPubkey::create(&upper, 64).is_none());
    }

    #[test]
    fn test_user_pubkey_display_obfuscates() {
        let pk = UserPubkey::create(&"ab".repeat(32), 64).unwrap();
        let shown = pk.to_string();
        assert!(shown.starts_with("ab..."));
        assert!(shown.len() < 10);
    }

    #[test]
    fn test_message_expiration() {
        let msg = Message {
            pub_key: "ab".repeat(32),
            data: b"hi".to_vec(),
            hash: "h".into(),
            ttl: 1000,
            timestamp: 5000,
            nonce: "n".into(),
        };
        assert_eq!(msg.expiration(), 6000);
    }

    #[test]
    fn test_network_defaults() {
        assert_eq!(Network::Mainnet.default_daemon_rpc_port(), 19994);
        assert_eq!(Network::Stagenet.default_daemon_rpc_port(), 39994);
        assert_eq!(Network::Mainnet.user_pubkey_size(), 64);
    }
}

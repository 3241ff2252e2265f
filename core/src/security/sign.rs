//! Peer request signatures
//!
//! Outbound peer requests carry two headers: the sender's legacy pubkey in
//! z-base-32 and an ed25519 signature over the blake3 hash of the request
//! body. Receivers look the sender up in the funded-node index before
//! verifying; unknown or unverifiable senders are rejected with 401.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Header carrying the sender's bare snode address (z-base-32, no suffix).
pub const SENDER_SNODE_PUBKEY_HEADER: &str = "X-Haven-Sender-Snode-PubKey";
/// Header carrying the base64 signature over the body hash.
pub const SNODE_SIGNATURE_HEADER: &str = "X-Haven-Snode-Signature";

/// This node's signing identity, fetched from havend at startup.
#[derive(Clone)]
pub struct NodeKeys {
    /// Legacy keypair; its pubkey identifies the node everywhere
    pub legacy: SigningKey,
    /// ed25519 keypair used for peer signatures
    pub ed25519: SigningKey,
    /// x25519 secret, kept for the channel-encryption layer
    pub x25519_secret: [u8; 32],
}

impl NodeKeys {
    /// Build from the three 32-byte secrets returned by
    /// `get_service_node_privkey`.
    pub fn from_secrets(legacy: [u8; 32], ed25519: [u8; 32], x25519: [u8; 32]) -> Self {
        Self {
            legacy: SigningKey::from_bytes(&legacy),
            ed25519: SigningKey::from_bytes(&ed25519),
            x25519_secret: x25519,
        }
    }

    /// Our legacy public key bytes.
    pub fn legacy_pubkey(&self) -> [u8; 32] {
        self.legacy.verifying_key().to_bytes()
    }

    /// Our ed25519 public key bytes.
    pub fn ed25519_pubkey(&self) -> [u8; 32] {
        self.ed25519.verifying_key().to_bytes()
    }
}

impl std::fmt::Debug for NodeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeys")
            .field("legacy_pubkey", &hex::encode(self.legacy_pubkey()))
            .field("ed25519_pubkey", &hex::encode(self.ed25519_pubkey()))
            .field("x25519_secret", &"[REDACTED]")
            .finish()
    }
}

/// Hash a request body the way both sides of a signed peer request do.
pub fn hash_body(body: &[u8]) -> [u8; 32] {
    *blake3::hash(body).as_bytes()
}

/// Sign a request body, returning the base64 signature header value.
pub fn sign_body(keys: &NodeKeys, body: &[u8]) -> String {
    let digest = hash_body(body);
    let sig = keys.ed25519.sign(&digest);
    B64.encode(sig.to_bytes())
}

/// Verify a base64 signature over `body` against an ed25519 pubkey.
pub fn verify_body(signature_b64: &str, body: &[u8], ed25519_pubkey: &[u8; 32]) -> bool {
    let Ok(sig_bytes) = B64.decode(signature_b64) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(ed25519_pubkey) else {
        return false;
    };
    key.verify(&hash_body(body), &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keys(seed: u8) -> NodeKeys {
        NodeKeys::from_secrets([seed; 32], [seed.wrapping_add(1); 32], [seed.wrapping_add(2); 32])
    }

    #[test]
    fn test_sign_and_verify() {
        let keys = test_keys(7);
        let body = b"push_batch payload";
        let sig = sign_body(&keys, body);
        assert!(verify_body(&sig, body, &keys.ed25519_pubkey()));
    }

    #[test]
    fn test_verify_rejects_tampered_body() {
        let keys = test_keys(7);
        let sig = sign_body(&keys, b"original");
        assert!(!verify_body(&sig, b"tampered", &keys.ed25519_pubkey()));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let keys = test_keys(7);
        let other = test_keys(8);
        let sig = sign_body(&keys, b"body");
        assert!(!verify_body(&sig, b"body", &other.ed25519_pubkey()));
    }

    #[test]
    fn test_verify_rejects_garbage_signature() {
        let keys = test_keys(7);
        assert!(!verify_body("not base64!!", b"body", &keys.ed25519_pubkey()));
        assert!(!verify_body("AAAA", b"body", &keys.ed25519_pubkey()));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let keys = test_keys(9);
        let out = format!("{:?}", keys);
        assert!(out.contains("[REDACTED]"));
    }
}

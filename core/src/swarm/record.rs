//! Service node records
//!
//! One record per snode known from the daemon feed. Records are immutable
//! after construction; equality and hashing go by the legacy pubkey only, so
//! a node keeps its identity across IP or port changes.

use std::hash::{Hash, Hasher};

use crate::security::base32z;

/// A service node as listed by `get_n_service_nodes`.
#[derive(Debug, Clone)]
pub struct SnodeRecord {
    ip: String,
    port: u16,
    pubkey_legacy: [u8; 32],
    pubkey_x25519: [u8; 32],
    pubkey_ed25519: [u8; 32],
    /// z-base-32 of the legacy pubkey, without suffix
    address: String,
}

impl SnodeRecord {
    pub fn new(
        ip: String,
        port: u16,
        pubkey_legacy: [u8; 32],
        pubkey_x25519: [u8; 32],
        pubkey_ed25519: [u8; 32],
    ) -> Self {
        let address = base32z::snode_address(&pubkey_legacy);
        Self {
            ip,
            port,
            pubkey_legacy,
            pubkey_x25519,
            pubkey_ed25519,
            address,
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pubkey_legacy(&self) -> &[u8; 32] {
        &self.pubkey_legacy
    }

    pub fn pubkey_x25519(&self) -> &[u8; 32] {
        &self.pubkey_x25519
    }

    pub fn pubkey_ed25519(&self) -> &[u8; 32] {
        &self.pubkey_ed25519
    }

    /// Legacy pubkey as lowercase hex.
    pub fn pubkey_hex(&self) -> String {
        hex::encode(self.pubkey_legacy)
    }

    /// Bare z-base-32 address, as carried in signature headers.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Display address with the `.snode` suffix.
    pub fn snode_address(&self) -> String {
        format!("{}.snode", self.address)
    }
}

impl PartialEq for SnodeRecord {
    fn eq(&self, other: &Self) -> bool {
        self.pubkey_legacy == other.pubkey_legacy
    }
}

impl Eq for SnodeRecord {}

impl Hash for SnodeRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pubkey_legacy.hash(state);
    }
}

impl std::fmt::Display for SnodeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.snode_address())
    }
}

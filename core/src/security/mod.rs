//! Cryptographic identities and request authentication

pub mod base32z;
pub mod sign;

pub use base32z::{snode_address, snode_pubkey, SNODE_ADDRESS_LEN};
pub use sign::{
    hash_body, sign_body, verify_body, NodeKeys, SENDER_SNODE_PUBKEY_HEADER,
    SNODE_SIGNATURE_HEADER,
};

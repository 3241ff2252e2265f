//! z-base-32 codec for snode addresses
//!
//! A 32-byte legacy pubkey encodes to exactly 52 characters. Addresses are
//! displayed with a `.snode` suffix; the signature headers carry the bare
//! 52-character form.

/// The z-base-32 alphabet, chosen for human legibility.
const ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

/// Length of a z-base-32 encoded 32-byte key.
pub const SNODE_ADDRESS_LEN: usize = 52;

/// Encode bytes as z-base-32 (MSB-first bit packing).
pub fn encode(input: &[u8]) -> String {
    let mut out = String::with_capacity((input.len() * 8 + 4) / 5);
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;

    for &byte in input {
        buffer = (buffer << 8) | byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let idx = ((buffer >> bits) & 0x1f) as usize;
            out.push(ALPHABET[idx] as char);
        }
    }
    if bits > 0 {
        let idx = ((buffer << (5 - bits)) & 0x1f) as usize;
        out.push(ALPHABET[idx] as char);
    }
    out
}

/// Decode a z-base-32 string. Returns None on characters outside the
/// alphabet. Trailing padding bits are discarded.
pub fn decode(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;

    for c in input.bytes() {
        let val = ALPHABET.iter().position(|&a| a == c)? as u32;
        buffer = (buffer << 5) | val;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    Some(out)
}

/// Encode a 32-byte legacy pubkey as a bare snode address (no suffix).
pub fn snode_address(pubkey: &[u8; 32]) -> String {
    encode(pubkey)
}

/// Decode a bare 52-character snode address back into a legacy pubkey.
pub fn snode_pubkey(address: &str) -> Option<[u8; 32]> {
    if address.len() != SNODE_ADDRESS_LEN {
        return None;
    }
    let bytes = decode(address)?;
    if bytes.len() < 32 {
        return None;
    }
    let mut pk = [0u8; 32];
    pk.copy_from_slice(&bytes[..32]);
    Some(pk)
}

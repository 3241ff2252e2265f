//! Proof of work and store admission
//!
//! Client stores are gated three ways before touching the log:
//! - TTL inside the allowed window
//! - timestamp not expired and not too far in the future
//! - a nonce whose blake3 hash over the store payload clears the current
//!   difficulty
//!
//! # Hash Function
//!
//! `BLAKE3(timestamp || ttl || pub_key || data || nonce)`, all integers as
//! decimal strings. The same digest doubles as the message's dedup hash.

/// Minimum accepted TTL (10 seconds).
pub const MIN_TTL_MS: u64 = 10 * 1000;
/// Maximum accepted TTL (4 days).
pub const MAX_TTL_MS: u64 = 4 * 24 * 60 * 60 * 1000;
/// How far in the future a client clock may run (10 minutes).
pub const SKEW_TOLERANCE_MS: u64 = 10 * 60 * 1000;

/// Default PoW difficulty in leading zero bits.
pub const DEFAULT_DIFFICULTY: u8 = 10;

/// TTL window check.
pub fn valid_ttl(ttl_ms: u64) -> bool {
    (MIN_TTL_MS..=MAX_TTL_MS).contains(&ttl_ms)
}

/// Timestamp window check: not already expired, not running ahead of our
/// clock beyond the skew tolerance.
pub fn valid_timestamp(timestamp_ms: u64, ttl_ms: u64, now_ms: u64) -> bool {
    timestamp_ms <= now_ms.saturating_add(SKEW_TOLERANCE_MS)
        && timestamp_ms.saturating_add(ttl_ms) > now_ms
}

fn pow_digest(timestamp: u64, ttl: u64, pub_key: &str, data: &[u8], nonce: &str) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(ttl.to_string().as_bytes());
    hasher.update(pub_key.as_bytes());
    hasher.update(data);
    hasher.update(nonce.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Count leading zero bits in a hash
fn count_leading_zeros(hash: &[u8; 32]) -> u8 {
    let mut zeros = 0u8;
    for byte in hash {
        if *byte == 0 {
            zeros += 8;
        } else {
            zeros += byte.leading_zeros() as u8;
            break;
        }
    }
    zeros
}

/// The deterministic message hash: hex of the PoW digest.
pub fn message_hash(timestamp: u64, ttl: u64, pub_key: &str, data: &[u8], nonce: &str) -> String {
    hex::encode(pow_digest(timestamp, ttl, pub_key, data, nonce))
}

/// Verify a client nonce against the current difficulty.
///
/// On success returns the message hash to store under.
pub fn check_pow(
    nonce: &str,
    timestamp: u64,
    ttl: u64,
    pub_key: &str,
    data: &[u8],
    difficulty: u8,
) -> Option<String> {
    let digest = pow_digest(timestamp, ttl, pub_key, data, nonce);
    if count_leading_zeros(&digest) >= difficulty {
        Some(hex::encode(digest))
    } else {
        None
    }
}

/// Search for a nonce clearing `difficulty`. Test and tooling helper; real
/// clients compute their own.
pub fn compute_pow(timestamp: u64, ttl: u64, pub_key: &str, data: &[u8], difficulty: u8) -> String {
    for counter in 0u64.. {
        let nonce = counter.to_string();
        if check_pow(&nonce, timestamp, ttl, pub_key, data, difficulty).is_some() {
            return nonce;
        }
    }
    unreachable!("nonce space exhausted");
}

//! Recipient-to-swarm placement
//!
//! Every node in the network must map a user pubkey to the same swarm given
//! the same map, so this function is pure and bit-exact: the leading
//! network-tag byte is discarded, the remaining big-endian integer is reduced
//! modulo 2^64 (its low 64 bits), and the swarm whose id sits closest on the
//! 64-bit circle wins.

use super::mapping::SwarmInfo;

/// Reserved id meaning "no swarm".
pub const INVALID_SWARM_ID: u64 = u64::MAX;

/// Distance between two points on the circular group of 64-bit integers.
fn circular_distance(a: u64, b: u64) -> u64 {
    // wrapping_sub in both directions yields d and 2^64 - d; take the smaller
    std::cmp::min(a.wrapping_sub(b), b.wrapping_sub(a))
}

/// Reduce a user pubkey to its placement target.
///
/// The first byte (two hex chars) is the network tag and does not
/// participate. Malformed input maps to target 0 rather than failing:
/// callers validate at the boundary, and replicated data has already
/// passed that check on the first node.
pub fn pubkey_to_target(pubkey_hex: &str) -> u64 {
    let Some(significant) = pubkey_hex.get(2..) else {
        return 0;
    };
    // Low 64 bits of the big-endian integer = the final 16 hex characters.
    let tail_start = significant.len().saturating_sub(16);
    significant
        .get(tail_start..)
        .and_then(|tail| u64::from_str_radix(tail, 16).ok())
        .unwrap_or(0)
}

/// The authoritative pubkey-to-swarm assignment.
///
/// Returns `INVALID_SWARM_ID` when the map is empty. Ties on distance go to
/// the smaller swarm id.
pub fn get_swarm_by_pk(all_swarms: &[SwarmInfo], pubkey_hex: &str) -> u64 {
    let target = pubkey_to_target(pubkey_hex);

    let mut best_id = INVALID_SWARM_ID;
    let mut best_distance = u64::MAX;

    for swarm in all_swarms {
        let distance = circular_distance(swarm.swarm_id, target);
        if distance < best_distance || (distance == best_distance && swarm.swarm_id < best_id) {
            best_distance = distance;
            best_id = swarm.swarm_id;
        }
    }

    best_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::mapping::SwarmInfo;

    fn swarms(ids: &[u64]) -> Vec<SwarmInfo> {
        ids.iter()
            .map(|&swarm_id| SwarmInfo {
                swarm_id,
                snodes: vec![],
            })
            .collect()
    }

    /// A pubkey whose placement target is exactly `target`.
    fn pk_with_target(target: u64) -> String {
        format!("05{}{:016x}", "0".repeat(46), target)
    }

    #[test]
    fn test_empty_map_yields_invalid() {
        assert_eq!(get_swarm_by_pk(&[], &pk_with_target(5)), INVALID_SWARM_ID);
    }

    #[test]
    fn test_invalid_never_wins_when_swarms_exist() {
        let map = swarms(&[0]);
        assert_ne!(get_swarm_by_pk(&map, &pk_with_target(u64::MAX)), INVALID_SWARM_ID);
    }

    #[test]
    fn test_nearest_id_wins() {
        let map = swarms(&[100, 200, 300]);
        assert_eq!(get_swarm_by_pk(&map, &pk_with_target(110)), 100);
        assert_eq!(get_swarm_by_pk(&map, &pk_with_target(190)), 200);
        assert_eq!(get_swarm_by_pk(&map, &pk_with_target(290)), 300);
    }

    #[test]
    fn test_wrap_around_distance() {
        // Target at the top of the ring is closer to id 10 going over the
        // wrap than to an id in the middle of the range.
        let map = swarms(&[10, u64::MAX / 2]);
        assert_eq!(get_swarm_by_pk(&map, &pk_with_target(u64::MAX - 5)), 10);
    }

    #[test]
    fn test_extreme_targets_resolve() {
        // id 1 is within wrap distance 2 of both ends of the ring.
        let map = swarms(&[1, u64::MAX / 2]);
        assert_eq!(get_swarm_by_pk(&map, &pk_with_target(0)), 1);
        assert_eq!(get_swarm_by_pk(&map, &pk_with_target(u64::MAX)), 1);
    }

    #[test]
    fn test_tie_prefers_smaller_id() {
        // Target 150 is equidistant from 100 and 200.
        let map = swarms(&[200, 100]);
        assert_eq!(get_swarm_by_pk(&map, &pk_with_target(150)), 100);
    }

    #[test]
    fn test_network_tag_byte_is_ignored() {
        let map = swarms(&[1000, 2000]);
        let a = format!("05{}{:016x}", "0".repeat(46), 1010u64);
        let b = format!("ff{}{:016x}", "0".repeat(46), 1010u64);
        assert_eq!(get_swarm_by_pk(&map, &a), get_swarm_by_pk(&map, &b));
    }

    #[test]
    fn test_deterministic() {
        let map = swarms(&[7, 900, 12345, u64::MAX - 3]);
        let pk = pk_with_target(54321);
        let first = get_swarm_by_pk(&map, &pk);
        for _ in 0..10 {
            assert_eq!(get_swarm_by_pk(&map, &pk), first);
        }
    }
}

//! Hashing for deterministic post placement.
//!
//! Owner selection ranks nodes by a 64-bit FNV-1a weight over
//! `post_id + "|" + node_id`; no consistent-hashing ring is needed at this
//! cluster scale.

use std::hash::Hasher;

use fnv::FnvHasher;

/// 64-bit FNV-1a over a byte string.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Placement weight of a node for a post. Higher weight ranks earlier.
pub fn owner_weight(post_id: &str, node_id: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(post_id.as_bytes());
    hasher.write(b"|");
    hasher.write(node_id.as_bytes());
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_fnv1a_vectors() {
        assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a_64(b"foobar"), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn weight_is_concatenation_hash() {
        assert_eq!(owner_weight("p1", "n1"), fnv1a_64(b"p1|n1"));
    }

    #[test]
    fn weight_is_deterministic_and_spreads() {
        assert_eq!(owner_weight("post-1", "n2"), owner_weight("post-1", "n2"));
        assert_ne!(owner_weight("post-1", "n1"), owner_weight("post-1", "n2"));
        assert_ne!(owner_weight("post-1", "n1"), owner_weight("post-2", "n1"));
    }
}

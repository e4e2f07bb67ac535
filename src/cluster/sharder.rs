use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Maps keys to shard indices with jump consistent hashing.
///
/// Indices refer to positions in the cluster's static member list. Adding a
/// node to a cluster of `n` moves roughly `1/(n+1)` of the keys.
#[derive(Debug, Clone)]
pub struct JumpHashSharder {
    cluster_size: usize,
}

impl JumpHashSharder {
    pub fn new(cluster_size: usize) -> Self {
        Self { cluster_size }
    }

    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    /// Index of the primary shard for `key`.
    pub fn shard_for(&self, key: &str) -> usize {
        jump_hash(hash_key(key), self.cluster_size)
    }

    /// `n` distinct shard indices for `key`, ascending.
    ///
    /// Walks the ring from the primary so the set for `n` is a superset of
    /// the set for `n - 1`. Callers guarantee `n <= cluster_size`; larger
    /// values are clamped.
    pub fn shard_list(&self, key: &str, n: usize) -> Vec<usize> {
        let n = n.min(self.cluster_size);
        let primary = self.shard_for(key);
        let mut shards: Vec<usize> = (0..n)
            .map(|offset| (primary + offset) % self.cluster_size)
            .collect();
        shards.sort_unstable();
        shards
    }
}

fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Lamping & Veach, "A Fast, Minimal Memory, Consistent Hash Algorithm".
fn jump_hash(mut key: u64, buckets: usize) -> usize {
    if buckets == 0 {
        return 0;
    }
    let mut b: i64 = -1;
    let mut j: i64 = 0;
    while j < buckets as i64 {
        b = j;
        key = key.wrapping_mul(2_862_933_555_777_941_757).wrapping_add(1);
        j = ((b + 1) as f64 * ((1u64 << 31) as f64 / ((key >> 33) + 1) as f64)) as i64;
    }
    b as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jump_hash_single_bucket() {
        for key in 0..100u64 {
            assert_eq!(jump_hash(key, 1), 0);
        }
    }

    #[test]
    fn test_jump_hash_within_range() {
        for key in 0..1000u64 {
            assert!(jump_hash(key.wrapping_mul(7919), 5) < 5);
        }
    }
}

use crate::index::types::{ShardId, TermKey};
use rustc_hash::FxHasher;
use std::hash::Hasher;

/// Hash a word or URL into a 64-bit key.
///
/// FxHasher is unseeded, so keys are stable between the process that builds
/// an index and the processes that later query it.
#[inline]
pub fn hash_word(word: &str) -> TermKey {
    let mut hasher = FxHasher::default();
    hasher.write(word.as_bytes());
    // Finalize with a multiply-xorshift so low bits (used for shard and slot
    // routing) depend on every input byte
    mix64(hasher.finish())
}

/// Shard owning `key` out of `num_shards`
#[inline]
pub fn shard_for(key: u64, num_shards: usize) -> ShardId {
    (key % num_shards as u64) as ShardId
}

#[inline]
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;
    x
}

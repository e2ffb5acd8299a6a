use std::hash::BuildHasher;

use ahash::RandomState;

use crate::record::{Count, Key};

/// Hashes `key` under `seed`. Distinct seeds behave as independent hash functions.
///
/// Reference form of [`StageHash::hash`]; it rebuilds the hasher state on
/// every call, so stages keep a [`StageHash`] instead.
pub fn hash(key: Key, seed: u64) -> u64 {
    StageHash::new(seed).hash(key)
}

/// Seeded hash function owned by one stage of a sketch or pipeline.
#[derive(Clone)]
pub struct StageHash {
    state: RandomState,
}

impl StageHash {
    /// Expands a 64-bit seed into the four keys ahash needs.
    pub fn new(seed: u64) -> Self {
        let mut keys = SeedSequence::new(seed);
        Self {
            state: RandomState::with_seeds(
                keys.next_seed(),
                keys.next_seed(),
                keys.next_seed(),
                keys.next_seed(),
            ),
        }
    }

    #[inline]
    pub fn hash(&self, key: Key) -> u64 {
        self.state.hash_one(key)
    }

    /// Bucket index in `[0, len)`.
    #[inline]
    pub fn bucket(&self, key: Key, len: usize) -> usize {
        (self.hash(key) % len as u64) as usize
    }

    /// `+1` or `-1`, for count-sketch style signed updates.
    #[inline]
    pub fn sign(&self, key: Key) -> Count {
        if self.hash(key) & 1 == 1 {
            1
        } else {
            -1
        }
    }
}

/// Deterministic stream of distinct seeds (splitmix64 over a base value).
///
/// Structures draw one seed per stage at construction, so two structures
/// built from the same base seed hash identically.
#[derive(Debug, Clone)]
pub struct SeedSequence {
    state: u64,
}

impl SeedSequence {
    pub fn new(base: u64) -> Self {
        Self { state: base }
    }

    pub fn next_seed(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// One [`StageHash`] per stage.
    pub fn stage_hashes(&mut self, stages: usize) -> Vec<StageHash> {
        (0..stages).map(|_| StageHash::new(self.next_seed())).collect()
    }
}

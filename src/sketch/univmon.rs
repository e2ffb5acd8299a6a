use std::collections::BTreeMap;

use tracing::debug;

use crate::error::Result;
use crate::hash::{SeedSequence, StageHash};
use crate::record::{ranked, Count, Key, Record};
use crate::sketch::{CountHeap, Sketch};

const LEVELS: usize = 6;
const STAGES_PER_LEVEL: usize = 3;

/// UnivMon: a ladder of CountHeaps where level `i` sees a key only if the
/// first `i` bits of its sampling hash are all ones, so each level observes
/// roughly half the keys of the one below it.
pub struct Univmon {
    levels: Vec<CountHeap>,
    sampler: StageHash,
}

impl Univmon {
    /// Level `i` gets `memory >> (i + 1)` bytes.
    pub fn new(memory: usize, slot_size: usize, seed: u64) -> Result<Self> {
        let mut seeds = SeedSequence::new(seed);
        let levels = (0..LEVELS)
            .map(|level| {
                CountHeap::new(memory >> (level + 1), STAGES_PER_LEVEL, slot_size, seeds.next_seed())
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(levels = LEVELS, "constructed Univmon");
        Ok(Univmon {
            levels,
            sampler: StageHash::new(seeds.next_seed()),
        })
    }

    /// Number of levels that receive `key`, at least 1.
    fn depth(&self, key: Key) -> usize {
        let bits = self.sampler.hash(key);
        1 + (bits.trailing_ones() as usize).min(LEVELS - 1)
    }
}

impl Sketch for Univmon {
    fn name(&self) -> &'static str {
        "Univmon"
    }

    fn insert(&mut self, key: Key, freq: Count) {
        let depth = self.depth(key);
        for level in &mut self.levels[..depth] {
            level.insert(key, freq);
        }
    }

    fn query(&self, key: Key) -> Result<Count> {
        let depth = self.depth(key);
        let mut estimate = self.levels[depth - 1].query(key)?;
        for level in self.levels[..depth - 1].iter().rev() {
            estimate = 2 * estimate - level.query(key)?;
        }
        Ok(estimate)
    }

    /// Deeper levels win when a key is reported by several of them.
    fn top_k(&self) -> Result<Vec<Record>> {
        let mut merged = BTreeMap::new();
        for level in self.levels.iter().rev() {
            for record in level.top_k()? {
                merged.entry(record.key).or_insert(record.count);
            }
        }
        Ok(ranked(&merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_budget_too_small_for_deepest_level() {
        assert!(Univmon::new(512, 4, 1).is_err());
        assert!(Univmon::new(64 * 1024, 4, 1).is_ok());
    }

    #[test]
    fn test_depth_matches_hash_bits() {
        let univmon = Univmon::new(64 * 1024, 4, 3).unwrap();
        for key in 0..500u32 {
            let bits = univmon.sampler.hash(key);
            let mut expected = 1;
            let mut walk = bits;
            while expected < LEVELS && walk & 1 == 1 {
                expected += 1;
                walk >>= 1;
            }
            assert_eq!(univmon.depth(key), expected);
        }
    }

    #[test]
    fn test_single_heavy_key() {
        let mut univmon = Univmon::new(256 * 1024, 4, 5).unwrap();
        for _ in 0..300 {
            univmon.insert(77, 1);
        }
        // Every level that sees the key holds it exactly, so the
        // recombination 2*q - q collapses to the true count.
        assert_eq!(univmon.query(77).unwrap(), 300);
        assert_eq!(univmon.top_k().unwrap()[0], Record::new(77, 300));
    }
}

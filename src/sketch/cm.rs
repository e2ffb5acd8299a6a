use tracing::debug;

use crate::error::{stage_len, Result};
use crate::hash::{SeedSequence, StageHash};
use crate::record::{Count, Key};
use crate::sketch::Sketch;

/// Count-min sketch: `stages` rows of counters, estimate is the row minimum.
///
/// Never underestimates when all inserted frequencies are non-negative.
pub struct CountMin {
    len: usize,
    hashes: Vec<StageHash>,
    counters: Vec<Count>,
}

impl CountMin {
    /// Splits `memory` bytes into `stages` rows of `slot_size`-byte counters.
    pub fn new(memory: usize, stages: usize, slot_size: usize, seed: u64) -> Result<Self> {
        let len = stage_len("CM", memory, stages, slot_size)?;
        debug!(stages, len, "constructed CM");
        Ok(CountMin {
            len,
            hashes: SeedSequence::new(seed).stage_hashes(stages),
            counters: vec![0; stages * len],
        })
    }

    pub fn stages(&self) -> usize {
        self.hashes.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn cell(&self, stage: usize, key: Key) -> usize {
        stage * self.len + self.hashes[stage].bucket(key, self.len)
    }

    pub(crate) fn estimate(&self, key: Key) -> Count {
        (0..self.stages())
            .map(|stage| self.counters[self.cell(stage, key)])
            .min()
            .unwrap_or(0)
    }
}

impl Sketch for CountMin {
    fn name(&self) -> &'static str {
        "CM"
    }

    fn insert(&mut self, key: Key, freq: Count) {
        for stage in 0..self.stages() {
            let cell = self.cell(stage, key);
            self.counters[cell] += freq;
        }
    }

    fn query(&self, key: Key) -> Result<Count> {
        Ok(self.estimate(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_new() {
        let cm = CountMin::new(32, 2, 4, 1).unwrap();
        assert_eq!(cm.stages(), 2);
        assert_eq!(cm.len(), 4);
        assert_eq!(cm.counters.len(), 8);
    }

    #[test]
    fn test_rejects_tiny_budget() {
        assert!(CountMin::new(7, 2, 4, 1).is_err());
    }

    #[test]
    fn test_small_round_trip() {
        let mut cm = CountMin::new(32, 2, 4, 1).unwrap();
        for key in [5, 5, 5, 3, 3, 1] {
            cm.insert(key, 1);
        }
        assert!(cm.query(5).unwrap() >= 3);
        assert!(cm.query(3).unwrap() >= 2);
        assert!(cm.query(1).unwrap() >= 1);
    }

    #[test]
    fn test_never_underestimates() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut cm = CountMin::new(4 * 4 * 64, 4, 4, 3).unwrap();
        let mut truth: HashMap<Key, Count> = HashMap::new();
        for _ in 0..20_000 {
            let key = rng.random_range(0..2_000u32);
            let freq = rng.random_range(1..4);
            cm.insert(key, freq);
            *truth.entry(key).or_insert(0) += freq;
        }
        for (key, count) in truth {
            assert!(cm.query(key).unwrap() >= count);
        }
    }

    #[test]
    fn test_exact_without_collisions() {
        let mut cm = CountMin::new(4 * 4 * 4096, 4, 4, 9).unwrap();
        cm.insert(42, 10);
        cm.insert(42, 5);
        assert_eq!(cm.query(42).unwrap(), 15);
    }
}

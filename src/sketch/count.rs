use tracing::debug;

use crate::error::{stage_len, Result};
use crate::hash::{SeedSequence, StageHash};
use crate::record::{Count, Key};
use crate::sketch::Sketch;

/// Count sketch: each stage adds `freq * sign(key)`, estimate is the minimum
/// of the de-signed counters.
///
/// Collisions cancel in expectation, so the estimator is no longer one-sided.
pub struct CountSketch {
    len: usize,
    hashes: Vec<StageHash>,
    signs: Vec<StageHash>,
    counters: Vec<Count>,
}

impl CountSketch {
    pub fn new(memory: usize, stages: usize, slot_size: usize, seed: u64) -> Result<Self> {
        let len = stage_len("Count", memory, stages, slot_size)?;
        let mut seeds = SeedSequence::new(seed);
        let hashes = seeds.stage_hashes(stages);
        let signs = seeds.stage_hashes(stages);
        debug!(stages, len, "constructed Count");
        Ok(CountSketch {
            len,
            hashes,
            signs,
            counters: vec![0; stages * len],
        })
    }

    pub fn stages(&self) -> usize {
        self.hashes.len()
    }

    #[inline]
    fn cell(&self, stage: usize, key: Key) -> usize {
        stage * self.len + self.hashes[stage].bucket(key, self.len)
    }
}

impl Sketch for CountSketch {
    fn name(&self) -> &'static str {
        "Count"
    }

    fn insert(&mut self, key: Key, freq: Count) {
        for stage in 0..self.stages() {
            let cell = self.cell(stage, key);
            self.counters[cell] += freq * self.signs[stage].sign(key);
        }
    }

    fn query(&self, key: Key) -> Result<Count> {
        Ok((0..self.stages())
            .map(|stage| self.counters[self.cell(stage, key)] * self.signs[stage].sign(key))
            .min()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_key_is_exact() {
        let mut sketch = CountSketch::new(4 * 3 * 1024, 3, 4, 5).unwrap();
        for _ in 0..40 {
            sketch.insert(1234, 1);
        }
        sketch.insert(1234, 2);
        assert_eq!(sketch.query(1234).unwrap(), 42);
        assert_eq!(sketch.query(99).unwrap(), 0);
    }

    #[test]
    fn test_colliding_keys_cancel_or_add() {
        // One bucket per stage: every key collides, and the estimate of a key
        // is its own count plus or minus the other key's count.
        let mut sketch = CountSketch::new(4, 1, 4, 8).unwrap();
        sketch.insert(1, 10);
        sketch.insert(2, 3);
        let estimate = sketch.query(1).unwrap();
        assert!(estimate == 13 || estimate == 7);
    }

    #[test]
    fn test_rejects_zero_stages() {
        assert!(CountSketch::new(1024, 0, 4, 1).is_err());
    }
}

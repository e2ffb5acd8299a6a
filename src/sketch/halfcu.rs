use tracing::debug;

use crate::error::{stage_len, Result};
use crate::hash::{SeedSequence, StageHash};
use crate::record::{Count, Key};
use crate::sketch::Sketch;

/// Count-min with a one-pass conservative update.
///
/// Stages are visited in order while tracking `limit`, the smallest
/// post-increment value seen so far. A counter that would pass `limit` is
/// only raised to it, so no counter grows by more than `freq` and every
/// counter stays at or below its count-min counterpart.
pub struct HalfCu {
    len: usize,
    hashes: Vec<StageHash>,
    counters: Vec<Count>,
}

impl HalfCu {
    pub fn new(memory: usize, stages: usize, slot_size: usize, seed: u64) -> Result<Self> {
        let len = stage_len("HalfCU", memory, stages, slot_size)?;
        debug!(stages, len, "constructed HalfCU");
        Ok(HalfCu {
            len,
            hashes: SeedSequence::new(seed).stage_hashes(stages),
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

impl Sketch for HalfCu {
    fn name(&self) -> &'static str {
        "HalfCU"
    }

    fn insert(&mut self, key: Key, freq: Count) {
        let mut limit = Count::MAX;
        for stage in 0..self.stages() {
            let cell = self.cell(stage, key);
            let current = self.counters[cell];
            if current + freq < limit {
                limit = current + freq;
                self.counters[cell] = limit;
            } else if current < limit {
                self.counters[cell] = limit;
            }
        }
    }

    fn query(&self, key: Key) -> Result<Count> {
        Ok((0..self.stages())
            .map(|stage| self.counters[self.cell(stage, key)])
            .min()
            .unwrap_or(0))
    }
}

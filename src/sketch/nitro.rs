use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::{stage_len, Result, SketchError};
use crate::hash::{SeedSequence, StageHash};
use crate::record::{Count, Key};
use crate::sketch::Sketch;

/// Count-min rows updated only on a per-stage coin flip of probability
/// `sample_rate`; the median of the rows is scaled back up on query.
pub struct NitroCm {
    len: usize,
    sample_rate: f64,
    hashes: Vec<StageHash>,
    counters: Vec<Count>,
    rng: SmallRng,
}

impl NitroCm {
    pub fn new(
        memory: usize,
        sample_rate: f64,
        stages: usize,
        slot_size: usize,
        seed: u64,
    ) -> Result<Self> {
        if !(sample_rate > 0.0 && sample_rate <= 1.0) {
            return Err(SketchError::config(
                "NitroCM",
                format!("sample rate {} is outside (0, 1]", sample_rate),
            ));
        }
        let len = stage_len("NitroCM", memory, stages, slot_size)?;
        let mut seeds = SeedSequence::new(seed);
        let hashes = seeds.stage_hashes(stages);
        let rng = SmallRng::seed_from_u64(seeds.next_seed());
        debug!(stages, len, sample_rate, "constructed NitroCM");
        Ok(NitroCm {
            len,
            sample_rate,
            hashes,
            counters: vec![0; stages * len],
            rng,
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

impl Sketch for NitroCm {
    fn name(&self) -> &'static str {
        "NitroCM"
    }

    fn insert(&mut self, key: Key, freq: Count) {
        for stage in 0..self.stages() {
            if self.rng.random::<f64>() < self.sample_rate {
                let cell = self.cell(stage, key);
                self.counters[cell] += freq;
            }
        }
    }

    fn query(&self, key: Key) -> Result<Count> {
        let mut rows: Vec<Count> = (0..self.stages())
            .map(|stage| self.counters[self.cell(stage, key)])
            .collect();
        let n = rows.len();
        rows.sort_unstable();
        // Scale before halving so the even case keeps its fractional part.
        let scaled = if n % 2 == 1 {
            rows[n / 2] as f64 / self.sample_rate
        } else {
            (rows[n / 2 - 1] as f64 + rows[n / 2] as f64) / (2.0 * self.sample_rate)
        };
        Ok(scaled as Count)
    }
}

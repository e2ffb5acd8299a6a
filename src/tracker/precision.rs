use std::collections::BTreeMap;
use std::mem;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::Result;
use crate::hash::SeedSequence;
use crate::record::{Count, Key, PartialKey, Slot};
use crate::snapshot::PartialSnapshot;
use crate::tracker::{aggregate_partial, SlotStages, TopKTracker};

const STAGES: usize = 6;

/// PRECISION: a total miss replaces the lightest resident it passed only
/// with probability `1 / 2^ceil(log2(min))`; otherwise the new unit is
/// handed back untouched.
pub struct Precision {
    stages: SlotStages,
    rng: SmallRng,
    recirculated: u64,
    dropped: u64,
    partials: PartialSnapshot,
}

impl Precision {
    pub fn new(memory: usize, seed: u64) -> Result<Self> {
        let mut seeds = SeedSequence::new(seed);
        let stages = SlotStages::new("Precision", memory, STAGES, &mut seeds)?;
        debug!(stages = STAGES, len = stages.len(), "constructed Precision");
        Ok(Precision {
            stages,
            rng: SmallRng::seed_from_u64(seeds.next_seed()),
            recirculated: 0,
            dropped: 0,
            partials: PartialSnapshot::new("Precision"),
        })
    }

    /// Misses that displaced a resident.
    pub fn recirculated(&self) -> u64 {
        self.recirculated
    }

    /// Misses handed back without touching the pipeline.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl TopKTracker for Precision {
    fn name(&self) -> &'static str {
        "Precision"
    }

    fn insert(&mut self, key: Key) -> Option<Slot> {
        self.partials.note_insert();

        let mut lightest: Option<(usize, Count)> = None;
        for stage in 0..STAGES {
            let resident = self.stages.cell_mut(stage, key);
            if resident.is_empty() {
                *resident = Slot::new(key, 1);
                return None;
            }
            if resident.key == key {
                resident.count += 1;
                return None;
            }
            if lightest.map_or(true, |(_, min)| resident.count < min) {
                lightest = Some((stage, resident.count));
            }
        }

        let (stage, min) = lightest?;
        let odds = (min as u32).next_power_of_two();
        if self.rng.random_range(0..odds) == 0 {
            self.recirculated += 1;
            let victim = mem::replace(self.stages.cell_mut(stage, key), Slot::new(key, 1));
            Some(victim)
        } else {
            self.dropped += 1;
            Some(Slot::new(key, 1))
        }
    }

    fn query(&self, key: Key) -> Count {
        self.stages.query(key)
    }

    fn residents(&self) -> Vec<Slot> {
        self.stages.residents()
    }

    fn partial_counts(&self) -> &BTreeMap<PartialKey, Count> {
        self.partials.get_or_build(|| aggregate_partial(&self.residents()))
    }

    fn diagnostics(&self) -> Vec<(&'static str, u64)> {
        vec![("recirculated", self.recirculated), ("dropped", self.dropped)]
    }
}

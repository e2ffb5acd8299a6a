use std::collections::BTreeMap;
use std::mem::size_of;

use tracing::debug;

use crate::error::{stage_len, Result};
use crate::hash::{SeedSequence, StageHash};
use crate::record::{Count, Key, PartialKey, Slot};
use crate::sketch::elastic::{vote, Vote, VoteSlot, LAMBDA};
use crate::snapshot::PartialSnapshot;
use crate::tracker::{aggregate_partial, TopKTracker};

const STAGES: usize = 4;

/// Elastic heavy part as a top-k tracker. Resident weight is the positive
/// vote count; a displaced key leaves with weight 1.
///
/// The newcomer inherits the bucket's votes, so every swap adds one unit of
/// weight to the pipeline. `swaps` counts them: resident plus forwarded
/// weight equals inserted weight plus `swaps`.
pub struct ElasticTracker {
    len: usize,
    hashes: Vec<StageHash>,
    slots: Vec<VoteSlot>,
    swaps: u64,
    partials: PartialSnapshot,
}

impl ElasticTracker {
    pub fn new(memory: usize, seed: u64) -> Result<Self> {
        let len = stage_len("ElasticTracker", memory, STAGES, size_of::<VoteSlot>())?;
        debug!(stages = STAGES, len, lambda = LAMBDA, "constructed ElasticTracker");
        Ok(ElasticTracker {
            len,
            hashes: SeedSequence::new(seed).stage_hashes(STAGES),
            slots: vec![VoteSlot::default(); STAGES * len],
            swaps: 0,
            partials: PartialSnapshot::new("ElasticTracker"),
        })
    }

    /// Buckets taken over by a newcomer so far.
    pub fn swaps(&self) -> u64 {
        self.swaps
    }

    #[inline]
    fn cell(&self, stage: usize, key: Key) -> usize {
        stage * self.len + self.hashes[stage].bucket(key, self.len)
    }
}

impl TopKTracker for ElasticTracker {
    fn name(&self) -> &'static str {
        "Elastic"
    }

    fn insert(&mut self, key: Key) -> Option<Slot> {
        self.partials.note_insert();
        let (mut key, mut weight) = (key, 1);
        for stage in 0..STAGES {
            let cell = self.cell(stage, key);
            match vote(&mut self.slots[cell], key, weight, LAMBDA) {
                Vote::Absorbed => return None,
                Vote::Pass(next, next_weight) => {
                    if next != key {
                        self.swaps += 1;
                    }
                    key = next;
                    weight = next_weight;
                }
            }
        }
        Some(Slot::new(key, weight))
    }

    fn query(&self, key: Key) -> Count {
        (0..STAGES)
            .map(|stage| self.slots[self.cell(stage, key)])
            .filter(|slot| !slot.is_empty() && slot.key == key)
            .map(|slot| slot.vote_p)
            .sum()
    }

    fn residents(&self) -> Vec<Slot> {
        self.slots
            .iter()
            .filter(|slot| !slot.is_empty())
            .map(|slot| Slot::new(slot.key, slot.vote_p))
            .collect()
    }

    fn partial_counts(&self) -> &BTreeMap<PartialKey, Count> {
        self.partials.get_or_build(|| aggregate_partial(&self.residents()))
    }

    fn diagnostics(&self) -> Vec<(&'static str, u64)> {
        vec![("swaps", self.swaps)]
    }
}

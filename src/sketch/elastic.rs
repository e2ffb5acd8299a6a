use tracing::debug;

use crate::error::{stage_len, Result};
use crate::hash::{SeedSequence, StageHash};
use crate::record::{merge_counts, ranked, Count, Key, Record};
use crate::sketch::Sketch;

pub(crate) const LAMBDA: Count = 32;
const STAGES: usize = 4;

/// Heavy-part bucket of Elastic: resident key, its positive votes, and all
/// votes (positive plus negative) the bucket has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct VoteSlot {
    pub(crate) key: Key,
    pub(crate) vote_p: Count,
    pub(crate) vote_all: Count,
}

impl VoteSlot {
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.vote_all == 0
    }
}

/// Outcome of offering a carried `{key, weight}` to one vote bucket.
pub(crate) enum Vote {
    Absorbed,
    /// Carry on to the next stage with this key and weight.
    Pass(Key, Count),
}

/// Elastic voting rule shared by the estimator and the tracker.
///
/// Foreign weight is added to `vote_all`; once it reaches `lambda` times
/// the resident's positive votes the incoming key takes the bucket and the
/// previous resident continues with weight 1.
#[inline]
pub(crate) fn vote(slot: &mut VoteSlot, key: Key, weight: Count, lambda: Count) -> Vote {
    if slot.is_empty() {
        *slot = VoteSlot {
            key,
            vote_p: weight,
            vote_all: weight,
        };
        return Vote::Absorbed;
    }
    if slot.key == key {
        slot.vote_p += weight;
        slot.vote_all += weight;
        return Vote::Absorbed;
    }

    slot.vote_all += weight;
    if slot.vote_all >= slot.vote_p * lambda {
        let evicted = slot.key;
        slot.key = key;
        slot.vote_p += weight;
        slot.vote_all += weight;
        Vote::Pass(evicted, 1)
    } else {
        Vote::Pass(key, weight)
    }
}

/// Elastic heavy part used as a plain estimator; whatever leaves the last
/// stage is discarded.
pub struct ElasticSketch {
    len: usize,
    hashes: Vec<StageHash>,
    slots: Vec<VoteSlot>,
}

impl ElasticSketch {
    /// Each bucket costs three `slot_size`-byte words.
    pub fn new(memory: usize, slot_size: usize, seed: u64) -> Result<Self> {
        let len = stage_len("Elastic", memory, STAGES, 3 * slot_size)?;
        debug!(stages = STAGES, len, "constructed Elastic");
        Ok(ElasticSketch {
            len,
            hashes: SeedSequence::new(seed).stage_hashes(STAGES),
            slots: vec![VoteSlot::default(); STAGES * len],
        })
    }

    #[inline]
    fn cell(&self, stage: usize, key: Key) -> usize {
        stage * self.len + self.hashes[stage].bucket(key, self.len)
    }
}

impl Sketch for ElasticSketch {
    fn name(&self) -> &'static str {
        "Elastic"
    }

    fn insert(&mut self, key: Key, freq: Count) {
        let (mut key, mut weight) = (key, freq);
        for stage in 0..STAGES {
            let cell = self.cell(stage, key);
            match vote(&mut self.slots[cell], key, weight, LAMBDA) {
                Vote::Absorbed => return,
                Vote::Pass(next, next_weight) => {
                    key = next;
                    weight = next_weight;
                }
            }
        }
    }

    fn query(&self, key: Key) -> Result<Count> {
        Ok((0..STAGES)
            .map(|stage| self.slots[self.cell(stage, key)])
            .filter(|slot| !slot.is_empty() && slot.key == key)
            .map(|slot| slot.vote_p)
            .sum())
    }

    fn top_k(&self) -> Result<Vec<Record>> {
        let merged = merge_counts(
            self.slots
                .iter()
                .filter(|slot| !slot.is_empty())
                .map(|slot| (slot.key, slot.vote_p)),
        );
        Ok(ranked(&merged))
    }
}

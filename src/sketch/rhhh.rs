use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::{Result, SketchError};
use crate::hash::SeedSequence;
use crate::record::{Count, Key, Record};
use crate::sketch::Sketch;
use crate::tracker::{P4Pipeline, SpaceSaving, TopKTracker};

/// Prefix kept by each level, coarsest first.
pub const MASKS: [Key; 4] = [0xff00_0000, 0xffff_0000, 0xffff_ff00, 0xffff_ffff];

/// Memory of level `i + 1` relative to level `i`.
const ALPHA: f64 = 1.0;

/// Tracker kept at every level of an [`Rhhh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyBackend {
    SpaceSaving,
    P4Pipeline,
}

/// How an insert picks the single level it updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Uniformly at random from a seeded generator.
    Random,
    /// Levels in turn.
    RoundRobin,
}

/// Randomized hierarchical heavy hitters.
///
/// Each insert updates only one level, with the key masked to that level's
/// prefix. A level therefore sees about a quarter of the stream and its
/// counts estimate a quarter of the true prefix frequency.
pub struct Rhhh {
    levels: Vec<Box<dyn TopKTracker>>,
    dispatch: Dispatch,
    rng: SmallRng,
    cursor: usize,
}

impl Rhhh {
    pub fn new(memory: usize, backend: HierarchyBackend, dispatch: Dispatch, seed: u64) -> Result<Self> {
        let mut seeds = SeedSequence::new(seed);
        let share: f64 = (0..MASKS.len()).map(|i| ALPHA.powi(i as i32)).sum();
        let base = memory as f64 / share;

        let mut levels: Vec<Box<dyn TopKTracker>> = Vec::with_capacity(MASKS.len());
        for level in 0..MASKS.len() {
            let level_memory = (base * ALPHA.powi(level as i32)) as usize;
            let tracker: Box<dyn TopKTracker> = match backend {
                HierarchyBackend::SpaceSaving => Box::new(SpaceSaving::new(level_memory)?),
                HierarchyBackend::P4Pipeline => Box::new(P4Pipeline::new(level_memory, seeds.next_seed())?),
            };
            levels.push(tracker);
        }
        debug!(?backend, ?dispatch, levels = MASKS.len(), "constructed RHHH");

        Ok(Rhhh {
            levels,
            dispatch,
            rng: SmallRng::seed_from_u64(seeds.next_seed()),
            cursor: 0,
        })
    }

    pub fn levels(&self) -> usize {
        self.levels.len()
    }

    /// # Panics
    ///
    /// Panics if `level >= self.levels()`.
    pub fn mask(&self, level: usize) -> Key {
        MASKS[level]
    }

    /// Count of `key`'s prefix at `level`.
    ///
    /// # Panics
    ///
    /// Panics if `level >= self.levels()`.
    pub fn query_level(&self, key: Key, level: usize) -> Count {
        self.levels[level].query(key & MASKS[level])
    }

    /// Prefixes tracked at `level`, heaviest first.
    ///
    /// # Panics
    ///
    /// Panics if `level >= self.levels()`.
    pub fn level_top_k(&self, level: usize) -> Vec<Record> {
        self.levels[level].top_k()
    }

    fn pick_level(&mut self) -> usize {
        match self.dispatch {
            Dispatch::Random => self.rng.random_range(0..self.levels.len()),
            Dispatch::RoundRobin => {
                let level = self.cursor;
                self.cursor = (self.cursor + 1) % self.levels.len();
                level
            }
        }
    }
}

impl Sketch for Rhhh {
    fn name(&self) -> &'static str {
        "RHHH"
    }

    /// Performs `freq` unit updates, each at its own level.
    fn insert(&mut self, key: Key, freq: Count) {
        for _ in 0..freq.max(0) {
            let level = self.pick_level();
            // units falling out of a level are not forwarded anywhere
            let _ = self.levels[level].insert(key & MASKS[level]);
        }
    }

    /// A full key has no meaning without a level; see [`Rhhh::query_level`].
    fn query(&self, _key: Key) -> Result<Count> {
        Err(SketchError::unsupported(self.name(), "query without a level"))
    }
}

use tracing::debug;

use crate::error::{Result, SketchError};
use crate::hash::{SeedSequence, StageHash};
use crate::record::{Count, Key};
use crate::sketch::Sketch;

const TREES: usize = 2;

/// Saturation marker of each level: 8-bit, 16-bit, then 32-bit counters.
const THRESHOLD: [u64; 3] = [u8::MAX as u64, u16::MAX as u64, u32::MAX as u64];

/// FCM-sketch: per tree, narrow leaf counters that overflow into wider
/// parents shared by two children.
///
/// A counter holding its level's threshold is saturated and stands for
/// `threshold - 1`; the rest of the key's weight lives further up.
pub struct Fcm {
    height: usize,
    len: usize,
    hashes: Vec<StageHash>,
    // tree-major, then level
    levels: Vec<Vec<u64>>,
}

impl Fcm {
    /// `slot_size` is the byte width of the widest level (1, 2 or 4), which
    /// also fixes the tree height.
    pub fn new(memory: usize, slot_size: usize, seed: u64) -> Result<Self> {
        let height = match slot_size {
            1 => 1,
            2 => 2,
            4 => 3,
            _ => {
                return Err(SketchError::config(
                    "FCM",
                    format!("slot size {} must be 1, 2 or 4 bytes", slot_size),
                ))
            }
        };
        let len = memory / (TREES * height * slot_size);
        if len == 0 {
            return Err(SketchError::config(
                "FCM",
                format!("{} bytes cannot hold {} trees of height {}", memory, TREES, height),
            ));
        }

        let mut levels = Vec::with_capacity(TREES * height);
        for _ in 0..TREES {
            for level in 0..height {
                levels.push(vec![0; len << (height - 1 - level)]);
            }
        }
        debug!(height, len, "constructed FCM");

        Ok(Fcm {
            height,
            len,
            hashes: SeedSequence::new(seed).stage_hashes(TREES),
            levels,
        })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn leaf(&self, tree: usize, key: Key) -> usize {
        self.hashes[tree].bucket(key, self.len << (self.height - 1))
    }

    /// Raw counter of `key`'s path in `tree` at `level`.
    pub fn counter(&self, tree: usize, level: usize, key: Key) -> u64 {
        let pos = self.leaf(tree, key) >> level;
        self.levels[tree * self.height + level][pos]
    }

    fn tree_estimate(&self, tree: usize, key: Key) -> u64 {
        let mut pos = self.leaf(tree, key);
        let mut total = 0;
        for level in 0..self.height {
            let value = self.levels[tree * self.height + level][pos];
            if value == THRESHOLD[level] {
                total += THRESHOLD[level] - 1;
                pos /= 2;
            } else {
                total += value;
                break;
            }
        }
        total
    }
}

impl Sketch for Fcm {
    fn name(&self) -> &'static str {
        "FCM"
    }

    fn insert(&mut self, key: Key, freq: Count) {
        if freq <= 0 {
            return;
        }
        for tree in 0..TREES {
            let mut pos = self.leaf(tree, key);
            let mut carry = freq as u64;
            for level in 0..self.height {
                let threshold = THRESHOLD[level];
                let counter = &mut self.levels[tree * self.height + level][pos];
                if *counter < threshold {
                    if *counter + carry < threshold {
                        *counter += carry;
                        break;
                    }
                    carry -= (threshold - 1) - *counter;
                    *counter = threshold;
                }
                pos /= 2;
            }
        }
    }

    fn query(&self, key: Key) -> Result<Count> {
        let estimate = (0..TREES)
            .map(|tree| self.tree_estimate(tree, key))
            .min()
            .unwrap_or(0);
        Ok(estimate.min(Count::MAX as u64) as Count)
    }
}

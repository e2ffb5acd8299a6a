use std::collections::HashMap;
use std::fs::File;
use std::mem::size_of;
use std::path::{Path, PathBuf};

use ahash::RandomState;
use memmap2::Mmap;
use tracing::info;

use crate::error::{Result, SketchError};
use crate::record::{merge_counts, partial_key, ranked, Count, Key, PartialRecord, Record};

/// Bytes of the flow key at the start of every trace record.
pub const KEY_WIDTH: usize = size_of::<Key>();

/// Record stride of the CAIDA-style traces the driver reads by default.
pub const DEFAULT_RECORD_SIZE: usize = 21;

/// A packet trace held in memory together with its exact flow sizes.
pub struct Dataset {
    keys: Vec<Key>,
    counts: HashMap<Key, Count, RandomState>,
}

impl Dataset {
    /// Reads every `record_size`-byte record of `path`, keeping the first
    /// [`KEY_WIDTH`] bytes of each as a little-endian key.
    pub fn open(path: impl AsRef<Path>, record_size: usize) -> Result<Self> {
        let path = path.as_ref();
        if record_size < KEY_WIDTH {
            return Err(SketchError::config(
                "Dataset",
                format!("record size {} is smaller than the {}-byte key", record_size, KEY_WIDTH),
            ));
        }

        let io_error = |source| SketchError::Io {
            path: PathBuf::from(path),
            source,
        };
        let file = File::open(path).map_err(io_error)?;
        let len = file.metadata().map_err(io_error)?.len() as usize;
        if len == 0 {
            return Err(SketchError::EmptyTrace);
        }
        if len % record_size != 0 {
            return Err(SketchError::Truncated {
                path: PathBuf::from(path),
                len,
                record_size,
            });
        }

        // SAFETY: the trace is opened read-only and not modified while mapped.
        let mmap = unsafe { Mmap::map(&file) }.map_err(io_error)?;
        let keys = mmap
            .chunks_exact(record_size)
            .map(|record| {
                let mut raw = [0u8; KEY_WIDTH];
                raw.copy_from_slice(&record[..KEY_WIDTH]);
                Key::from_le_bytes(raw)
            })
            .collect();

        let dataset = Self::from_keys(keys)?;
        info!(
            path = %path.display(),
            packets = dataset.total_packets(),
            flows = dataset.total_flows(),
            "loaded trace"
        );
        Ok(dataset)
    }

    /// Builds a dataset from keys already in memory.
    pub fn from_keys(keys: Vec<Key>) -> Result<Self> {
        if keys.is_empty() {
            return Err(SketchError::EmptyTrace);
        }
        let mut counts = HashMap::with_hasher(RandomState::new());
        for &key in &keys {
            *counts.entry(key).or_insert(0) += 1;
        }
        Ok(Dataset { keys, counts })
    }

    pub fn total_packets(&self) -> usize {
        self.keys.len()
    }

    /// Number of distinct keys.
    pub fn total_flows(&self) -> usize {
        self.counts.len()
    }

    /// # Panics
    ///
    /// Panics if `i >= self.total_packets()`.
    pub fn key_at(&self, i: usize) -> Key {
        self.keys[i]
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn exact_count(&self, key: Key) -> Count {
        self.counts.get(&key).copied().unwrap_or(0)
    }

    /// Every flow, largest first.
    pub fn exact_top_k(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self
            .counts
            .iter()
            .map(|(&key, &count)| Record::new(key, count))
            .collect();
        records.sort_unstable();
        records
    }

    /// Flow sizes summed per partial key, largest first.
    pub fn exact_partial_top_k(&self) -> Vec<PartialRecord> {
        ranked(&merge_counts(
            self.counts.iter().map(|(&key, &count)| (partial_key(key), count)),
        ))
    }

    /// Flow sizes summed per `key & mask` prefix, largest first.
    pub fn exact_masked_top_k(&self, mask: Key) -> Vec<Record> {
        ranked(&merge_counts(
            self.counts.iter().map(|(&key, &count)| (key & mask, count)),
        ))
    }
}

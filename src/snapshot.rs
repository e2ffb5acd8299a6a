use std::cell::{Cell, OnceCell};
use std::collections::BTreeMap;

use tracing::warn;

use crate::record::{Count, PartialKey};

/// Partial-key aggregation computed on first request and cached.
///
/// The snapshot reflects the structure at the moment it was first built.
/// Inserting afterwards leaves it stale; the owner reports that through
/// [`PartialSnapshot::note_insert`], which logs a warning once.
pub(crate) struct PartialSnapshot {
    owner: &'static str,
    counts: OnceCell<BTreeMap<PartialKey, Count>>,
    warned: Cell<bool>,
}

impl PartialSnapshot {
    pub(crate) fn new(owner: &'static str) -> Self {
        Self {
            owner,
            counts: OnceCell::new(),
            warned: Cell::new(false),
        }
    }

    pub(crate) fn get_or_build<F>(&self, build: F) -> &BTreeMap<PartialKey, Count>
    where
        F: FnOnce() -> BTreeMap<PartialKey, Count>,
    {
        self.counts.get_or_init(build)
    }

    pub(crate) fn is_taken(&self) -> bool {
        self.counts.get().is_some()
    }

    #[inline]
    pub(crate) fn note_insert(&self) {
        if self.is_taken() && !self.warned.replace(true) {
            warn!(
                structure = self.owner,
                "insert after partial-key snapshot; partial results are stale"
            );
        }
    }
}

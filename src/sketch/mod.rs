//! Frequency estimators.
//!
//! Every estimator accepts weighted inserts, so it can sit behind a top-k
//! tracker and absorb the units the tracker evicts (see [`crate::bench::Composed`]).

use crate::error::{Result, SketchError};
use crate::record::{Count, Key, PartialRecord, Record};

mod cm;
pub use cm::CountMin;

mod count;
pub use count::CountSketch;

mod halfcu;
pub use halfcu::HalfCu;

mod nitro;
pub use nitro::NitroCm;

mod coco;
pub use coco::Coco;

mod fcm;
pub use fcm::Fcm;

mod countheap;
pub use countheap::CountHeap;

mod univmon;
pub use univmon::Univmon;

pub(crate) mod elastic;
pub use elastic::ElasticSketch;

mod rhhh;
pub use rhhh::{Dispatch, HierarchyBackend, Rhhh};

/// Common contract of the estimator family.
pub trait Sketch {
    fn name(&self) -> &'static str;

    /// Adds `freq` occurrences of `key`.
    fn insert(&mut self, key: Key, freq: Count);

    /// Estimated frequency of `key`.
    fn query(&self, key: Key) -> Result<Count>;

    /// Keys the estimator can enumerate, highest estimate first.
    fn top_k(&self) -> Result<Vec<Record>> {
        Err(SketchError::unsupported(self.name(), "top_k"))
    }

    /// Estimates aggregated per partial key, highest first.
    fn partial_top_k(&self) -> Result<Vec<PartialRecord>> {
        Err(SketchError::unsupported(self.name(), "partial_top_k"))
    }
}

impl<S: Sketch + ?Sized> Sketch for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn insert(&mut self, key: Key, freq: Count) {
        (**self).insert(key, freq)
    }

    fn query(&self, key: Key) -> Result<Count> {
        (**self).query(key)
    }

    fn top_k(&self) -> Result<Vec<Record>> {
        (**self).top_k()
    }

    fn partial_top_k(&self) -> Result<Vec<PartialRecord>> {
        (**self).partial_top_k()
    }
}

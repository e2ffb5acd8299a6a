//! Benchmark harness for heavy-hitter sketches and multi-stage top-k trackers
//!
//! Two families of streaming summaries are provided. Estimators ([`Sketch`])
//! take weighted inserts and answer point queries: Count-Min, Count sketch,
//! conservative update, NitroSketch, CocoSketch, FCM, CountHeap, UnivMon, the
//! Elastic heavy part and randomized hierarchical heavy hitters. Trackers
//! ([`TopKTracker`]) take unit inserts and keep heavy keys in small
//! hash-indexed stages: HashPipe, Elastic, PRECISION, a P4-style funnel and
//! Space-Saving.
//!
//! A tracker placed in front of an estimator with [`Composed`] forwards the
//! units it evicts, modelling a fast switch cache that filters traffic for a
//! larger counter array behind it. [`Dataset`] loads a packet trace and keeps
//! the exact flow sizes the structures are scored against.

mod error;
pub use error::{Result, SketchError};

mod record;
pub use record::{partial_key, Count, Key, PartialKey, PartialRecord, Record, Slot};

pub mod hash;
mod priority_queue;
mod snapshot;

pub mod sketch;
pub use sketch::Sketch;

pub mod tracker;
pub use tracker::TopKTracker;

pub mod dataset;
pub use dataset::Dataset;

pub mod bench;
pub use bench::Composed;

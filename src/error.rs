use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building a structure, loading a trace, or scoring results.
///
/// Inserts and queries on a correctly constructed structure never fail; the
/// only runtime error they produce is [`SketchError::Unsupported`].
#[derive(Error, Debug)]
pub enum SketchError {
    /// The memory budget or geometry cannot produce a usable structure.
    #[error("invalid configuration for {structure}: {reason}")]
    Config {
        structure: &'static str,
        reason: String,
    },

    /// The structure does not answer this kind of request.
    #[error("{operation} is not supported by {structure}")]
    Unsupported {
        structure: &'static str,
        operation: &'static str,
    },

    #[error("failed to read trace {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("trace {path:?} is truncated: {len} bytes is not a multiple of the {record_size}-byte record")]
    Truncated {
        path: PathBuf,
        len: usize,
        record_size: usize,
    },

    #[error("trace contains no records")]
    EmptyTrace,

    /// A relative metric had no key with a non-zero exact count to divide by.
    #[error("numeric domain error: {0}")]
    NumericDomain(String),
}

impl SketchError {
    pub(crate) fn config(structure: &'static str, reason: impl Into<String>) -> Self {
        SketchError::Config {
            structure,
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(structure: &'static str, operation: &'static str) -> Self {
        SketchError::Unsupported {
            structure,
            operation,
        }
    }
}

pub type Result<T> = std::result::Result<T, SketchError>;

/// Splits `memory` bytes into `stages` arrays of `slot_size`-byte cells.
///
/// Fails instead of returning a zero-length array.
pub(crate) fn stage_len(
    structure: &'static str,
    memory: usize,
    stages: usize,
    slot_size: usize,
) -> Result<usize> {
    if stages == 0 {
        return Err(SketchError::config(structure, "stage count must be non-zero"));
    }
    if slot_size == 0 {
        return Err(SketchError::config(structure, "slot size must be non-zero"));
    }
    let len = memory / (stages * slot_size);
    if len == 0 {
        return Err(SketchError::config(
            structure,
            format!(
                "{} bytes cannot hold {} stages of {}-byte slots",
                memory, stages, slot_size
            ),
        ));
    }
    Ok(len)
}

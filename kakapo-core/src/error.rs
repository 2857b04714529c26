//! Error types for kakapo-core.

use thiserror::Error;

/// Result type alias for kakapo operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for kakapo operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A filename does not split into the number of fields the schema expects.
    #[error("malformed filename {name:?}: expected {expected} fields, found {found}")]
    MalformedFilename {
        name: String,
        expected: usize,
        found: usize,
    },

    /// A filename field is empty.
    #[error("malformed filename {name:?}: empty {field} field")]
    EmptyField { name: String, field: &'static str },

    /// Neither a volume nor a projection output was requested.
    #[error("nothing to save: enable volume and/or projection output")]
    NothingToSave,

    /// Illumination sides disagree on their timepoint count under the strict policy.
    #[error("illumination sides have mismatched timepoint counts: {counts:?}")]
    TimepointMismatch { counts: Vec<usize> },

    /// Arrays that must line up element for element do not.
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

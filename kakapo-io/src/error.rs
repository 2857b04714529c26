//! I/O error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decode or encode error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Chunked store error.
    #[error("store error: {0}")]
    Store(String),

    /// HDF5 error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// Manifest (de)serialization error.
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// Invalid file format or configuration value.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// The acquisition path is missing or not a directory.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// The directory holds no file matching the naming scheme.
    #[error("no qualifying image files in {}", .0.display())]
    NoQualifyingFiles(PathBuf),

    /// The requested region is not in the index.
    #[error("unknown region {0:?}")]
    UnknownRegion(String),

    /// First/last settings sidecars are not uniquely identified.
    #[error(
        "region {region}: expected one settings file per end, found {first} first and {last} last"
    )]
    SettingsFileCount {
        region: String,
        first: usize,
        last: usize,
    },

    /// A settings sidecar has no parsable timestamp line.
    #[error("bad timestamp in {}: {reason}", .path.display())]
    Timestamp { path: PathBuf, reason: String },

    /// Interval is undefined for a single timepoint.
    #[error("region {0} has a single timepoint; frame interval is undefined")]
    SingleTimepoint(String),

    /// Several files claim the same timepoint of one illumination side.
    #[error("{region}/{channel}/{illumination}: {count} files for timepoint {timepoint}")]
    DuplicateTimepoint {
        region: String,
        channel: String,
        illumination: String,
        timepoint: String,
        count: usize,
    },

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] kakapo_core::Error),
}

pub(crate) fn store_error(err: impl std::fmt::Display) -> Error {
    Error::Store(err.to_string())
}

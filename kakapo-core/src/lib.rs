//! kakapo-core: Core types for light-sheet acquisition reduction.
//!
//! This crate provides the filename schema that recovers dimensional
//! coordinates from flat acquisition directories, physical calibration,
//! and the options that drive region/channel processing.
//!

pub mod calibration;
pub mod error;
pub mod options;
pub mod schema;

pub use calibration::{Calibration, BASE_Z_SPACING_UM, CAMERA_PIXEL_UM, DEFAULT_MAGNIFICATION};
pub use error::{Error, Result};
pub use options::{IlluminationPolicy, SaveOptions, StoreFormat, VocabularyScope};
pub use schema::{DimensionKind, FilenameRecord, FilenameSchema};

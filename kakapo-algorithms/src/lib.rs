//! kakapo-algorithms: Array kernels for light-sheet volume reduction.
//!
//! This crate provides the per-voxel operations of the reduction pipeline:
//! - **Fusion** - elementwise maximum across illumination sides
//! - **Decimation** - strided subsampling in z, y and x
//! - **Projection** - maximum intensity along depth
//!
#![warn(missing_docs)]

mod decimate;
mod fusion;
mod projection;
mod reduce;

pub use decimate::{decimate_series, decimate_xy, decimate_zyx, decimated_len, decimated_shape};
pub use fusion::{fuse_max, fuse_max_into, fuse_owned, fuse_series};
pub use projection::{fused_max_projection, max_projection};
pub use reduce::{reduce_timepoint, ReducedTimepoint, ReductionParams};

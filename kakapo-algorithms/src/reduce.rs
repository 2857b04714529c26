//! Per-timepoint reduction: fuse, decimate and project in one pass.

use crate::decimate::decimate_zyx;
use crate::fusion::fuse_owned;
use crate::projection::{fused_max_projection, max_projection};
use kakapo_core::{Error, Result, SaveOptions};
use ndarray::{Array2, Array3, ArrayView3};

/// What to derive from one timepoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionParams {
    /// Lateral decimation stride.
    pub stride: usize,
    /// Axial decimation factor.
    pub depth_factor: usize,
    /// Produce the decimated volume.
    pub volume: bool,
    /// Produce the full-resolution max projection.
    pub projection: bool,
}

impl Default for ReductionParams {
    fn default() -> Self {
        Self {
            stride: 4,
            depth_factor: 1,
            volume: true,
            projection: true,
        }
    }
}

impl From<&SaveOptions> for ReductionParams {
    fn from(options: &SaveOptions) -> Self {
        Self {
            stride: options.stride,
            depth_factor: options.depth_factor,
            volume: options.save_volume,
            projection: options.save_projection,
        }
    }
}

/// Outputs derived from one timepoint.
#[derive(Debug, Clone, Default)]
pub struct ReducedTimepoint {
    /// Fused and decimated (z, y, x) volume.
    pub volume: Option<Array3<u16>>,
    /// Full-resolution fused max projection.
    pub projection: Option<Array2<u16>>,
}

impl ReducedTimepoint {
    /// Bytes held by the reduced arrays.
    #[must_use]
    pub fn nbytes(&self) -> usize {
        let volume = self.volume.as_ref().map_or(0, Array3::len);
        let projection = self.projection.as_ref().map_or(0, Array2::len);
        (volume + projection) * std::mem::size_of::<u16>()
    }
}

/// Reduce the illumination sides of one timepoint.
///
/// The projection is taken per side at full resolution and the 2-D results
/// are fused; the volume is fused first and then decimated.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] if the sides differ in shape, or a
/// configuration error if `sides` is empty.
pub fn reduce_timepoint(
    sides: Vec<Array3<u16>>,
    params: &ReductionParams,
) -> Result<ReducedTimepoint> {
    if sides.is_empty() {
        return Err(Error::ConfigError(
            "no illumination side to reduce".to_string(),
        ));
    }

    let projection = if params.projection {
        let views: Vec<ArrayView3<'_, u16>> = sides.iter().map(Array3::view).collect();
        Some(if views.len() == 1 {
            max_projection(views[0].view())
        } else {
            fused_max_projection(&views)?
        })
    } else {
        None
    };

    let volume = if params.volume {
        let fused = fuse_owned(sides)?;
        Some(decimate_zyx(
            fused.view(),
            params.depth_factor,
            params.stride,
        ))
    } else {
        None
    };

    Ok(ReducedTimepoint { volume, projection })
}

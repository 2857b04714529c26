//! Physical calibration of reduced outputs.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Camera pixel pitch in micrometers at the sensor.
pub const CAMERA_PIXEL_UM: f64 = 6.4;

/// Light-sheet step between acquired planes in micrometers.
pub const BASE_Z_SPACING_UM: f64 = 2.5;

/// Objective magnification assumed when the acquisition metadata has none.
pub const DEFAULT_MAGNIFICATION: u32 = 10;

/// Voxel size and frame interval attached to written volumes and projections.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Calibration {
    /// Objective magnification the sizes were derived from.
    pub magnification: u32,
    /// Lateral pixel size of the (decimated) output in micrometers.
    pub pixel_size_um: f64,
    /// Axial spacing of the (decimated) output in micrometers.
    pub z_spacing_um: f64,
    /// Mean seconds between timepoints, when known.
    pub frame_interval_s: Option<f64>,
}

impl Calibration {
    /// Calibration for an output decimated by `xy_stride` laterally and
    /// `depth_factor` axially.
    #[must_use]
    pub fn new(magnification: u32, xy_stride: usize, depth_factor: usize) -> Self {
        let magnification = magnification.max(1);
        Self {
            magnification,
            pixel_size_um: full_resolution_pixel_um(magnification) * as_f64(xy_stride.max(1)),
            z_spacing_um: BASE_Z_SPACING_UM * as_f64(depth_factor.max(1)),
            frame_interval_s: None,
        }
    }

    /// Calibration of the undecimated acquisition.
    #[must_use]
    pub fn full_resolution(magnification: u32) -> Self {
        Self::new(magnification, 1, 1)
    }

    /// Attach a frame interval.
    #[must_use]
    pub fn with_frame_interval(mut self, seconds: Option<f64>) -> Self {
        self.frame_interval_s = seconds;
        self
    }

    /// Lateral resolution in pixels per micrometer.
    #[must_use]
    pub fn pixels_per_um(&self) -> f64 {
        1.0 / self.pixel_size_um
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::full_resolution(DEFAULT_MAGNIFICATION)
    }
}

fn full_resolution_pixel_um(magnification: u32) -> f64 {
    CAMERA_PIXEL_UM / f64::from(magnification)
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(value: usize) -> f64 {
    value as f64
}

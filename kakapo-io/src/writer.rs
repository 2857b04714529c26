//! TIFF writers for projections and standalone volumes.
//!
//! Files carry an ImageJ description so Fiji opens them with the physical
//! calibration applied.

use crate::{Error, Result};
use kakapo_core::Calibration;
use ndarray::{ArrayView2, ArrayView3, Axis};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};
use tiff::encoder::colortype::Gray16;
use tiff::encoder::{Rational, TiffEncoder};
use tiff::tags::{ResolutionUnit, Tag};

const IMAGEJ_VERSION: &str = "1.11a";
const RESOLUTION_DENOMINATOR: u32 = 1_000_000;

/// Write one 2-D plane with `YX` ImageJ metadata.
///
/// # Errors
/// Returns an error if the file cannot be created or encoded.
pub fn write_plane_tiff(
    path: &Path,
    plane: ArrayView2<'_, u16>,
    calibration: &Calibration,
) -> Result<()> {
    let description = imagej_description(None, calibration);
    let volume = plane.insert_axis(Axis(0));
    encode_pages(path, volume, &description, calibration)
}

/// Write a `(z, y, x)` volume as a multi-page ImageJ hyperstack.
///
/// # Errors
/// Returns an error if the file cannot be created or encoded.
pub fn write_volume_tiff(
    path: &Path,
    volume: ArrayView3<'_, u16>,
    calibration: &Calibration,
) -> Result<()> {
    let description = imagej_description(Some(volume.len_of(Axis(0))), calibration);
    encode_pages(path, volume, &description, calibration)
}

/// Writes per-timepoint max projections for one region/channel.
#[derive(Debug, Clone)]
pub struct ProjectionWriter {
    dir: PathBuf,
    region: String,
    channel: String,
    calibration: Calibration,
}

impl ProjectionWriter {
    /// Projections go to `dir`; `calibration` should describe full resolution.
    #[must_use]
    pub fn new(
        dir: impl Into<PathBuf>,
        region: impl Into<String>,
        channel: impl Into<String>,
        calibration: Calibration,
    ) -> Self {
        Self {
            dir: dir.into(),
            region: region.into(),
            channel: channel.into(),
            calibration,
        }
    }

    /// `{region}_{channel}_{timepoint}_Max.tiff` inside the output directory.
    #[must_use]
    pub fn path_for(&self, timepoint: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}_{timepoint}_Max.tiff", self.region, self.channel))
    }

    /// Write the projection of `timepoint` and return its path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write(&self, timepoint: &str, projection: ArrayView2<'_, u16>) -> Result<PathBuf> {
        let path = self.path_for(timepoint);
        write_plane_tiff(&path, projection, &self.calibration)?;
        Ok(path)
    }
}

fn encode_pages(
    path: &Path,
    volume: ArrayView3<'_, u16>,
    description: &str,
    calibration: &Calibration,
) -> Result<()> {
    let (_, height, width) = volume.dim();
    let width = u32::try_from(width)
        .map_err(|_| Error::InvalidFormat(format!("width {width} exceeds TIFF limits")))?;
    let height = u32::try_from(height)
        .map_err(|_| Error::InvalidFormat(format!("height {height} exceeds TIFF limits")))?;
    if volume.len_of(Axis(0)) == 0 {
        return Err(Error::InvalidFormat(format!(
            "{}: refusing to write a TIFF with no planes",
            path.display()
        )));
    }
    let pixels_per_um = calibration.pixels_per_um();

    let mut writer = BufWriter::new(File::create(path)?);
    {
        let mut encoder = TiffEncoder::new(&mut writer)?;
        for (index, plane) in volume.axis_iter(Axis(0)).enumerate() {
            let mut image = encoder.new_image::<Gray16>(width, height)?;
            if index == 0 {
                image
                    .encoder()
                    .write_tag(Tag::ImageDescription, description)?;
            }
            image.resolution(ResolutionUnit::None, rational(pixels_per_um));
            let plane = plane.as_standard_layout();
            let data = plane
                .as_slice()
                .ok_or_else(|| Error::InvalidFormat("plane is not contiguous".to_string()))?;
            image.write_data(data)?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// ImageJ description block. `slices` is set for z stacks only.
fn imagej_description(slices: Option<usize>, calibration: &Calibration) -> String {
    let mut text = format!("ImageJ={IMAGEJ_VERSION}\n");
    if let Some(slices) = slices {
        let _ = writeln!(text, "images={slices}");
        let _ = writeln!(text, "slices={slices}");
        let _ = writeln!(text, "spacing={}", calibration.z_spacing_um);
        text.push_str("axes=ZYX\n");
    } else {
        text.push_str("axes=YX\n");
    }
    text.push_str("unit=micron\n");
    if let Some(interval) = calibration.frame_interval_s {
        let _ = writeln!(text, "finterval={interval}");
    }
    text.push_str("loop=false\n");
    text
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn rational(value: f64) -> Rational {
    let scaled = (value * f64::from(RESOLUTION_DENOMINATOR)).round();
    Rational {
        n: scaled.clamp(1.0, f64::from(u32::MAX)) as u32,
        d: RESOLUTION_DENOMINATOR,
    }
}

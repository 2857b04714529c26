//! Standalone per-frame downsampler for quick review of one channel.
//!
//! Writes `0_vol_downsample/{channel}_{i}.tif` and
//! `0_max_projections/{channel}_{i}.tif` into the acquisition directory, one
//! pair per frame, where `i` counts frames from 0.

use crate::reader::read_volume;
use crate::scanner::DatasetIndex;
use crate::writer::{write_plane_tiff, write_volume_tiff};
use crate::{Error, Result};
use kakapo_algorithms::{reduce_timepoint, ReductionParams};
use kakapo_core::{Calibration, DimensionKind, IlluminationPolicy, DEFAULT_MAGNIFICATION};
use log::{debug, info, warn};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Output directory for downsampled volumes.
pub const VOLUME_DIR: &str = "0_vol_downsample";

/// Output directory for full-resolution max projections.
pub const PROJECTION_DIR: &str = "0_max_projections";

/// Settings of the standalone downsampler.
#[derive(Debug, Clone, PartialEq)]
pub struct DownsampleOptions {
    /// Channel name to process.
    pub channel: String,
    /// Restrict to one region; otherwise every region's files are used.
    pub region: Option<String>,
    pub xy_factor: usize,
    pub z_factor: usize,
    /// Objective magnification; 10x when unset.
    pub magnification: Option<u32>,
    pub frame_interval_s: Option<f64>,
}

impl DownsampleOptions {
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            region: None,
            xy_factor: 8,
            z_factor: 2,
            magnification: None,
            frame_interval_s: None,
        }
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Values less than 1 are clamped to 1.
    #[must_use]
    pub fn with_xy_factor(mut self, factor: usize) -> Self {
        self.xy_factor = factor.max(1);
        self
    }

    /// Values less than 1 are clamped to 1.
    #[must_use]
    pub fn with_z_factor(mut self, factor: usize) -> Self {
        self.z_factor = factor.max(1);
        self
    }

    #[must_use]
    pub fn with_magnification(mut self, magnification: Option<u32>) -> Self {
        self.magnification = magnification;
        self
    }

    #[must_use]
    pub fn with_frame_interval(mut self, seconds: Option<f64>) -> Self {
        self.frame_interval_s = seconds;
        self
    }
}

/// Result of a downsampling run.
#[derive(Debug, Clone)]
pub struct DownsampleReport {
    pub frames: usize,
    pub volume_dir: PathBuf,
    pub projection_dir: PathBuf,
    /// Wall-clock time of each frame.
    pub frame_times: Vec<Duration>,
}

/// Fuse, project and downsample every frame of one channel.
///
/// Files are grouped by illumination side and paired by position in file
/// name order; longer sides are cut to the shortest.
///
/// # Errors
/// Returns an error if the channel has no files, a file cannot be decoded,
/// or an output cannot be written.
pub fn downsample_channel(
    index: &DatasetIndex,
    options: &DownsampleOptions,
) -> Result<DownsampleReport> {
    let sides = side_files(index, options);
    if sides.is_empty() {
        return Err(Error::InvalidFormat(format!(
            "no files for channel {:?}",
            options.channel
        )));
    }
    let counts: Vec<usize> = sides.iter().map(Vec::len).collect();
    let frames = IlluminationPolicy::Truncate.aligned_len(&counts)?;
    if counts.iter().any(|&count| count != frames) {
        warn!(
            "channel {}: sides have {counts:?} frames, using {frames}",
            options.channel
        );
    }

    let volume_dir = index.root().join(VOLUME_DIR);
    let projection_dir = index.root().join(PROJECTION_DIR);
    fs::create_dir_all(&volume_dir)?;
    fs::create_dir_all(&projection_dir)?;

    let magnification = options
        .magnification
        .filter(|&magnification| magnification > 0)
        .unwrap_or(DEFAULT_MAGNIFICATION);
    let volume_calibration = Calibration::new(magnification, options.xy_factor, options.z_factor)
        .with_frame_interval(options.frame_interval_s);
    let projection_calibration =
        Calibration::full_resolution(magnification).with_frame_interval(options.frame_interval_s);
    let params = ReductionParams {
        stride: options.xy_factor,
        depth_factor: options.z_factor,
        volume: true,
        projection: true,
    };

    let mut frame_times = Vec::with_capacity(frames);
    for frame in 0..frames {
        let started = Instant::now();
        let volumes = sides
            .iter()
            .map(|files| read_volume(&files[frame]))
            .collect::<Result<Vec<_>>>()?;
        debug!("frame {frame}: loaded {} sides", volumes.len());

        let reduced = reduce_timepoint(volumes, &params)?;
        let name = format!("{}_{frame}.tif", options.channel);
        if let Some(volume) = &reduced.volume {
            write_volume_tiff(&volume_dir.join(&name), volume.view(), &volume_calibration)?;
        }
        if let Some(projection) = &reduced.projection {
            write_plane_tiff(
                &projection_dir.join(&name),
                projection.view(),
                &projection_calibration,
            )?;
        }

        let elapsed = started.elapsed();
        info!(
            "channel {}: frame {frame} ({}/{frames}) in {:.3} s",
            options.channel,
            frame + 1,
            elapsed.as_secs_f64()
        );
        frame_times.push(elapsed);
    }

    Ok(DownsampleReport {
        frames,
        volume_dir,
        projection_dir,
        frame_times,
    })
}

fn side_files(index: &DatasetIndex, options: &DownsampleOptions) -> Vec<Vec<PathBuf>> {
    index
        .names(DimensionKind::Illumination)
        .iter()
        .map(|illumination| {
            index
                .records()
                .iter()
                .zip(index.files())
                .filter(|(record, _)| {
                    record.matches(DimensionKind::Channel, &options.channel)
                        && record.matches(DimensionKind::Illumination, illumination)
                        && options
                            .region
                            .as_deref()
                            .is_none_or(|region| record.matches(DimensionKind::Region, region))
                })
                .map(|(_, name)| index.root().join(name))
                .collect::<Vec<_>>()
        })
        .filter(|files: &Vec<PathBuf>| !files.is_empty())
        .collect()
}

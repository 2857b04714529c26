//! Streaming reduction of one region/channel.
//!
//! A worker thread decodes the illumination sides of each timepoint, fuses
//! them and derives the decimated volume and the max projection. The calling
//! thread receives the reduced timepoints over a bounded channel and writes
//! them to the volume store and the projection TIFFs, so at most
//! `in_flight + 1` timepoints are held in memory at once.

use crate::out_of_core::{timepoint_bytes, OutOfCoreConfig};
use crate::reader::{read_volume, TiffVolumeReader};
use crate::scanner::{DatasetIndex, NameSet, TimepointFile};
use crate::store::{create_sink, volume_store_path, VolumeLayout};
use crate::writer::ProjectionWriter;
use crate::{Error, Result};
use kakapo_algorithms::{
    decimated_shape, fused_max_projection, reduce_timepoint, ReducedTimepoint, ReductionParams,
};
use kakapo_core::{Calibration, SaveOptions};
use log::{debug, info, warn};
use ndarray::{Array3, ArrayView3, ArrayView4, Axis};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::mpsc::sync_channel;
use std::time::{Duration, Instant};

/// Files of one illumination side, one per timepoint.
#[derive(Debug, Clone)]
pub struct IlluminationSide {
    pub illumination: String,
    pub files: Vec<TimepointFile>,
}

/// Everything needed to reduce one (region, channel).
#[derive(Debug, Clone)]
pub struct ChannelJob {
    pub region: String,
    pub channel: String,
    /// Sides in illumination name order; sides without files are omitted.
    pub sides: Vec<IlluminationSide>,
    /// Output directory of the region.
    pub out_dir: PathBuf,
}

impl ChannelJob {
    /// Collect the side file lists of `channel` in `region`.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateTimepoint`] if a side has more than one file
    /// for the same timepoint (tiles or views are not combined).
    pub fn from_index(
        index: &DatasetIndex,
        region: &str,
        channel: &str,
        illuminations: &NameSet,
        out_dir: &Path,
    ) -> Result<Self> {
        let mut sides = Vec::new();
        for illumination in illuminations.iter() {
            let files = index.select(region, channel, illumination);
            if files.is_empty() {
                continue;
            }
            if let Some((timepoint, count)) = first_duplicate(&files) {
                return Err(Error::DuplicateTimepoint {
                    region: region.to_string(),
                    channel: channel.to_string(),
                    illumination: illumination.to_string(),
                    timepoint: timepoint.to_string(),
                    count,
                });
            }
            sides.push(IlluminationSide {
                illumination: illumination.to_string(),
                files,
            });
        }
        Ok(Self {
            region: region.to_string(),
            channel: channel.to_string(),
            sides,
            out_dir: out_dir.to_path_buf(),
        })
    }

    /// True when no side has any file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sides.is_empty()
    }

    fn side_counts(&self) -> Vec<usize> {
        self.sides.iter().map(|side| side.files.len()).collect()
    }

    fn paths_at(&self, t: usize) -> Vec<&Path> {
        self.sides
            .iter()
            .map(|side| side.files[t].path.as_path())
            .collect()
    }
}

/// Outcome of one channel.
#[derive(Debug, Clone)]
pub struct ChannelReport {
    pub region: String,
    pub channel: String,
    /// Illumination sides that were fused.
    pub illuminations: Vec<String>,
    /// Timepoints written.
    pub timepoints: usize,
    /// Timepoints dropped from the longer sides.
    pub dropped_timepoints: usize,
    /// Volume store, when written.
    pub volume_path: Option<PathBuf>,
    /// `(t, z, y, x)` extent of the volume store.
    pub volume_shape: Option<[usize; 4]>,
    /// Projection files, in timepoint order.
    pub projections: Vec<PathBuf>,
    /// Time spent writing the volume store.
    pub store_elapsed: Duration,
    pub elapsed: Duration,
}

/// Reduce one channel and write its outputs.
///
/// `calibration` describes the full-resolution acquisition (magnification and
/// frame interval); the volume calibration is derived from the decimation
/// factors in `options`.
///
/// # Errors
/// Returns an error if the sides cannot be aligned, a file cannot be decoded,
/// sides differ in shape, or an output cannot be written.
pub fn process_channel(
    job: &ChannelJob,
    options: &SaveOptions,
    calibration: &Calibration,
    out_of_core: &OutOfCoreConfig,
) -> Result<ChannelReport> {
    let started = Instant::now();
    let label = format!("{}/{}", job.region, job.channel);

    let counts = job.side_counts();
    let aligned = options.illumination.aligned_len(&counts)?;
    if aligned == 0 {
        return Err(Error::InvalidFormat(format!("{label}: no timepoints to process")));
    }
    let longest = counts.iter().copied().max().unwrap_or(aligned);
    if longest > aligned {
        warn!("{label}: illumination sides have {counts:?} timepoints, truncating to {aligned}");
    }
    let timepoints: Vec<&str> = job.sides[0].files[..aligned]
        .iter()
        .map(|file| file.timepoint.as_str())
        .collect();

    let first = &job.sides[0].files[0].path;
    let shape = TiffVolumeReader::open(first)?.probe_shape()?;
    let bytes = timepoint_bytes(shape, job.sides.len());
    let in_flight = out_of_core.in_flight_timepoints(bytes)?;
    let pool = out_of_core.thread_pool()?;
    debug!(
        "{label}: {} sides of {shape:?}, {aligned} timepoints, {in_flight} in flight",
        job.sides.len()
    );

    let params = ReductionParams::from(options);
    let layout = VolumeLayout::new(
        aligned,
        decimated_shape(shape, params.depth_factor, params.stride),
    );
    let mut sink = if params.volume {
        let volume_calibration = Calibration::new(
            calibration.magnification,
            params.stride,
            params.depth_factor,
        )
        .with_frame_interval(calibration.frame_interval_s);
        let path = volume_store_path(&job.out_dir, &job.region, &job.channel, options.format);
        Some(create_sink(options.format, &path, layout, &volume_calibration)?)
    } else {
        None
    };
    let projection_writer = params
        .projection
        .then(|| ProjectionWriter::new(&job.out_dir, &job.region, &job.channel, *calibration));

    let mut store_elapsed = Duration::ZERO;
    let mut projections = Vec::with_capacity(if params.projection { aligned } else { 0 });

    std::thread::scope(|scope| -> Result<()> {
        let (tx, rx) = sync_channel::<Result<(usize, ReducedTimepoint)>>(in_flight);
        let pool = pool.as_ref();
        let params = &params;

        scope.spawn(move || {
            for t in 0..aligned {
                let paths = job.paths_at(t);
                let reduce = || -> Result<ReducedTimepoint> {
                    let sides = decode_sides(&paths)?;
                    Ok(reduce_timepoint(sides, params)?)
                };
                let reduced = match pool {
                    Some(pool) => pool.install(reduce),
                    None => reduce(),
                };
                let failed = reduced.is_err();
                if tx.send(reduced.map(|reduced| (t, reduced))).is_err() || failed {
                    break;
                }
            }
        });

        for message in rx {
            let (t, reduced) = message?;
            let timepoint = timepoints[t];
            if let (Some(sink), Some(volume)) = (sink.as_mut(), reduced.volume.as_ref()) {
                let write_started = Instant::now();
                sink.write_timepoint(t, volume.view())?;
                store_elapsed += write_started.elapsed();
            }
            if let (Some(writer), Some(projection)) =
                (projection_writer.as_ref(), reduced.projection.as_ref())
            {
                projections.push(writer.write(timepoint, projection.view())?);
            }
            debug!(
                "{label}: timepoint {timepoint} ({}/{aligned}) written",
                t + 1
            );
        }
        Ok(())
    })?;

    let volume_path = match sink.as_mut() {
        Some(sink) => {
            let finish_started = Instant::now();
            sink.finish()?;
            store_elapsed += finish_started.elapsed();
            info!(
                "{label}: volume store {} written in {:.2} s",
                sink.path().display(),
                store_elapsed.as_secs_f64()
            );
            Some(sink.path().to_path_buf())
        }
        None => None,
    };

    let elapsed = started.elapsed();
    info!(
        "{label}: {aligned} timepoints reduced in {:.2} s",
        elapsed.as_secs_f64()
    );

    Ok(ChannelReport {
        region: job.region.clone(),
        channel: job.channel.clone(),
        illuminations: job
            .sides
            .iter()
            .map(|side| side.illumination.clone())
            .collect(),
        timepoints: aligned,
        dropped_timepoints: longest - aligned,
        volume_path,
        volume_shape: params.volume.then_some(layout.dims()),
        projections,
        store_elapsed,
        elapsed,
    })
}

/// Project and write an in-memory `(t, z, y, x)` series per timepoint.
///
/// With several sides, each side is projected on its own and the 2-D results
/// are fused by maximum. Sides are paired by index and cut to the shortest.
///
/// # Errors
/// Returns an error if the sides differ in plane shape or a file cannot be
/// written.
pub fn write_projections(
    writer: &ProjectionWriter,
    timepoints: &[String],
    sides: &[ArrayView4<'_, u16>],
) -> Result<Vec<PathBuf>> {
    let frames = sides
        .iter()
        .map(|side| side.len_of(Axis(0)))
        .chain(std::iter::once(timepoints.len()))
        .min()
        .unwrap_or(0);
    let mut written = Vec::with_capacity(frames);
    for (t, timepoint) in timepoints.iter().enumerate().take(frames) {
        let views: Vec<ArrayView3<'_, u16>> =
            sides.iter().map(|side| side.index_axis(Axis(0), t)).collect();
        let projection = fused_max_projection(&views)?;
        written.push(writer.write(timepoint, projection.view())?);
        debug!("projection {}/{frames} written", t + 1);
    }
    Ok(written)
}

fn decode_sides(paths: &[&Path]) -> Result<Vec<Array3<u16>>> {
    paths.par_iter().map(|path| read_volume(path)).collect()
}

fn first_duplicate(files: &[TimepointFile]) -> Option<(&str, usize)> {
    let mut i = 0;
    while i < files.len() {
        let timepoint = files[i].timepoint.as_str();
        let run = files[i..]
            .iter()
            .take_while(|file| file.timepoint == timepoint)
            .count();
        if run > 1 {
            return Some((timepoint, run));
        }
        i += run;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_volume;
    use crate::writer::write_volume_tiff;
    use kakapo_core::{FilenameSchema, IlluminationPolicy};
    use ndarray::Array4;
    use std::fs;
    use tempfile::tempdir;

    fn volume(t: usize, side: usize) -> Array3<u16> {
        Array3::from_shape_fn((4, 8, 8), |(z, y, x)| {
            u16::try_from((t * 7 + side * 3 + z * 11 + y * 5 + x) % 97).unwrap()
        })
    }

    fn write_side(dir: &Path, side: usize, timepoints: usize) {
        for t in 0..timepoints {
            let name = format!("S0_t{t:04}_V0_R0_X00_Y00_C00_I{side}_K0_P0.tif");
            write_volume_tiff(&dir.join(name), volume(t, side).view(), &Calibration::default())
                .unwrap();
        }
    }

    fn job_for(dir: &Path, out: &Path) -> ChannelJob {
        let index = DatasetIndex::open(dir, FilenameSchema::default()).unwrap();
        let illuminations = index.names(kakapo_core::DimensionKind::Illumination).clone();
        ChannelJob::from_index(&index, "R0", "C00", &illuminations, out).unwrap()
    }

    #[test]
    fn test_process_channel_truncates_and_fuses() {
        let dir = tempdir().unwrap();
        let out = tempdir().unwrap();
        write_side(dir.path(), 0, 3);
        write_side(dir.path(), 1, 2);
        let job = job_for(dir.path(), out.path());

        let options = SaveOptions::default().with_stride(2);
        let config = OutOfCoreConfig::default().with_memory_budget_bytes(1 << 20);
        let report = process_channel(&job, &options, &Calibration::default(), &config).unwrap();

        assert_eq!(report.timepoints, 2);
        assert_eq!(report.dropped_timepoints, 1);
        assert_eq!(report.illuminations, vec!["I0", "I1"]);
        assert_eq!(report.volume_shape, Some([2, 4, 4, 4]));
        assert_eq!(report.projections.len(), 2);
        assert!(report.projections[1].ends_with("R0_C00_t0001_Max.tiff"));

        let projection = read_volume(&report.projections[1]).unwrap();
        let fused = ndarray::Zip::from(&volume(1, 0))
            .and(&volume(1, 1))
            .map_collect(|&a, &b| a.max(b));
        let expected = kakapo_algorithms::max_projection(fused.view());
        assert_eq!(projection.index_axis(Axis(0), 0), expected);
    }

    #[test]
    fn test_strict_policy_rejects_mismatch() {
        let dir = tempdir().unwrap();
        let out = tempdir().unwrap();
        write_side(dir.path(), 0, 3);
        write_side(dir.path(), 1, 2);
        let job = job_for(dir.path(), out.path());
        let options = SaveOptions::default().with_illumination(IlluminationPolicy::Strict);
        let result = process_channel(
            &job,
            &options,
            &Calibration::default(),
            &OutOfCoreConfig::default(),
        );
        assert!(matches!(
            result,
            Err(Error::Core(kakapo_core::Error::TimepointMismatch { .. }))
        ));
        assert!(fs::read_dir(out.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_decode_failure_surfaces() {
        let dir = tempdir().unwrap();
        let out = tempdir().unwrap();
        write_side(dir.path(), 0, 2);
        fs::write(
            dir.path().join("S0_t0001_V0_R0_X00_Y00_C00_I0_K0_P0.tif"),
            b"not a tiff",
        )
        .unwrap();
        let job = job_for(dir.path(), out.path());
        let options = SaveOptions::default().with_volume(false);
        let result = process_channel(
            &job,
            &options,
            &Calibration::default(),
            &OutOfCoreConfig::default().with_parallelism(1),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_timepoint_rejected() {
        let dir = tempdir().unwrap();
        write_side(dir.path(), 0, 1);
        write_volume_tiff(
            &dir.path().join("S0_t0000_V0_R0_X01_Y00_C00_I0_K0_P0.tif"),
            volume(0, 0).view(),
            &Calibration::default(),
        )
        .unwrap();
        let index = DatasetIndex::open(dir.path(), FilenameSchema::default()).unwrap();
        let illuminations = index.names(kakapo_core::DimensionKind::Illumination).clone();
        let result = ChannelJob::from_index(&index, "R0", "C00", &illuminations, dir.path());
        assert!(matches!(
            result,
            Err(Error::DuplicateTimepoint { count: 2, .. })
        ));
    }

    #[test]
    fn test_write_projections_fuses_sides() {
        let out = tempdir().unwrap();
        let a = Array4::from_shape_fn((2, 3, 2, 2), |(t, z, y, x)| {
            u16::try_from(t + z + y + x).unwrap()
        });
        let b = Array4::from_elem((3, 3, 2, 2), 3u16);
        let writer = ProjectionWriter::new(out.path(), "R0", "C00", Calibration::default());
        let names = vec!["t0".to_string(), "t1".to_string(), "t2".to_string()];

        let written = write_projections(&writer, &names, &[a.view(), b.view()]).unwrap();
        assert_eq!(written.len(), 2);
        let plane = read_volume(&written[1]).unwrap();
        assert_eq!(plane[[0, 1, 1]], 5);
        assert_eq!(plane[[0, 0, 0]], 3);
    }
}

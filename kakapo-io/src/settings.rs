//! Frame interval from per-timepoint settings sidecars.
//!
//! The acquisition software writes one `*Settings.txt` per timepoint with a
//! `Date time stamp = YYYYMMDD_HHMMSS` line. The mean interval is the span
//! between the first and last timepoint divided by the number of gaps.

use crate::scanner::DatasetIndex;
use crate::{Error, Result};
use chrono::NaiveDateTime;
use kakapo_core::{DimensionKind, VocabularyScope};
use std::fs;
use std::path::{Path, PathBuf};

/// Marker in the name of every settings sidecar.
pub const SETTINGS_MARKER: &str = "Settings.txt";

/// Key of the timestamp line inside a sidecar.
pub const TIMESTAMP_KEY: &str = "Date time stamp";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Acquisition span of a region and its mean frame interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionInterval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub num_timepoints: usize,
    /// Mean seconds between consecutive timepoints.
    pub seconds_per_frame: f64,
}

/// Names of the settings sidecars in `dir`, sorted.
///
/// # Errors
/// Returns an error if the directory cannot be listed.
pub fn settings_files(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let Ok(name) = entry?.file_name().into_string() else {
            continue;
        };
        if name.contains(SETTINGS_MARKER) && !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort_unstable();
    Ok(names)
}

/// Resolve the frame interval of `region`.
///
/// The first and last timepoints of the region are paired with the channel
/// and illumination names at the given positions of the directory-wide name
/// sets; exactly one sidecar must carry all four names as whole fields for
/// each end, so `R1` never matches a sidecar of `R10`.
///
/// # Errors
/// - [`Error::SingleTimepoint`] when the region has fewer than two timepoints.
/// - [`Error::SettingsFileCount`] unless exactly one first and one last sidecar match.
/// - [`Error::Timestamp`] when a sidecar has no parsable timestamp.
pub fn resolve_interval(
    index: &DatasetIndex,
    region: &str,
    channel_index: usize,
    illum_index: usize,
) -> Result<AcquisitionInterval> {
    let info = index.region_info(region, VocabularyScope::Global)?;
    let num_timepoints = info.timepoints.len();
    let (Some(first), Some(last)) = (info.timepoints.first(), info.timepoints.last()) else {
        return Err(Error::SingleTimepoint(region.to_string()));
    };
    if num_timepoints < 2 {
        return Err(Error::SingleTimepoint(region.to_string()));
    }

    let channel = name_at(index, DimensionKind::Channel, channel_index)?;
    let illumination = name_at(index, DimensionKind::Illumination, illum_index)?;

    let sidecars = settings_files(index.root())?;
    let delimiter = index.schema().delimiter;
    let matching = |timepoint: &str| -> Vec<&String> {
        sidecars
            .iter()
            .filter(|name| {
                let tokens: Vec<&str> = name.split(delimiter).collect();
                [timepoint, region, channel, illumination]
                    .iter()
                    .all(|wanted| tokens.contains(wanted))
            })
            .collect()
    };
    let firsts = matching(first);
    let lasts = matching(last);
    if firsts.len() != 1 || lasts.len() != 1 {
        return Err(Error::SettingsFileCount {
            region: region.to_string(),
            first: firsts.len(),
            last: lasts.len(),
        });
    }

    let start = read_timestamp(&index.root().join(firsts[0]))?;
    let end = read_timestamp(&index.root().join(lasts[0]))?;
    let seconds_per_frame = mean_interval(start, end, num_timepoints);
    log::debug!("region {region}: {start} .. {end}, {seconds_per_frame:.3} s/frame");

    Ok(AcquisitionInterval {
        start,
        end,
        num_timepoints,
        seconds_per_frame,
    })
}

/// Read the timestamp of one sidecar.
///
/// # Errors
/// Returns an error if the file cannot be read or has no valid stamp.
pub fn read_timestamp(path: &Path) -> Result<NaiveDateTime> {
    let contents = fs::read_to_string(path)?;
    parse_timestamp(&contents).map_err(|reason| Error::Timestamp {
        path: PathBuf::from(path),
        reason,
    })
}

/// Find the first `Date time stamp` line in `contents` and parse its value.
///
/// The value is everything after the last `=` on the line. Only its leading
/// `YYYYMMDD_HHMMSS` is parsed; milliseconds or other suffixes are ignored.
///
/// # Errors
/// Returns a description of what was missing or malformed.
pub fn parse_timestamp(contents: &str) -> std::result::Result<NaiveDateTime, String> {
    let line = contents
        .lines()
        .find(|line| line.contains(TIMESTAMP_KEY))
        .ok_or_else(|| format!("no {TIMESTAMP_KEY:?} line"))?;
    let value = line
        .rsplit('=')
        .next()
        .map(str::trim)
        .and_then(|value| value.split_whitespace().next())
        .ok_or_else(|| format!("empty value in {line:?}"))?;
    NaiveDateTime::parse_and_remainder(value, TIMESTAMP_FORMAT)
        .map(|(stamp, _)| stamp)
        .map_err(|e| format!("{value:?}: {e}"))
}

#[allow(clippy::cast_precision_loss)]
fn mean_interval(start: NaiveDateTime, end: NaiveDateTime, num_timepoints: usize) -> f64 {
    let span_ms = (end - start).num_milliseconds() as f64;
    span_ms / 1_000.0 / (num_timepoints - 1) as f64
}

fn name_at(index: &DatasetIndex, kind: DimensionKind, position: usize) -> Result<&str> {
    let names = index.names(kind);
    names.get(position).ok_or_else(|| {
        Error::InvalidFormat(format!(
            "{kind} index {position} out of range ({} names)",
            names.len()
        ))
    })
}

//! Region/channel orchestration with resumable output.
//!
//! Each region is reduced into `{region}_processed/`. A region counts as done
//! only once `kakapo_manifest.json` has been written into that directory
//! after its last channel; a directory without a manifest is the remains of an
//! interrupted run and is regenerated.

use crate::metadata::AcquisitionMetadata;
use crate::out_of_core::OutOfCoreConfig;
use crate::pipeline::{process_channel, ChannelJob, ChannelReport};
use crate::scanner::DatasetIndex;
use crate::settings::resolve_interval;
use crate::{Error, Result};
use kakapo_core::{Calibration, SaveOptions};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Completion marker inside each region output directory.
pub const MANIFEST_NAME: &str = "kakapo_manifest.json";

/// Record of one finished channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestChannel {
    pub channel: String,
    pub illuminations: Vec<String>,
    pub timepoints: usize,
    pub dropped_timepoints: usize,
    /// Volume store file name inside the region directory.
    pub volume: Option<String>,
    pub volume_shape: Option<[usize; 4]>,
    pub projections: usize,
}

impl From<&ChannelReport> for ManifestChannel {
    fn from(report: &ChannelReport) -> Self {
        Self {
            channel: report.channel.clone(),
            illuminations: report.illuminations.clone(),
            timepoints: report.timepoints,
            dropped_timepoints: report.dropped_timepoints,
            volume: report
                .volume_path
                .as_deref()
                .and_then(Path::file_name)
                .map(|name| name.to_string_lossy().into_owned()),
            volume_shape: report.volume_shape,
            projections: report.projections.len(),
        }
    }
}

/// Contents of `kakapo_manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionManifest {
    pub region: String,
    /// Version of the writer that produced the output.
    pub version: String,
    pub stride: usize,
    pub depth_factor: usize,
    pub format: String,
    pub magnification: u32,
    pub frame_interval_s: Option<f64>,
    pub channels: Vec<ManifestChannel>,
}

impl RegionManifest {
    /// Read the manifest of a region directory, if present.
    ///
    /// # Errors
    /// Returns an error if the manifest exists but cannot be read or parsed.
    pub fn load(region_dir: &Path) -> Result<Option<Self>> {
        let path = region_dir.join(MANIFEST_NAME);
        if !path.is_file() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn store(&self, region_dir: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(region_dir.join(MANIFEST_NAME), contents)?;
        Ok(())
    }
}

/// What happened to one region.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionOutcome {
    /// Every channel was written and the manifest recorded.
    Completed(RegionManifest),
    /// Complete output already existed.
    Skipped,
    /// The region failed; the message describes the first error.
    Failed(String),
}

/// Outcome of one region in a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionReport {
    pub region: String,
    pub outcome: RegionOutcome,
}

/// Summary of a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Regions in processing order. With `fail_fast`, regions after the first
    /// failure are absent.
    pub regions: Vec<RegionReport>,
    pub elapsed: Duration,
}

impl RunReport {
    #[must_use]
    pub fn completed(&self) -> usize {
        self.count(|outcome| matches!(outcome, RegionOutcome::Completed(_)))
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, RegionOutcome::Skipped))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, RegionOutcome::Failed(_)))
    }

    /// True when no region failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, predicate: impl Fn(&RegionOutcome) -> bool) -> usize {
        self.regions
            .iter()
            .filter(|report| predicate(&report.outcome))
            .count()
    }
}

/// Drives every region and channel of an acquisition through the pipeline.
pub struct Orchestrator {
    index: DatasetIndex,
    options: SaveOptions,
    out_of_core: OutOfCoreConfig,
    regions: Option<Vec<String>>,
    output_root: PathBuf,
}

impl Orchestrator {
    /// Outputs are written next to the acquisition files.
    ///
    /// # Errors
    /// Returns an error if `options` request nothing or carry zero factors.
    pub fn new(
        index: DatasetIndex,
        options: SaveOptions,
        out_of_core: OutOfCoreConfig,
    ) -> Result<Self> {
        options.validate()?;
        let output_root = index.root().to_path_buf();
        Ok(Self {
            index,
            options,
            out_of_core,
            regions: None,
            output_root,
        })
    }

    /// Only process these regions (still in lexicographic order).
    #[must_use]
    pub fn with_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut regions: Vec<String> = regions.into_iter().map(Into::into).collect();
        regions.sort_unstable();
        regions.dedup();
        self.regions = Some(regions);
        self
    }

    /// Write region directories under `root` instead of the acquisition directory.
    #[must_use]
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    #[must_use]
    pub fn index(&self) -> &DatasetIndex {
        &self.index
    }

    #[must_use]
    pub fn options(&self) -> &SaveOptions {
        &self.options
    }

    /// `{output_root}/{region}_processed`.
    #[must_use]
    pub fn region_dir(&self, region: &str) -> PathBuf {
        self.output_root.join(format!("{region}_processed"))
    }

    /// Process the selected regions.
    ///
    /// Region failures are recorded in the report; the run only stops early
    /// when `fail_fast` is set.
    ///
    /// # Errors
    /// Returns an error only if the acquisition metadata cannot be listed.
    pub fn run(&self) -> Result<RunReport> {
        let started = Instant::now();
        let metadata = AcquisitionMetadata::find_in(self.index.root())?;
        let magnification = metadata.resolve_magnification(self.options.magnification);
        info!(
            "processing {} with {magnification}x objective, stride {}, depth factor {}",
            self.index.root().display(),
            self.options.stride,
            self.options.depth_factor
        );

        let regions = match &self.regions {
            Some(regions) => regions.clone(),
            None => self.index.regions().as_slice().to_vec(),
        };

        let mut report = RunReport::default();
        for region in regions {
            let outcome = match self.process_region(&region, magnification) {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!("region {region} failed: {err}");
                    RegionOutcome::Failed(err.to_string())
                }
            };
            let failed = matches!(outcome, RegionOutcome::Failed(_));
            report.regions.push(RegionReport { region, outcome });
            if failed && self.options.fail_fast {
                warn!("stopping after first failure");
                break;
            }
        }

        report.elapsed = started.elapsed();
        info!(
            "finished in {:.1} s: {} completed, {} skipped, {} failed",
            report.elapsed.as_secs_f64(),
            report.completed(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    fn process_region(&self, region: &str, magnification: u32) -> Result<RegionOutcome> {
        let started = Instant::now();
        let dir = self.region_dir(region);

        if dir.exists() {
            match RegionManifest::load(&dir) {
                Ok(Some(_)) if !self.options.overwrite => {
                    info!("region {region}: output complete, skipping");
                    return Ok(RegionOutcome::Skipped);
                }
                Ok(Some(_)) => warn!("region {region}: overwriting {}", dir.display()),
                Ok(None) => warn!(
                    "region {region}: {} has no manifest, regenerating interrupted output",
                    dir.display()
                ),
                Err(err) => warn!(
                    "region {region}: unreadable manifest ({err}), regenerating output"
                ),
            }
        }

        let info = self.index.region_info(region, self.options.vocabulary)?;
        let frame_interval = match resolve_interval(&self.index, region, 0, 0) {
            Ok(interval) => Some(interval.seconds_per_frame),
            Err(err) if self.options.require_interval => return Err(err),
            Err(err) => {
                warn!("region {region}: frame interval unavailable: {err}");
                None
            }
        };
        let calibration =
            Calibration::full_resolution(magnification).with_frame_interval(frame_interval);

        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;

        let mut channels = Vec::with_capacity(info.channels.len());
        for channel in info.channels.iter() {
            let job =
                ChannelJob::from_index(&self.index, region, channel, &info.illuminations, &dir)?;
            if job.is_empty() {
                warn!("region {region}: no files for channel {channel}, skipping channel");
                continue;
            }
            let report = process_channel(&job, &self.options, &calibration, &self.out_of_core)?;
            channels.push(ManifestChannel::from(&report));
        }
        if channels.is_empty() {
            return Err(Error::InvalidFormat(format!(
                "region {region}: no channel had any files"
            )));
        }

        let manifest = RegionManifest {
            region: region.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            stride: self.options.stride,
            depth_factor: self.options.depth_factor,
            format: self.options.format.to_string(),
            magnification,
            frame_interval_s: frame_interval,
            channels,
        };
        manifest.store(&dir)?;
        info!(
            "region {region}: {} channels in {:.1} s",
            manifest.channels.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(RegionOutcome::Completed(manifest))
    }
}

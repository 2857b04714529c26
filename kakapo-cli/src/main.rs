//! kakapo CLI
//!
//! Reduces light-sheet acquisitions into decimated volume stores and
//! per-timepoint max projections.

use clap::{Parser, Subcommand, ValueEnum};
use kakapo_core::{
    DimensionKind, FilenameSchema, IlluminationPolicy, SaveOptions, StoreFormat, VocabularyScope,
};
use kakapo_io::{
    downsample_channel, resolve_interval, DatasetIndex, DownsampleOptions, Orchestrator,
    OutOfCoreConfig, RegionOutcome,
};
use log::info;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("{0}")]
    KakapoIo(#[from] kakapo_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] kakapo_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{failed} of {total} regions failed")]
    RegionsFailed { failed: usize, total: usize },
}

/// Volume store format.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    /// Zarr v3 directory store
    Zarr,
    /// HDF5 file (requires the `hdf5` feature)
    Hdf5,
}

impl From<Format> for StoreFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Zarr => StoreFormat::Zarr,
            Format::Hdf5 => StoreFormat::Hdf5,
        }
    }
}

/// Handling of illumination sides with different timepoint counts.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Illumination {
    /// Cut every side to the shortest one
    Truncate,
    /// Fail the channel
    Strict,
}

impl From<Illumination> for IlluminationPolicy {
    fn from(policy: Illumination) -> Self {
        match policy {
            Illumination::Truncate => IlluminationPolicy::Truncate,
            Illumination::Strict => IlluminationPolicy::Strict,
        }
    }
}

/// Files contributing to a region's channel and illumination names.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Vocabulary {
    /// Names from the whole directory
    Global,
    /// Names from the region's own files
    Region,
}

impl From<Vocabulary> for VocabularyScope {
    fn from(scope: Vocabulary) -> Self {
        match scope {
            Vocabulary::Global => VocabularyScope::Global,
            Vocabulary::Region => VocabularyScope::Region,
        }
    }
}

/// Light-sheet acquisition reducer.
#[derive(Parser)]
#[command(name = "kakapo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write decimated volume stores and max projections per region/channel
    Process(ProcessArgs),

    /// Show dimension names and per-region timepoints
    Info {
        /// Acquisition directory
        dir: PathBuf,

        /// Print the region name sets as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compute the mean frame interval of a region
    Interval {
        /// Acquisition directory
        dir: PathBuf,

        /// Region name
        #[arg(short, long)]
        region: String,

        /// Position of the channel in the sorted channel names
        #[arg(long, default_value = "0")]
        channel_index: usize,

        /// Position of the illumination side in the sorted side names
        #[arg(long, default_value = "0")]
        illum_index: usize,
    },

    /// Fuse, project and downsample one channel frame by frame
    Downsample {
        /// Acquisition directory
        dir: PathBuf,

        /// Channel name
        #[arg(short, long)]
        channel: String,

        /// Only use files of this region
        #[arg(short, long)]
        region: Option<String>,

        /// Lateral decimation factor
        #[arg(long, default_value = "8")]
        xy_factor: usize,

        /// Axial decimation factor
        #[arg(long, default_value = "2")]
        z_factor: usize,

        /// Objective magnification (default: 10)
        #[arg(long)]
        magnification: Option<u32>,

        /// Frame interval in seconds for the ImageJ metadata
        #[arg(long)]
        frame_interval: Option<f64>,
    },
}

#[derive(clap::Args)]
#[allow(clippy::struct_excessive_bools)]
struct ProcessArgs {
    /// Acquisition directory
    dir: PathBuf,

    /// Only process these regions
    #[arg(short, long)]
    region: Vec<String>,

    /// Lateral decimation stride
    #[arg(long, default_value = "4")]
    stride: usize,

    /// Axial decimation factor
    #[arg(long, default_value = "1")]
    depth_factor: usize,

    /// Skip the decimated volume store
    #[arg(long)]
    no_volume: bool,

    /// Skip the max projections
    #[arg(long)]
    no_projection: bool,

    /// Regenerate regions whose output is complete
    #[arg(long)]
    overwrite: bool,

    /// Volume store format
    #[arg(long, value_enum, default_value = "zarr")]
    format: Format,

    /// Illumination side alignment
    #[arg(long, value_enum, default_value = "truncate")]
    illumination: Illumination,

    /// Name-set scope for channels and illumination sides
    #[arg(long, value_enum, default_value = "global")]
    vocabulary: Vocabulary,

    /// Objective magnification override
    #[arg(long)]
    magnification: Option<u32>,

    /// Fraction of available memory to budget
    #[arg(long, default_value = "0.5")]
    memory_fraction: f64,

    /// Explicit memory budget in bytes
    #[arg(long)]
    memory_budget: Option<usize>,

    /// Worker threads for decoding and kernels
    #[arg(long)]
    threads: Option<usize>,

    /// Maximum reduced timepoints queued for writing
    #[arg(long, default_value = "2")]
    queue_depth: usize,

    /// Fail a region when its frame interval is unavailable
    #[arg(long)]
    require_interval: bool,

    /// Stop at the first failed region
    #[arg(long)]
    fail_fast: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Process(args) => process(args),
        Commands::Info { dir, json } => show_info(&dir, json),
        Commands::Interval {
            dir,
            region,
            channel_index,
            illum_index,
        } => {
            let index = DatasetIndex::open(&dir, FilenameSchema::default())?;
            let interval = resolve_interval(&index, &region, channel_index, illum_index)?;
            println!("Region:          {region}");
            println!("Start:           {}", interval.start);
            println!("End:             {}", interval.end);
            println!("Timepoints:      {}", interval.num_timepoints);
            println!("Seconds/frame:   {:.3}", interval.seconds_per_frame);
            Ok(())
        }
        Commands::Downsample {
            dir,
            channel,
            region,
            xy_factor,
            z_factor,
            magnification,
            frame_interval,
        } => {
            let index = DatasetIndex::open(&dir, FilenameSchema::default())?;
            let mut options = DownsampleOptions::new(channel)
                .with_xy_factor(xy_factor)
                .with_z_factor(z_factor)
                .with_magnification(magnification)
                .with_frame_interval(frame_interval);
            if let Some(region) = region {
                options = options.with_region(region);
            }
            let report = downsample_channel(&index, &options)?;
            let total: f64 = report.frame_times.iter().map(|t| t.as_secs_f64()).sum();
            info!(
                "downsampled {} frames in {total:.1} s into {} and {}",
                report.frames,
                report.volume_dir.display(),
                report.projection_dir.display()
            );
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn process(args: ProcessArgs) -> Result<()> {
    let options = SaveOptions::default()
        .with_volume(!args.no_volume)
        .with_projection(!args.no_projection)
        .try_with_stride(args.stride)?
        .try_with_depth_factor(args.depth_factor)?
        .with_overwrite(args.overwrite)
        .with_format(args.format.into())
        .with_illumination(args.illumination.into())
        .with_vocabulary(args.vocabulary.into())
        .with_require_interval(args.require_interval)
        .with_fail_fast(args.fail_fast)
        .with_magnification(args.magnification);

    let mut out_of_core = OutOfCoreConfig::default()
        .with_memory_fraction(args.memory_fraction)
        .try_with_queue_depth(args.queue_depth)?;
    if let Some(bytes) = args.memory_budget {
        out_of_core = out_of_core.with_memory_budget_bytes(bytes);
    }
    if let Some(threads) = args.threads {
        out_of_core = out_of_core.try_with_parallelism(threads)?;
    }

    let index = DatasetIndex::open(&args.dir, FilenameSchema::default())?;
    let mut orchestrator = Orchestrator::new(index, options, out_of_core)?;
    if !args.region.is_empty() {
        orchestrator = orchestrator.with_regions(args.region);
    }
    let report = orchestrator.run()?;

    for region in &report.regions {
        match &region.outcome {
            RegionOutcome::Completed(manifest) => println!(
                "{:<12} completed ({} channels)",
                region.region,
                manifest.channels.len()
            ),
            RegionOutcome::Skipped => println!("{:<12} skipped", region.region),
            RegionOutcome::Failed(reason) => {
                println!("{:<12} FAILED: {reason}", region.region);
            }
        }
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::RegionsFailed {
            failed: report.failed(),
            total: report.regions.len(),
        })
    }
}

fn show_info(dir: &Path, json: bool) -> Result<()> {
    let index = DatasetIndex::open(dir, FilenameSchema::default())?;
    let regions = index
        .regions()
        .iter()
        .map(|region| index.region_info(region, VocabularyScope::Global))
        .collect::<kakapo_io::Result<Vec<_>>>()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&regions)?);
        return Ok(());
    }

    println!("Directory: {}", index.root().display());
    println!("Files:     {}", index.files().len());
    println!();
    for kind in DimensionKind::ALL {
        let names = index.names(kind);
        let shown: Vec<&str> = names.iter().take(8).collect();
        let more = if names.len() > shown.len() { ", ..." } else { "" };
        println!(
            "{:<14} {:>5}  {}{more}",
            kind.as_str(),
            names.len(),
            shown.join(", ")
        );
    }
    println!();
    for info in &regions {
        println!(
            "{:<12} {} timepoints ({} .. {})",
            info.region,
            info.timepoints.len(),
            info.timepoints.first().unwrap_or("-"),
            info.timepoints.last().unwrap_or("-")
        );
    }
    Ok(())
}

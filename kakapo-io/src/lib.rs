//! kakapo-io: Dataset indexing and out-of-core I/O for kakapo.
//!
//! This crate recovers the logical layout of a flat light-sheet acquisition
//! directory, reads its TIFF volumes through memory-mapped files, and streams
//! fused, decimated timepoints into chunked Zarr (or HDF5) stores and
//! per-timepoint max-projection TIFFs.
//!

pub mod downsample;
mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod metadata;
pub mod orchestrator;
pub mod out_of_core;
pub mod pipeline;
mod reader;
pub mod scanner;
pub mod settings;
pub mod store;
mod writer;

pub use downsample::{downsample_channel, DownsampleOptions, DownsampleReport};
pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use hdf5::Hdf5VolumeSink;
pub use metadata::{parse_magnification, AcquisitionMetadata};
pub use orchestrator::{
    ManifestChannel, Orchestrator, RegionManifest, RegionOutcome, RegionReport, RunReport,
    MANIFEST_NAME,
};
pub use out_of_core::{timepoint_bytes, OutOfCoreConfig};
pub use pipeline::{
    process_channel, write_projections, ChannelJob, ChannelReport, IlluminationSide,
};
pub use reader::{read_volume, MappedFileReader, TiffVolumeReader};
pub use scanner::{DatasetIndex, NameSet, RegionInfo, TimepointFile};
pub use settings::{resolve_interval, AcquisitionInterval};
pub use store::{
    create_sink, volume_store_path, VolumeLayout, VolumeSink, ZarrVolumeSink, VOLUME_AXES,
};
pub use writer::{write_plane_tiff, write_volume_tiff, ProjectionWriter};

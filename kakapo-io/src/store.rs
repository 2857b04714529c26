//! Chunked persistence of decimated volume time series.
//!
//! A store holds one `(t, z, y, x)` array chunked one timepoint at a time, so
//! the pipeline can write each reduced timepoint as soon as it is ready.

use crate::error::store_error;
use crate::{Error, Result};
use kakapo_core::{Calibration, StoreFormat};
use ndarray::ArrayView3;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::filesystem::FilesystemStore;

/// Axis names attached to stored volumes.
pub const VOLUME_AXES: [&str; 4] = ["t", "z", "y", "x"];

/// Extent of a stored series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeLayout {
    /// Number of timepoints.
    pub timepoints: usize,
    /// Per-timepoint `(z, y, x)` shape.
    pub shape: (usize, usize, usize),
}

impl VolumeLayout {
    #[must_use]
    pub fn new(timepoints: usize, shape: (usize, usize, usize)) -> Self {
        Self { timepoints, shape }
    }

    /// Full `(t, z, y, x)` extent.
    #[must_use]
    pub fn dims(&self) -> [usize; 4] {
        [self.timepoints, self.shape.0, self.shape.1, self.shape.2]
    }

    /// One chunk per timepoint.
    #[must_use]
    pub fn chunk(&self) -> [usize; 4] {
        [1, self.shape.0, self.shape.1, self.shape.2]
    }

    fn validate(&self) -> Result<()> {
        if self.dims().contains(&0) {
            return Err(Error::InvalidFormat(format!(
                "cannot store an empty volume series {:?}",
                self.dims()
            )));
        }
        Ok(())
    }

    fn check(&self, t: usize, volume: &ArrayView3<'_, u16>) -> Result<()> {
        if t >= self.timepoints {
            return Err(Error::InvalidFormat(format!(
                "timepoint {t} out of range for {} timepoints",
                self.timepoints
            )));
        }
        if volume.dim() != self.shape {
            return Err(kakapo_core::Error::ShapeMismatch {
                expected: vec![self.shape.0, self.shape.1, self.shape.2],
                found: volume.shape().to_vec(),
            }
            .into());
        }
        Ok(())
    }
}

/// Destination for a decimated volume series.
pub trait VolumeSink {
    /// Store the volume of timepoint `t`.
    ///
    /// # Errors
    /// Returns an error if `t` is out of range, the shape does not match the
    /// layout, or the write fails.
    fn write_timepoint(&mut self, t: usize, volume: ArrayView3<'_, u16>) -> Result<()>;

    /// Flush and close the store.
    ///
    /// # Errors
    /// Returns an error if the final write fails.
    fn finish(&mut self) -> Result<()>;

    /// Location of the store.
    fn path(&self) -> &Path;
}

/// `{dir}/{region}_{channel}_volume.{zarr|h5}`.
#[must_use]
pub fn volume_store_path(dir: &Path, region: &str, channel: &str, format: StoreFormat) -> PathBuf {
    dir.join(format!("{region}_{channel}_volume.{}", format.extension()))
}

/// Open a sink of the requested format.
///
/// # Errors
/// Returns [`Error::InvalidFormat`] for HDF5 when the `hdf5` feature is
/// disabled, or any error from creating the store.
pub fn create_sink(
    format: StoreFormat,
    path: &Path,
    layout: VolumeLayout,
    calibration: &Calibration,
) -> Result<Box<dyn VolumeSink>> {
    match format {
        StoreFormat::Zarr => Ok(Box::new(ZarrVolumeSink::create(path, layout, calibration)?)),
        #[cfg(feature = "hdf5")]
        StoreFormat::Hdf5 => Ok(Box::new(crate::hdf5::Hdf5VolumeSink::create(
            path,
            layout,
            calibration,
        )?)),
        #[cfg(not(feature = "hdf5"))]
        StoreFormat::Hdf5 => Err(Error::InvalidFormat(
            "HDF5 output requires the `hdf5` feature".to_string(),
        )),
    }
}

/// Calibration attributes shared by every store format.
#[must_use]
pub fn calibration_attributes(calibration: &Calibration) -> Map<String, Value> {
    let mut attributes = Map::new();
    attributes.insert("unit".to_string(), json!("micron"));
    attributes.insert(
        "magnification".to_string(),
        json!(calibration.magnification),
    );
    attributes.insert(
        "pixel_size_um".to_string(),
        json!(calibration.pixel_size_um),
    );
    attributes.insert("z_spacing_um".to_string(), json!(calibration.z_spacing_um));
    attributes.insert(
        "frame_interval_s".to_string(),
        json!(calibration.frame_interval_s),
    );
    attributes
}

/// Zarr v3 array on the local filesystem.
pub struct ZarrVolumeSink {
    path: PathBuf,
    array: Array<FilesystemStore>,
    layout: VolumeLayout,
    written: Vec<bool>,
}

impl ZarrVolumeSink {
    /// Create the store and write its metadata.
    ///
    /// # Errors
    /// Returns an error if the layout is empty or the store cannot be created.
    pub fn create(path: &Path, layout: VolumeLayout, calibration: &Calibration) -> Result<Self> {
        layout.validate()?;
        std::fs::create_dir_all(path)?;
        let store = Arc::new(FilesystemStore::new(path).map_err(store_error)?);

        let array = ArrayBuilder::new(
            to_u64(&layout.dims()),
            DataType::UInt16,
            to_u64(&layout.chunk()).try_into().map_err(store_error)?,
            FillValue::from(0u16),
        )
        .dimension_names(VOLUME_AXES.into())
        .attributes(calibration_attributes(calibration))
        .build(store, "/")
        .map_err(store_error)?;
        array.store_metadata().map_err(store_error)?;

        Ok(Self {
            path: path.to_path_buf(),
            array,
            layout,
            written: vec![false; layout.timepoints],
        })
    }
}

impl VolumeSink for ZarrVolumeSink {
    fn write_timepoint(&mut self, t: usize, volume: ArrayView3<'_, u16>) -> Result<()> {
        self.layout.check(t, &volume)?;
        let volume = volume.as_standard_layout();
        let elements = volume
            .as_slice()
            .ok_or_else(|| Error::InvalidFormat("volume is not contiguous".to_string()))?;
        self.array
            .store_chunk_elements::<u16>(&[t as u64, 0, 0, 0], elements)
            .map_err(store_error)?;
        self.written[t] = true;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let missing = self.written.iter().filter(|done| !**done).count();
        if missing > 0 {
            log::warn!(
                "{}: {missing} timepoints never written, left at fill value",
                self.path.display()
            );
        }
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

fn to_u64(values: &[usize]) -> Vec<u64> {
    values.iter().map(|&v| v as u64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tempfile::tempdir;

    #[test]
    fn test_store_path() {
        let path = volume_store_path(Path::new("/out"), "R0", "C01", StoreFormat::Zarr);
        assert_eq!(path, PathBuf::from("/out/R0_C01_volume.zarr"));
        let path = volume_store_path(Path::new("/out"), "R0", "C01", StoreFormat::Hdf5);
        assert_eq!(path, PathBuf::from("/out/R0_C01_volume.h5"));
    }

    #[test]
    fn test_zarr_sink_writes_one_chunk_per_timepoint() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("R0_C0_volume.zarr");
        let layout = VolumeLayout::new(2, (3, 4, 5));
        let cal = Calibration::new(10, 4, 1).with_frame_interval(Some(12.5));

        let mut sink = create_sink(StoreFormat::Zarr, &path, layout, &cal).unwrap();
        let volumes: Vec<Array3<u16>> = (0..2)
            .map(|t| {
                Array3::from_shape_fn((3, 4, 5), |(z, y, x)| {
                    u16::try_from(t * 1_000 + z * 100 + y * 10 + x).unwrap()
                })
            })
            .collect();
        for (t, volume) in volumes.iter().enumerate() {
            sink.write_timepoint(t, volume.view()).unwrap();
        }
        sink.finish().unwrap();

        let store = Arc::new(FilesystemStore::new(&path).unwrap());
        let array = Array::open(store, "/").unwrap();
        assert_eq!(array.shape(), &[2, 3, 4, 5]);
        let chunk = array.retrieve_chunk_elements::<u16>(&[1, 0, 0, 0]).unwrap();
        assert_eq!(chunk.as_slice(), volumes[1].as_slice().unwrap());
        assert_eq!(array.attributes()["unit"], json!("micron"));
        assert_eq!(array.attributes()["frame_interval_s"], json!(12.5));
    }

    #[test]
    fn test_zarr_sink_rejects_bad_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.zarr");
        let layout = VolumeLayout::new(1, (2, 2, 2));
        let mut sink = ZarrVolumeSink::create(&path, layout, &Calibration::default()).unwrap();
        let wrong = Array3::<u16>::zeros((2, 2, 3));
        assert!(sink.write_timepoint(0, wrong.view()).is_err());
        let right = Array3::<u16>::zeros((2, 2, 2));
        assert!(sink.write_timepoint(1, right.view()).is_err());
        assert!(sink.write_timepoint(0, right.view()).is_ok());
    }

    #[test]
    fn test_empty_layout_rejected() {
        let dir = tempdir().unwrap();
        let layout = VolumeLayout::new(0, (2, 2, 2));
        assert!(ZarrVolumeSink::create(&dir.path().join("e.zarr"), layout, &Calibration::default())
            .is_err());
    }

    #[cfg(not(feature = "hdf5"))]
    #[test]
    fn test_hdf5_requires_feature() {
        let dir = tempdir().unwrap();
        let layout = VolumeLayout::new(1, (1, 1, 1));
        let result = create_sink(
            StoreFormat::Hdf5,
            &dir.path().join("v.h5"),
            layout,
            &Calibration::default(),
        );
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }
}

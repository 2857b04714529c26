//! HDF5 volume store.

use crate::store::{VolumeLayout, VolumeSink, VOLUME_AXES};
use crate::{Error, Result};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use kakapo_core::Calibration;
use ndarray::{s, ArrayView1, ArrayView3};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DATASET_NAME: &str = "volume";
const DEFLATE_LEVEL: u8 = 4;

/// Chunked, deflate-compressed `u16` dataset `volume` in an HDF5 file.
pub struct Hdf5VolumeSink {
    file: File,
    dataset: Dataset,
    layout: VolumeLayout,
    path: PathBuf,
}

impl Hdf5VolumeSink {
    /// Create the file, the dataset and its calibration attributes.
    ///
    /// # Errors
    /// Returns an error if the HDF5 file or dataset cannot be created.
    pub fn create(path: &Path, layout: VolumeLayout, calibration: &Calibration) -> Result<Self> {
        let dims = layout.dims();
        if dims.contains(&0) {
            return Err(Error::InvalidFormat(format!(
                "cannot store an empty volume series {dims:?}"
            )));
        }
        let file = File::create(path)?;
        set_attr_str(&file, "kakapo_format_version", "0.1")?;

        let dataset = create_fixed_dataset::<u16, _>(
            &file,
            DATASET_NAME,
            (dims[0], dims[1], dims[2], dims[3]),
            Some(layout.chunk()),
            Some(DEFLATE_LEVEL),
            true,
        )?;
        set_axes_attr(&dataset, &VOLUME_AXES)?;
        set_attr_str_dataset(&dataset, "unit", "micron")?;
        set_attr_f64(&dataset, "pixel_size_um", calibration.pixel_size_um)?;
        set_attr_f64(&dataset, "z_spacing_um", calibration.z_spacing_um)?;
        if let Some(interval) = calibration.frame_interval_s {
            set_attr_f64(&dataset, "frame_interval_s", interval)?;
        }
        dataset
            .new_attr::<u32>()
            .create("magnification")?
            .write_scalar(&calibration.magnification)?;

        Ok(Self {
            file,
            dataset,
            layout,
            path: path.to_path_buf(),
        })
    }
}

impl VolumeSink for Hdf5VolumeSink {
    fn write_timepoint(&mut self, t: usize, volume: ArrayView3<'_, u16>) -> Result<()> {
        if t >= self.layout.timepoints || volume.dim() != self.layout.shape {
            return Err(Error::InvalidFormat(format!(
                "timepoint {t} with shape {:?} does not fit {:?}",
                volume.shape(),
                self.layout.dims()
            )));
        }
        let volume = volume.as_standard_layout();
        self.dataset.write_slice(&volume, s![t, .., .., ..])?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

fn create_fixed_dataset<T: H5Type, S>(
    group: &Group,
    name: &str,
    shape: S,
    chunk: Option<[usize; 4]>,
    compression: Option<u8>,
    shuffle: bool,
) -> Result<Dataset>
where
    S: Into<hdf5::Extents>,
{
    let mut builder = group.new_dataset::<T>().shape(shape);

    if let Some(chunk_shape) = chunk {
        builder = builder.chunk(chunk_shape);
    }

    if let Some(level) = compression {
        builder = builder.deflate(level);
    }

    if shuffle {
        builder = builder.shuffle();
    }

    Ok(builder.create(name)?)
}

fn set_axes_attr(dataset: &Dataset, axes: &[&str]) -> Result<()> {
    let values: Vec<VarLenUnicode> = axes
        .iter()
        .map(|axis| to_var_len_unicode(axis))
        .collect::<Result<Vec<_>>>()?;
    let attr = dataset
        .new_attr::<VarLenUnicode>()
        .shape((values.len(),))
        .create("axes")?;
    attr.write(ArrayView1::from(values.as_slice()))?;
    Ok(())
}

fn set_attr_f64(dataset: &Dataset, name: &str, value: f64) -> Result<()> {
    dataset
        .new_attr::<f64>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_dataset(dataset: &Dataset, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    dataset
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str(file: &File, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    file.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}

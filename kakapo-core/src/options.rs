//! Run options for region/channel processing.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How illumination sides with different timepoint counts are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IlluminationPolicy {
    /// Drop trailing timepoints of the longer side(s).
    #[default]
    Truncate,
    /// Refuse to fuse sides whose counts differ.
    Strict,
}

impl IlluminationPolicy {
    /// Number of timepoints to fuse given each side's count.
    ///
    /// # Errors
    /// Returns [`Error::TimepointMismatch`] under [`IlluminationPolicy::Strict`]
    /// when the counts differ.
    pub fn aligned_len(self, counts: &[usize]) -> Result<usize> {
        let Some(&shortest) = counts.iter().min() else {
            return Ok(0);
        };
        let uniform = counts.iter().all(|&count| count == shortest);
        match self {
            IlluminationPolicy::Truncate => Ok(shortest),
            IlluminationPolicy::Strict if uniform => Ok(shortest),
            IlluminationPolicy::Strict => Err(Error::TimepointMismatch {
                counts: counts.to_vec(),
            }),
        }
    }
}

/// Which files contribute to a region's channel/illumination/plane names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VocabularyScope {
    /// Channel, illumination and plane names come from the whole directory;
    /// timepoints are region-specific.
    #[default]
    Global,
    /// Every name set is restricted to the region's own files.
    Region,
}

/// On-disk format of the decimated volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StoreFormat {
    #[default]
    Zarr,
    Hdf5,
}

impl StoreFormat {
    /// Suffix appended to the volume store name.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            StoreFormat::Zarr => "zarr",
            StoreFormat::Hdf5 => "h5",
        }
    }
}

impl fmt::Display for StoreFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for StoreFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zarr" => Ok(StoreFormat::Zarr),
            "h5" | "hdf5" => Ok(StoreFormat::Hdf5),
            other => Err(Error::ConfigError(format!("unknown store format: {other}"))),
        }
    }
}

/// What to write for each region/channel and how to treat existing output.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[allow(clippy::struct_excessive_bools)]
pub struct SaveOptions {
    /// Write the decimated volume store.
    pub save_volume: bool,
    /// Write per-timepoint max projections.
    pub save_projection: bool,
    /// Lateral decimation stride (keep every `stride`-th pixel in y and x).
    pub stride: usize,
    /// Axial decimation factor (1 keeps every plane).
    pub depth_factor: usize,
    /// Regenerate regions whose output is already complete.
    pub overwrite: bool,
    /// Reconciliation of mismatched illumination sides.
    pub illumination: IlluminationPolicy,
    /// Name-set scope used when listing a region's channels.
    pub vocabulary: VocabularyScope,
    /// Volume store format.
    pub format: StoreFormat,
    /// Fail a region when its frame interval cannot be resolved.
    pub require_interval: bool,
    /// Stop the run at the first failed region.
    pub fail_fast: bool,
    /// Objective magnification override.
    pub magnification: Option<u32>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            save_volume: true,
            save_projection: true,
            stride: 4,
            depth_factor: 1,
            overwrite: false,
            illumination: IlluminationPolicy::default(),
            vocabulary: VocabularyScope::default(),
            format: StoreFormat::default(),
            require_interval: false,
            fail_fast: false,
            magnification: None,
        }
    }
}

impl SaveOptions {
    #[must_use]
    pub fn with_volume(mut self, enabled: bool) -> Self {
        self.save_volume = enabled;
        self
    }

    #[must_use]
    pub fn with_projection(mut self, enabled: bool) -> Self {
        self.save_projection = enabled;
        self
    }

    /// Set the lateral stride. Values less than 1 are clamped to 1.
    #[must_use]
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride.max(1);
        self
    }

    /// Set the axial factor. Values less than 1 are clamped to 1.
    #[must_use]
    pub fn with_depth_factor(mut self, factor: usize) -> Self {
        self.depth_factor = factor.max(1);
        self
    }

    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[must_use]
    pub fn with_illumination(mut self, policy: IlluminationPolicy) -> Self {
        self.illumination = policy;
        self
    }

    #[must_use]
    pub fn with_vocabulary(mut self, scope: VocabularyScope) -> Self {
        self.vocabulary = scope;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: StoreFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_require_interval(mut self, required: bool) -> Self {
        self.require_interval = required;
        self
    }

    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    #[must_use]
    pub fn with_magnification(mut self, magnification: Option<u32>) -> Self {
        self.magnification = magnification;
        self
    }

    /// Fallible variant of [`Self::with_stride`].
    ///
    /// # Errors
    /// Returns an error if `stride` is 0.
    pub fn try_with_stride(mut self, stride: usize) -> Result<Self> {
        if stride == 0 {
            return Err(Error::ConfigError("stride must be at least 1".to_string()));
        }
        self.stride = stride;
        Ok(self)
    }

    /// Fallible variant of [`Self::with_depth_factor`].
    ///
    /// # Errors
    /// Returns an error if `factor` is 0.
    pub fn try_with_depth_factor(mut self, factor: usize) -> Result<Self> {
        if factor == 0 {
            return Err(Error::ConfigError(
                "depth_factor must be at least 1".to_string(),
            ));
        }
        self.depth_factor = factor;
        Ok(self)
    }

    /// Check the options before any output is touched.
    ///
    /// # Errors
    /// Returns [`Error::NothingToSave`] when both outputs are disabled, or a
    /// configuration error for zero decimation factors.
    pub fn validate(&self) -> Result<()> {
        if !self.save_volume && !self.save_projection {
            return Err(Error::NothingToSave);
        }
        if self.stride == 0 {
            return Err(Error::ConfigError("stride must be at least 1".to_string()));
        }
        if self.depth_factor == 0 {
            return Err(Error::ConfigError(
                "depth_factor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

//! Directory scanner and dataset index.
//!
//! Recovers the logical dimensions of an acquisition from the names of the
//! files in a flat directory.

use crate::{Error, Result};
use kakapo_core::{DimensionKind, FilenameRecord, FilenameSchema, VocabularyScope};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Sorted, deduplicated tokens observed for one dimension.
///
/// Order is lexicographic on the token text, so zero-padded indices sort
/// numerically and unpadded ones do not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameSet {
    names: Vec<String>,
}

impl NameSet {
    fn collect<'a, I>(tokens: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let set: BTreeSet<&str> = tokens.into_iter().collect();
        Self {
            names: set.into_iter().map(str::to_string).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name at `index` in sorted order.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Position of `name` in sorted order.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names
            .binary_search_by(|probe| probe.as_str().cmp(name))
            .ok()
    }

    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }

    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.names.last().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.names
    }
}

/// Name sets of a single region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub region: String,
    pub timepoints: NameSet,
    pub channels: NameSet,
    pub illuminations: NameSet,
    pub planes: NameSet,
}

/// One source file of a logical volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimepointFile {
    pub timepoint: String,
    pub path: PathBuf,
}

/// Index of every qualifying file in an acquisition directory.
///
/// Built once by [`DatasetIndex::open`]; [`DatasetIndex::refresh`] re-scans
/// after new files arrive.
#[derive(Debug, Clone)]
pub struct DatasetIndex {
    root: PathBuf,
    schema: FilenameSchema,
    files: Vec<String>,
    records: Vec<FilenameRecord>,
    names: BTreeMap<DimensionKind, NameSet>,
}

impl DatasetIndex {
    /// Scan `root` and decode every qualifying file name.
    ///
    /// # Errors
    /// - [`Error::NotADirectory`] if `root` is missing or not a directory.
    /// - [`Error::NoQualifyingFiles`] if nothing passes the schema filters.
    /// - [`Error::Core`] wrapping the first malformed name.
    pub fn open<P: AsRef<Path>>(root: P, schema: FilenameSchema) -> Result<Self> {
        let mut index = Self {
            root: root.as_ref().to_path_buf(),
            schema,
            files: Vec::new(),
            records: Vec::new(),
            names: BTreeMap::new(),
        };
        index.refresh()?;
        Ok(index)
    }

    /// Re-scan the directory, replacing the current contents.
    ///
    /// On error the index is left unchanged.
    ///
    /// # Errors
    /// Same as [`DatasetIndex::open`].
    pub fn refresh(&mut self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(Error::NotADirectory(self.root.clone()));
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if self.schema.is_qualifying(&name) {
                files.push(name);
            }
        }
        if files.is_empty() {
            return Err(Error::NoQualifyingFiles(self.root.clone()));
        }
        files.sort_unstable();

        let records = files
            .iter()
            .map(|name| self.schema.decode(name))
            .collect::<kakapo_core::Result<Vec<_>>>()?;

        self.names = collect_names(&self.schema.fields, records.iter());
        self.files = files;
        self.records = records;
        log::debug!(
            "indexed {} files in {}",
            self.files.len(),
            self.root.display()
        );
        Ok(())
    }

    /// Acquisition directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn schema(&self) -> &FilenameSchema {
        &self.schema
    }

    /// Qualifying file names, sorted.
    #[must_use]
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Decoded records, parallel to [`Self::files`].
    #[must_use]
    pub fn records(&self) -> &[FilenameRecord] {
        &self.records
    }

    /// Ordered names observed for `kind` across the whole directory.
    #[must_use]
    pub fn names(&self, kind: DimensionKind) -> &NameSet {
        static EMPTY: NameSet = NameSet { names: Vec::new() };
        self.names.get(&kind).unwrap_or(&EMPTY)
    }

    /// Number of distinct names for `kind`.
    #[must_use]
    pub fn count(&self, kind: DimensionKind) -> usize {
        self.names(kind).len()
    }

    #[must_use]
    pub fn regions(&self) -> &NameSet {
        self.names(DimensionKind::Region)
    }

    /// Name sets for `region`.
    ///
    /// Timepoints are always restricted to the region's files. Channels,
    /// illumination sides and planes come from the whole directory under
    /// [`VocabularyScope::Global`] and from the region under
    /// [`VocabularyScope::Region`].
    ///
    /// # Errors
    /// Returns [`Error::UnknownRegion`] if no file carries `region`.
    pub fn region_info(&self, region: &str, scope: VocabularyScope) -> Result<RegionInfo> {
        let in_region: Vec<&FilenameRecord> = self
            .records
            .iter()
            .filter(|record| record.matches(DimensionKind::Region, region))
            .collect();
        if in_region.is_empty() {
            return Err(Error::UnknownRegion(region.to_string()));
        }

        let local = |kind: DimensionKind| {
            NameSet::collect(in_region.iter().filter_map(|record| record.get(kind)))
        };
        let scoped = |kind: DimensionKind| match scope {
            VocabularyScope::Global => self.names(kind).clone(),
            VocabularyScope::Region => local(kind),
        };

        Ok(RegionInfo {
            region: region.to_string(),
            timepoints: local(DimensionKind::Timepoint),
            channels: scoped(DimensionKind::Channel),
            illuminations: scoped(DimensionKind::Illumination),
            planes: scoped(DimensionKind::Plane),
        })
    }

    /// Files of one (region, channel, illumination) combination, sorted by
    /// timepoint name and then by file name.
    #[must_use]
    pub fn select(&self, region: &str, channel: &str, illumination: &str) -> Vec<TimepointFile> {
        let mut selected: Vec<(&str, &str)> = self
            .records
            .iter()
            .zip(&self.files)
            .filter(|(record, _)| {
                record.matches(DimensionKind::Region, region)
                    && record.matches(DimensionKind::Channel, channel)
                    && record.matches(DimensionKind::Illumination, illumination)
            })
            .filter_map(|(record, name)| record.timepoint().map(|t| (t, name.as_str())))
            .collect();
        selected.sort_unstable();
        selected
            .into_iter()
            .map(|(timepoint, name)| TimepointFile {
                timepoint: timepoint.to_string(),
                path: self.root.join(name),
            })
            .collect()
    }
}

fn collect_names<'a, I>(fields: &[DimensionKind], records: I) -> BTreeMap<DimensionKind, NameSet>
where
    I: Iterator<Item = &'a FilenameRecord> + Clone,
{
    fields
        .iter()
        .map(|&kind| {
            let names = NameSet::collect(records.clone().filter_map(|record| record.get(kind)));
            (kind, names)
        })
        .collect()
}

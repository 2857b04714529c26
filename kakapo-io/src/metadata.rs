//! Objective magnification from the acquisition metadata file.

use crate::settings::SETTINGS_MARKER;
use crate::Result;
use kakapo_core::DEFAULT_MAGNIFICATION;
use std::fs;
use std::path::{Path, PathBuf};

/// Metadata recovered from the acquisition's text files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionMetadata {
    /// Objective magnification, if a `Name = NNx` line was found.
    pub magnification: Option<u32>,
    /// File the magnification was read from.
    pub source: Option<PathBuf>,
}

impl AcquisitionMetadata {
    /// Scan the non-sidecar `.txt` files of `dir` for the objective line.
    ///
    /// Files are visited in name order; the first match wins.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be listed. Unreadable files
    /// are skipped.
    pub fn find_in(dir: &Path) -> Result<Self> {
        let mut candidates = Vec::new();
        for entry in fs::read_dir(dir)? {
            let Ok(name) = entry?.file_name().into_string() else {
                continue;
            };
            if name.ends_with(".txt")
                && !name.contains(SETTINGS_MARKER)
                && !name.starts_with('.')
            {
                candidates.push(name);
            }
        }
        candidates.sort_unstable();

        for name in candidates {
            let path = dir.join(&name);
            let Ok(contents) = fs::read_to_string(&path) else {
                log::debug!("skipping unreadable metadata file {}", path.display());
                continue;
            };
            if let Some(magnification) = parse_magnification(&contents) {
                log::debug!("objective {magnification}x from {}", path.display());
                return Ok(Self {
                    magnification: Some(magnification),
                    source: Some(path),
                });
            }
        }
        Ok(Self::default())
    }

    /// Magnification to calibrate with: `override_mag`, then the file, then 10x.
    #[must_use]
    pub fn resolve_magnification(&self, override_mag: Option<u32>) -> u32 {
        override_mag
            .or(self.magnification)
            .unwrap_or(DEFAULT_MAGNIFICATION)
    }
}

/// Parse the integer of the first `... Name = <NN>x` line.
#[must_use]
pub fn parse_magnification(contents: &str) -> Option<u32> {
    contents.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        if !key.trim_end().ends_with("Name") {
            return None;
        }
        let value = value.trim();
        let digits_end = value
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(value.len());
        let (digits, rest) = value.split_at(digits_end);
        if digits.is_empty() || !rest.starts_with(['x', 'X']) {
            return None;
        }
        digits.parse().ok().filter(|&mag| mag > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_magnification() {
        assert_eq!(parse_magnification("Objective\nName = 20x\n"), Some(20));
        assert_eq!(parse_magnification("Objective Name = 4X water"), Some(4));
        assert_eq!(parse_magnification("Name = Detection"), None);
        assert_eq!(parse_magnification("Other = 10x"), None);
        assert_eq!(parse_magnification("Name = 0x"), None);
    }

    #[test]
    fn test_find_in_skips_settings_sidecars() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("t0_R0_C0_I0_Settings.txt"),
            "Name = 40x\n",
        )
        .unwrap();
        let none = AcquisitionMetadata::find_in(dir.path()).unwrap();
        assert_eq!(none.magnification, None);
        assert_eq!(none.resolve_magnification(None), DEFAULT_MAGNIFICATION);

        fs::write(dir.path().join("AcquisitionMetadata.txt"), "Name = 20x\n").unwrap();
        let found = AcquisitionMetadata::find_in(dir.path()).unwrap();
        assert_eq!(found.magnification, Some(20));
        assert_eq!(found.resolve_magnification(None), 20);
        assert_eq!(found.resolve_magnification(Some(16)), 16);
    }
}

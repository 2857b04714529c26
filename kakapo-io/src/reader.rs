//! Memory-mapped TIFF volume readers.
//!

use crate::{Error, Result};
use memmap2::Mmap;
use ndarray::Array3;
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult, Limits};

/// A memory-mapped file reader.
///
/// Uses memmap2 to access file contents without reading the whole file
/// up front.
pub struct MappedFileReader {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Path the mapping was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reader for multi-page 16-bit grayscale TIFF volumes.
///
/// Each page is one z plane; the decoded array is laid out `(z, y, x)`.
pub struct TiffVolumeReader {
    reader: MappedFileReader,
}

impl TiffVolumeReader {
    /// Map a TIFF file for decoding.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            reader: MappedFileReader::open(path)?,
        })
    }

    /// Decode and return the full volume.
    ///
    /// 8-bit pages are widened to 16 bits.
    ///
    /// # Errors
    /// Returns an error if the file is not a grayscale TIFF, or if its pages
    /// differ in size.
    pub fn read_volume(&self) -> Result<Array3<u16>> {
        let mut decoder = self.decoder()?;
        let (width, height) = plane_dims(&mut decoder)?;
        let plane_len = width * height;
        let mut data: Vec<u16> = Vec::new();
        let mut depth = 0usize;

        loop {
            let dims = plane_dims(&mut decoder)?;
            if dims != (width, height) {
                return Err(self.invalid(format!(
                    "page {depth} is {}x{}, expected {width}x{height}",
                    dims.0, dims.1
                )));
            }
            let start = data.len();
            match decoder.read_image()? {
                DecodingResult::U16(plane) => data.extend_from_slice(&plane),
                DecodingResult::U8(plane) => data.extend(plane.into_iter().map(u16::from)),
                _ => return Err(self.invalid("unsupported sample type".to_string())),
            }
            if data.len() - start != plane_len {
                return Err(self.invalid(format!(
                    "page {depth} has {} samples, expected {plane_len}",
                    data.len() - start
                )));
            }
            depth += 1;

            if !decoder.more_images() {
                break;
            }
            decoder.next_image()?;
        }

        Array3::from_shape_vec((depth, height, width), data)
            .map_err(|e| self.invalid(e.to_string()))
    }

    /// Shape `(z, y, x)` from the page directory, without decoding pixels.
    ///
    /// # Errors
    /// Returns an error if the TIFF header or any page directory is invalid.
    pub fn probe_shape(&self) -> Result<(usize, usize, usize)> {
        let mut decoder = self.decoder()?;
        let (width, height) = plane_dims(&mut decoder)?;
        let mut depth = 1usize;
        while decoder.more_images() {
            decoder.next_image()?;
            depth += 1;
        }
        Ok((depth, height, width))
    }

    /// Path of the mapped file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.reader.path()
    }

    fn decoder(&self) -> Result<Decoder<Cursor<&[u8]>>> {
        let cursor = Cursor::new(self.reader.as_bytes());
        Ok(Decoder::new(cursor)?.with_limits(Limits::unlimited()))
    }

    fn invalid(&self, reason: String) -> Error {
        Error::InvalidFormat(format!("{}: {reason}", self.path().display()))
    }
}

/// Decode the volume at `path`.
///
/// # Errors
/// See [`TiffVolumeReader::read_volume`].
pub fn read_volume<P: AsRef<Path>>(path: P) -> Result<Array3<u16>> {
    TiffVolumeReader::open(path)?.read_volume()
}

fn plane_dims(decoder: &mut Decoder<Cursor<&[u8]>>) -> Result<(usize, usize)> {
    let (width, height) = decoder.dimensions()?;
    let width = usize::try_from(width)
        .map_err(|_| Error::InvalidFormat(format!("width {width} out of range")))?;
    let height = usize::try_from(height)
        .map_err(|_| Error::InvalidFormat(format!("height {height} out of range")))?;
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::write_volume_tiff;
    use kakapo_core::Calibration;
    use tempfile::tempdir;

    #[test]
    fn test_mapped_reader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bytes.bin");
        std::fs::write(&path, [1u8, 2, 3, 4]).unwrap();
        let reader = MappedFileReader::open(&path).unwrap();
        assert_eq!(reader.path(), path.as_path());
        assert_eq!(reader.as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_volume_roundtrip_through_tiff() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("volume.tif");
        let volume = Array3::from_shape_fn((3, 5, 7), |(z, y, x)| {
            u16::try_from(z * 1_000 + y * 10 + x).unwrap()
        });
        write_volume_tiff(&path, volume.view(), &Calibration::default()).unwrap();

        let reader = TiffVolumeReader::open(&path).unwrap();
        assert_eq!(reader.probe_shape().unwrap(), (3, 5, 7));
        assert_eq!(reader.read_volume().unwrap(), volume);
    }

    #[test]
    fn test_rejects_non_tiff() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fake.tif");
        std::fs::write(&path, b"not a tiff at all").unwrap();
        assert!(read_volume(&path).is_err());
    }
}

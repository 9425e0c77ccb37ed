//! Memory-mapped detector frame readers.
//!

use crate::{Error, Result};
use memmap2::Mmap;
use pilroi_core::Image;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Frame shape of a Pilatus 100K module (rows, columns).
pub const PILATUS_100K_SHAPE: (usize, usize) = (195, 487);

/// A memory-mapped file reader.
///
/// Uses memmap2 to access frame files without copying them into a
/// separate buffer first.
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
        let path = path.as_ref();
        let file = File::open(path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|err| Error::MmapError(format!("{}: {err}", path.display())))?;
        Ok(Self {
            mmap,
            path: path.to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Path the file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Pixel encoding of a headerless frame file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Little-endian `u32` counts, as written by Pilatus detectors.
    #[default]
    U32Le,
    U16Le,
    F32Le,
}

impl PixelFormat {
    /// Bytes per pixel.
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            PixelFormat::U16Le => 2,
            PixelFormat::U32Le | PixelFormat::F32Le => 4,
        }
    }

    fn decode(self, chunk: &[u8]) -> f64 {
        match self {
            PixelFormat::U16Le => f64::from(u16::from_le_bytes([chunk[0], chunk[1]])),
            PixelFormat::U32Le => {
                f64::from(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            }
            PixelFormat::F32Le => {
                f64::from(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            }
        }
    }
}

/// Reader for headerless fixed-shape frame files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrameReader {
    pub rows: usize,
    pub cols: usize,
    #[serde(default)]
    pub format: PixelFormat,
}

impl Default for RawFrameReader {
    fn default() -> Self {
        Self::pilatus_100k()
    }
}

impl RawFrameReader {
    /// Creates a reader for `rows x cols` frames.
    #[must_use]
    pub fn new(rows: usize, cols: usize, format: PixelFormat) -> Self {
        Self { rows, cols, format }
    }

    /// Reader for 195 x 487 `u32` Pilatus 100K frames.
    #[must_use]
    pub fn pilatus_100k() -> Self {
        let (rows, cols) = PILATUS_100K_SHAPE;
        Self::new(rows, cols, PixelFormat::U32Le)
    }

    /// Expected file size in bytes.
    #[must_use]
    pub fn frame_bytes(&self) -> usize {
        self.rows * self.cols * self.format.width()
    }

    /// Decodes a frame from raw bytes.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if the byte count does not match the
    /// configured shape and pixel format.
    pub fn decode(&self, bytes: &[u8]) -> Result<Image> {
        let expected = self.frame_bytes();
        if bytes.len() != expected {
            return Err(Error::InvalidFormat(format!(
                "expected {expected} bytes for a {}x{} {:?} frame, found {}",
                self.rows,
                self.cols,
                self.format,
                bytes.len()
            )));
        }
        let pixels = bytes
            .chunks_exact(self.format.width())
            .map(|chunk| self.format.decode(chunk))
            .collect();
        Ok(Image::new(self.rows, self.cols, pixels)?)
    }

    /// Reads one frame file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be mapped or has the wrong size.
    pub fn read<P: AsRef<Path>>(&self, path: P) -> Result<Image> {
        let reader = MappedFileReader::open(path)?;
        self.decode(reader.as_bytes()).map_err(|err| match err {
            Error::InvalidFormat(msg) => {
                Error::InvalidFormat(format!("{}: {msg}", reader.path().display()))
            }
            other => other,
        })
    }
}

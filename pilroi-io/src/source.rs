//! Frame sources backed by a directory of frame files.

use crate::reader::RawFrameReader;
use crate::{Error, Result};
use pilroi_core::{prepare_frame, FrameMetadata, FrameSource, Image, ScanConfig};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Frame files in `dir` with the given extension, ordered by frame number.
///
/// Detector software names frames `<prefix>_<number>.<ext>`; the number is
/// the run of digits right before the extension and is compared
/// numerically, so `scan_10.raw` sorts after `scan_9.raw`.
///
/// # Errors
/// Returns an error if the directory cannot be read or a matching file has
/// no frame number.
pub fn ordered_frame_paths<P: AsRef<Path>>(dir: P, extension: &str) -> Result<Vec<PathBuf>> {
    let extension = extension.trim_start_matches('.');
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = name
            .strip_suffix(extension)
            .and_then(|s| s.strip_suffix('.'))
        else {
            continue;
        };
        let number = frame_number(stem).ok_or_else(|| {
            Error::InvalidFormat(format!("frame file '{name}' has no trailing frame number"))
        })?;
        frames.push((number, path));
    }
    frames.sort();
    log::debug!(
        "found {} '.{extension}' frames in {}",
        frames.len(),
        dir.as_ref().display()
    );
    Ok(frames.into_iter().map(|(_, path)| path).collect())
}

fn frame_number(stem: &str) -> Option<u64> {
    let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    stem[stem.len() - digits..].parse().ok()
}

/// A scan read lazily from frame files.
#[derive(Debug, Clone)]
pub struct FileScan {
    paths: Vec<PathBuf>,
    metadata: Vec<FrameMetadata>,
    reader: RawFrameReader,
}

impl FileScan {
    /// Pairs frame files with their metadata.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if the counts differ.
    pub fn new(
        paths: Vec<PathBuf>,
        metadata: Vec<FrameMetadata>,
        reader: RawFrameReader,
    ) -> Result<Self> {
        if paths.len() != metadata.len() {
            return Err(Error::InvalidFormat(format!(
                "{} frame files but {} scan log rows",
                paths.len(),
                metadata.len()
            )));
        }
        Ok(Self {
            paths,
            metadata,
            reader,
        })
    }

    /// Frame files in scan order.
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Loads every frame in parallel, keeping per-frame failures.
    #[must_use]
    pub fn load_all(&self) -> Vec<Result<Image>> {
        self.paths
            .par_iter()
            .map(|path| self.reader.read(path))
            .collect()
    }

    /// Loads every frame normalized by foil attenuation and monitor, with the
    /// filter of `config` applied but without its crop.
    ///
    /// Per-frame failures are kept, as in [`FileScan::load_all`].
    #[must_use]
    pub fn load_normalized(&self, config: &ScanConfig) -> Vec<Result<Image>> {
        let mut uncropped = config.clone();
        uncropped.crop = None;
        self.paths
            .par_iter()
            .zip(self.metadata.par_iter())
            .map(|(path, metadata)| -> Result<Image> {
                let image = self.reader.read(path)?;
                Ok(prepare_frame(&image, metadata, &uncropped)?)
            })
            .collect()
    }
}

impl FrameSource for FileScan {
    fn len(&self) -> usize {
        self.paths.len()
    }

    fn metadata(&self, index: usize) -> FrameMetadata {
        self.metadata[index]
    }

    fn load(&self, index: usize) -> pilroi_core::Result<Image> {
        self.reader
            .read(&self.paths[index])
            .map_err(|err| pilroi_core::Error::ImageRead(err.to_string()))
    }
}

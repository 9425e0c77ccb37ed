//! JSON scan manifests.
//!
//! A manifest names the frame directory, the scan log and everything the
//! scan driver needs. Relative paths are resolved against the directory the
//! manifest was loaded from.
//!
//! ```json
//! {
//!   "frames": "images",
//!   "scan_log": "scan_042.csv",
//!   "columns": { "position": "l", "monitor": "monitor", "foils": "foils" },
//!   "foil_factors": [0.0, 0.0, 1.2, 2.4],
//!   "crop": { "row_min": 0, "row_max": 195, "col_min": 200, "col_max": 300 },
//!   "filter": "mask=10,20|11,20;smooth=3",
//!   "rois": [
//!     { "id": "peak", "shape": "rectangle", "row_min": 90, "row_max": 110,
//!       "col_min": 40, "col_max": 60,
//!       "background": { "kind": "constant", "level": 2.0 } }
//!   ],
//!   "tracking": [ { "id": "follow", "center_row": 100, "height": 11, "width": 11 } ]
//! }
//! ```

use crate::reader::RawFrameReader;
use crate::scan_log::{MetadataColumns, ScanLog};
use crate::source::{ordered_frame_paths, FileScan};
use crate::Result;
use pilroi_core::{Background, CropBounds, FilterSpec, Roi, RoiId, RoiShape, ScanConfig, TrackingRoi};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_extension() -> String {
    "raw".into()
}

fn default_parallel() -> bool {
    true
}

/// ROI definition as written in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiDefinition {
    pub id: RoiId,
    #[serde(flatten)]
    pub shape: RoiShape,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<Background>,
}

impl RoiDefinition {
    /// Builds the validated ROI.
    ///
    /// # Errors
    /// Returns the core validation error for bad geometry.
    pub fn to_roi(&self) -> pilroi_core::Result<Roi> {
        let roi = Roi::new(self.id.clone(), self.shape.clone())?;
        match &self.background {
            Some(background) => roi.with_background(background.clone()),
            None => Ok(roi),
        }
    }
}

/// Everything needed to run one scan from files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanManifest {
    /// Directory holding the frame files.
    pub frames: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Scan log with one row per frame.
    pub scan_log: PathBuf,
    pub columns: MetadataColumns,
    #[serde(default)]
    pub detector: RawFrameReader,
    #[serde(default)]
    pub foil_factors: Option<[f64; pilroi_core::FOIL_COUNT]>,
    #[serde(default)]
    pub crop: Option<CropBounds>,
    /// Filter options in `key=value;...` form.
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub rois: Vec<RoiDefinition>,
    #[serde(default)]
    pub tracking: Vec<TrackingRoi>,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl ScanManifest {
    /// Loads a manifest file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid manifest.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut manifest: Self = serde_json::from_str(&text)?;
        manifest.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        log::debug!("loaded manifest {}", path.display());
        Ok(manifest)
    }

    /// Parses a manifest with paths relative to `base_dir`.
    ///
    /// # Errors
    /// Returns an error if `text` is not a valid manifest.
    pub fn from_json(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut manifest: Self = serde_json::from_str(text)?;
        manifest.base_dir = base_dir.into();
        Ok(manifest)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Builds the scan configuration.
    ///
    /// # Errors
    /// Returns the first ROI, filter or tracking validation error.
    pub fn to_config(&self) -> Result<ScanConfig> {
        let rois = self
            .rois
            .iter()
            .map(RoiDefinition::to_roi)
            .collect::<pilroi_core::Result<Vec<_>>>()?;
        let mut config = ScanConfig::new()
            .with_rois(rois)
            .with_expected_shape(self.detector.rows, self.detector.cols)
            .with_parallel(self.parallel);
        for tracking in &self.tracking {
            config = config.with_tracking(TrackingRoi::new(
                tracking.id.clone(),
                tracking.center_row,
                tracking.height,
                tracking.width,
            )?);
        }
        if let Some(crop) = self.crop {
            config = config.with_crop(crop);
        }
        if let Some(filter) = &self.filter {
            config = config.with_filter(filter.parse::<FilterSpec>()?);
        }
        if let Some(factors) = self.foil_factors {
            config = config.with_foil_factors(factors);
        }
        config.validate()?;
        Ok(config)
    }

    /// Opens the frame files and scan log.
    ///
    /// # Errors
    /// Returns an error if the log cannot be read or the frame count does not
    /// match the number of log rows.
    pub fn open_scan(&self) -> Result<FileScan> {
        let log = ScanLog::read(self.resolve(&self.scan_log))?;
        let metadata = log.frame_metadata(&self.columns)?;
        let paths = ordered_frame_paths(self.resolve(&self.frames), &self.extension)?;
        log::info!(
            "scan: {} frames, {} log rows",
            paths.len(),
            metadata.len()
        );
        FileScan::new(paths, metadata, self.detector)
    }
}

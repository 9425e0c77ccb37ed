//! pilroi-core: Region-of-interest statistics for area detector scans.
//!
//! This crate provides frame preprocessing (crop, mask, threshold, smooth),
//! ROI geometry, per-ROI statistics and the scan driver that assembles them
//! into one table row per frame.
//!

pub mod error;
pub mod extraction;
pub mod image;
pub mod limits;
pub mod normalize;
pub mod preprocess;
pub mod roi;
pub mod scan;

pub use error::{Error, Result};
pub use extraction::{extract, extract_all, Background, RoiStatistics, StatField};
pub use image::{Image, PixelCoord};
pub use limits::{column_profile, find_limits, CropWindow};
pub use normalize::{foil_attenuation, normalize, FOIL_COUNT};
pub use preprocess::{preprocess, CropBounds, FilterSpec, MaskFill};
pub use roi::{Roi, RoiId, RoiShape};
pub use scan::{
    extract_scan, extract_scan_with_cancel, prepare_frame, resume_scan, FrameMetadata,
    FrameSource, InMemoryScan, RoiCell, RowStatus, ScanConfig, ScanRow, ScanTable, TrackingRoi,
};

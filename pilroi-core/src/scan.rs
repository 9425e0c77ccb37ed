//! Scan-level extraction: one table row per detector frame.
//!
//! A scan is processed row by row. Configuration problems (duplicate ROI
//! identifiers, invalid filter values) are returned before any frame is
//! touched. Everything that goes wrong with a single frame is recorded in
//! that frame's row instead, so the table always has one row per frame.
#![allow(
    clippy::cast_precision_loss,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::extraction::{ensure_unique_ids, extract, median, RoiStatistics, StatField};
use crate::image::{Image, PixelCoord};
use crate::normalize::{foil_attenuation, normalize, FOIL_COUNT};
use crate::preprocess::{preprocess, CropBounds, FilterSpec};
use crate::roi::{Roi, RoiId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Scalar metadata recorded with each frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrameMetadata {
    /// Scan coordinate (motor position, L value, ...).
    pub position: f64,
    /// Incident-beam monitor count.
    pub monitor: Option<f64>,
    /// Foil insertion code, see [`foil_attenuation`].
    pub foils: Option<u32>,
}

impl FrameMetadata {
    /// Metadata with only a scan position.
    #[must_use]
    pub fn at(position: f64) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Sets the monitor count.
    #[must_use]
    pub fn with_monitor(mut self, monitor: f64) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Sets the foil insertion code.
    #[must_use]
    pub fn with_foils(mut self, code: u32) -> Self {
        self.foils = Some(code);
        self
    }
}

/// Supplier of the frames of one scan.
///
/// Implementations own the storage format; the scan driver only needs
/// random access by index so rows can be processed in any order.
pub trait FrameSource: Send + Sync {
    /// Number of frames in the scan.
    fn len(&self) -> usize;

    /// Returns true if the scan has no frames.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Metadata of frame `index`.
    fn metadata(&self, index: usize) -> FrameMetadata;

    /// Loads frame `index`.
    ///
    /// # Errors
    /// Any error is recorded against the row as an image read failure.
    fn load(&self, index: usize) -> Result<Image>;
}

/// Frames held in memory, including frames that already failed to load.
#[derive(Debug, Clone, Default)]
pub struct InMemoryScan {
    frames: Vec<(FrameMetadata, Result<Image>)>,
}

impl InMemoryScan {
    /// Creates an empty scan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame.
    pub fn push(&mut self, metadata: FrameMetadata, image: Image) {
        self.frames.push((metadata, Ok(image)));
    }

    /// Appends a frame that could not be read.
    pub fn push_failed(&mut self, metadata: FrameMetadata, reason: impl Into<String>) {
        self.frames
            .push((metadata, Err(Error::ImageRead(reason.into()))));
    }
}

impl FromIterator<(f64, Image)> for InMemoryScan {
    fn from_iter<I: IntoIterator<Item = (f64, Image)>>(iter: I) -> Self {
        Self {
            frames: iter
                .into_iter()
                .map(|(position, image)| (FrameMetadata::at(position), Ok(image)))
                .collect(),
        }
    }
}

impl FrameSource for InMemoryScan {
    fn len(&self) -> usize {
        self.frames.len()
    }

    fn metadata(&self, index: usize) -> FrameMetadata {
        self.frames[index].0
    }

    fn load(&self, index: usize) -> Result<Image> {
        self.frames[index].1.clone()
    }
}

/// Rectangle ROI whose column follows the brightest pixel of each frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrackingRoi {
    pub id: RoiId,
    /// Fixed centre row.
    pub center_row: i64,
    pub height: u32,
    pub width: u32,
}

impl TrackingRoi {
    /// Creates a tracking ROI.
    pub fn new(id: impl Into<RoiId>, center_row: i64, height: u32, width: u32) -> Result<Self> {
        let tracking = Self {
            id: id.into(),
            center_row,
            height,
            width,
        };
        tracking.validate()?;
        Ok(tracking)
    }

    fn validate(&self) -> Result<()> {
        // Column 0 never overflows, so this checks id, size and row span.
        Roi::centered(self.id.clone(), self.center_row, 0, self.height, self.width).map(|_| ())
    }

    /// The rectangle for a frame whose brightest pixel is `peak`.
    pub fn resolve(&self, peak: PixelCoord) -> Result<Roi> {
        let center_col = i64::try_from(peak.col)
            .map_err(|_| Error::InvalidBounds(format!("peak column {} overflows", peak.col)))?;
        Roi::centered(
            self.id.clone(),
            self.center_row,
            center_col,
            self.height,
            self.width,
        )
    }
}

/// Everything needed to turn a scan into a table.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Fixed ROIs.
    pub rois: Vec<Roi>,
    /// Peak-tracking ROIs.
    pub tracking: Vec<TrackingRoi>,
    pub crop: Option<CropBounds>,
    pub filter: Option<FilterSpec>,
    /// Per-foil attenuation exponents; frames must then carry a foil code.
    pub foil_factors: Option<[f64; FOIL_COUNT]>,
    /// Frames of any other shape are rejected as corrupt.
    pub expected_shape: Option<(usize, usize)>,
    /// Process rows on the rayon thread pool.
    pub parallel: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            rois: Vec::new(),
            tracking: Vec::new(),
            crop: None,
            filter: None,
            foil_factors: None,
            expected_shape: None,
            parallel: true,
        }
    }
}

impl ScanConfig {
    /// Creates a configuration with no ROIs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fixed ROI.
    #[must_use]
    pub fn with_roi(mut self, roi: Roi) -> Self {
        self.rois.push(roi);
        self
    }

    /// Adds several fixed ROIs.
    #[must_use]
    pub fn with_rois(mut self, rois: impl IntoIterator<Item = Roi>) -> Self {
        self.rois.extend(rois);
        self
    }

    /// Adds a peak-tracking ROI.
    #[must_use]
    pub fn with_tracking(mut self, tracking: TrackingRoi) -> Self {
        self.tracking.push(tracking);
        self
    }

    /// Sets the crop applied to every frame.
    #[must_use]
    pub fn with_crop(mut self, crop: CropBounds) -> Self {
        self.crop = Some(crop);
        self
    }

    /// Sets the filters applied to every frame.
    #[must_use]
    pub fn with_filter(mut self, filter: FilterSpec) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Sets the foil attenuation exponents.
    #[must_use]
    pub fn with_foil_factors(mut self, factors: [f64; FOIL_COUNT]) -> Self {
        self.foil_factors = Some(factors);
        self
    }

    /// Sets the expected frame shape.
    #[must_use]
    pub fn with_expected_shape(mut self, rows: usize, cols: usize) -> Self {
        self.expected_shape = Some((rows, cols));
        self
    }

    /// Enables or disables parallel row processing.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Identifiers of all ROIs, fixed first, in configuration order.
    #[must_use]
    pub fn roi_ids(&self) -> Vec<RoiId> {
        self.rois
            .iter()
            .map(|roi| roi.id().clone())
            .chain(self.tracking.iter().map(|t| t.id.clone()))
            .collect()
    }

    /// Checks everything that can be checked without a frame.
    pub fn validate(&self) -> Result<()> {
        ensure_unique_ids(
            self.rois
                .iter()
                .map(Roi::id)
                .chain(self.tracking.iter().map(|t| &t.id)),
        )?;
        for tracking in &self.tracking {
            tracking.validate()?;
        }
        if let Some(crop) = &self.crop {
            match self.expected_shape {
                Some((rows, cols)) => {
                    crop.resolve(rows, cols)?;
                }
                None => crop.validate()?,
            }
        }
        if let Some(filter) = &self.filter {
            filter.validate()?;
        }
        if let Some(factors) = &self.foil_factors {
            // Code 0 exercises the factor check without needing a frame.
            foil_attenuation(factors, 0)?;
        }
        Ok(())
    }
}

/// Processing state of a row.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(tag = "status", rename_all = "snake_case")
)]
pub enum RowStatus {
    /// Not processed yet (or interrupted before it started).
    #[default]
    Pending,
    Completed,
    /// The frame itself was unusable; the row has no cells.
    Failed { reason: String },
}

/// Outcome of one ROI on one frame.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(tag = "outcome", rename_all = "snake_case")
)]
pub enum RoiCell {
    Measured(RoiStatistics),
    Failed { reason: String },
}

impl RoiCell {
    /// Statistics if the ROI was measured.
    #[must_use]
    pub fn statistics(&self) -> Option<&RoiStatistics> {
        match self {
            RoiCell::Measured(stats) => Some(stats),
            RoiCell::Failed { .. } => None,
        }
    }
}

impl From<Result<RoiStatistics>> for RoiCell {
    fn from(result: Result<RoiStatistics>) -> Self {
        match result {
            Ok(stats) => RoiCell::Measured(stats),
            Err(err) => RoiCell::Failed {
                reason: err.to_string(),
            },
        }
    }
}

/// One frame of the scan.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanRow {
    pub index: usize,
    pub position: f64,
    pub status: RowStatus,
    /// Brightest pixel of the preprocessed frame.
    pub peak: Option<PixelCoord>,
    pub cells: BTreeMap<RoiId, RoiCell>,
}

impl ScanRow {
    fn pending(index: usize, position: f64) -> Self {
        Self {
            index,
            position,
            status: RowStatus::Pending,
            peak: None,
            cells: BTreeMap::new(),
        }
    }

    /// Returns true if the frame was processed successfully.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == RowStatus::Completed
    }

    /// Statistics of `roi` in this row, if measured.
    #[must_use]
    pub fn statistics(&self, roi: &str) -> Option<&RoiStatistics> {
        self.cells.get(roi).and_then(RoiCell::statistics)
    }
}

/// Tabular scan result, one row per frame in scan order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanTable {
    roi_ids: Vec<RoiId>,
    rows: Vec<ScanRow>,
}

impl ScanTable {
    /// A table with every row pending.
    fn pending<S: FrameSource + ?Sized>(source: &S, roi_ids: Vec<RoiId>) -> Self {
        let rows = (0..source.len())
            .map(|index| ScanRow::pending(index, source.metadata(index).position))
            .collect();
        Self { roi_ids, rows }
    }

    /// ROI identifiers, in column order.
    #[must_use]
    pub fn roi_ids(&self) -> &[RoiId] {
        &self.roi_ids
    }

    /// All rows.
    #[must_use]
    pub fn rows(&self) -> &[ScanRow] {
        &self.rows
    }

    /// Row at `index`.
    #[must_use]
    pub fn row(&self, index: usize) -> Option<&ScanRow> {
        self.rows.get(index)
    }

    /// Number of rows (always the scan length).
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the scan had no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows in each state: `(completed, failed, pending)`.
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        self.rows
            .iter()
            .fold((0, 0, 0), |(done, failed, pending), row| match row.status {
                RowStatus::Completed => (done + 1, failed, pending),
                RowStatus::Failed { .. } => (done, failed + 1, pending),
                RowStatus::Pending => (done, failed, pending + 1),
            })
    }

    /// Returns true if no row is pending.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.rows.iter().all(|row| row.status != RowStatus::Pending)
    }

    /// Failed rows as `(index, reason)`.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.rows.iter().filter_map(|row| match &row.status {
            RowStatus::Failed { reason } => Some((row.index, reason.as_str())),
            _ => None,
        })
    }

    /// Scan positions in row order.
    #[must_use]
    pub fn positions(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row.position).collect()
    }

    /// One statistic of one ROI for every row; `None` marks a missing cell.
    #[must_use]
    pub fn column(&self, roi: &str, field: StatField) -> Vec<Option<f64>> {
        self.rows
            .iter()
            .map(|row| row.statistics(roi).and_then(|stats| stats.field(field)))
            .collect()
    }

    /// Row whose position is closest to `position`; the first one on ties.
    #[must_use]
    pub fn nearest_row(&self, position: f64) -> Option<usize> {
        let mut best: Option<(f64, usize)> = None;
        for row in &self.rows {
            let distance = (row.position - position).abs();
            if distance.is_nan() {
                continue;
            }
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, row.index));
            }
        }
        best.map(|(_, index)| index)
    }

    /// Median peak row over completed rows, for centring plots.
    #[must_use]
    pub fn median_peak_row(&self) -> Option<f64> {
        let mut rows: Vec<f64> = self
            .rows
            .iter()
            .filter_map(|row| row.peak.map(|p| p.row as f64))
            .collect();
        if rows.is_empty() {
            None
        } else {
            Some(median(&mut rows))
        }
    }
}

/// Validates, normalizes and preprocesses a single frame.
pub fn prepare_frame(image: &Image, metadata: &FrameMetadata, config: &ScanConfig) -> Result<Image> {
    image.validate()?;
    if let Some(expected) = config.expected_shape {
        if image.shape() != expected {
            return Err(Error::ShapeMismatch {
                expected,
                actual: image.shape(),
            });
        }
    }

    let attenuation = match (&config.foil_factors, metadata.foils) {
        (Some(factors), Some(code)) => Some(foil_attenuation(factors, code)?),
        (Some(_), None) => {
            return Err(Error::InvalidMetadata(
                "foil factors are configured but the frame has no foil code".into(),
            ));
        }
        (None, _) => None,
    };

    let frame = if attenuation.is_none() && metadata.monitor.is_none() {
        Cow::Borrowed(image)
    } else {
        Cow::Owned(normalize(
            image,
            attenuation.unwrap_or(1.0),
            metadata.monitor.unwrap_or(1.0),
        )?)
    };

    preprocess(&frame, config.crop.as_ref(), config.filter.as_ref())
}

/// Extracts every configured ROI from every frame.
///
/// # Errors
/// Only configuration errors are returned; frame and ROI failures are
/// recorded in the table.
pub fn extract_scan<S: FrameSource + ?Sized>(source: &S, config: &ScanConfig) -> Result<ScanTable> {
    extract_scan_with_cancel(source, config, &AtomicBool::new(false))
}

/// Like [`extract_scan`], but stops starting new rows once `cancel` is set.
///
/// Rows that had not started stay [`RowStatus::Pending`]; pass the table to
/// [`resume_scan`] to finish it.
pub fn extract_scan_with_cancel<S: FrameSource + ?Sized>(
    source: &S,
    config: &ScanConfig,
    cancel: &AtomicBool,
) -> Result<ScanTable> {
    config.validate()?;
    let mut table = ScanTable::pending(source, config.roi_ids());
    process_pending(&mut table, source, config, cancel);
    Ok(table)
}

/// Processes the pending rows of `table`, leaving finished rows untouched.
///
/// # Errors
/// Returns [`Error::InvalidMetadata`] if the table does not belong to this
/// source and configuration, plus any configuration error.
pub fn resume_scan<S: FrameSource + ?Sized>(
    table: &mut ScanTable,
    source: &S,
    config: &ScanConfig,
    cancel: &AtomicBool,
) -> Result<()> {
    config.validate()?;
    if table.len() != source.len() {
        return Err(Error::InvalidMetadata(format!(
            "table has {} rows but the scan has {} frames",
            table.len(),
            source.len()
        )));
    }
    if table.roi_ids != config.roi_ids() {
        return Err(Error::InvalidMetadata(
            "table was built with a different set of ROIs".into(),
        ));
    }
    process_pending(table, source, config, cancel);
    Ok(())
}

fn process_pending<S: FrameSource + ?Sized>(
    table: &mut ScanTable,
    source: &S,
    config: &ScanConfig,
    cancel: &AtomicBool,
) {
    let pending: Vec<usize> = table
        .rows
        .iter()
        .filter(|row| row.status == RowStatus::Pending)
        .map(|row| row.index)
        .collect();

    let run = |index: usize| -> Option<ScanRow> {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        Some(process_row(source, config, index))
    };
    let processed: Vec<Option<ScanRow>> = if config.parallel {
        pending.par_iter().map(|&index| run(index)).collect()
    } else {
        pending.iter().map(|&index| run(index)).collect()
    };

    for row in processed.into_iter().flatten() {
        let index = row.index;
        table.rows[index] = row;
    }

    let (completed, failed, remaining) = table.counts();
    log::info!(
        "scan: {completed} rows completed, {failed} failed, {remaining} pending of {}",
        table.len()
    );
}

fn process_row<S: FrameSource + ?Sized>(source: &S, config: &ScanConfig, index: usize) -> ScanRow {
    let metadata = source.metadata(index);
    let mut row = ScanRow::pending(index, metadata.position);

    let frame = source
        .load(index)
        .map_err(|err| match err {
            Error::ImageRead(_) => err,
            other => Error::ImageRead(other.to_string()),
        })
        .and_then(|image| prepare_frame(&image, &metadata, config));

    match frame {
        Ok(image) => {
            row.peak = image.peak_location();
            row.cells = measure(&image, row.peak, config);
            row.status = RowStatus::Completed;
            for (id, cell) in &row.cells {
                if let RoiCell::Failed { reason } = cell {
                    log::warn!("scan row {index}, ROI '{id}': {reason}");
                }
            }
            log::debug!("scan row {index} at {}: peak {:?}", row.position, row.peak);
        }
        Err(err) => {
            log::warn!("scan row {index} failed: {err}");
            row.status = RowStatus::Failed {
                reason: err.to_string(),
            };
        }
    }
    row
}

fn measure(
    image: &Image,
    peak: Option<PixelCoord>,
    config: &ScanConfig,
) -> BTreeMap<RoiId, RoiCell> {
    let mut cells = BTreeMap::new();
    for roi in &config.rois {
        cells.insert(roi.id().clone(), extract(image, roi).into());
    }
    for tracking in &config.tracking {
        let result = match peak {
            Some(peak) => tracking
                .resolve(peak)
                .and_then(|roi| extract(image, &roi)),
            None => Err(Error::EmptyRegion {
                region: tracking.id.to_string(),
            }),
        };
        cells.insert(tracking.id.clone(), result.into());
    }
    cells
}

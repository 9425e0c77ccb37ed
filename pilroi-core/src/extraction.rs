//! ROI statistics extraction.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc
)]
//!
//! Each extraction resolves the ROI to its pixel set on the given image,
//! skips masked (`NaN`) pixels, and reduces the remaining values to a
//! [`RoiStatistics`] record.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::image::{Image, PixelCoord};
use crate::roi::{Roi, RoiId, RoiShape};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Background estimate subtracted from a ROI's integrated intensity.
///
/// Every variant yields a per-pixel level `B`; the reported
/// background-subtracted intensity is `integrated - pixel_count * B`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(tag = "kind", rename_all = "snake_case")
)]
pub enum Background {
    /// Fixed per-pixel level.
    Constant { level: f64 },
    /// Mean of a separate region.
    Region { region: RoiShape },
    /// Mean of the ring `inner_radius < d <= outer_radius`, excluding
    /// pixels that belong to the ROI itself.
    Annulus {
        center_row: f64,
        center_col: f64,
        inner_radius: f64,
        outer_radius: f64,
    },
}

impl Background {
    /// Rejects non-finite levels and degenerate geometry.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Constant { level } => {
                if !level.is_finite() {
                    return Err(Error::InvalidBounds(format!(
                        "background level must be finite, got {level}"
                    )));
                }
                Ok(())
            }
            Self::Region { region } => region.validate(),
            Self::Annulus {
                center_row,
                center_col,
                inner_radius,
                outer_radius,
            } => {
                let finite = [center_row, center_col, inner_radius, outer_radius]
                    .iter()
                    .all(|v| v.is_finite());
                if !finite || *inner_radius < 0.0 || outer_radius <= inner_radius {
                    return Err(Error::InvalidBounds(format!(
                        "annulus radii must satisfy 0 <= inner < outer, got {inner_radius}..{outer_radius}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Estimates the per-pixel background level for `roi` on `image`.
    ///
    /// # Errors
    /// Returns [`Error::EmptyRegion`] if the background region has no
    /// unmasked pixels on the image.
    pub fn estimate(&self, image: &Image, roi: &Roi) -> Result<f64> {
        let (rows, cols) = image.shape();
        let data = image.as_array();
        let samples: Vec<f64> = match self {
            Self::Constant { level } => return Ok(*level),
            Self::Region { region } => region
                .pixels(rows, cols)
                .into_iter()
                .map(|p| data[[p.row, p.col]])
                .filter(|v| !v.is_nan())
                .collect(),
            Self::Annulus {
                center_row,
                center_col,
                inner_radius,
                outer_radius,
            } => {
                let outer = RoiShape::Circle {
                    center_row: *center_row,
                    center_col: *center_col,
                    radius: *outer_radius,
                };
                outer
                    .pixels(rows, cols)
                    .into_iter()
                    .filter(|p| {
                        let dr = p.row as f64 - center_row;
                        let dc = p.col as f64 - center_col;
                        dr * dr + dc * dc > inner_radius * inner_radius
                            && !roi.shape().contains(p.row as f64, p.col as f64)
                    })
                    .map(|p| data[[p.row, p.col]])
                    .filter(|v| !v.is_nan())
                    .collect()
            }
        };

        if samples.is_empty() {
            return Err(Error::EmptyRegion {
                region: format!("{} background", roi.id()),
            });
        }
        Ok(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

/// Summary statistics of one ROI on one image.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RoiStatistics {
    /// Sum of unmasked pixel values.
    pub integrated: f64,
    /// Number of unmasked pixels.
    pub pixel_count: usize,
    /// Number of masked pixels inside the region.
    pub masked_count: usize,
    pub mean: f64,
    pub median: f64,
    pub max: f64,
    /// First maximum in row-major order.
    pub max_location: PixelCoord,
    /// Per-pixel background level, when a background policy is set.
    pub background: Option<f64>,
    /// `integrated - pixel_count * background`; may be negative.
    pub background_subtracted: Option<f64>,
}

/// Named scalar fields of [`RoiStatistics`], for typed column access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StatField {
    Integrated,
    PixelCount,
    MaskedCount,
    Mean,
    Median,
    Max,
    MaxRow,
    MaxCol,
    Background,
    BackgroundSubtracted,
}

impl StatField {
    /// Every field, in table column order.
    pub const ALL: [StatField; 10] = [
        StatField::Integrated,
        StatField::PixelCount,
        StatField::MaskedCount,
        StatField::Mean,
        StatField::Median,
        StatField::Max,
        StatField::MaxRow,
        StatField::MaxCol,
        StatField::Background,
        StatField::BackgroundSubtracted,
    ];

    /// Column name suffix.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            StatField::Integrated => "integrated",
            StatField::PixelCount => "pixel_count",
            StatField::MaskedCount => "masked_count",
            StatField::Mean => "mean",
            StatField::Median => "median",
            StatField::Max => "max",
            StatField::MaxRow => "max_row",
            StatField::MaxCol => "max_col",
            StatField::Background => "background",
            StatField::BackgroundSubtracted => "background_subtracted",
        }
    }
}

impl RoiStatistics {
    /// Value of a single field as `f64`; `None` for absent background fields.
    #[must_use]
    pub fn field(&self, field: StatField) -> Option<f64> {
        match field {
            StatField::Integrated => Some(self.integrated),
            StatField::PixelCount => Some(self.pixel_count as f64),
            StatField::MaskedCount => Some(self.masked_count as f64),
            StatField::Mean => Some(self.mean),
            StatField::Median => Some(self.median),
            StatField::Max => Some(self.max),
            StatField::MaxRow => Some(self.max_location.row as f64),
            StatField::MaxCol => Some(self.max_location.col as f64),
            StatField::Background => self.background,
            StatField::BackgroundSubtracted => self.background_subtracted,
        }
    }
}

/// Extracts statistics for a single ROI.
///
/// # Errors
/// Returns [`Error::EmptyRegion`] if the ROI covers no unmasked pixel of the
/// image, or if its background region is empty.
pub fn extract(image: &Image, roi: &Roi) -> Result<RoiStatistics> {
    let (rows, cols) = image.shape();
    let data = image.as_array();

    let pixels = roi.pixels(rows, cols);
    let mut values = Vec::with_capacity(pixels.len());
    let mut masked_count = 0usize;
    let mut peak: Option<(f64, PixelCoord)> = None;

    for pixel in pixels {
        let value = data[[pixel.row, pixel.col]];
        if value.is_nan() {
            masked_count += 1;
            continue;
        }
        // Strict comparison keeps the first maximum in row-major order.
        if peak.map_or(true, |(max, _)| value > max) {
            peak = Some((value, pixel));
        }
        values.push(value);
    }

    let Some((max, max_location)) = peak else {
        return Err(Error::EmptyRegion {
            region: roi.id().to_string(),
        });
    };

    let pixel_count = values.len();
    let integrated: f64 = values.iter().sum();
    let mean = integrated / pixel_count as f64;
    let median = median(&mut values);

    let background = roi
        .background()
        .map(|bg| bg.estimate(image, roi))
        .transpose()?;
    let background_subtracted = background.map(|level| integrated - pixel_count as f64 * level);

    Ok(RoiStatistics {
        integrated,
        pixel_count,
        masked_count,
        mean,
        median,
        max,
        max_location,
        background,
        background_subtracted,
    })
}

/// Extracts statistics for every ROI, keyed by identifier.
///
/// # Errors
/// Returns [`Error::DuplicateRoi`] before doing any work if two ROIs share
/// an identifier, otherwise the first per-ROI error.
pub fn extract_all(image: &Image, rois: &[Roi]) -> Result<BTreeMap<RoiId, RoiStatistics>> {
    ensure_unique_ids(rois.iter().map(Roi::id))?;
    rois.iter()
        .map(|roi| Ok((roi.id().clone(), extract(image, roi)?)))
        .collect()
}

pub(crate) fn ensure_unique_ids<'a>(ids: impl IntoIterator<Item = &'a RoiId>) -> Result<()> {
    let mut seen = BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(Error::DuplicateRoi(id.to_string()));
        }
    }
    Ok(())
}

/// Order-statistic median; averages the two middle values for even counts.
pub(crate) fn median(values: &mut [f64]) -> f64 {
    values.sort_unstable_by(f64::total_cmp);
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) * 0.5
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{s, Array2};

    fn ramp(rows: usize, cols: usize) -> Image {
        Image::from_array(Array2::from_shape_fn((rows, cols), |(r, c)| {
            (r * cols + c) as f64
        }))
    }

    #[test]
    fn test_rectangle_sum_matches_naive_subarray_sum() {
        let image = ramp(12, 17);
        for &(r0, r1, c0, c1) in &[(0, 0, 0, 0), (2, 7, 3, 9), (0, 11, 0, 16), (5, 6, 10, 16)] {
            let roi = Roi::rectangle("r", r0, r1, c0, c1).unwrap();
            let stats = extract(&image, &roi).unwrap();
            let (rows, cols) = (r0 as usize..=r1 as usize, c0 as usize..=c1 as usize);
            let naive: f64 = image.as_array().slice(s![rows, cols]).sum();
            assert_eq!(stats.integrated, naive);
            assert_eq!(
                stats.pixel_count,
                ((r1 - r0 + 1) * (c1 - c0 + 1)) as usize
            );
        }
    }

    #[test]
    fn test_mean_median_max() {
        let image = Image::new(2, 3, vec![1.0, 5.0, 3.0, 2.0, 8.0, 4.0]).unwrap();
        let roi = Roi::rectangle("all", 0, 1, 0, 2).unwrap();
        let stats = extract(&image, &roi).unwrap();
        assert_eq!(stats.integrated, 23.0);
        assert_relative_eq!(stats.mean, 23.0 / 6.0);
        // sorted: 1 2 3 4 5 8
        assert_eq!(stats.median, 3.5);
        assert_eq!(stats.max, 8.0);
        assert_eq!(stats.max_location, PixelCoord::new(1, 1));
        assert_eq!(stats.background, None);
        assert_eq!(stats.background_subtracted, None);
    }

    #[test]
    fn test_max_tie_break_lowest_row_then_column() {
        let mut data = Array2::<f64>::ones((6, 8));
        data[[3, 1]] = 50.0;
        data[[2, 5]] = 50.0;
        let image = Image::from_array(data);
        let roi = Roi::rectangle("r", 0, 5, 0, 7).unwrap();
        let stats = extract(&image, &roi).unwrap();
        assert_eq!(stats.max_location, PixelCoord::new(2, 5));

        let roi = Roi::circle("c", 2.5, 3.0, 4.0).unwrap();
        let stats = extract(&image, &roi).unwrap();
        assert_eq!(stats.max_location, PixelCoord::new(2, 5));
    }

    #[test]
    fn test_background_subtraction_is_linear() {
        let image = ramp(10, 10);
        let base = Roi::rectangle("r", 2, 4, 2, 5).unwrap();
        let plain = extract(&image, &base).unwrap();
        let n = plain.pixel_count as f64;

        for level in [0.0, 1.0, 7.5, 1000.0] {
            let roi = base
                .clone()
                .with_background(Background::Constant { level })
                .unwrap();
            let stats = extract(&image, &roi).unwrap();
            assert_eq!(stats.integrated, plain.integrated);
            assert_eq!(stats.background, Some(level));
            assert_eq!(
                stats.background_subtracted,
                Some(plain.integrated - n * level)
            );
        }
    }

    #[test]
    fn test_over_subtraction_is_not_clamped() {
        let image = Image::new(1, 2, vec![1.0, 1.0]).unwrap();
        let roi = Roi::rectangle("r", 0, 0, 0, 1)
            .unwrap()
            .with_background(Background::Constant { level: 5.0 })
            .unwrap();
        let stats = extract(&image, &roi).unwrap();
        assert_eq!(stats.background_subtracted, Some(-8.0));
    }

    #[test]
    fn test_region_background_uses_region_mean() {
        let mut data = Array2::from_elem((10, 10), 2.0);
        data.slice_mut(s![4..=5, 4..=5]).fill(12.0);
        let image = Image::from_array(data);
        let roi = Roi::rectangle("peak", 4, 5, 4, 5)
            .unwrap()
            .with_background(Background::Region {
                region: RoiShape::Rectangle {
                    row_min: 0,
                    row_max: 1,
                    col_min: 0,
                    col_max: 9,
                },
            })
            .unwrap();
        let stats = extract(&image, &roi).unwrap();
        assert_eq!(stats.background, Some(2.0));
        assert_eq!(stats.background_subtracted, Some(48.0 - 4.0 * 2.0));
    }

    #[test]
    fn test_annulus_background_excludes_roi_pixels() {
        let mut data = Array2::from_elem((21, 21), 3.0);
        data.slice_mut(s![9..=11, 9..=11]).fill(100.0);
        let image = Image::from_array(data);
        // The annulus overlaps the bright ROI; those pixels must not count.
        let roi = Roi::circle("spot", 10.0, 10.0, 1.5)
            .unwrap()
            .with_background(Background::Annulus {
                center_row: 10.0,
                center_col: 10.0,
                inner_radius: 0.0,
                outer_radius: 6.0,
            })
            .unwrap();
        let stats = extract(&image, &roi).unwrap();
        assert_eq!(stats.pixel_count, 9);
        assert_eq!(stats.background, Some(3.0));
    }

    #[test]
    fn test_invalid_background_is_rejected() {
        let roi = Roi::rectangle("r", 0, 1, 0, 1).unwrap();
        assert!(roi
            .clone()
            .with_background(Background::Constant { level: f64::NAN })
            .is_err());
        assert!(roi
            .with_background(Background::Annulus {
                center_row: 0.0,
                center_col: 0.0,
                inner_radius: 4.0,
                outer_radius: 2.0,
            })
            .is_err());
    }

    #[test]
    fn test_empty_background_region_fails() {
        let image = ramp(5, 5);
        let roi = Roi::rectangle("r", 0, 1, 0, 1)
            .unwrap()
            .with_background(Background::Region {
                region: RoiShape::Rectangle {
                    row_min: 40,
                    row_max: 41,
                    col_min: 0,
                    col_max: 1,
                },
            })
            .unwrap();
        let err = extract(&image, &roi).unwrap_err();
        assert_eq!(
            err,
            Error::EmptyRegion {
                region: "r background".into()
            }
        );
    }

    #[test]
    fn test_roi_outside_image_is_empty_region() {
        let image = ramp(8, 8);
        let roi = Roi::rectangle("far", 100, 120, -40, -30).unwrap();
        assert!(matches!(
            extract(&image, &roi),
            Err(Error::EmptyRegion { .. })
        ));

        let roi = Roi::circle("far", -20.0, -20.0, 3.0).unwrap();
        assert!(matches!(
            extract(&image, &roi),
            Err(Error::EmptyRegion { .. })
        ));
    }

    #[test]
    fn test_masked_pixels_are_skipped() {
        let image = Image::new(1, 4, vec![1.0, f64::NAN, 3.0, f64::NAN]).unwrap();
        let roi = Roi::rectangle("r", 0, 0, 0, 3).unwrap();
        let stats = extract(&image, &roi).unwrap();
        assert_eq!(stats.pixel_count, 2);
        assert_eq!(stats.masked_count, 2);
        assert_eq!(stats.integrated, 4.0);

        let fully_masked = Roi::rectangle("m", 0, 0, 1, 1).unwrap();
        assert!(extract(&image, &fully_masked).is_err());
    }

    #[test]
    fn test_extract_all_keys_by_id() {
        let image = ramp(6, 6);
        let rois = vec![
            Roi::rectangle("b", 0, 1, 0, 1).unwrap(),
            Roi::circle("a", 3.0, 3.0, 1.0).unwrap(),
        ];
        let all = extract_all(&image, &rois).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["b"], extract(&image, &rois[0]).unwrap());
        assert_eq!(all["a"].pixel_count, 5);
    }

    #[test]
    fn test_extract_all_rejects_duplicate_ids() {
        let image = ramp(6, 6);
        let rois = vec![
            Roi::rectangle("roi1", 0, 1, 0, 1).unwrap(),
            Roi::rectangle("roi2", 2, 3, 2, 3).unwrap(),
            Roi::circle("roi1", 3.0, 3.0, 1.0).unwrap(),
        ];
        assert_eq!(
            extract_all(&image, &rois),
            Err(Error::DuplicateRoi("roi1".into()))
        );
    }

    #[test]
    fn test_stat_field_access() {
        let image = Image::new(1, 3, vec![1.0, 9.0, 2.0]).unwrap();
        let roi = Roi::rectangle("r", 0, 0, 0, 2).unwrap();
        let stats = extract(&image, &roi).unwrap();
        assert_eq!(stats.field(StatField::MaxCol), Some(1.0));
        assert_eq!(stats.field(StatField::PixelCount), Some(3.0));
        assert_eq!(stats.field(StatField::BackgroundSubtracted), None);
        assert_eq!(StatField::ALL.len(), 10);
    }
}

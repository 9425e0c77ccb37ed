//! Frame preprocessing: crop, pixel masking, clipping and smoothing.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
//!
//! Steps run in a fixed order: mask (detector coordinates), crop,
//! threshold, smooth. Every step returns a new image; the input is never
//! modified, so preprocessing the same frame twice is bit-identical.

use std::collections::BTreeSet;
use std::ops::Range;
use std::str::FromStr;

use ndarray::{s, Array2};

use crate::error::{Error, Result};
use crate::image::{Image, PixelCoord};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Half-open crop rectangle, `row_min..row_max` by `col_min..col_max`.
///
/// Bounds past the image edge are clamped silently: beamline setups often
/// specify limits that are off by one against the detector size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CropBounds {
    pub row_min: i64,
    pub row_max: i64,
    pub col_min: i64,
    pub col_max: i64,
}

impl CropBounds {
    /// Creates crop bounds.
    #[must_use]
    pub fn new(row_min: i64, row_max: i64, col_min: i64, col_max: i64) -> Self {
        Self {
            row_min,
            row_max,
            col_min,
            col_max,
        }
    }

    /// Keeps every row and the columns `col_min..col_max`.
    #[must_use]
    pub fn columns(col_min: i64, col_max: i64) -> Self {
        Self::new(0, i64::MAX, col_min, col_max)
    }

    /// Rejects bounds whose minimum exceeds their maximum.
    ///
    /// # Errors
    /// Returns [`Error::InvalidBounds`] for inverted bounds.
    pub fn validate(&self) -> Result<()> {
        if self.row_min > self.row_max || self.col_min > self.col_max {
            return Err(Error::InvalidBounds(format!(
                "crop rows {}..{}, cols {}..{} is inverted",
                self.row_min, self.row_max, self.col_min, self.col_max
            )));
        }
        Ok(())
    }

    /// Resolves the bounds against a `rows x cols` image.
    ///
    /// # Errors
    /// Returns [`Error::InvalidBounds`] if a minimum exceeds its maximum or
    /// the clamped rectangle is empty.
    pub fn resolve(&self, rows: usize, cols: usize) -> Result<(Range<usize>, Range<usize>)> {
        self.validate()?;
        let row_range = clamp_range(self.row_min, self.row_max, rows);
        let col_range = clamp_range(self.col_min, self.col_max, cols);
        if row_range.is_empty() || col_range.is_empty() {
            return Err(Error::InvalidBounds(format!(
                "crop rows {}..{}, cols {}..{} is empty on a {rows}x{cols} image",
                self.row_min, self.row_max, self.col_min, self.col_max
            )));
        }
        Ok((row_range, col_range))
    }
}

fn clamp_range(min: i64, max: i64, len: usize) -> Range<usize> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let lo = min.clamp(0, len) as usize;
    let hi = max.clamp(0, len) as usize;
    lo..hi
}

/// Replacement value for masked pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum MaskFill {
    /// Exclude the pixel from all statistics.
    #[default]
    Nan,
    /// Count the pixel as zero intensity.
    Zero,
}

impl MaskFill {
    fn value(self) -> f64 {
        match self {
            MaskFill::Nan => f64::NAN,
            MaskFill::Zero => 0.0,
        }
    }
}

impl FromStr for MaskFill {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "nan" => Ok(MaskFill::Nan),
            "zero" => Ok(MaskFill::Zero),
            other => Err(Error::UnsupportedFilter(format!(
                "mask_fill must be 'nan' or 'zero', got '{other}'"
            ))),
        }
    }
}

/// Recognized filter options.
///
/// The textual form accepted by [`FilterSpec::from_str`] is a `;`-separated
/// list of `key=value` pairs:
///
/// ```text
/// mask=12,40|13,40;mask_fill=zero;threshold=0:1e6;smooth=3
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterSpec {
    /// Detector pixels to mask (hot or dead pixels).
    pub mask: BTreeSet<PixelCoord>,
    pub mask_fill: MaskFill,
    /// Odd box-filter kernel size.
    pub smooth: Option<usize>,
    /// `(min, max)` clip range.
    pub threshold: Option<(f64, f64)>,
}

impl FilterSpec {
    /// Creates an empty filter specification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds pixels to the mask.
    #[must_use]
    pub fn with_mask(mut self, pixels: impl IntoIterator<Item = PixelCoord>) -> Self {
        self.mask.extend(pixels);
        self
    }

    /// Sets the replacement value for masked pixels.
    #[must_use]
    pub fn with_mask_fill(mut self, fill: MaskFill) -> Self {
        self.mask_fill = fill;
        self
    }

    /// Sets the smoothing kernel size.
    #[must_use]
    pub fn with_smooth(mut self, kernel: usize) -> Self {
        self.smooth = Some(kernel);
        self
    }

    /// Sets the clip range.
    #[must_use]
    pub fn with_threshold(mut self, min: f64, max: f64) -> Self {
        self.threshold = Some((min, max));
        self
    }

    /// Checks option values.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedFilter`] for an even or zero kernel, or a
    /// clip range that is `NaN` or inverted.
    pub fn validate(&self) -> Result<()> {
        if let Some(kernel) = self.smooth {
            if kernel == 0 || kernel % 2 == 0 {
                return Err(Error::UnsupportedFilter(format!(
                    "smooth kernel must be odd and positive, got {kernel}"
                )));
            }
        }
        if let Some((min, max)) = self.threshold {
            if min.is_nan() || max.is_nan() || min > max {
                return Err(Error::UnsupportedFilter(format!(
                    "threshold range {min}:{max} is invalid"
                )));
            }
        }
        Ok(())
    }

    /// Applies mask, threshold and smoothing (no crop).
    ///
    /// # Errors
    /// See [`FilterSpec::validate`].
    pub fn apply(&self, image: &Image) -> Result<Image> {
        self.validate()?;
        let masked = self.apply_mask(image.as_array());
        Ok(Image::from_array(self.apply_value_filters(masked)))
    }

    fn apply_mask(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut out = data.clone();
        let fill = self.mask_fill.value();
        for pixel in &self.mask {
            if let Some(value) = out.get_mut((pixel.row, pixel.col)) {
                *value = fill;
            }
        }
        out
    }

    fn apply_value_filters(&self, mut data: Array2<f64>) -> Array2<f64> {
        if let Some((min, max)) = self.threshold {
            data.mapv_inplace(|v| if v.is_nan() { v } else { v.clamp(min, max) });
        }
        match self.smooth {
            Some(kernel) if kernel > 1 => box_smooth(&data, kernel),
            _ => data,
        }
    }
}

impl FromStr for FilterSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut spec = FilterSpec::new();
        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = part.split_once('=') else {
                return Err(Error::UnsupportedFilter(format!(
                    "option '{part}' has no value"
                )));
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "mask" => {
                    for pair in value.split('|').map(str::trim).filter(|p| !p.is_empty()) {
                        spec.mask.insert(parse_pixel(pair)?);
                    }
                }
                "mask_fill" => spec.mask_fill = value.parse()?,
                "smooth" => {
                    spec.smooth = Some(value.parse().map_err(|_| {
                        Error::UnsupportedFilter(format!("smooth kernel '{value}' is not an integer"))
                    })?);
                }
                "threshold" => {
                    let bounds = value.split_once(':').and_then(|(lo, hi)| {
                        Some((lo.trim().parse::<f64>().ok()?, hi.trim().parse::<f64>().ok()?))
                    });
                    let Some(bounds) = bounds else {
                        return Err(Error::UnsupportedFilter(format!(
                            "threshold '{value}' is not 'min:max'"
                        )));
                    };
                    spec.threshold = Some(bounds);
                }
                other => {
                    return Err(Error::UnsupportedFilter(format!(
                        "unrecognized option '{other}'"
                    )));
                }
            }
        }
        spec.validate()?;
        Ok(spec)
    }
}

fn parse_pixel(pair: &str) -> Result<PixelCoord> {
    pair.split_once(',')
        .and_then(|(row, col)| {
            Some(PixelCoord::new(
                row.trim().parse().ok()?,
                col.trim().parse().ok()?,
            ))
        })
        .ok_or_else(|| Error::UnsupportedFilter(format!("mask pixel '{pair}' is not 'row,col'")))
}

/// Box mean over the `kernel x kernel` neighbourhood.
///
/// Only in-bounds unmasked neighbours contribute. Masked pixels stay masked.
fn box_smooth(data: &Array2<f64>, kernel: usize) -> Array2<f64> {
    let half = kernel / 2;
    let (rows, cols) = data.dim();
    Array2::from_shape_fn((rows, cols), |(row, col)| {
        if data[[row, col]].is_nan() {
            return f64::NAN;
        }
        let window = data.slice(s![
            row.saturating_sub(half)..=(row + half).min(rows - 1),
            col.saturating_sub(half)..=(col + half).min(cols - 1)
        ]);
        let (sum, count) = window
            .iter()
            .filter(|v| !v.is_nan())
            .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
        sum / count as f64
    })
}

/// Crops and filters a frame.
///
/// # Errors
/// Returns [`Error::InvalidBounds`] for an inverted or empty crop and
/// [`Error::UnsupportedFilter`] for invalid filter values.
pub fn preprocess(
    image: &Image,
    crop: Option<&CropBounds>,
    filter: Option<&FilterSpec>,
) -> Result<Image> {
    if let Some(filter) = filter {
        filter.validate()?;
    }

    let data = match filter {
        Some(filter) if !filter.mask.is_empty() => filter.apply_mask(image.as_array()),
        _ => image.as_array().clone(),
    };

    let data = match crop {
        Some(crop) => {
            let (rows, cols) = crop.resolve(data.nrows(), data.ncols())?;
            data.slice(s![rows, cols]).to_owned()
        }
        None => data,
    };

    let data = match filter {
        Some(filter) => filter.apply_value_filters(data),
        None => data,
    };

    Ok(Image::from_array(data))
}

//! Crop window discovery from the scan-averaged column profile.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

use crate::error::{Error, Result};
use crate::image::Image;
use crate::preprocess::CropBounds;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Symmetric column window around the brightest column of a scan.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CropWindow {
    /// Column the window is centred on.
    pub center: usize,
    /// First column (inclusive); may be negative near the detector edge.
    pub col_min: i64,
    /// Last column (exclusive).
    pub col_max: i64,
    /// Scan-averaged column profile the centre was picked from.
    pub profile: Vec<f64>,
}

impl CropWindow {
    /// Crop keeping every row and the window's columns.
    #[must_use]
    pub fn crop_bounds(&self) -> CropBounds {
        CropBounds::columns(self.col_min, self.col_max)
    }
}

/// Mean over all images of the per-column sums.
///
/// # Errors
/// Returns [`Error::InvalidBounds`] for an empty image list and
/// [`Error::ShapeMismatch`] if the images differ in shape.
pub fn column_profile(images: &[Image]) -> Result<Vec<f64>> {
    let Some(first) = images.first() else {
        return Err(Error::InvalidBounds(
            "cannot build a column profile from zero images".into(),
        ));
    };
    let shape = first.shape();
    let mut profile = vec![0.0; first.cols()];
    for image in images {
        if image.shape() != shape {
            return Err(Error::ShapeMismatch {
                expected: shape,
                actual: image.shape(),
            });
        }
        for (acc, sum) in profile.iter_mut().zip(image.column_sums()) {
            *acc += sum;
        }
    }
    let n = images.len() as f64;
    profile.iter_mut().for_each(|v| *v /= n);
    Ok(profile)
}

/// Finds a `window`-wide column range around the profile maximum.
///
/// `center` overrides the detected maximum when the brightest column is not
/// the physical centre of the signal. Limits are `center -/+ window / 2`,
/// truncated toward zero.
///
/// # Errors
/// Returns [`Error::InvalidBounds`] for a zero window or an override past
/// the last column, plus the errors of [`column_profile`].
pub fn find_limits(images: &[Image], window: usize, center: Option<usize>) -> Result<CropWindow> {
    if window == 0 {
        return Err(Error::InvalidBounds("crop window must be non-zero".into()));
    }
    let profile = column_profile(images)?;
    let center = match center {
        Some(col) if col >= profile.len() => {
            return Err(Error::InvalidBounds(format!(
                "centre column {col} is outside a {}-column profile",
                profile.len()
            )));
        }
        Some(col) => col,
        None => argmax(&profile),
    };

    let half = window as f64 / 2.0;
    let col_min = (center as f64 - half).trunc() as i64;
    let col_max = (center as f64 + half).trunc() as i64;

    log::debug!("crop window centred on column {center}: {col_min}..{col_max}");

    Ok(CropWindow {
        center,
        col_min,
        col_max,
        profile,
    })
}

/// Index of the first maximum, skipping `NaN`.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (idx, &value) in values.iter().enumerate() {
        if value > best_value {
            best = idx;
            best_value = value;
        }
    }
    best
}

//! Detector image and pixel coordinate types.

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pixel location on the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PixelCoord {
    /// Row index (slow axis).
    pub row: usize,
    /// Column index (fast axis).
    pub col: usize,
}

impl PixelCoord {
    /// Creates a new pixel coordinate.
    #[inline]
    #[must_use]
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// A single detector frame.
///
/// Intensities are stored as `f64` so that integer detector counts are
/// represented exactly and normalized data needs no second type. `NaN`
/// marks a masked pixel; every statistic in this crate skips it.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    data: Array2<f64>,
}

impl Image {
    /// Builds an image from row-major intensities.
    ///
    /// # Errors
    /// Returns [`Error::ImageRead`] if `data` does not fill `rows x cols`
    /// exactly or the frame is empty.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(Error::ImageRead(format!("empty {rows}x{cols} frame")));
        }
        let len = data.len();
        let data = Array2::from_shape_vec((rows, cols), data).map_err(|_| {
            Error::ImageRead(format!("{len} values cannot fill a {rows}x{cols} frame"))
        })?;
        Ok(Self { data })
    }

    /// Builds an image from raw integer detector counts.
    ///
    /// # Errors
    /// Same as [`Image::new`].
    pub fn from_counts(rows: usize, cols: usize, counts: &[u32]) -> Result<Self> {
        Self::new(rows, cols, counts.iter().map(|&c| f64::from(c)).collect())
    }

    /// Wraps an existing array.
    #[must_use]
    pub fn from_array(data: Array2<f64>) -> Self {
        Self { data }
    }

    /// Creates an all-zero image.
    #[must_use]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: Array2::zeros((rows, cols)),
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns.
    #[must_use]
    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// `(rows, cols)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Intensity at `(row, col)`, or `None` when out of bounds.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.data.get((row, col)).copied()
    }

    /// Borrowed view of the pixel data.
    #[must_use]
    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// Underlying array.
    #[must_use]
    pub fn as_array(&self) -> &Array2<f64> {
        &self.data
    }

    /// Consumes the image and returns the underlying array.
    #[must_use]
    pub fn into_array(self) -> Array2<f64> {
        self.data
    }

    /// Sum of all unmasked pixels.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.data.iter().filter(|v| !v.is_nan()).sum()
    }

    /// Checks that the frame holds plausible detector data.
    ///
    /// # Errors
    /// Returns [`Error::ImageRead`] for an empty frame or for the first
    /// infinite or negative pixel found in row-major order.
    pub fn validate(&self) -> Result<()> {
        let (rows, cols) = self.shape();
        if rows == 0 || cols == 0 {
            return Err(Error::ImageRead(format!("empty {rows}x{cols} frame")));
        }
        for ((row, col), &value) in self.data.indexed_iter() {
            if value.is_infinite() || value < 0.0 {
                return Err(Error::ImageRead(format!(
                    "corrupt pixel value {value} at ({row}, {col})"
                )));
            }
        }
        Ok(())
    }

    /// Location of the brightest unmasked pixel.
    ///
    /// Ties go to the lowest row, then the lowest column. Returns `None` if
    /// every pixel is masked.
    #[must_use]
    pub fn peak_location(&self) -> Option<PixelCoord> {
        let mut best: Option<(f64, PixelCoord)> = None;
        for ((row, col), &value) in self.data.indexed_iter() {
            if value.is_nan() {
                continue;
            }
            match best {
                Some((max, _)) if value <= max => {}
                _ => best = Some((value, PixelCoord::new(row, col))),
            }
        }
        best.map(|(_, coord)| coord)
    }

    /// Per-column sums over all rows, skipping masked pixels.
    #[must_use]
    pub fn column_sums(&self) -> Vec<f64> {
        self.data
            .columns()
            .into_iter()
            .map(|column| column.iter().filter(|v| !v.is_nan()).sum())
            .collect()
    }
}

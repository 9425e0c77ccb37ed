//! Region of interest geometry.
//!
//! Coordinates live in pixel-index space: the centre of pixel `(row, col)`
//! sits at `(row as f64, col as f64)`. A pixel belongs to a region when its
//! centre satisfies the shape's inclusion test, boundary included, so that
//! edge pixels are never silently dropped from an integrated intensity.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::missing_errors_doc
)]

use std::borrow::Borrow;
use std::fmt;

use ndarray::Array2;

use crate::error::{Error, Result};
use crate::extraction::Background;
use crate::image::PixelCoord;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tolerance for boundary tests on polygon edges.
const EDGE_EPSILON: f64 = 1e-9;

/// Stable identifier of a ROI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct RoiId(String);

impl RoiId {
    /// Creates a new identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoiId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RoiId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for RoiId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// ROI shape variants.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(tag = "shape", rename_all = "snake_case")
)]
pub enum RoiShape {
    /// Axis-aligned rectangle, inclusive on all four edges.
    Rectangle {
        row_min: i64,
        row_max: i64,
        col_min: i64,
        col_max: i64,
    },
    /// Disc of pixel centres within `radius` of the centre.
    Circle {
        center_row: f64,
        center_col: f64,
        radius: f64,
    },
    /// Simple polygon with `(row, col)` vertices.
    Polygon { vertices: Vec<(f64, f64)> },
}

impl RoiShape {
    /// Rejects degenerate or non-finite geometry.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Rectangle {
                row_min,
                row_max,
                col_min,
                col_max,
            } => {
                if row_max < row_min || col_max < col_min {
                    return Err(Error::InvalidBounds(format!(
                        "rectangle rows {row_min}..={row_max}, cols {col_min}..={col_max} has zero area"
                    )));
                }
            }
            Self::Circle {
                center_row,
                center_col,
                radius,
            } => {
                if !center_row.is_finite() || !center_col.is_finite() {
                    return Err(Error::InvalidBounds("circle centre is not finite".into()));
                }
                if !radius.is_finite() || *radius <= 0.0 {
                    return Err(Error::InvalidBounds(format!(
                        "circle radius must be positive, got {radius}"
                    )));
                }
            }
            Self::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err(Error::InvalidBounds(format!(
                        "polygon needs at least 3 vertices, got {}",
                        vertices.len()
                    )));
                }
                if vertices.iter().any(|(r, c)| !r.is_finite() || !c.is_finite()) {
                    return Err(Error::InvalidBounds("polygon vertex is not finite".into()));
                }
                if polygon_area2(vertices).abs() <= f64::EPSILON {
                    return Err(Error::InvalidBounds("polygon has zero area".into()));
                }
                if polygon_self_intersects(vertices) {
                    return Err(Error::InvalidBounds("polygon edges intersect".into()));
                }
            }
        }
        Ok(())
    }

    /// Continuous bounding box `(row_min, row_max, col_min, col_max)`.
    #[must_use]
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        match self {
            Self::Rectangle {
                row_min,
                row_max,
                col_min,
                col_max,
            } => (
                *row_min as f64,
                *row_max as f64,
                *col_min as f64,
                *col_max as f64,
            ),
            Self::Circle {
                center_row,
                center_col,
                radius,
            } => (
                center_row - radius,
                center_row + radius,
                center_col - radius,
                center_col + radius,
            ),
            Self::Polygon { vertices } => vertices.iter().fold(
                (
                    f64::INFINITY,
                    f64::NEG_INFINITY,
                    f64::INFINITY,
                    f64::NEG_INFINITY,
                ),
                |(r0, r1, c0, c1), &(r, c)| (r0.min(r), r1.max(r), c0.min(c), c1.max(c)),
            ),
        }
    }

    /// Inclusion test for a pixel centre.
    #[must_use]
    pub fn contains(&self, row: f64, col: f64) -> bool {
        match self {
            Self::Rectangle { .. } => {
                let (r0, r1, c0, c1) = self.bounds();
                row >= r0 && row <= r1 && col >= c0 && col <= c1
            }
            Self::Circle {
                center_row,
                center_col,
                radius,
            } => {
                let dr = row - center_row;
                let dc = col - center_col;
                dr * dr + dc * dc <= radius * radius
            }
            Self::Polygon { vertices } => point_in_polygon((row, col), vertices),
        }
    }

    /// Pixels of a `rows x cols` image inside the shape, in row-major order.
    ///
    /// Parts of the shape outside the image are clipped away.
    #[must_use]
    pub fn pixels(&self, rows: usize, cols: usize) -> Vec<PixelCoord> {
        let (r0, r1, c0, c1) = self.bounds();
        let (Some((row_lo, row_hi)), Some((col_lo, col_hi))) =
            (clip_range(r0, r1, rows), clip_range(c0, c1, cols))
        else {
            return Vec::new();
        };

        let mut pixels = Vec::new();
        for row in row_lo..=row_hi {
            for col in col_lo..=col_hi {
                if self.contains(row as f64, col as f64) {
                    pixels.push(PixelCoord::new(row, col));
                }
            }
        }
        pixels
    }

    /// Boolean inclusion mask of the shape over a `rows x cols` image.
    #[must_use]
    pub fn mask(&self, rows: usize, cols: usize) -> Array2<bool> {
        let mut mask = Array2::from_elem((rows, cols), false);
        for pixel in self.pixels(rows, cols) {
            mask[[pixel.row, pixel.col]] = true;
        }
        mask
    }
}

/// Region of interest definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    id: RoiId,
    shape: RoiShape,
    background: Option<Background>,
}

impl Roi {
    /// Creates a validated ROI.
    pub fn new(id: impl Into<RoiId>, shape: RoiShape) -> Result<Self> {
        let id = id.into();
        if id.as_str().trim().is_empty() {
            return Err(Error::InvalidBounds("ROI identifier is empty".into()));
        }
        shape
            .validate()
            .map_err(|err| prefix_bounds_error(err, &format!("ROI '{id}'")))?;
        Ok(Self {
            id,
            shape,
            background: None,
        })
    }

    /// Inclusive rectangle ROI.
    pub fn rectangle(
        id: impl Into<RoiId>,
        row_min: i64,
        row_max: i64,
        col_min: i64,
        col_max: i64,
    ) -> Result<Self> {
        Self::new(
            id,
            RoiShape::Rectangle {
                row_min,
                row_max,
                col_min,
                col_max,
            },
        )
    }

    /// Rectangle of `height x width` around a centre pixel.
    ///
    /// The rectangle spans `center +/- size / 2` (integer division), so odd
    /// sizes are exact and even sizes round up to the next odd size.
    pub fn centered(
        id: impl Into<RoiId>,
        center_row: i64,
        center_col: i64,
        height: u32,
        width: u32,
    ) -> Result<Self> {
        if height == 0 || width == 0 {
            return Err(Error::InvalidBounds(format!(
                "centred ROI needs a non-zero size, got {height}x{width}"
            )));
        }
        let (row_min, row_max) = centered_span(center_row, height)?;
        let (col_min, col_max) = centered_span(center_col, width)?;
        Self::rectangle(id, row_min, row_max, col_min, col_max)
    }

    /// Circular ROI.
    pub fn circle(
        id: impl Into<RoiId>,
        center_row: f64,
        center_col: f64,
        radius: f64,
    ) -> Result<Self> {
        Self::new(
            id,
            RoiShape::Circle {
                center_row,
                center_col,
                radius,
            },
        )
    }

    /// Polygon ROI from `(row, col)` vertices.
    pub fn polygon(id: impl Into<RoiId>, vertices: Vec<(f64, f64)>) -> Result<Self> {
        Self::new(id, RoiShape::Polygon { vertices })
    }

    /// Attaches a background estimate.
    pub fn with_background(mut self, background: Background) -> Result<Self> {
        background
            .validate()
            .map_err(|err| prefix_bounds_error(err, &format!("ROI '{}' background", self.id)))?;
        self.background = Some(background);
        Ok(self)
    }

    /// Identifier.
    #[must_use]
    pub fn id(&self) -> &RoiId {
        &self.id
    }

    /// Shape.
    #[must_use]
    pub fn shape(&self) -> &RoiShape {
        &self.shape
    }

    /// Background policy, if any.
    #[must_use]
    pub fn background(&self) -> Option<&Background> {
        self.background.as_ref()
    }

    /// Pixels of a `rows x cols` image covered by this ROI.
    #[must_use]
    pub fn pixels(&self, rows: usize, cols: usize) -> Vec<PixelCoord> {
        self.shape.pixels(rows, cols)
    }
}

fn prefix_bounds_error(err: Error, context: &str) -> Error {
    match err {
        Error::InvalidBounds(msg) => Error::InvalidBounds(format!("{context}: {msg}")),
        other => other,
    }
}

/// Clamps the continuous interval `[lo, hi]` to pixel indices `0..len`.
fn clip_range(lo: f64, hi: f64, len: usize) -> Option<(usize, usize)> {
    if len == 0 || lo.is_nan() || hi.is_nan() {
        return None;
    }
    let lo = lo.ceil().max(0.0);
    let hi = hi.floor().min((len - 1) as f64);
    if lo > hi {
        return None;
    }
    Some((lo as usize, hi as usize))
}

/// Inclusive `center -/+ size / 2` range, or `InvalidBounds` on overflow.
fn centered_span(center: i64, size: u32) -> Result<(i64, i64)> {
    let half = i64::from(size / 2);
    match (center.checked_sub(half), center.checked_add(half)) {
        (Some(min), Some(max)) => Ok((min, max)),
        _ => Err(Error::InvalidBounds(format!(
            "centred ROI of size {size} around {center} overflows"
        ))),
    }
}

fn point_in_polygon(point: (f64, f64), vertices: &[(f64, f64)]) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }
    let (py, px) = point;
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (yi, xi) = vertices[i];
        let (yj, xj) = vertices[j];
        if point_on_segment(point, vertices[i], vertices[j]) {
            return true;
        }
        if (yi > py) != (yj > py) {
            let x_cross = (xj - xi) * (py - yi) / (yj - yi) + xi;
            if px < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn point_on_segment(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> bool {
    let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
    let scale = (b.0 - a.0).abs().max((b.1 - a.1).abs()).max(1.0);
    cross.abs() <= EDGE_EPSILON * scale && within_box(a, b, p)
}

fn within_box(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> bool {
    p.0 >= a.0.min(b.0) - EDGE_EPSILON
        && p.0 <= a.0.max(b.0) + EDGE_EPSILON
        && p.1 >= a.1.min(b.1) - EDGE_EPSILON
        && p.1 <= a.1.max(b.1) + EDGE_EPSILON
}

fn polygon_area2(vertices: &[(f64, f64)]) -> f64 {
    let n = vertices.len();
    (0..n)
        .map(|i| {
            let (r1, c1) = vertices[i];
            let (r2, c2) = vertices[(i + 1) % n];
            r1 * c2 - r2 * c1
        })
        .sum()
}

fn polygon_self_intersects(vertices: &[(f64, f64)]) -> bool {
    let n = vertices.len();
    if n < 4 {
        return false;
    }
    for i in 0..n {
        for j in (i + 1)..n {
            if edges_adjacent(i, j, n) {
                continue;
            }
            let a = (vertices[i], vertices[(i + 1) % n]);
            let b = (vertices[j], vertices[(j + 1) % n]);
            if segments_intersect(a, b) {
                return true;
            }
        }
    }
    false
}

fn edges_adjacent(i: usize, j: usize, n: usize) -> bool {
    i == j || (i + 1) % n == j || (j + 1) % n == i
}

fn segments_intersect(a: ((f64, f64), (f64, f64)), b: ((f64, f64), (f64, f64))) -> bool {
    let d1 = orientation(a.0, a.1, b.0);
    let d2 = orientation(a.0, a.1, b.1);
    let d3 = orientation(b.0, b.1, a.0);
    let d4 = orientation(b.0, b.1, a.1);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1.abs() <= f64::EPSILON && within_box(a.0, a.1, b.0))
        || (d2.abs() <= f64::EPSILON && within_box(a.0, a.1, b.1))
        || (d3.abs() <= f64::EPSILON && within_box(b.0, b.1, a.0))
        || (d4.abs() <= f64::EPSILON && within_box(b.0, b.1, a.1))
}

fn orientation(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    (c.0 - a.0) * (b.1 - a.1) - (c.1 - a.1) * (b.0 - a.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangle_is_inclusive() {
        let roi = Roi::rectangle("r", 1, 2, 3, 5).unwrap();
        let pixels = roi.pixels(10, 10);
        assert_eq!(pixels.len(), 2 * 3);
        assert_eq!(pixels.first(), Some(&PixelCoord::new(1, 3)));
        assert_eq!(pixels.last(), Some(&PixelCoord::new(2, 5)));
    }

    #[test]
    fn test_rectangle_is_clipped_to_image() {
        let roi = Roi::rectangle("r", -3, 1, 8, 20).unwrap();
        let pixels = roi.pixels(5, 10);
        // rows 0..=1, cols 8..=9
        assert_eq!(pixels.len(), 4);
        assert!(pixels.iter().all(|p| p.row <= 1 && p.col >= 8));
    }

    #[test]
    fn test_rectangle_outside_image_is_empty() {
        let roi = Roi::rectangle("r", 50, 60, 50, 60).unwrap();
        assert!(roi.pixels(10, 10).is_empty());
    }

    #[test]
    fn test_degenerate_shapes_are_rejected() {
        assert!(matches!(
            Roi::rectangle("r", 5, 4, 0, 1),
            Err(Error::InvalidBounds(_))
        ));
        assert!(Roi::circle("c", 1.0, 1.0, 0.0).is_err());
        assert!(Roi::circle("c", f64::NAN, 1.0, 2.0).is_err());
        assert!(Roi::polygon("p", vec![(0.0, 0.0), (1.0, 1.0)]).is_err());
        assert!(Roi::polygon("p", vec![(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]).is_err());
        assert!(Roi::rectangle("  ", 0, 1, 0, 1).is_err());
    }

    #[test]
    fn test_self_intersecting_polygon_is_rejected() {
        let bowtie = vec![(0.0, 0.0), (4.0, 4.0), (0.0, 4.0), (4.0, 0.0)];
        assert!(Roi::polygon("p", bowtie).is_err());
    }

    #[test]
    fn test_centered_matches_odd_window() {
        let roi = Roi::centered("c", 5, 5, 3, 5).unwrap();
        assert_eq!(
            roi.shape(),
            &RoiShape::Rectangle {
                row_min: 4,
                row_max: 6,
                col_min: 3,
                col_max: 7
            }
        );
        assert_eq!(roi.pixels(20, 20).len(), 15);
        assert!(Roi::centered("c", 5, 5, 0, 3).is_err());
    }

    #[test]
    fn test_centered_overflow_is_invalid_bounds() {
        assert!(matches!(
            Roi::centered("c", i64::MAX, 0, 3, 3),
            Err(Error::InvalidBounds(_))
        ));
        assert!(matches!(
            Roi::centered("c", 0, i64::MIN, 3, 3),
            Err(Error::InvalidBounds(_))
        ));
        assert!(Roi::centered("c", i64::MAX - 1, 0, 3, 3).is_ok());
    }

    #[test]
    fn test_circle_includes_boundary() {
        let roi = Roi::circle("c", 5.0, 5.0, 1.0).unwrap();
        let pixels = roi.pixels(10, 10);
        assert_eq!(pixels.len(), 5);
        assert!(pixels.contains(&PixelCoord::new(4, 5)));
        assert!(pixels.contains(&PixelCoord::new(5, 6)));
        assert!(!pixels.contains(&PixelCoord::new(4, 4)));
    }

    #[test]
    fn test_polygon_includes_edges_and_vertices() {
        // Right triangle with legs along row 0 and col 0.
        let roi = Roi::polygon("t", vec![(0.0, 0.0), (0.0, 4.0), (4.0, 0.0)]).unwrap();
        let pixels = roi.pixels(10, 10);
        // Pixels with row + col <= 4: 5 + 4 + 3 + 2 + 1
        assert_eq!(pixels.len(), 15);
        assert!(pixels.contains(&PixelCoord::new(0, 0)));
        assert!(pixels.contains(&PixelCoord::new(2, 2)));
        assert!(!pixels.contains(&PixelCoord::new(3, 2)));
    }

    #[test]
    fn test_pixel_count_matches_independent_recount() {
        let shapes = vec![
            RoiShape::Circle {
                center_row: 3.3,
                center_col: 7.8,
                radius: 4.2,
            },
            RoiShape::Polygon {
                vertices: vec![(1.0, 1.0), (2.5, 9.0), (8.0, 6.5), (7.0, 0.5)],
            },
            RoiShape::Rectangle {
                row_min: -2,
                row_max: 4,
                col_min: 3,
                col_max: 30,
            },
        ];
        for shape in shapes {
            let (rows, cols) = (9, 12);
            let mut expected = 0;
            for row in 0..rows {
                for col in 0..cols {
                    if shape.contains(row as f64, col as f64) {
                        expected += 1;
                    }
                }
            }
            assert_eq!(shape.pixels(rows, cols).len(), expected, "{shape:?}");
            let mask = shape.mask(rows, cols);
            assert_eq!(mask.iter().filter(|&&m| m).count(), expected);
        }
    }

    #[test]
    fn test_roi_id_borrows_as_str() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(RoiId::from("peak"), 1);
        assert_eq!(map.get("peak"), Some(&1));
        assert_eq!(RoiId::new("peak").to_string(), "peak");
    }
}

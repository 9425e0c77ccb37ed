//! Error types for pilroi-core.

use thiserror::Error;

/// Result type alias for pilroi operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for pilroi operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Crop or ROI geometry is inconsistent with the image.
    #[error("invalid bounds: {0}")]
    InvalidBounds(String),

    /// Unrecognized or malformed preprocessing option.
    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// A region resolved to zero usable pixels.
    #[error("region '{region}' contains no pixels inside the image")]
    EmptyRegion { region: String },

    /// Two ROIs share the same identifier.
    #[error("duplicate ROI identifier: {0}")]
    DuplicateRoi(String),

    /// A frame could not be loaded or failed validation.
    #[error("image read failure: {0}")]
    ImageRead(String),

    /// Image dimensions differ from what the operation requires.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// Scan metadata (monitor, foil code, factors) is unusable.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
}

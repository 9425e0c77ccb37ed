//! pilroi-io: File I/O for pilroi.
//!
//! This crate reads headerless detector frames through memory-mapped files,
//! pairs them with the beamline scan log, loads JSON scan manifests and
//! writes scan tables as CSV or JSON.
//!

mod error;
pub mod manifest;
mod reader;
pub mod scan_log;
pub mod source;
mod writer;

pub use error::{Error, Result};
pub use manifest::{RoiDefinition, ScanManifest};
pub use reader::{MappedFileReader, PixelFormat, RawFrameReader, PILATUS_100K_SHAPE};
pub use scan_log::{MetadataColumns, ScanLog};
pub use source::{ordered_frame_paths, FileScan};
pub use writer::{TableWriter, MISSING};

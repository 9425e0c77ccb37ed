//! Scan logs exported by the beamline control software.
//!
//! A scan log is a comma-separated table with one header line and one line
//! per detector frame. Column names are trimmed and lowercased on read, so
//! `" Monitor"` and `"monitor"` address the same column.
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use crate::{Error, Result};
use pilroi_core::FrameMetadata;
use std::path::Path;

/// Which scan-log columns carry the frame metadata.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetadataColumns {
    /// Scan coordinate, e.g. `l` for an L scan.
    pub position: String,
    #[serde(default)]
    pub monitor: Option<String>,
    #[serde(default)]
    pub foils: Option<String>,
}

/// Columns of a scan log.
///
/// Cells are kept as text and parsed when a column is requested, so
/// non-numeric columns such as timestamps only matter if they are used.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanLog {
    names: Vec<String>,
    columns: Vec<Vec<String>>,
}

impl ScanLog {
    /// Reads a scan log from disk.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a table.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&text).map_err(|err| match err {
            Error::InvalidFormat(msg) => {
                Error::InvalidFormat(format!("{}: {msg}", path.as_ref().display()))
            }
            other => other,
        })
    }

    /// Parses scan log text.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] for a missing header or ragged rows.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().filter(|line| !line.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| Error::InvalidFormat("scan log is empty".into()))?;
        let names: Vec<String> = header
            .split(',')
            .map(|name| name.trim().to_lowercase())
            .collect();
        let mut columns = vec![Vec::new(); names.len()];

        for (line_no, line) in lines.enumerate() {
            let cells: Vec<&str> = line.split(',').collect();
            if cells.len() != names.len() {
                return Err(Error::InvalidFormat(format!(
                    "row {} has {} cells, header has {}",
                    line_no + 1,
                    cells.len(),
                    names.len()
                )));
            }
            for (cell, column) in cells.iter().zip(&mut columns) {
                column.push(cell.trim().to_string());
            }
        }

        Ok(Self { names, columns })
    }

    /// Number of data rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    /// Returns true if the log has no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lowercased column names in file order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns true if a column exists, looked up case-insensitively.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        let name = name.trim().to_lowercase();
        self.names.iter().position(|n| *n == name)
    }

    /// Numeric values of a column, looked up case-insensitively.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if the column is missing or holds a
    /// cell that is not a number.
    pub fn column(&self, name: &str) -> Result<Vec<f64>> {
        let idx = self.position(name).ok_or_else(|| {
            Error::InvalidFormat(format!(
                "scan log has no column '{name}' (columns: {})",
                self.names.join(", ")
            ))
        })?;
        self.columns[idx]
            .iter()
            .enumerate()
            .map(|(row, cell)| {
                cell.parse::<f64>().map_err(|_| {
                    Error::InvalidFormat(format!(
                        "row {}, column '{}': '{cell}' is not a number",
                        row + 1,
                        self.names[idx]
                    ))
                })
            })
            .collect()
    }

    /// Per-frame metadata built from the selected columns.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if a selected column is missing or
    /// non-numeric, or a foil code is not a non-negative integer.
    pub fn frame_metadata(&self, columns: &MetadataColumns) -> Result<Vec<FrameMetadata>> {
        let positions = self.column(&columns.position)?;
        let monitors = columns
            .monitor
            .as_deref()
            .map(|name| self.column(name))
            .transpose()?;
        let foils = columns
            .foils
            .as_deref()
            .map(|name| self.column(name))
            .transpose()?;

        positions
            .iter()
            .enumerate()
            .map(|(idx, &position)| -> Result<FrameMetadata> {
                let mut metadata = FrameMetadata::at(position);
                if let Some(monitors) = &monitors {
                    metadata = metadata.with_monitor(monitors[idx]);
                }
                if let Some(foils) = &foils {
                    metadata = metadata.with_foils(foil_code(foils[idx], idx)?);
                }
                Ok(metadata)
            })
            .collect()
    }
}

fn foil_code(value: f64, row: usize) -> Result<u32> {
    if value.fract() != 0.0 || !(0.0..=f64::from(u32::MAX)).contains(&value) {
        return Err(Error::InvalidFormat(format!(
            "row {}: foil code {value} is not a non-negative integer",
            row + 1
        )));
    }
    Ok(value as u32)
}

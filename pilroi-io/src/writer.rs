//! Writers for scan tables.

use crate::Result;
use pilroi_core::{RowStatus, ScanRow, ScanTable, StatField};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Marker written for cells without a value.
pub const MISSING: &str = "NaN";

/// Writer for scan table output.
///
/// Every scan row is written, including failed and pending ones, so the
/// output always has one line per frame.
pub struct TableWriter<W: Write> {
    writer: W,
}

impl TableWriter<BufWriter<File>> {
    /// Creates a writer for a new file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> TableWriter<W> {
    /// Wraps an output stream.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes the table as CSV.
    ///
    /// Columns are `index,position,status,peak_row,peak_col`, then
    /// `<roi>_<field>` for every ROI and statistic, then `error`.
    pub fn write_csv(&mut self, table: &ScanTable) -> Result<()> {
        let mut header = vec![
            "index".to_string(),
            "position".into(),
            "status".into(),
            "peak_row".into(),
            "peak_col".into(),
        ];
        for roi in table.roi_ids() {
            for field in StatField::ALL {
                header.push(quote(&format!("{roi}_{}", field.name())));
            }
        }
        header.push("error".into());
        writeln!(self.writer, "{}", header.join(","))?;

        for row in table.rows() {
            let mut cells = vec![
                row.index.to_string(),
                row.position.to_string(),
                status_name(&row.status).to_string(),
                optional(row.peak.map(|p| p.row)),
                optional(row.peak.map(|p| p.col)),
            ];
            for roi in table.roi_ids() {
                let stats = row.statistics(roi.as_str());
                for field in StatField::ALL {
                    cells.push(optional(stats.and_then(|s| s.field(field))));
                }
            }
            cells.push(quote(&row_error(row)));
            writeln!(self.writer, "{}", cells.join(","))?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Writes the table as pretty-printed JSON.
    pub fn write_json(&mut self, table: &ScanTable) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.writer, table)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn status_name(status: &RowStatus) -> &'static str {
    match status {
        RowStatus::Pending => "pending",
        RowStatus::Completed => "completed",
        RowStatus::Failed { .. } => "failed",
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| MISSING.to_string(), |v| v.to_string())
}

/// Row failure, or the failed ROI cells joined with `; `.
fn row_error(row: &ScanRow) -> String {
    if let RowStatus::Failed { reason } = &row.status {
        return reason.clone();
    }
    row.cells
        .iter()
        .filter_map(|(id, cell)| match cell {
            pilroi_core::RoiCell::Failed { reason } => Some(format!("{id}: {reason}")),
            pilroi_core::RoiCell::Measured(_) => None,
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn quote(text: &str) -> String {
    if text.contains([',', '"', '\n']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilroi_core::{extract_scan, FrameMetadata, Image, InMemoryScan, Roi, ScanConfig};
    use tempfile::NamedTempFile;

    fn table() -> ScanTable {
        let mut scan = InMemoryScan::new();
        scan.push(
            FrameMetadata::at(1.0),
            Image::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
        );
        scan.push_failed(FrameMetadata::at(1.5), "short read, 10 bytes");
        scan.push(
            FrameMetadata::at(2.0),
            Image::new(2, 2, vec![4.0, 3.0, 2.0, 1.0]).unwrap(),
        );
        let config = ScanConfig::new()
            .with_roi(Roi::rectangle("all", 0, 1, 0, 1).unwrap())
            .with_roi(Roi::rectangle("off", 5, 6, 5, 6).unwrap());
        extract_scan(&scan, &config).unwrap()
    }

    #[test]
    fn test_write_csv() {
        let file = NamedTempFile::new().unwrap();
        let mut writer = TableWriter::create(file.path()).unwrap();
        writer.write_csv(&table()).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("index,position,status,peak_row,peak_col,all_integrated,"));
        assert!(lines[0].ends_with(",off_background_subtracted,error"));
        assert!(lines[1].starts_with("0,1,completed,1,1,10,4,0,"));
        assert!(lines[2].starts_with("1,1.5,failed,NaN,NaN,NaN,"));
        assert!(lines[2].ends_with("\"image read failure: short read, 10 bytes\""));
        assert!(lines[3].contains("off: region 'off' contains no pixels"));

        let columns = lines[0].split(',').count();
        assert_eq!(columns, 5 + 2 * StatField::ALL.len() + 1);
    }

    #[test]
    fn test_csv_header_quotes_roi_ids() {
        let mut scan = InMemoryScan::new();
        scan.push(FrameMetadata::at(0.0), Image::new(1, 2, vec![1.0, 2.0]).unwrap());
        let config = ScanConfig::new().with_roi(Roi::rectangle("a,\"b\"", 0, 0, 0, 1).unwrap());
        let table = extract_scan(&scan, &config).unwrap();

        let mut writer = TableWriter::new(Vec::new());
        writer.write_csv(&table).unwrap();
        let content = String::from_utf8(writer.into_inner()).unwrap();
        let header = content.lines().next().unwrap();
        assert!(header.starts_with("index,position,status,peak_row,peak_col,\"a,\"\"b\"\"_integrated\","));
        assert!(header.ends_with(",error"));
    }

    #[test]
    fn test_write_json() {
        let mut writer = TableWriter::new(Vec::new());
        writer.write_json(&table()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&writer.into_inner()).unwrap();
        let rows = json["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1]["status"]["status"], "failed");
        assert_eq!(rows[0]["cells"]["all"]["outcome"], "measured");
        assert_eq!(rows[0]["cells"]["all"]["integrated"], 10.0);
    }
}

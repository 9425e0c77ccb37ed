//! pilroi CLI: ROI statistics for Pilatus detector scans.
//!
//! This binary runs scans described by a JSON manifest and writes the
//! resulting tables.
#![allow(clippy::uninlined_format_args, clippy::cast_precision_loss)]

use clap::{Parser, Subcommand, ValueEnum};

use pilroi_core::{extract_scan, find_limits, FrameSource, ScanTable, StatField};
use pilroi_io::{ScanManifest, TableWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    PilroiIo(#[from] pilroi_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] pilroi_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no frame of the scan could be read")]
    NoFrames,
}

/// Output table format.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Csv,
    Json,
}

/// Region-of-interest analysis for area detector scans.
#[derive(Parser)]
#[command(name = "pilroi")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose logging (debug level unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract ROI statistics for every frame of a scan
    Extract {
        /// Scan manifest (JSON)
        manifest: PathBuf,

        /// Output table path
        #[arg(short, long)]
        output: PathBuf,

        /// Output format (defaults to the output file extension, else CSV)
        #[arg(short, long, value_enum)]
        format: Option<Format>,

        /// Process frames one at a time
        #[arg(long)]
        sequential: bool,
    },

    /// Find a crop window around the brightest column of a scan
    Limits {
        /// Scan manifest (JSON)
        manifest: PathBuf,

        /// Window width in columns
        #[arg(short, long, default_value = "100")]
        window: usize,

        /// Centre column, overriding the detected maximum
        #[arg(long)]
        center: Option<usize>,
    },

    /// Show the frames, scan log and ROIs a manifest resolves to
    Info {
        /// Scan manifest (JSON)
        manifest: PathBuf,
    },

    /// Print the statistics of the frame nearest to a scan position
    Nearest {
        /// Scan manifest (JSON)
        manifest: PathBuf,

        /// Scan position to look up
        position: f64,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn output_format(path: &Path, format: Option<Format>) -> Format {
    format.unwrap_or_else(|| {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .as_deref()
        {
            Some("json") => Format::Json,
            _ => Format::Csv,
        }
    })
}

fn run_scan(manifest: &ScanManifest, sequential: bool) -> Result<ScanTable> {
    let scan = manifest.open_scan()?;
    let mut config = manifest.to_config()?;
    if sequential {
        config.parallel = false;
    }
    Ok(extract_scan(&scan, &config)?)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Extract {
            manifest,
            output,
            format,
            sequential,
        } => {
            let start = Instant::now();
            let manifest = ScanManifest::load(&manifest)?;
            let table = run_scan(&manifest, sequential)?;

            let mut writer = TableWriter::create(&output)?;
            match output_format(&output, format) {
                Format::Csv => writer.write_csv(&table)?,
                Format::Json => writer.write_json(&table)?,
            }

            for (index, reason) in table.failures() {
                log::warn!("row {}: {}", index, reason);
            }
            let (completed, failed, _) = table.counts();
            println!(
                "Processed {} frames in {:.2}s",
                table.len(),
                start.elapsed().as_secs_f64()
            );
            println!("Completed: {}", completed);
            println!("Failed: {}", failed);
            println!("Output: {}", output.display());
        }

        Commands::Limits {
            manifest,
            window,
            center,
        } => {
            let manifest = ScanManifest::load(&manifest)?;
            let scan = manifest.open_scan()?;
            let config = manifest.to_config()?;
            let mut images = Vec::with_capacity(scan.len());
            for (path, frame) in scan.paths().iter().zip(scan.load_normalized(&config)) {
                match frame {
                    Ok(image) => images.push(image),
                    Err(err) => log::warn!("skipping {}: {}", path.display(), err),
                }
            }
            if images.is_empty() {
                return Err(CliError::NoFrames);
            }

            let limits = find_limits(&images, window, center)?;
            println!("Centre column: {}", limits.center);
            println!("Columns: {}..{}", limits.col_min, limits.col_max);
            println!("{}", serde_json::to_string(&limits.crop_bounds())?);
        }

        Commands::Info { manifest } => {
            let manifest = ScanManifest::load(&manifest)?;
            let scan = manifest.open_scan()?;
            let config = manifest.to_config()?;

            println!("Frames: {}", scan.len());
            if let (Some(first), Some(last)) = (scan.paths().first(), scan.paths().last()) {
                println!("  first: {}", first.display());
                println!("  last:  {}", last.display());
            }
            if !scan.is_empty() {
                println!(
                    "Positions: {} .. {}",
                    scan.metadata(0).position,
                    scan.metadata(scan.len() - 1).position
                );
            }
            println!(
                "Detector: {}x{} {:?}",
                manifest.detector.rows, manifest.detector.cols, manifest.detector.format
            );
            println!("ROIs:");
            for roi in &config.rois {
                println!("  {}: {:?}", roi.id(), roi.shape());
            }
            for tracking in &config.tracking {
                println!(
                    "  {}: tracking {}x{} at row {}",
                    tracking.id, tracking.height, tracking.width, tracking.center_row
                );
            }
        }

        Commands::Nearest { manifest, position } => {
            let manifest = ScanManifest::load(&manifest)?;
            let table = run_scan(&manifest, false)?;
            let Some(index) = table.nearest_row(position) else {
                return Err(CliError::NoFrames);
            };
            let Some(row) = table.row(index) else {
                return Err(CliError::NoFrames);
            };

            println!("Row {} at position {}", row.index, row.position);
            if let Some(peak) = row.peak {
                println!("Peak pixel: ({}, {})", peak.row, peak.col);
            }
            for roi in table.roi_ids() {
                println!("{}:", roi);
                match row.statistics(roi.as_str()) {
                    Some(stats) => {
                        for field in StatField::ALL {
                            if let Some(value) = stats.field(field) {
                                println!("  {}: {}", field.name(), value);
                            }
                        }
                    }
                    None => println!("  missing"),
                }
            }
            if let Some(median) = table.median_peak_row() {
                println!("Median peak row over scan: {:.1}", median);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_from_extension() {
        assert!(matches!(
            output_format(Path::new("table.JSON"), None),
            Format::Json
        ));
        assert!(matches!(
            output_format(Path::new("table.csv"), None),
            Format::Csv
        ));
        assert!(matches!(
            output_format(Path::new("table"), None),
            Format::Csv
        ));
        assert!(matches!(
            output_format(Path::new("table.csv"), Some(Format::Json)),
            Format::Json
        ));
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "pilroi", "-v", "extract", "scan.json", "-o", "out.csv", "--sequential",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Extract {
                sequential: true,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["pilroi", "limits", "scan.json", "--window", "x"]).is_err());
    }
}

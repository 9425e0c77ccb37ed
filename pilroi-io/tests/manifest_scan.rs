#![allow(clippy::float_cmp)]
use pilroi_core::{extract_scan, find_limits, RowStatus, StatField};
use pilroi_io::{ScanManifest, TableWriter};
use std::path::Path;
use tempfile::tempdir;

const ROWS: usize = 6;
const COLS: usize = 10;

fn write_frame(path: &Path, peak_col: usize, peak: u32) {
    let mut bytes = Vec::with_capacity(ROWS * COLS * 4);
    for r in 0..ROWS {
        for c in 0..COLS {
            let value: u32 = if r == 3 && c == peak_col { peak } else { 2 };
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    std::fs::write(path, bytes).unwrap();
}

fn setup(dir: &Path) {
    let frames = dir.join("frames");
    std::fs::create_dir(&frames).unwrap();
    let peaks = [200, 600, 0, 800, 200];
    for (i, &peak) in peaks.iter().enumerate() {
        let path = frames.join(format!("scan_12_{:04}.raw", i + 1));
        if i == 2 {
            std::fs::write(&path, [0_u8; 17]).unwrap();
        } else {
            write_frame(&path, 4 + i % 2, peak);
        }
    }
    std::fs::write(
        dir.join("scan.csv"),
        "L, Monitor\n1.00, 2\n1.01, 2\n1.02, 2\n1.03, 4\n1.04, 4\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("manifest.json"),
        format!(
            r#"{{
                "frames": "frames",
                "scan_log": "scan.csv",
                "columns": {{ "position": "l", "monitor": "monitor" }},
                "detector": {{ "rows": {ROWS}, "cols": {COLS} }},
                "crop": {{ "row_min": 1, "row_max": 6, "col_min": 2, "col_max": 8 }},
                "rois": [
                    {{ "id": "peak", "shape": "rectangle", "row_min": 1, "row_max": 3, "col_min": 1, "col_max": 4 }}
                ],
                "tracking": [ {{ "id": "follow", "center_row": 2, "height": 1, "width": 1 }} ]
            }}"#
        ),
    )
    .unwrap();
}

#[test]
fn test_manifest_to_table() {
    let dir = tempdir().unwrap();
    setup(dir.path());

    let manifest = ScanManifest::load(dir.path().join("manifest.json")).unwrap();
    let scan = manifest.open_scan().unwrap();
    let config = manifest.to_config().unwrap();
    let table = extract_scan(&scan, &config).unwrap();

    assert_eq!(table.len(), 5);
    assert_eq!(table.counts(), (4, 1, 0));
    assert!(matches!(
        table.row(2).unwrap().status,
        RowStatus::Failed { .. }
    ));

    // Frame 1 (index 0): peak 200 at detector (3, 4), monitor 2.
    // After cropping, the peak sits at (2, 2) and is normalized to 100.
    let row = table.row(0).unwrap();
    assert_eq!(row.position, 1.0);
    assert_eq!(row.peak.map(|p| (p.row, p.col)), Some((2, 2)));
    assert_eq!(row.statistics("follow").unwrap().integrated, 100.0);
    let peak = table.column("peak", StatField::Max);
    assert_eq!(peak[0], Some(100.0));
    assert_eq!(peak[2], None);
    assert_eq!(peak[3], Some(800.0 / 4.0));

    let out = dir.path().join("table.csv");
    TableWriter::create(&out).unwrap().write_csv(&table).unwrap();
    let content = std::fs::read_to_string(out).unwrap();
    assert_eq!(content.lines().count(), 6);
}

#[test]
fn test_limits_from_loaded_frames() {
    let dir = tempdir().unwrap();
    setup(dir.path());

    let manifest = ScanManifest::load(dir.path().join("manifest.json")).unwrap();
    let scan = manifest.open_scan().unwrap();
    let images: Vec<_> = scan.load_all().into_iter().filter_map(Result::ok).collect();
    assert_eq!(images.len(), 4);

    // Columns 4 and 5 alternate as the peak; 5 carries the larger total.
    let window = find_limits(&images, 4, None).unwrap();
    assert_eq!(window.center, 5);
    assert_eq!((window.col_min, window.col_max), (3, 7));
}

#[test]
fn test_limits_follow_monitor_normalized_frames() {
    let dir = tempdir().unwrap();
    let frames = dir.path().join("frames");
    std::fs::create_dir(&frames).unwrap();
    // Raw counts favour column 2; per monitor count column 7 is brighter.
    write_frame(&frames.join("scan_0001.raw"), 2, 1000);
    write_frame(&frames.join("scan_0002.raw"), 7, 300);
    std::fs::write(dir.path().join("scan.csv"), "L,Monitor\n1.0,10\n1.1,1\n").unwrap();
    std::fs::write(
        dir.path().join("manifest.json"),
        format!(
            r#"{{
                "frames": "frames",
                "scan_log": "scan.csv",
                "columns": {{ "position": "l", "monitor": "monitor" }},
                "detector": {{ "rows": {ROWS}, "cols": {COLS} }},
                "crop": {{ "row_min": 0, "row_max": 6, "col_min": 0, "col_max": 4 }}
            }}"#
        ),
    )
    .unwrap();

    let manifest = ScanManifest::load(dir.path().join("manifest.json")).unwrap();
    let scan = manifest.open_scan().unwrap();
    let config = manifest.to_config().unwrap();

    let raw: Vec<_> = scan.load_all().into_iter().map(Result::unwrap).collect();
    assert_eq!(find_limits(&raw, 4, None).unwrap().center, 2);

    let normalized: Vec<_> = scan
        .load_normalized(&config)
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(normalized[0].shape(), (ROWS, COLS));
    let window = find_limits(&normalized, 4, None).unwrap();
    assert_eq!(window.center, 7);
    assert_eq!((window.col_min, window.col_max), (5, 9));
}

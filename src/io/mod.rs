//! CSV input of 2D rod detections and output of tracked rods.
//!
//! Detection files are named `rods_df_{color}.csv` and carry one tentative
//! rod per row: four endpoint coordinates per camera (columns suffixed with
//! the camera name) plus a `frame` column. Lines starting with `#` are
//! comments; extra columns are ignored. A camera whose four coordinates are
//! all zero or contain a NaN is recorded as a synthetic placeholder.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use nalgebra::Point2;

use crate::correspond::Detection2D;
use crate::track::RodRow;

/// Per-frame detections, one list per camera (equal lengths).
pub type FramePair = (Vec<Detection2D>, Vec<Detection2D>);

/// Conventional detection/output file name for a color.
pub fn color_file_name(color: &str) -> String {
    format!("rods_df_{color}.csv")
}

/// Read a detection file, grouping rows by frame in ascending order.
pub fn read_detections(
    path: impl AsRef<Path>,
    cam1: &str,
    cam2: &str,
) -> Result<BTreeMap<u32, FramePair>> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("failed to open detection file {}", path.display()))?;
    read_detections_from(reader, cam1, cam2)
        .with_context(|| format!("failed to parse detection file {}", path.display()))
}

fn read_detections_from<R: Read>(
    mut reader: csv::Reader<R>,
    cam1: &str,
    cam2: &str,
) -> Result<BTreeMap<u32, FramePair>> {
    let headers = reader.headers()?.clone();
    let col = |name: String| -> Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("missing column {name}"))
    };
    let cols1 = endpoint_columns(cam1, &col)?;
    let cols2 = endpoint_columns(cam2, &col)?;
    let frame_col = col("frame".to_string())?;

    let mut frames: BTreeMap<u32, FramePair> = BTreeMap::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let frame = record
            .get(frame_col)
            .unwrap_or("")
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .with_context(|| format!("row {line}: invalid frame number"))? as u32;

        let coords = |cols: &[usize; 4]| {
            [
                parse_coord(record.get(cols[0])),
                parse_coord(record.get(cols[1])),
                parse_coord(record.get(cols[2])),
                parse_coord(record.get(cols[3])),
            ]
        };
        let entry = frames.entry(frame).or_default();
        entry.0.push(detection_from(coords(&cols1)));
        entry.1.push(detection_from(coords(&cols2)));
    }

    if frames.is_empty() {
        bail!("no detection rows found");
    }
    Ok(frames)
}

fn endpoint_columns(
    cam: &str,
    col: &impl Fn(String) -> Result<usize>,
) -> Result<[usize; 4]> {
    Ok([
        col(format!("x1_{cam}"))?,
        col(format!("y1_{cam}"))?,
        col(format!("x2_{cam}"))?,
        col(format!("y2_{cam}"))?,
    ])
}

fn parse_coord(field: Option<&str>) -> f64 {
    match field {
        Some(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        None => f64::NAN,
    }
}

fn detection_from(v: [f64; 4]) -> Detection2D {
    let synthetic = v.iter().any(|x| !x.is_finite()) || v.iter().all(|x| *x == 0.0);
    if synthetic {
        Detection2D::placeholder()
    } else {
        Detection2D::new(Point2::new(v[0], v[1]), Point2::new(v[2], v[3]))
    }
}

/// Write tracked rows, one per (frame, identity), with camera-named
/// endpoint columns.
pub fn write_rows(
    path: impl AsRef<Path>,
    cam1: &str,
    cam2: &str,
    rows: &[RodRow],
) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create output file {}", path.display()))?;

    writer.write_record([
        "x1".into(),
        "y1".into(),
        "z1".into(),
        "x2".into(),
        "y2".into(),
        "z2".into(),
        "x".into(),
        "y".into(),
        "z".into(),
        "l".into(),
        format!("x1_{cam1}"),
        format!("y1_{cam1}"),
        format!("x2_{cam1}"),
        format!("y2_{cam1}"),
        format!("x1_{cam2}"),
        format!("y1_{cam2}"),
        format!("x2_{cam2}"),
        format!("y2_{cam2}"),
        "frame".into(),
        "particle".into(),
        "color".into(),
        format!("seen_{cam1}"),
        format!("seen_{cam2}"),
    ])?;

    for row in rows {
        let mut record: Vec<String> = Vec::with_capacity(23);
        for v in [
            row.endpoint1.x,
            row.endpoint1.y,
            row.endpoint1.z,
            row.endpoint2.x,
            row.endpoint2.y,
            row.endpoint2.z,
            row.midpoint.x,
            row.midpoint.y,
            row.midpoint.z,
            row.length,
            row.cam1_px[0].x,
            row.cam1_px[0].y,
            row.cam1_px[1].x,
            row.cam1_px[1].y,
            row.cam2_px[0].x,
            row.cam2_px[0].y,
            row.cam2_px[1].x,
            row.cam2_px[1].y,
        ] {
            record.push(v.to_string());
        }
        record.push(row.frame.to_string());
        record.push(row.particle.to_string());
        record.push(row.color.clone());
        record.push(if row.seen[0] { "1" } else { "0" }.to_string());
        record.push(if row.seen[1] { "1" } else { "0" }.to_string());
        writer.write_record(&record)?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush output file {}", path.display()))
}

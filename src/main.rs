use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use tracing::{error, info};

use rodtrack::calib::{StereoRig, WorldTransform};
use rodtrack::io;
use rodtrack::track::TrackRunner;

struct Args {
    calibration: PathBuf,
    input_dir: PathBuf,
    output_dir: PathBuf,
    cam1: String,
    cam2: String,
    transform: Option<PathBuf>,
    colors: Option<Vec<String>>,
    frames: Option<(u32, u32)>,
}

fn usage() -> ! {
    eprintln!(
        "usage: rodtrack <calibration.json> <input_dir> <output_dir> <cam1> <cam2> \
         [--transform <world.json>] [--colors a,b,...] [--frames start..end]"
    );
    std::process::exit(2);
}

fn parse_args() -> Result<Args> {
    let mut positional = Vec::new();
    let mut transform = None;
    let mut colors = None;
    let mut frames = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--transform" => {
                transform = Some(PathBuf::from(iter.next().unwrap_or_else(|| usage())));
            }
            "--colors" => {
                let list = iter.next().unwrap_or_else(|| usage());
                colors = Some(list.split(',').map(|s| s.trim().to_string()).collect());
            }
            "--frames" => {
                let spec = iter.next().unwrap_or_else(|| usage());
                let (start, end) = spec
                    .split_once("..")
                    .with_context(|| format!("invalid frame range {spec}"))?;
                frames = Some((
                    start.parse().with_context(|| format!("invalid frame range {spec}"))?,
                    end.parse().with_context(|| format!("invalid frame range {spec}"))?,
                ));
            }
            "--help" | "-h" => usage(),
            _ => positional.push(arg),
        }
    }
    if positional.len() != 5 {
        usage();
    }
    let mut positional = positional.into_iter();
    Ok(Args {
        calibration: PathBuf::from(positional.next().unwrap()),
        input_dir: PathBuf::from(positional.next().unwrap()),
        output_dir: PathBuf::from(positional.next().unwrap()),
        cam1: positional.next().unwrap(),
        cam2: positional.next().unwrap(),
        transform,
        colors,
        frames,
    })
}

/// Find colors by scanning for `rods_df_{color}.csv` files.
fn discover_colors(input_dir: &Path) -> Result<Vec<String>> {
    let mut colors = Vec::new();
    for entry in std::fs::read_dir(input_dir)
        .with_context(|| format!("failed to read input directory {}", input_dir.display()))?
    {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if let Some(color) = name
            .strip_prefix("rods_df_")
            .and_then(|rest| rest.strip_suffix(".csv"))
        {
            colors.push(color.to_string());
        }
    }
    colors.sort();
    if colors.is_empty() {
        bail!(
            "no rods_df_*.csv files found in {}",
            input_dir.display()
        );
    }
    Ok(colors)
}

fn run_color(args: &Args, rig: &StereoRig, world: &WorldTransform, color: &str) -> Result<usize> {
    let input = args.input_dir.join(io::color_file_name(color));
    let frames = io::read_detections(&input, &args.cam1, &args.cam2)?;

    let mut runner = TrackRunner::new(color, rig.clone(), world.clone());
    let mut rows = Vec::new();
    for (&frame, (cam1, cam2)) in &frames {
        if let Some((start, end)) = args.frames {
            if frame < start || frame >= end {
                continue;
            }
        }
        rows.extend(runner.process_frame(frame, cam1, cam2)?);
    }
    runner.finish();

    let output = args.output_dir.join(io::color_file_name(color));
    io::write_rows(&output, &args.cam1, &args.cam2, &rows)?;
    Ok(rows.len())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let rig = StereoRig::from_json(&args.calibration)?;
    let world = match &args.transform {
        Some(path) => WorldTransform::from_json(path)?,
        None => WorldTransform::default(),
    };
    std::fs::create_dir_all(&args.output_dir).with_context(|| {
        format!("failed to create output directory {}", args.output_dir.display())
    })?;

    let colors = match &args.colors {
        Some(c) => c.clone(),
        None => discover_colors(&args.input_dir)?,
    };
    info!(count = colors.len(), "tracking colors {:?}", colors);

    // colors are independent; a failing color must not abort the others
    let failures: usize = colors
        .par_iter()
        .map(|color| match run_color(&args, &rig, &world, color) {
            Ok(rows) => {
                info!(color = %color, rows, "color finished");
                0
            }
            Err(e) => {
                error!(color = %color, "color failed: {e:#}");
                1
            }
        })
        .sum();

    if failures > 0 {
        bail!("{failures} of {} colors failed", colors.len());
    }
    Ok(())
}

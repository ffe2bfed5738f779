//! Error taxonomy for the matching and tracking pipeline.

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Axis of the temporal assignment tensor that ran out of indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Previous-frame identities.
    Identity,
    /// Detections in the first camera.
    Cam1,
    /// Detections in the second camera.
    Cam2,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Identity => write!(f, "identity"),
            Axis::Cam1 => write!(f, "camera 1"),
            Axis::Cam2 => write!(f, "camera 2"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Calibration data failed shape or value validation.
    #[error("malformed calibration: {reason}")]
    MalformedCalibration { reason: String },

    /// The detection sets cannot cover every tracked identity, even after
    /// pairing leftovers off in index order.
    #[error(
        "unbalanced dataset at frame {frame} (color {color}): \
         {axis} axis needs {needed} more indices, {available} available"
    )]
    UnbalancedDataset {
        frame: u32,
        color: String,
        axis: Axis,
        needed: usize,
        available: usize,
    },

    /// The ILP backend failed to produce a solution.
    #[error("assignment solver failed: {reason}")]
    Solver { reason: String },

    /// Frames submitted after `finish` was called.
    #[error("tracking for color {color} already finished")]
    Finished { color: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

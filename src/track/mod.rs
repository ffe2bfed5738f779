//! Tracked rod state and per-frame output rows.

pub mod runner;

pub use runner::{RunnerState, TrackRunner};

use nalgebra::{Point2, Point3};

use crate::correspond::Detection2D;

/// A rod identity carried across frames: its number and the world-frame
/// endpoints from the last processed frame. Endpoint order is part of the
/// identity; the matcher continues it.
#[derive(Debug, Clone, Copy)]
pub struct TrackedRod {
    pub particle: usize,
    pub endpoints: (Point3<f64>, Point3<f64>),
}

/// One output row: a rod identity observed (or carried) in one frame.
#[derive(Debug, Clone)]
pub struct RodRow {
    pub frame: u32,
    pub particle: usize,
    pub color: String,
    /// World-frame endpoints, in identity order.
    pub endpoint1: Point3<f64>,
    pub endpoint2: Point3<f64>,
    pub midpoint: Point3<f64>,
    pub length: f64,
    /// Raw camera-1 pixels, in the endpoint order matched to the 3D pair.
    pub cam1_px: [Point2<f64>; 2],
    /// Raw camera-2 pixels, same ordering convention.
    pub cam2_px: [Point2<f64>; 2],
    /// Whether each camera's matched detection was real.
    pub seen: [bool; 2],
}

impl RodRow {
    /// Assemble a row from a matched detection pair.
    ///
    /// `choice` is the winning combo index: combo `c` provides the first
    /// 3D endpoint and also fixes which raw 2D endpoint comes first in
    /// each camera (camera 1 reverses for combos 2 and 3, camera 2 for
    /// combos 1 and 3).
    #[allow(clippy::too_many_arguments)]
    pub fn from_match(
        frame: u32,
        color: &str,
        particle: usize,
        endpoint1: Point3<f64>,
        endpoint2: Point3<f64>,
        choice: u8,
        det1: &Detection2D,
        det2: &Detection2D,
    ) -> Self {
        let midpoint = Point3::from((endpoint1.coords + endpoint2.coords) * 0.5);
        Self {
            frame,
            particle,
            color: color.to_string(),
            endpoint1,
            endpoint2,
            midpoint,
            length: (endpoint1 - endpoint2).norm(),
            cam1_px: det1.ordered(choice >= 2),
            cam2_px: det2.ordered(choice % 2 == 1),
            seen: [det1.real, det2.real],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn row_orders_pixels_by_combo() {
        let d1 = Detection2D::new(Point2::new(1.0, 1.0), Point2::new(2.0, 2.0));
        let d2 = Detection2D::new(Point2::new(3.0, 3.0), Point2::new(4.0, 4.0));
        let e1 = Point3::new(0.0, 0.0, 1.0);
        let e2 = Point3::new(0.0, 0.0, 3.0);

        let straight = RodRow::from_match(0, "black", 0, e1, e2, 0, &d1, &d2);
        assert_eq!(straight.cam1_px, [d1.a, d1.b]);
        assert_eq!(straight.cam2_px, [d2.a, d2.b]);

        let crossed = RodRow::from_match(0, "black", 0, e1, e2, 1, &d1, &d2);
        assert_eq!(crossed.cam1_px, [d1.a, d1.b]);
        assert_eq!(crossed.cam2_px, [d2.b, d2.a]);

        let flipped = RodRow::from_match(0, "black", 0, e2, e1, 3, &d1, &d2);
        assert_eq!(flipped.cam1_px, [d1.b, d1.a]);
        assert_eq!(flipped.cam2_px, [d2.b, d2.a]);
    }

    #[test]
    fn row_geometry() {
        let d = Detection2D::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0));
        let row = RodRow::from_match(
            2,
            "blue",
            5,
            Point3::new(0.0, 0.0, 2.0),
            Point3::new(0.0, 0.0, 4.0),
            0,
            &d,
            &d,
        );
        assert_relative_eq!(row.length, 2.0);
        assert_relative_eq!(row.midpoint.z, 3.0);
        assert_eq!(row.particle, 5);
    }
}

//! Candidate correspondences between the two cameras' rod detections.
//!
//! A rod is detected in each camera as an unordered pair of endpoints, so a
//! cross-camera pairing has two consistent interpretations: "straight"
//! (first endpoint with first endpoint) and "crossed" (first with second).
//! Every camera-1/camera-2 detection pair is evaluated under all four
//! endpoint combinations; the matching layers pick among them later.

use nalgebra::{Point2, Point3};
use ndarray::Array2;

use crate::calib::{StereoRig, WorldTransform};
use crate::geometry::{reprojection_error, triangulate_dlt};

/// Costs and weights are clamped to this value instead of going non-finite,
/// so degenerate geometry loses every comparison without poisoning a solve.
pub const COST_SENTINEL: f64 = 1e12;

/// A rod detection in one camera: two endpoints in raw pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection2D {
    pub a: Point2<f64>,
    pub b: Point2<f64>,
    /// False for synthetic placeholder rows padding a fixed-size dataset.
    pub real: bool,
}

impl Detection2D {
    pub fn new(a: Point2<f64>, b: Point2<f64>) -> Self {
        Self { a, b, real: true }
    }

    pub fn placeholder() -> Self {
        Self {
            a: Point2::origin(),
            b: Point2::origin(),
            real: false,
        }
    }

    /// Endpoints in combo order: `(a, b)` kept or reversed.
    pub fn ordered(&self, reversed: bool) -> [Point2<f64>; 2] {
        if reversed {
            [self.b, self.a]
        } else {
            [self.a, self.b]
        }
    }
}

/// One camera-1/camera-2 detection pair under all four endpoint combos.
///
/// Combo order is fixed: 0 = (a1,a2), 1 = (a1,b2), 2 = (b1,a2), 3 = (b1,b2).
/// Combo `c` and combo `3 - c` together describe one full rod, so the
/// straight interpretation is combos {0,3} and the crossed one is {1,2}.
#[derive(Debug, Clone, Copy)]
pub struct CandidatePair {
    /// Triangulated endpoint per combo, in world coordinates.
    pub points: [Point3<f64>; 4],
    /// Reprojection error per combo, per camera (raw pixels).
    pub errors: [[f64; 2]; 4],
}

impl CandidatePair {
    /// Summed reprojection error of the straight interpretation.
    pub fn straight_error(&self) -> f64 {
        self.errors[0][0] + self.errors[0][1] + self.errors[3][0] + self.errors[3][1]
    }

    /// Summed reprojection error of the crossed interpretation.
    pub fn crossed_error(&self) -> f64 {
        self.errors[1][0] + self.errors[1][1] + self.errors[2][0] + self.errors[2][1]
    }

    /// Scalar pair cost and whether the straight interpretation won.
    /// Ties go to straight.
    pub fn cost(&self) -> (f64, bool) {
        let s = self.straight_error();
        let c = self.crossed_error();
        if s <= c {
            (s, true)
        } else {
            (c, false)
        }
    }
}

/// Dense M x N grid of candidate pairs for one frame and color.
#[derive(Debug, Clone)]
pub struct PairGrid {
    pub pairs: Vec<Vec<CandidatePair>>,
    /// Clamped scalar pair costs, M x N.
    pub costs: Array2<f64>,
    /// Winning interpretation per pair.
    pub straight: Array2<bool>,
}

impl PairGrid {
    pub fn cam1_len(&self) -> usize {
        self.costs.nrows()
    }

    pub fn cam2_len(&self) -> usize {
        self.costs.ncols()
    }
}

fn clamp_cost(v: f64) -> f64 {
    if v.is_finite() {
        v.min(COST_SENTINEL)
    } else {
        COST_SENTINEL
    }
}

/// Evaluate every camera-1/camera-2 detection pair of a frame.
///
/// Endpoints are undistorted once per camera, each combo is triangulated by
/// DLT, reprojection errors are measured against the RAW endpoints, and the
/// triangulated points are mapped into world coordinates afterwards.
pub fn build_pair_grid(
    rig: &StereoRig,
    world: &WorldTransform,
    cam1: &[Detection2D],
    cam2: &[Detection2D],
) -> PairGrid {
    let und1: Vec<[Point2<f64>; 2]> = cam1
        .iter()
        .map(|d| [rig.cam1.undistort_pixel(d.a), rig.cam1.undistort_pixel(d.b)])
        .collect();
    let und2: Vec<[Point2<f64>; 2]> = cam2
        .iter()
        .map(|d| [rig.cam2.undistort_pixel(d.a), rig.cam2.undistort_pixel(d.b)])
        .collect();

    let m = cam1.len();
    let n = cam2.len();
    let mut pairs = Vec::with_capacity(m);
    let mut costs = Array2::zeros((m, n));
    let mut straight = Array2::from_elem((m, n), true);

    for i in 0..m {
        let mut row = Vec::with_capacity(n);
        for j in 0..n {
            let raw1 = [cam1[i].a, cam1[i].b];
            let raw2 = [cam2[j].a, cam2[j].b];
            let mut points = [Point3::new(f64::NAN, f64::NAN, f64::NAN); 4];
            let mut errors = [[COST_SENTINEL; 2]; 4];

            for c in 0..4 {
                let (e1, e2) = (c / 2, c % 2);
                if let Some(p) = triangulate_dlt(&rig.p1, &rig.p2, und1[i][e1], und2[j][e2]) {
                    errors[c] = [
                        clamp_cost(reprojection_error(rig.project_cam1(&p), raw1[e1])),
                        clamp_cost(reprojection_error(rig.project_cam2(&p), raw2[e2])),
                    ];
                    points[c] = world.apply(&p);
                }
            }

            let pair = CandidatePair { points, errors };
            let (cost, is_straight) = pair.cost();
            costs[[i, j]] = clamp_cost(cost);
            straight[[i, j]] = is_straight;
            row.push(pair);
        }
        pairs.push(row);
    }

    PairGrid {
        pairs,
        costs,
        straight,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::calib::{CameraIntrinsics, CameraModel, RadialTangentialDistortion};
    use nalgebra::{Matrix3, Vector3};

    pub(crate) fn test_rig() -> StereoRig {
        let cam = CameraModel::new(
            CameraIntrinsics {
                fx: 500.0,
                fy: 500.0,
                cx: 320.0,
                cy: 240.0,
            },
            RadialTangentialDistortion::default(),
        );
        StereoRig::new(cam, cam, Matrix3::identity(), Vector3::new(-1.0, 0.0, 0.0)).unwrap()
    }

    /// Project a 3D rod into both cameras, optionally swapping the
    /// endpoint order seen by camera 2.
    pub(crate) fn observe_rod(
        rig: &StereoRig,
        e1: Point3<f64>,
        e2: Point3<f64>,
        swap_cam2: bool,
    ) -> (Detection2D, Detection2D) {
        let d1 = Detection2D::new(rig.project_cam1(&e1), rig.project_cam1(&e2));
        let d2 = if swap_cam2 {
            Detection2D::new(rig.project_cam2(&e2), rig.project_cam2(&e1))
        } else {
            Detection2D::new(rig.project_cam2(&e1), rig.project_cam2(&e2))
        };
        (d1, d2)
    }

    #[test]
    fn straight_rod_prefers_straight_interpretation() {
        let rig = test_rig();
        let world = WorldTransform::default();
        let (d1, d2) = observe_rod(
            &rig,
            Point3::new(-0.3, 0.0, 5.0),
            Point3::new(0.3, 0.1, 5.0),
            false,
        );
        let grid = build_pair_grid(&rig, &world, &[d1], &[d2]);
        assert!(grid.straight[[0, 0]]);
        assert!(grid.costs[[0, 0]] < 1e-6);
    }

    #[test]
    fn swapped_endpoints_prefer_crossed_interpretation() {
        let rig = test_rig();
        let world = WorldTransform::default();
        let (d1, d2) = observe_rod(
            &rig,
            Point3::new(-0.3, 0.0, 5.0),
            Point3::new(0.3, 0.1, 5.0),
            true,
        );
        let grid = build_pair_grid(&rig, &world, &[d1], &[d2]);
        assert!(!grid.straight[[0, 0]]);
        assert!(grid.costs[[0, 0]] < 1e-6);
    }

    #[test]
    fn grid_is_dense_and_deterministic() {
        let rig = test_rig();
        let world = WorldTransform::default();
        let rods = [
            (Point3::new(-0.3, 0.0, 5.0), Point3::new(0.3, 0.1, 5.0)),
            (Point3::new(0.1, -0.4, 4.0), Point3::new(0.2, 0.4, 4.5)),
            (Point3::new(-0.5, 0.5, 6.0), Point3::new(0.5, -0.5, 6.0)),
        ];
        let mut cam1 = Vec::new();
        let mut cam2 = Vec::new();
        for (e1, e2) in rods {
            let (d1, d2) = observe_rod(&rig, e1, e2, false);
            cam1.push(d1);
            cam2.push(d2);
        }
        let a = build_pair_grid(&rig, &world, &cam1, &cam2);
        let b = build_pair_grid(&rig, &world, &cam1, &cam2);
        assert_eq!(a.costs.dim(), (3, 3));
        assert_eq!(a.costs, b.costs);
        // matching pairs sit on the diagonal
        for i in 0..3 {
            for j in 0..3 {
                if i == j {
                    assert!(a.costs[[i, j]] < 1e-6);
                } else {
                    assert!(a.costs[[i, j]] > a.costs[[i, i]]);
                }
            }
        }
    }

    #[test]
    fn degenerate_detection_is_absorbed() {
        let rig = test_rig();
        let world = WorldTransform::default();
        let (d1, d2) = observe_rod(
            &rig,
            Point3::new(-0.3, 0.0, 5.0),
            Point3::new(0.3, 0.1, 5.0),
            false,
        );
        let bad = Detection2D::new(
            Point2::new(f64::NAN, f64::NAN),
            Point2::new(f64::NAN, f64::NAN),
        );
        let grid = build_pair_grid(&rig, &world, &[d1, bad], &[d2]);
        assert!(grid.costs[[0, 0]] < 1e-6);
        assert_eq!(grid.costs[[1, 0]], COST_SENTINEL);
    }
}

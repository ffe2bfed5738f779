//! Multi-view geometry: DLT triangulation and reprojection.

use nalgebra::{Matrix4, Point2, Point3};

use crate::calib::ProjectionMatrix;

/// Triangulate a 3D point from two undistorted pixel observations using
/// the linear DLT method.
///
/// Builds the standard 4x4 system from both projection matrices and solves
/// it by SVD; the solution is the right singular vector of the smallest
/// singular value. Returns `None` when the homogeneous scale collapses
/// (observation rays near-parallel or invalid input).
pub fn triangulate_dlt(
    p1: &ProjectionMatrix,
    p2: &ProjectionMatrix,
    x1: Point2<f64>,
    x2: Point2<f64>,
) -> Option<Point3<f64>> {
    let mut a = Matrix4::<f64>::zeros();
    for c in 0..4 {
        a[(0, c)] = x1.x * p1[(2, c)] - p1[(0, c)];
        a[(1, c)] = x1.y * p1[(2, c)] - p1[(1, c)];
        a[(2, c)] = x2.x * p2[(2, c)] - p2[(0, c)];
        a[(3, c)] = x2.y * p2[(2, c)] - p2[(1, c)];
    }

    if !a.iter().all(|v| v.is_finite()) {
        return None;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let h = v_t.row(3);

    if h[3].abs() < 1e-10 {
        return None;
    }
    Some(Point3::new(h[0] / h[3], h[1] / h[3], h[2] / h[3]))
}

/// Euclidean pixel distance between a projection and a raw observation.
///
/// Non-finite projections (degenerate triangulations, points behind a
/// camera plane) yield a non-finite error, which the matching layer clamps.
pub fn reprojection_error(projected: Point2<f64>, observed: Point2<f64>) -> f64 {
    (projected - observed).norm()
}

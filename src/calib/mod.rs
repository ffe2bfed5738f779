//! Stereo calibration: camera models, rig geometry, world transform.
//!
//! Calibration files are JSON exports with the keys `CM1`, `CM2` (3x3
//! intrinsic matrices), `dist1`, `dist2` (OpenCV-ordered distortion
//! coefficients) and `R`, `T` (pose of camera 2 relative to camera 1).
//! All validation happens at [`StereoRig`] construction; downstream code
//! can assume a well-formed rig.

use std::path::Path;

use anyhow::Context;
use nalgebra::{Matrix3, Point2, Point3, SMatrix, Vector3};
use serde::Deserialize;

use crate::error::{Error, Result};

/// 3x4 projection matrix mapping homogeneous camera-1-frame points to pixels.
pub type ProjectionMatrix = SMatrix<f64, 3, 4>;

/// Pinhole intrinsics with zero skew.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Extract intrinsics from a 3x3 camera matrix.
    pub fn from_matrix(k: &Matrix3<f64>) -> Result<Self> {
        let intr = Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
        };
        if !k.iter().all(|v| v.is_finite()) {
            return Err(malformed("camera matrix has non-finite entries"));
        }
        if intr.fx.abs() < 1e-12 || intr.fy.abs() < 1e-12 {
            return Err(malformed("camera matrix has zero focal length"));
        }
        Ok(intr)
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    pub fn pixel_to_normalized(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    pub fn normalized_to_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(self.fx * p.x + self.cx, self.fy * p.y + self.cy)
    }
}

/// Brown-Conrady radial-tangential distortion, OpenCV coefficient order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RadialTangentialDistortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl RadialTangentialDistortion {
    /// Build from an OpenCV coefficient vector of length 4, 5, 8, 12 or 14.
    ///
    /// Coefficients beyond `k3` (rational, prism, tilt models) are not
    /// supported and must be zero.
    pub fn from_coeffs(coeffs: &[f64]) -> Result<Self> {
        match coeffs.len() {
            4 | 5 | 8 | 12 | 14 => {}
            n => {
                return Err(malformed(format!(
                    "unsupported distortion coefficient count {n}"
                )))
            }
        }
        if !coeffs.iter().all(|v| v.is_finite()) {
            return Err(malformed("distortion coefficients contain non-finite values"));
        }
        if coeffs.iter().skip(5).any(|v| *v != 0.0) {
            return Err(malformed(
                "distortion coefficients beyond k3 are not supported",
            ));
        }
        Ok(Self {
            k1: coeffs[0],
            k2: coeffs[1],
            p1: coeffs[2],
            p2: coeffs[3],
            k3: coeffs.get(4).copied().unwrap_or(0.0),
        })
    }

    /// Apply the distortion polynomial to normalized coordinates.
    pub fn distort_normalized(&self, p: Point2<f64>) -> Point2<f64> {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Point2::new(x * radial + x_tan, y * radial + y_tan)
    }
}

/// Fixed-point inversion settings for [`CameraModel::undistort_pixel`].
#[derive(Debug, Clone, Copy)]
pub struct UndistortConfig {
    pub max_iters: usize,
    pub eps: f64,
}

impl Default for UndistortConfig {
    fn default() -> Self {
        Self {
            max_iters: 15,
            eps: 1e-12,
        }
    }
}

/// One camera of the rig: intrinsics plus distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    pub intrinsics: CameraIntrinsics,
    pub distortion: RadialTangentialDistortion,
}

impl CameraModel {
    pub fn new(intrinsics: CameraIntrinsics, distortion: RadialTangentialDistortion) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Undistort a raw pixel observation, returning corrected pixel
    /// coordinates.
    ///
    /// Degenerate inputs propagate as non-finite coordinates instead of
    /// failing; the matching layer absorbs them through its cost clamp.
    pub fn undistort_pixel(&self, distorted: Point2<f64>) -> Point2<f64> {
        self.undistort_pixel_with(distorted, UndistortConfig::default())
    }

    pub fn undistort_pixel_with(&self, distorted: Point2<f64>, cfg: UndistortConfig) -> Point2<f64> {
        let xd = self.intrinsics.pixel_to_normalized(distorted);
        let mut x = xd.x;
        let mut y = xd.y;

        for _ in 0..cfg.max_iters.max(1) {
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;
            let d = &self.distortion;
            let radial = 1.0 + d.k1 * r2 + d.k2 * r4 + d.k3 * r6;
            if !radial.is_finite() || radial.abs() < 1e-12 {
                return Point2::new(f64::NAN, f64::NAN);
            }
            let x_tan = 2.0 * d.p1 * x * y + d.p2 * (r2 + 2.0 * x * x);
            let y_tan = d.p1 * (r2 + 2.0 * y * y) + 2.0 * d.p2 * x * y;
            let x_next = (xd.x - x_tan) / radial;
            let y_next = (xd.y - y_tan) / radial;

            let dx = x_next - x;
            let dy = y_next - y;
            x = x_next;
            y = y_next;
            if (dx * dx + dy * dy).sqrt() <= cfg.eps {
                break;
            }
        }

        self.intrinsics.normalized_to_pixel(Point2::new(x, y))
    }

    /// Project a camera-frame point to raw (distorted) pixel coordinates.
    pub fn camera_to_pixel(&self, pc: &Vector3<f64>) -> Point2<f64> {
        if pc.z.abs() < 1e-12 {
            return Point2::new(f64::NAN, f64::NAN);
        }
        let xn = Point2::new(pc.x / pc.z, pc.y / pc.z);
        let xd = self.distortion.distort_normalized(xn);
        self.intrinsics.normalized_to_pixel(xd)
    }
}

/// Calibrated stereo pair: camera 1 at the origin, camera 2 posed by
/// `(R, T)` mapping camera-1 coordinates into camera-2 coordinates.
#[derive(Debug, Clone)]
pub struct StereoRig {
    pub cam1: CameraModel,
    pub cam2: CameraModel,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    /// `K1 * [I | 0]`
    pub p1: ProjectionMatrix,
    /// `K2 * [R | T]`
    pub p2: ProjectionMatrix,
}

impl StereoRig {
    pub fn new(
        cam1: CameraModel,
        cam2: CameraModel,
        rotation: Matrix3<f64>,
        translation: Vector3<f64>,
    ) -> Result<Self> {
        if !rotation.iter().all(|v| v.is_finite()) {
            return Err(malformed("rotation matrix has non-finite entries"));
        }
        if !translation.iter().all(|v| v.is_finite()) {
            return Err(malformed("translation vector has non-finite entries"));
        }
        let p1 = projection_matrix(&cam1.intrinsics.matrix(), &Matrix3::identity(), &Vector3::zeros());
        let p2 = projection_matrix(&cam2.intrinsics.matrix(), &rotation, &translation);
        Ok(Self {
            cam1,
            cam2,
            rotation,
            translation,
            p1,
            p2,
        })
    }

    /// Load a rig from a calibration JSON file.
    pub fn from_json(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read calibration file {}", path.display()))?;
        let doc: CalibrationDoc = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse calibration file {}", path.display()))?;
        Ok(doc.into_rig()?)
    }

    /// Project a camera-1-frame point into camera 1 (raw pixels).
    pub fn project_cam1(&self, point: &Point3<f64>) -> Point2<f64> {
        self.cam1.camera_to_pixel(&point.coords)
    }

    /// Project a camera-1-frame point into camera 2 (raw pixels).
    pub fn project_cam2(&self, point: &Point3<f64>) -> Point2<f64> {
        let pc = self.rotation * point.coords + self.translation;
        self.cam2.camera_to_pixel(&pc)
    }
}

/// Build `K * [R | t]`.
pub fn projection_matrix(
    k: &Matrix3<f64>,
    rotation: &Matrix3<f64>,
    translation: &Vector3<f64>,
) -> ProjectionMatrix {
    let mut rt = ProjectionMatrix::zeros();
    rt.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
    rt.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
    k * rt
}

/// Rigid transform from camera-1 coordinates to world coordinates.
#[derive(Debug, Clone)]
pub struct WorldTransform {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl Default for WorldTransform {
    fn default() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }
}

impl WorldTransform {
    pub fn from_json(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read transform file {}", path.display()))?;
        let doc: TransformDoc = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse transform file {}", path.display()))?;
        let rotation = matrix3_from_rows(&doc.rotation, "rotation")?;
        if doc.translation.len() != 3 {
            return Err(malformed("translation must have 3 components").into());
        }
        Ok(Self {
            rotation,
            translation: Vector3::new(doc.translation[0], doc.translation[1], doc.translation[2]),
        })
    }

    pub fn apply(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * point.coords + self.translation)
    }
}

fn malformed(reason: impl Into<String>) -> Error {
    Error::MalformedCalibration {
        reason: reason.into(),
    }
}

/// Some exports wrap coefficient vectors in an extra nesting level.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CoeffVec {
    Flat(Vec<f64>),
    Nested(Vec<Vec<f64>>),
}

impl CoeffVec {
    fn into_flat(self) -> Vec<f64> {
        match self {
            CoeffVec::Flat(v) => v,
            CoeffVec::Nested(rows) => rows.into_iter().flatten().collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CalibrationDoc {
    #[serde(rename = "CM1")]
    cm1: Vec<Vec<f64>>,
    #[serde(rename = "CM2")]
    cm2: Vec<Vec<f64>>,
    dist1: CoeffVec,
    dist2: CoeffVec,
    #[serde(rename = "R")]
    r: Vec<Vec<f64>>,
    #[serde(rename = "T")]
    t: CoeffVec,
}

impl CalibrationDoc {
    fn into_rig(self) -> Result<StereoRig> {
        let k1 = matrix3_from_rows(&self.cm1, "CM1")?;
        let k2 = matrix3_from_rows(&self.cm2, "CM2")?;
        let rotation = matrix3_from_rows(&self.r, "R")?;
        let t = self.t.into_flat();
        if t.len() != 3 {
            return Err(malformed("T must have 3 components"));
        }
        let cam1 = CameraModel::new(
            CameraIntrinsics::from_matrix(&k1)?,
            RadialTangentialDistortion::from_coeffs(&self.dist1.into_flat())?,
        );
        let cam2 = CameraModel::new(
            CameraIntrinsics::from_matrix(&k2)?,
            RadialTangentialDistortion::from_coeffs(&self.dist2.into_flat())?,
        );
        StereoRig::new(cam1, cam2, rotation, Vector3::new(t[0], t[1], t[2]))
    }
}

#[derive(Debug, Deserialize)]
struct TransformDoc {
    rotation: Vec<Vec<f64>>,
    translation: Vec<f64>,
}

fn matrix3_from_rows(rows: &[Vec<f64>], name: &str) -> Result<Matrix3<f64>> {
    if rows.len() != 3 || rows.iter().any(|r| r.len() != 3) {
        return Err(malformed(format!("{name} must be a 3x3 matrix")));
    }
    Ok(Matrix3::from_fn(|i, j| rows[i][j]))
}

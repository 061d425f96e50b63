//! Extended Unified Camera Model (EUCM) for wide-angle and fisheye lenses.
//!
//! # Mathematical model
//!
//! Projection of p = (x, y, z):
//!
//! ```text
//! d     = √(β(x² + y²) + z²)
//! denom = α·d + (1−α)·z
//! u     = fx · (x/denom) + cx
//! v     = fy · (y/denom) + cy
//! ```
//!
//! with projection parameter α ∈ [0, 1] and distortion parameter β > 0.
//! Unprojection uses the algebraic inverse.
//!
//! # References
//!
//! - Khomutenko et al., "An Enhanced Unified Camera Model"

use super::CameraModel;
use crate::math::{Mat23, Vec2, Vec3};

const PRECISION: f64 = 1e-3;

/// EUCM camera with 6 model parameters and a pixel resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EucmCamera {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub alpha: f64,
    pub beta: f64,
    width: usize,
    height: usize,
}

impl EucmCamera {
    pub const fn new(
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        alpha: f64,
        beta: f64,
        width: usize,
        height: usize,
    ) -> Self {
        EucmCamera {
            fx,
            fy,
            cx,
            cy,
            alpha,
            beta,
            width,
            height,
        }
    }

    /// Geometric condition for a valid projection. For α > 0.5 the model
    /// only covers points with `z ≥ denom·(α−1)/(2α−1)`.
    fn check_projection_condition(&self, z: f64, denom: f64) -> bool {
        if self.alpha > 0.5 {
            let c = (self.alpha - 1.0) / (2.0 * self.alpha - 1.0);
            z >= denom * c
        } else {
            true
        }
    }
}

impl CameraModel for EucmCamera {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn unmap(&self, p: &Vec2) -> Vec3 {
        let mx = (p.x - self.cx) / self.fx;
        let my = (p.y - self.cy) / self.fy;
        let r2 = mx * mx + my * my;
        let beta_r2 = self.beta * r2;
        let gamma = 1.0 - self.alpha;

        // mz from the algebraic inverse of the projection
        let discriminant = (1.0 - (2.0 * self.alpha - 1.0) * beta_r2).max(0.0);
        let mz = (1.0 - beta_r2 * self.alpha * self.alpha)
            / (self.alpha * discriminant.sqrt() + gamma);

        Vec3::new(mx, my, mz).normalize()
    }

    fn map(&self, x: &Vec3) -> Vec2 {
        let r2 = x.x * x.x + x.y * x.y;
        let d = (self.beta * r2 + x.z * x.z).sqrt();
        let denom = self.alpha * d + (1.0 - self.alpha) * x.z;
        Vec2::new(
            self.fx * x.x / denom + self.cx,
            self.fy * x.y / denom + self.cy,
        )
    }

    fn diff_map(&self, x: &Vec3) -> (Vec2, Mat23) {
        let r2 = x.x * x.x + x.y * x.y;
        let d = (self.beta * r2 + x.z * x.z).sqrt();
        let denom = self.alpha * d + (1.0 - self.alpha) * x.z;
        let uv = Vec2::new(
            self.fx * x.x / denom + self.cx,
            self.fy * x.y / denom + self.cy,
        );

        let dd = Vec3::new(self.beta * x.x / d, self.beta * x.y / d, x.z / d);
        let ddenom = Vec3::new(
            self.alpha * dd.x,
            self.alpha * dd.y,
            self.alpha * dd.z + (1.0 - self.alpha),
        );
        let denom2 = denom * denom;

        let jacobian = Mat23::new(
            self.fx * (denom - x.x * ddenom.x) / denom2,
            self.fx * (-x.x * ddenom.y) / denom2,
            self.fx * (-x.x * ddenom.z) / denom2,
            self.fy * (-x.y * ddenom.x) / denom2,
            self.fy * (denom - x.y * ddenom.y) / denom2,
            self.fy * (-x.y * ddenom.z) / denom2,
        );
        (uv, jacobian)
    }

    fn is_mappable(&self, x: &Vec3) -> bool {
        let r2 = x.x * x.x + x.y * x.y;
        let d = (self.beta * r2 + x.z * x.z).sqrt();
        let denom = self.alpha * d + (1.0 - self.alpha) * x.z;
        denom >= PRECISION && self.check_projection_condition(x.z, denom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fisheye() -> EucmCamera {
        EucmCamera::new(280.0, 280.0, 320.0, 240.0, 0.6, 1.1, 640, 480)
    }

    #[test]
    fn test_map_unmap_roundtrip() {
        let cam = fisheye();
        for &(u, v) in &[(320.0, 240.0), (100.0, 100.0), (540.0, 400.0), (320.0, 30.0)] {
            let p = Vec2::new(u, v);
            let ray = cam.unmap(&p);
            assert!((ray.norm() - 1.0).abs() < 1e-12);
            assert!(cam.is_mappable(&ray));
            let back = cam.map(&(ray * 2.5));
            assert!((back - p).norm() < 1e-6, "roundtrip failed for ({u}, {v})");
        }
    }

    #[test]
    fn test_diff_map_matches_numeric() {
        let cam = fisheye();
        let x = Vec3::new(0.6, -0.4, 1.5);
        let (uv, jac) = cam.diff_map(&x);
        assert!((uv - cam.map(&x)).norm() < 1e-12);
        let eps = 1e-7;
        for j in 0..3 {
            let mut dx = Vec3::zeros();
            dx[j] = eps;
            let numeric = (cam.map(&(x + dx)) - cam.map(&(x - dx))) / (2.0 * eps);
            assert!((jac.column(j) - numeric).norm() < 1e-5, "column {j} mismatch");
        }
    }

    #[test]
    fn test_wide_angle_point_is_mappable() {
        let cam = fisheye();
        // a point far to the side that a pinhole would barely see
        let x = Vec3::new(2.0, 0.0, 0.5);
        assert!(cam.is_mappable(&x));
    }
}

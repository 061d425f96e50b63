//! Pinhole camera model.
//!
//! # Mathematical model
//!
//! Projection of p = (x, y, z) with z > 0:
//!
//! ```text
//! u = fx · (x/z) + cx
//! v = fy · (y/z) + cy
//! ```
//!
//! Unprojection of (u, v):
//!
//! ```text
//! mx = (u − cx) / fx
//! my = (v − cy) / fy
//! ray = normalize([mx, my, 1])
//! ```

use super::CameraModel;
use crate::math::{Mat23, Vec2, Vec3};

const MIN_DEPTH: f64 = 1e-6;

/// Pinhole camera with 4 intrinsic parameters and a pixel resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeCamera {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    width: usize,
    height: usize,
}

impl PinholeCamera {
    pub const fn new(fx: f64, fy: f64, cx: f64, cy: f64, width: usize, height: usize) -> Self {
        PinholeCamera {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        }
    }

    /// Intrinsics rescaled for pyramid level `level` (each level halves
    /// the resolution). Used to build the tracker's camera pyramid.
    pub fn at_level(&self, level: usize) -> PinholeCamera {
        let s = 0.5f64.powi(level as i32);
        PinholeCamera {
            fx: self.fx * s,
            fy: self.fy * s,
            cx: self.cx * s,
            cy: self.cy * s,
            width: (self.width >> level).max(1),
            height: (self.height >> level).max(1),
        }
    }
}

impl CameraModel for PinholeCamera {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn unmap(&self, p: &Vec2) -> Vec3 {
        let mx = (p.x - self.cx) / self.fx;
        let my = (p.y - self.cy) / self.fy;
        Vec3::new(mx, my, 1.0).normalize()
    }

    fn map(&self, x: &Vec3) -> Vec2 {
        let inv_z = 1.0 / x.z;
        Vec2::new(
            self.fx * x.x * inv_z + self.cx,
            self.fy * x.y * inv_z + self.cy,
        )
    }

    fn diff_map(&self, x: &Vec3) -> (Vec2, Mat23) {
        let inv_z = 1.0 / x.z;
        let uv = Vec2::new(
            self.fx * x.x * inv_z + self.cx,
            self.fy * x.y * inv_z + self.cy,
        );
        let jacobian = Mat23::new(
            self.fx * inv_z,
            0.0,
            -self.fx * x.x * inv_z * inv_z,
            0.0,
            self.fy * inv_z,
            -self.fy * x.y * inv_z * inv_z,
        );
        (uv, jacobian)
    }

    fn is_mappable(&self, x: &Vec3) -> bool {
        x.z >= MIN_DEPTH
    }
}

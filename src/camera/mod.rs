//! Camera projection models and the rigid multi-camera rig.
//!
//! The backend only relies on the [`CameraModel`] contract: pixel→ray
//! unprojection, ray→pixel projection with an analytic 2×3 Jacobian, and
//! the mappability / on-image queries that gate residual construction.
//!
//! # Available models
//!
//! - [`PinholeCamera`]: standard perspective projection
//! - [`EucmCamera`]: extended unified model for wide-angle / fisheye lenses

use crate::math::{Mat23, SE3, Vec2, Vec3};

pub mod eucm;
pub mod pinhole;

pub use eucm::EucmCamera;
pub use pinhole::PinholeCamera;

/// Projection contract consumed by the reprojector, the residuals and the
/// tracker. Implementations must keep `map`/`unmap` mutually consistent:
/// `map(unmap(u)) == u` for every pixel on the image.
pub trait CameraModel: Send + Sync {
    fn width(&self) -> usize;

    fn height(&self) -> usize;

    /// Pixel to unit-norm bearing ray in the camera frame.
    fn unmap(&self, p: &Vec2) -> Vec3;

    /// 3D point in the camera frame to pixel coordinates. Callers gate on
    /// [`CameraModel::is_mappable`]; for unmappable points the result is
    /// unspecified but must be finite-or-infinite, never panic.
    fn map(&self, x: &Vec3) -> Vec2;

    /// Projection together with its 2×3 Jacobian `∂π/∂X`.
    fn diff_map(&self, x: &Vec3) -> (Vec2, Mat23);

    /// Whether the point lies in the model's valid projection region.
    fn is_mappable(&self, x: &Vec3) -> bool;

    /// Whether the pixel lies on the image with at least `border` pixels
    /// of margin on every side.
    fn is_on_image(&self, p: &Vec2, border: i32) -> bool {
        let b = border as f64;
        p.x >= b
            && p.x < self.width() as f64 - b
            && p.y >= b
            && p.y < self.height() as f64 - b
    }
}

/// One camera of the rig with its mounting transform.
pub struct CameraSlot {
    pub cam: Box<dyn CameraModel>,
    pub this_to_body: SE3,
    pub body_to_this: SE3,
}

/// Ordered, fixed-size rig of calibrated cameras. Size ≥ 1.
pub struct CameraBundle {
    bundle: Vec<CameraSlot>,
}

impl CameraBundle {
    /// Build a rig from per-camera models and camera→body mounting
    /// transforms; the inverse transforms are derived once here.
    pub fn new(cameras: Vec<(Box<dyn CameraModel>, SE3)>) -> Self {
        assert!(!cameras.is_empty(), "camera bundle must hold at least one camera");
        let bundle = cameras
            .into_iter()
            .map(|(cam, this_to_body)| CameraSlot {
                body_to_this: this_to_body.inverse(),
                this_to_body,
                cam,
            })
            .collect();
        CameraBundle { bundle }
    }

    pub fn size(&self) -> usize {
        self.bundle.len()
    }

    pub fn slot(&self, cam_ind: usize) -> &CameraSlot {
        &self.bundle[cam_ind]
    }

    pub fn cam(&self, cam_ind: usize) -> &dyn CameraModel {
        self.bundle[cam_ind].cam.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_derives_inverse_mounting() {
        let mount = SE3::new(
            crate::math::so3_exp(&Vec3::new(0.0, 0.1, 0.0)),
            Vec3::new(0.2, 0.0, 0.0),
        );
        let bundle = CameraBundle::new(vec![(
            Box::new(PinholeCamera::new(100.0, 100.0, 50.0, 50.0, 100, 100)) as Box<dyn CameraModel>,
            mount.clone(),
        )]);
        let roundtrip = &bundle.slot(0).body_to_this * &mount;
        assert!(roundtrip.translation().norm() < 1e-14);
    }

    #[test]
    fn test_is_on_image_respects_border() {
        let cam = PinholeCamera::new(100.0, 100.0, 50.0, 50.0, 100, 80);
        assert!(cam.is_on_image(&Vec2::new(50.0, 40.0), 2));
        assert!(!cam.is_on_image(&Vec2::new(1.0, 40.0), 2));
        assert!(!cam.is_on_image(&Vec2::new(50.0, 79.0), 2));
        assert!(cam.is_on_image(&Vec2::new(0.0, 0.0), 0));
        assert!(!cam.is_on_image(&Vec2::new(100.0, 0.0), 0));
    }
}

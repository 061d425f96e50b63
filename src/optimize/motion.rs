//! Derivatives of the host→target camera motion with respect to the two
//! body poses.
//!
//! The mapped chain is `bodyToCam_t ∘ T_t⁻¹ ∘ T_h ∘ camToBody_h`; poses
//! update as `T ← exp(δω)·T` on rotation with additive translation. For a
//! point with world coordinates W the derivatives of its target-camera
//! position P are
//!
//! ```text
//! ∂P/∂t_h =  R_M            ∂P/∂ω_h = −R_M·[W − t_h]×
//! ∂P/∂t_t = −R_M            ∂P/∂ω_t =  R_M·[W − t_t]×
//! ```
//!
//! where `R_M` is the rotation of `bodyToCam_t ∘ T_t⁻¹`. The `W`-dependent
//! factors are produced per residual; everything else is shared across all
//! residuals of one (host, hostCam, target, targetCam) cell.

use crate::math::{skew, Mat3, SE3, Vec3};

#[derive(Clone)]
pub struct MotionDerivatives {
    host_cam_to_world: SE3,
    world_to_target_cam_rot: Mat3,
    t_host: Vec3,
    t_target: Vec3,
}

impl MotionDerivatives {
    pub fn new(
        cam_to_body_host: &SE3,
        body_to_world_host: &SE3,
        body_to_world_target: &SE3,
        body_to_cam_target: &SE3,
    ) -> Self {
        let world_to_target_cam = body_to_cam_target * &body_to_world_target.inverse();
        MotionDerivatives {
            host_cam_to_world: body_to_world_host * cam_to_body_host,
            world_to_target_cam_rot: world_to_target_cam.rotation_matrix(),
            t_host: *body_to_world_host.translation(),
            t_target: *body_to_world_target.translation(),
        }
    }

    /// World coordinates of a point given in the host camera frame.
    pub fn world_point(&self, host_vec: &Vec3) -> Vec3 {
        self.host_cam_to_world.transform(host_vec)
    }

    pub fn daction_dt_host(&self) -> Mat3 {
        self.world_to_target_cam_rot
    }

    pub fn daction_dw_host(&self, world_point: &Vec3) -> Mat3 {
        -self.world_to_target_cam_rot * skew(&(world_point - self.t_host))
    }

    pub fn daction_dt_target(&self) -> Mat3 {
        -self.world_to_target_cam_rot
    }

    pub fn daction_dw_target(&self, world_point: &Vec3) -> Mat3 {
        self.world_to_target_cam_rot * skew(&(world_point - self.t_target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::so3_exp;

    fn host_to_target(
        cam_to_body_host: &SE3,
        body_to_world_host: &SE3,
        body_to_world_target: &SE3,
        body_to_cam_target: &SE3,
    ) -> SE3 {
        body_to_cam_target
            * &(&body_to_world_target.inverse() * &(body_to_world_host * cam_to_body_host))
    }

    /// Perturbs each body pose along every tangent axis and compares the
    /// finite-difference motion of a mapped point against the analytic
    /// derivative blocks.
    #[test]
    fn test_derivatives_match_finite_differences() {
        let cam_to_body_host = SE3::new(
            so3_exp(&Vec3::new(0.02, -0.01, 0.05)),
            Vec3::new(0.1, 0.0, -0.05),
        );
        let body_to_cam_target = SE3::new(
            so3_exp(&Vec3::new(-0.03, 0.02, 0.0)),
            Vec3::new(-0.07, 0.12, 0.01),
        );
        let t_h = SE3::new(
            so3_exp(&Vec3::new(0.1, 0.2, -0.1)),
            Vec3::new(0.5, -0.2, 0.9),
        );
        let t_t = SE3::new(
            so3_exp(&Vec3::new(-0.2, 0.05, 0.15)),
            Vec3::new(-0.4, 0.3, 0.1),
        );
        let derivs = MotionDerivatives::new(&cam_to_body_host, &t_h, &t_t, &body_to_cam_target);

        let host_vec = Vec3::new(0.3, -0.6, 2.2);
        let world = derivs.world_point(&host_vec);
        let eps = 1e-7;

        let perturb = |pose: &SE3, dt: &Vec3, dw: &Vec3| {
            SE3::new(so3_exp(dw) * pose.rotation(), pose.translation() + dt)
        };

        for axis in 0..3 {
            let mut unit = Vec3::zeros();
            unit[axis] = eps;

            // host translation
            let plus = host_to_target(&cam_to_body_host, &perturb(&t_h, &unit, &Vec3::zeros()), &t_t, &body_to_cam_target);
            let minus = host_to_target(&cam_to_body_host, &perturb(&t_h, &(-unit), &Vec3::zeros()), &t_t, &body_to_cam_target);
            let numeric = (plus.transform(&host_vec) - minus.transform(&host_vec)) / (2.0 * eps);
            let analytic = derivs.daction_dt_host() * (unit / eps);
            assert!((numeric - analytic).norm() < 1e-6, "dt_host axis {axis}");

            // host rotation
            let plus = host_to_target(&cam_to_body_host, &perturb(&t_h, &Vec3::zeros(), &unit), &t_t, &body_to_cam_target);
            let minus = host_to_target(&cam_to_body_host, &perturb(&t_h, &Vec3::zeros(), &(-unit)), &t_t, &body_to_cam_target);
            let numeric = (plus.transform(&host_vec) - minus.transform(&host_vec)) / (2.0 * eps);
            let analytic = derivs.daction_dw_host(&world) * (unit / eps);
            assert!((numeric - analytic).norm() < 1e-5, "dw_host axis {axis}");

            // target translation
            let plus = host_to_target(&cam_to_body_host, &t_h, &perturb(&t_t, &unit, &Vec3::zeros()), &body_to_cam_target);
            let minus = host_to_target(&cam_to_body_host, &t_h, &perturb(&t_t, &(-unit), &Vec3::zeros()), &body_to_cam_target);
            let numeric = (plus.transform(&host_vec) - minus.transform(&host_vec)) / (2.0 * eps);
            let analytic = derivs.daction_dt_target() * (unit / eps);
            assert!((numeric - analytic).norm() < 1e-6, "dt_target axis {axis}");

            // target rotation
            let plus = host_to_target(&cam_to_body_host, &t_h, &perturb(&t_t, &Vec3::zeros(), &unit), &body_to_cam_target);
            let minus = host_to_target(&cam_to_body_host, &t_h, &perturb(&t_t, &Vec3::zeros(), &(-unit)), &body_to_cam_target);
            let numeric = (plus.transform(&host_vec) - minus.transform(&host_vec)) / (2.0 * eps);
            let analytic = derivs.daction_dw_target(&world) * (unit / eps);
            assert!((numeric - analytic).norm() < 1e-5, "dw_target axis {axis}");
        }
    }
}

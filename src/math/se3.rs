//! Rigid transforms in 3D as unit quaternion + translation.
//!
//! The optimizer stores rotations as unit quaternions but takes steps on
//! the 3-dimensional tangent space; the retraction is the left-multiplied
//! exponential `q ← exp(δω)·q`. Tangent vectors of the full transform are
//! ordered `[ρ(3), ω(3)]` to match the frame parameter layout.

use nalgebra::UnitQuaternion;

use crate::math::{skew, Mat3, Vec3, Vec6};

/// Exponential map of SO(3): axis-angle vector to unit quaternion.
pub fn so3_exp(omega: &Vec3) -> UnitQuaternion<f64> {
    UnitQuaternion::from_scaled_axis(*omega)
}

/// Logarithm map of SO(3): unit quaternion to axis-angle vector.
pub fn so3_log(q: &UnitQuaternion<f64>) -> Vec3 {
    q.scaled_axis()
}

/// Rigid transform: rotation (unit quaternion) + translation.
///
/// Composition and inversion are exact; no homogeneous matrices are formed.
#[derive(Clone, Debug, PartialEq)]
pub struct SE3 {
    rot: UnitQuaternion<f64>,
    trans: Vec3,
}

impl SE3 {
    pub fn identity() -> Self {
        SE3 {
            rot: UnitQuaternion::identity(),
            trans: Vec3::zeros(),
        }
    }

    pub fn new(rot: UnitQuaternion<f64>, trans: Vec3) -> Self {
        SE3 { rot, trans }
    }

    pub fn from_translation(trans: Vec3) -> Self {
        SE3 {
            rot: UnitQuaternion::identity(),
            trans,
        }
    }

    pub fn rotation(&self) -> &UnitQuaternion<f64> {
        &self.rot
    }

    pub fn rotation_matrix(&self) -> Mat3 {
        self.rot.to_rotation_matrix().into_inner()
    }

    pub fn translation(&self) -> &Vec3 {
        &self.trans
    }

    pub fn set_translation(&mut self, trans: Vec3) {
        self.trans = trans;
    }

    pub fn set_rotation(&mut self, rot: UnitQuaternion<f64>) {
        self.rot = rot;
    }

    /// Full action on a point: `R·p + t`.
    pub fn transform(&self, p: &Vec3) -> Vec3 {
        self.rot * p + self.trans
    }

    /// Rotation-only action, used for points at infinity.
    pub fn rotate(&self, v: &Vec3) -> Vec3 {
        self.rot * v
    }

    pub fn inverse(&self) -> SE3 {
        let rot_inv = self.rot.inverse();
        SE3 {
            trans: -(rot_inv * self.trans),
            rot: rot_inv,
        }
    }

    /// Exponential map of SE(3), tangent ordered `[ρ, ω]`.
    pub fn exp(xi: &Vec6) -> SE3 {
        let rho = Vec3::new(xi[0], xi[1], xi[2]);
        let omega = Vec3::new(xi[3], xi[4], xi[5]);
        let theta_sq = omega.norm_squared();
        let omega_hat = skew(&omega);
        let v = if theta_sq < 1e-14 {
            // second-order Taylor of V around θ = 0
            Mat3::identity() + 0.5 * omega_hat + omega_hat * omega_hat / 6.0
        } else {
            let theta = theta_sq.sqrt();
            Mat3::identity()
                + omega_hat * ((1.0 - theta.cos()) / theta_sq)
                + (omega_hat * omega_hat) * ((theta - theta.sin()) / (theta_sq * theta))
        };
        SE3 {
            rot: so3_exp(&omega),
            trans: v * rho,
        }
    }

    /// Logarithm map of SE(3), inverse of [`SE3::exp`].
    pub fn log(&self) -> Vec6 {
        let omega = so3_log(&self.rot);
        let theta_sq = omega.norm_squared();
        let omega_hat = skew(&omega);
        let v_inv = if theta_sq < 1e-14 {
            Mat3::identity() - 0.5 * omega_hat + (omega_hat * omega_hat) / 12.0
        } else {
            let theta = theta_sq.sqrt();
            let half = 0.5 * theta;
            let cot_term = (1.0 - half * half.cos() / half.sin()) / theta_sq;
            Mat3::identity() - 0.5 * omega_hat + (omega_hat * omega_hat) * cot_term
        };
        let rho = v_inv * self.trans;
        Vec6::new(rho[0], rho[1], rho[2], omega[0], omega[1], omega[2])
    }
}

impl std::ops::Mul<&SE3> for &SE3 {
    type Output = SE3;

    fn mul(self, rhs: &SE3) -> SE3 {
        SE3 {
            rot: self.rot * rhs.rot,
            trans: self.rot * rhs.trans + self.trans,
        }
    }
}

impl std::ops::Mul<SE3> for SE3 {
    type Output = SE3;

    fn mul(self, rhs: SE3) -> SE3 {
        &self * &rhs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_inverse_is_identity() {
        let t = SE3::new(
            so3_exp(&Vec3::new(0.2, -0.4, 0.9)),
            Vec3::new(1.0, -2.0, 0.5),
        );
        let e = &t * &t.inverse();
        assert!(e.translation().norm() < 1e-14);
        assert!(so3_log(e.rotation()).norm() < 1e-14);
    }

    #[test]
    fn test_exp_log_roundtrip() {
        let xi = Vec6::new(0.1, -0.2, 0.3, 0.05, -0.4, 0.25);
        let back = SE3::exp(&xi).log();
        assert!((back - xi).norm() < 1e-12);
    }

    #[test]
    fn test_exp_log_roundtrip_small_angle() {
        let xi = Vec6::new(1e-9, 2e-9, -1e-9, 1e-10, -2e-10, 3e-10);
        let back = SE3::exp(&xi).log();
        assert!((back - xi).norm() < 1e-15);
    }

    #[test]
    fn test_action_matches_composition() {
        let a = SE3::new(so3_exp(&Vec3::new(0.1, 0.2, 0.3)), Vec3::new(1.0, 0.0, 0.0));
        let b = SE3::new(so3_exp(&Vec3::new(-0.3, 0.1, 0.0)), Vec3::new(0.0, 2.0, 1.0));
        let p = Vec3::new(0.5, -1.5, 2.0);
        let via_compose = (&a * &b).transform(&p);
        let via_action = a.transform(&b.transform(&p));
        assert!((via_compose - via_action).norm() < 1e-13);
    }
}

//! Fixed-size linear algebra aliases and small numeric helpers.
//!
//! All backend block algebra runs on `f64` nalgebra types. The aliases
//! mirror the block shapes of the windowed normal equations: pixel rows
//! are 2-dimensional, pose tangents 6-dimensional ([translation, rotation]),
//! affine-light pairs 2-dimensional.

use nalgebra::{SMatrix, SVector};

pub mod aff_light;
pub mod se3;

pub use aff_light::AffLight;
pub use se3::{SE3, so3_exp, so3_log};

pub type Vec2 = SVector<f64, 2>;
pub type Vec3 = SVector<f64, 3>;
pub type Vec6 = SVector<f64, 6>;
pub type Mat2 = SMatrix<f64, 2, 2>;
pub type Mat23 = SMatrix<f64, 2, 3>;
pub type Mat26 = SMatrix<f64, 2, 6>;
pub type Mat3 = SMatrix<f64, 3, 3>;
pub type Mat6 = SMatrix<f64, 6, 6>;
pub type Mat62 = SMatrix<f64, 6, 2>;
pub type VecX = nalgebra::DVector<f64>;
pub type MatX = nalgebra::DMatrix<f64>;

/// Skew-symmetric (cross product) matrix of a 3-vector: `skew(v) * w == v × w`.
pub fn skew(v: &Vec3) -> Mat3 {
    Mat3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

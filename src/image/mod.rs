//! Grayscale image storage, Gaussian pyramids and sub-pixel sampling.
//!
//! Images are `DMatrix<f64>` in nalgebra's (row, col) = (y, x) indexing;
//! all sub-pixel queries go through the bicubic interpolator, which is the
//! only image access the optimizer performs.

pub mod interpolator;
pub mod pyramid;

pub use interpolator::BiCubicInterpolator;
pub use pyramid::ImagePyramid;

use crate::math::MatX;

/// Build an image from a closure over (x, y) pixel coordinates.
pub fn image_from_fn<F: Fn(f64, f64) -> f64>(width: usize, height: usize, f: F) -> MatX {
    MatX::from_fn(height, width, |row, col| f(col as f64, row as f64))
}

//! Bicubic sub-pixel image sampling with analytic spatial gradients.
//!
//! Uses the Catmull-Rom cubic convolution kernel (Keys, a = −1/2), which
//! interpolates the samples and reproduces polynomials up to degree two
//! exactly. Queries whose 4×4 support stencil leaves the image return the
//! sentinel `f64::INFINITY` and a zero gradient; they never panic. The
//! caller treats ∞ samples as non-contributing.

use crate::math::{MatX, Vec2};

/// Borrowing bicubic sampler over a single image.
#[derive(Clone, Copy)]
pub struct BiCubicInterpolator<'a> {
    image: &'a MatX,
}

/// 1-D Catmull-Rom interpolation of samples p0..p3 located at −1, 0, 1, 2,
/// evaluated at t ∈ [0, 1). Returns (value, d/dt).
fn cubic(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> (f64, f64) {
    let a = 0.5 * (-p0 + 3.0 * p1 - 3.0 * p2 + p3);
    let b = 0.5 * (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3);
    let c = 0.5 * (-p0 + p2);
    let value = ((a * t + b) * t + c) * t + p1;
    let derivative = (3.0 * a * t + 2.0 * b) * t + c;
    (value, derivative)
}

impl<'a> BiCubicInterpolator<'a> {
    pub fn new(image: &'a MatX) -> Self {
        BiCubicInterpolator { image }
    }

    fn stencil_origin(&self, p: &Vec2) -> Option<(usize, usize, f64, f64)> {
        if !p.x.is_finite() || !p.y.is_finite() {
            return None;
        }
        let x0 = p.x.floor();
        let y0 = p.y.floor();
        let (cols, rows) = (self.image.ncols() as isize, self.image.nrows() as isize);
        let xi = x0 as isize;
        let yi = y0 as isize;
        if xi < 1 || yi < 1 || xi + 2 > cols - 1 || yi + 2 > rows - 1 {
            return None;
        }
        Some((xi as usize, yi as usize, p.x - x0, p.y - y0))
    }

    /// Intensity at sub-pixel coordinates (x, y); ∞ off-image.
    pub fn evaluate(&self, p: &Vec2) -> f64 {
        match self.stencil_origin(p) {
            Some((xi, yi, tx, ty)) => {
                let mut rows = [0.0; 4];
                for (k, row) in rows.iter_mut().enumerate() {
                    let r = yi + k - 1;
                    let (v, _) = cubic(
                        self.image[(r, xi - 1)],
                        self.image[(r, xi)],
                        self.image[(r, xi + 1)],
                        self.image[(r, xi + 2)],
                        tx,
                    );
                    *row = v;
                }
                cubic(rows[0], rows[1], rows[2], rows[3], ty).0
            }
            None => f64::INFINITY,
        }
    }

    /// Intensity and spatial gradient (∂I/∂x, ∂I/∂y); (∞, 0) off-image.
    pub fn evaluate_with_gradient(&self, p: &Vec2) -> (f64, Vec2) {
        match self.stencil_origin(p) {
            Some((xi, yi, tx, ty)) => {
                let mut values = [0.0; 4];
                let mut dx = [0.0; 4];
                for k in 0..4 {
                    let r = yi + k - 1;
                    let (v, d) = cubic(
                        self.image[(r, xi - 1)],
                        self.image[(r, xi)],
                        self.image[(r, xi + 1)],
                        self.image[(r, xi + 2)],
                        tx,
                    );
                    values[k] = v;
                    dx[k] = d;
                }
                let (value, dy) = cubic(values[0], values[1], values[2], values[3], ty);
                let (grad_x, _) = cubic(dx[0], dx[1], dx[2], dx[3], ty);
                (value, Vec2::new(grad_x, dy))
            }
            None => (f64::INFINITY, Vec2::zeros()),
        }
    }
}

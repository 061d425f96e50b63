//! Gaussian image pyramid.
//!
//! Level 0 is the input image; each further level is produced by a
//! separable binomial [1 4 6 4 1]/16 blur followed by 2× decimation.
//! Pyramids are immutable after construction; the optimizer consumes only
//! level 0, the tracker all levels.

use crate::image::BiCubicInterpolator;
use crate::math::MatX;

#[derive(Debug, Clone)]
pub struct ImagePyramid {
    levels: Vec<MatX>,
}

impl ImagePyramid {
    /// Build `num_levels` levels from a base image. Levels that would
    /// shrink below 4×4 pixels are not produced.
    pub fn new(base: MatX, num_levels: usize) -> Self {
        let mut levels = Vec::with_capacity(num_levels.max(1));
        levels.push(base);
        while levels.len() < num_levels.max(1) {
            let prev = levels.last().map(downsample);
            match prev {
                Some(next) if next.nrows() >= 4 && next.ncols() >= 4 => levels.push(next),
                _ => break,
            }
        }
        ImagePyramid { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> &MatX {
        &self.levels[level]
    }

    /// Lightweight bicubic sampler over one level.
    pub fn interpolator(&self, level: usize) -> BiCubicInterpolator<'_> {
        BiCubicInterpolator::new(&self.levels[level])
    }
}

/// Binomial blur + 2× decimation, borders clamped.
fn downsample(img: &MatX) -> MatX {
    const KERNEL: [f64; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];
    let (rows, cols) = (img.nrows(), img.ncols());

    // horizontal pass
    let mut blurred_x = MatX::zeros(rows, cols);
    for r in 0..rows {
        for c in 0..cols {
            let mut acc = 0.0;
            for (k, w) in KERNEL.iter().enumerate() {
                let cc = (c as isize + k as isize - 2).clamp(0, cols as isize - 1) as usize;
                acc += w * img[(r, cc)];
            }
            blurred_x[(r, c)] = acc;
        }
    }

    // vertical pass
    let mut blurred = MatX::zeros(rows, cols);
    for r in 0..rows {
        for c in 0..cols {
            let mut acc = 0.0;
            for (k, w) in KERNEL.iter().enumerate() {
                let rr = (r as isize + k as isize - 2).clamp(0, rows as isize - 1) as usize;
                acc += w * blurred_x[(rr, c)];
            }
            blurred[(r, c)] = acc;
        }
    }

    let (half_rows, half_cols) = (rows / 2, cols / 2);
    MatX::from_fn(half_rows, half_cols, |r, c| blurred[(2 * r, 2 * c)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::image_from_fn;

    #[test]
    fn test_pyramid_level_sizes() {
        let base = image_from_fn(64, 48, |x, y| x + y);
        let pyr = ImagePyramid::new(base, 4);
        assert_eq!(pyr.num_levels(), 4);
        assert_eq!(pyr.level(0).ncols(), 64);
        assert_eq!(pyr.level(1).ncols(), 32);
        assert_eq!(pyr.level(3).nrows(), 6);
    }

    #[test]
    fn test_pyramid_stops_at_minimum_size() {
        let base = image_from_fn(16, 16, |x, _| x);
        let pyr = ImagePyramid::new(base, 8);
        assert!(pyr.num_levels() < 8);
        assert!(pyr.level(pyr.num_levels() - 1).ncols() >= 4);
    }

    #[test]
    fn test_downsample_preserves_constant_image() {
        let base = image_from_fn(32, 32, |_, _| 77.0);
        let pyr = ImagePyramid::new(base, 3);
        for level in 0..pyr.num_levels() {
            let img = pyr.level(level);
            for r in 0..img.nrows() {
                for c in 0..img.ncols() {
                    assert!((img[(r, c)] - 77.0).abs() < 1e-12);
                }
            }
        }
    }
}

//! Robust loss functions for outlier rejection in the photometric energy.
//!
//! With a robust loss ρ(s), the cost of a residual vector becomes
//! `Σ ρ(‖r_i‖²)` instead of `Σ ‖r_i‖²`. Each arm evaluates the triple
//! `[ρ(s), ρ'(s), ρ''(s)]` at the squared residual `s = r²`; the weight
//! path of the residual consumes ρ' and ρ'' to form loss-corrected
//! Gauss-Newton weights.
//!
//! # Available arms
//!
//! - [`LossFunction::Trivial`]: plain least squares, ρ(s) = s
//! - [`LossFunction::Huber`]: quadratic for inliers, linear for outliers
//! - [`LossFunction::Scaled`]: any inner loss scaled by a fixed weight,
//!   used by the tracker for host-gradient pre-weighting

use crate::settings::LossType;

/// Tagged robust loss. The optimizer needs ρ, ρ' and ρ'' as plain
/// functions of the squared residual, so the variant is matched once per
/// evaluation rather than dispatched through a trait object.
#[derive(Debug, Clone)]
pub enum LossFunction {
    /// Standard least squares: ρ(s) = s.
    Trivial,
    /// Huber loss with threshold δ:
    ///
    /// ```text
    /// ρ(s)   = s                    if s ≤ δ²
    ///        = 2δ√s − δ²            if s > δ²
    /// ρ'(s)  = 1          or δ/√s
    /// ρ''(s) = 0          or −δ/(2s√s)
    /// ```
    Huber { delta: f64 },
    /// Inner loss scaled by a constant weight: ρ(s) = w·ρ_inner(s).
    Scaled {
        inner: Box<LossFunction>,
        weight: f64,
    },
}

impl LossFunction {
    /// Build the loss selected by the settings enum.
    pub fn from_settings(loss_type: LossType, outlier_diff: f64) -> LossFunction {
        match loss_type {
            LossType::Trivial => LossFunction::Trivial,
            LossType::Huber => LossFunction::Huber {
                delta: outlier_diff,
            },
        }
    }

    /// Evaluate `[ρ(s), ρ'(s), ρ''(s)]` at squared residual `s = r²`.
    pub fn evaluate(&self, s: f64) -> [f64; 3] {
        match self {
            LossFunction::Trivial => [s, 1.0, 0.0],
            LossFunction::Huber { delta } => {
                let delta2 = delta * delta;
                if s > delta2 {
                    let r = s.sqrt();
                    let rho1 = (delta / r).max(f64::MIN_POSITIVE);
                    [2.0 * delta * r - delta2, rho1, -rho1 / (2.0 * s)]
                } else {
                    [s, 1.0, 0.0]
                }
            }
            LossFunction::Scaled { inner, weight } => {
                let [rho, rho1, rho2] = inner.evaluate(s);
                [weight * rho, weight * rho1, weight * rho2]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trivial_is_plain_least_squares() {
        let [rho, rho1, rho2] = LossFunction::Trivial.evaluate(7.3);
        assert_eq!(rho, 7.3);
        assert_eq!(rho1, 1.0);
        assert_eq!(rho2, 0.0);
    }

    #[test]
    fn test_huber_inlier_region() {
        let huber = LossFunction::Huber { delta: 1.345 };
        let [rho, rho1, rho2] = huber.evaluate(0.5);
        assert_eq!(rho, 0.5);
        assert_eq!(rho1, 1.0);
        assert_eq!(rho2, 0.0);
    }

    #[test]
    fn test_huber_outlier_region() {
        let delta = 1.345;
        let huber = LossFunction::Huber { delta };
        let s = 10.0;
        let [rho, rho1, rho2] = huber.evaluate(s);
        let r = s.sqrt();
        assert!((rho - (2.0 * delta * r - delta * delta)).abs() < 1e-12);
        assert!((rho1 - delta / r).abs() < 1e-12);
        assert!(rho2 < 0.0);
    }

    #[test]
    fn test_huber_is_continuous_at_threshold() {
        let delta = 2.0;
        let huber = LossFunction::Huber { delta };
        let below = huber.evaluate(delta * delta - 1e-9);
        let above = huber.evaluate(delta * delta + 1e-9);
        assert!((below[0] - above[0]).abs() < 1e-7);
        assert!((below[1] - above[1]).abs() < 1e-7);
    }

    #[test]
    fn test_scaled_loss() {
        let scaled = LossFunction::Scaled {
            inner: Box::new(LossFunction::Trivial),
            weight: 0.25,
        };
        let [rho, rho1, _] = scaled.evaluate(4.0);
        assert_eq!(rho, 1.0);
        assert_eq!(rho1, 0.25);
    }
}

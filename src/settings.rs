//! Runtime configuration for the tracker and the photometric backend.
//!
//! Every tunable the core recognizes lives here, grouped the way the
//! subsystems consume them. Defaults follow the usual direct-sparse
//! choices (8-sample residual pattern, Huber intensity loss, Nielsen
//! damping schedule).

use crate::math::Vec2;

/// Upper bound on the residual pattern size; patterns are validated
/// against it so per-residual buffers stay small and predictable.
pub const MAX_PATTERN_SIZE: usize = 16;

/// Which robust loss the windowed optimizer applies to intensity residuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LossType {
    /// Plain least squares.
    Trivial,
    /// Huber loss with threshold `intensity.outlier_diff`.
    #[default]
    Huber,
}

/// Fixed set of pixel offsets sampled around every point.
#[derive(Debug, Clone)]
pub struct PatternSettings {
    /// Offsets in host-frame pixels. The default is the 8-sample
    /// spread-out pattern of direct sparse odometry.
    pub pattern: Vec<Vec2>,
    /// Border (in pixels) a central reprojection must keep from the image
    /// edge so the whole pattern stays sampleable.
    pub height: i32,
}

impl Default for PatternSettings {
    fn default() -> Self {
        PatternSettings {
            pattern: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(0.0, 2.0),
                Vec2::new(-1.0, 1.0),
                Vec2::new(-2.0, 0.0),
                Vec2::new(2.0, 0.0),
                Vec2::new(-1.0, -1.0),
                Vec2::new(0.0, -2.0),
                Vec2::new(1.0, -1.0),
            ],
            height: 2,
        }
    }
}

/// Host-gradient pre-weighting of residual samples.
#[derive(Debug, Clone, Copy)]
pub struct WeightingSettings {
    /// Constant `c` in the gradient weight `c / √(c² + ‖∇I‖²)`.
    pub c: f64,
    /// Floor factor applied when the loss-corrected weight would go
    /// negative: the effective weight becomes `loss_eps · ρ'`.
    pub loss_eps: f64,
}

impl Default for WeightingSettings {
    fn default() -> Self {
        WeightingSettings {
            c: 50.0,
            loss_eps: 0.01,
        }
    }
}

/// Intensity-difference thresholds.
#[derive(Debug, Clone, Copy)]
pub struct IntensitySettings {
    /// Huber threshold on the photometric residual.
    pub outlier_diff: f64,
}

impl Default for IntensitySettings {
    fn default() -> Self {
        IntensitySettings { outlier_diff: 12.0 }
    }
}

/// Admissible depth range for optimized points.
#[derive(Debug, Clone, Copy)]
pub struct DepthSettings {
    pub min: f64,
    pub max: f64,
}

impl DepthSettings {
    pub fn min_log(&self) -> f64 {
        self.min.ln()
    }

    pub fn max_log(&self) -> f64 {
        self.max.ln()
    }
}

impl Default for DepthSettings {
    fn default() -> Self {
        DepthSettings {
            min: 1e-3,
            max: 1e4,
        }
    }
}

/// Bounds and on/off switch for affine light optimization.
#[derive(Debug, Clone, Copy)]
pub struct AffineLightSettings {
    pub min_a: f64,
    pub max_a: f64,
    pub min_b: f64,
    pub max_b: f64,
    /// When false, all affine deltas are zeroed and the light transforms
    /// stay at their keyframe-construction values.
    pub optimize_affine_light: bool,
}

impl AffineLightSettings {
    pub fn clamp_a(&self, a: f64) -> f64 {
        a.clamp(self.min_a, self.max_a)
    }

    pub fn clamp_b(&self, b: f64) -> f64 {
        b.clamp(self.min_b, self.max_b)
    }
}

impl Default for AffineLightSettings {
    fn default() -> Self {
        AffineLightSettings {
            min_a: -1.2,
            max_a: 1.2,
            min_b: -60.0,
            max_b: 60.0,
            optimize_affine_light: true,
        }
    }
}

/// Damping schedule of the Levenberg-Marquardt step controller.
#[derive(Debug, Clone, Copy)]
pub struct StepControlSettings {
    pub initial_lambda: f64,
    pub initial_fail_multiplier: f64,
    /// A step is accepted when `ΔE_actual / ΔE_pred` exceeds this.
    pub accepted_quality: f64,
    /// Lower bound of the Nielsen decrease factor `1 − (2q − 1)³`.
    pub min_lambda_multiplier: f64,
    /// Growth of the fail multiplier over consecutive rejections.
    pub fail_multiplier_multiplier: f64,
}

impl Default for StepControlSettings {
    fn default() -> Self {
        StepControlSettings {
            initial_lambda: 1e-4,
            initial_fail_multiplier: 2.0,
            accepted_quality: 0.0,
            min_lambda_multiplier: 1.0 / 3.0,
            fail_multiplier_multiplier: 2.0,
        }
    }
}

/// Residual construction and weighting settings consumed by the backend.
#[derive(Debug, Clone, Default)]
pub struct ResidualSettings {
    pub pattern: PatternSettings,
    pub weighting: WeightingSettings,
    pub intensity: IntensitySettings,
    pub depth: DepthSettings,
}

impl ResidualSettings {
    pub fn pattern_size(&self) -> usize {
        self.pattern.pattern.len()
    }
}

/// Optimizer-level settings.
#[derive(Debug, Clone, Copy)]
pub struct OptimizationSettings {
    pub loss_type: LossType,
    pub step_control: StepControlSettings,
    /// Per-point log-depth updates larger than this are zeroed before the
    /// update is applied (guards nearly-degenerate points).
    pub max_abs_delta_d: f64,
    /// Bootstrap gauge: constrain keyframe 1's translation to the sphere
    /// around keyframe 0 (2-dof local parametrization) while the window
    /// holds only the initial pair.
    pub constrain_second_kf: bool,
    pub fixed_rotation_on_second_kf: bool,
    /// Below this first-to-second baseline the constrained translation is
    /// frozen instead of moved on the sphere.
    pub min_first_to_second_radius: f64,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        OptimizationSettings {
            loss_type: LossType::default(),
            step_control: StepControlSettings::default(),
            max_abs_delta_d: 0.1,
            constrain_second_kf: false,
            fixed_rotation_on_second_kf: false,
            min_first_to_second_radius: 0.05,
        }
    }
}

/// Everything the windowed energy function needs.
#[derive(Debug, Clone, Default)]
pub struct EnergySettings {
    pub residual: ResidualSettings,
    pub optimization: OptimizationSettings,
    pub affine_light: AffineLightSettings,
}

impl EnergySettings {
    /// Validate invariants a malformed configuration would violate.
    pub fn validate(&self) -> Result<(), String> {
        if self.residual.pattern.pattern.is_empty() {
            return Err("residual pattern must not be empty".to_string());
        }
        if self.residual.pattern.pattern.len() > MAX_PATTERN_SIZE {
            return Err(format!(
                "residual pattern size {} exceeds maximum {}",
                self.residual.pattern.pattern.len(),
                MAX_PATTERN_SIZE
            ));
        }
        if self.residual.depth.min <= 0.0 || self.residual.depth.max <= self.residual.depth.min {
            return Err("depth bounds must satisfy 0 < min < max".to_string());
        }
        Ok(())
    }
}

/// Coarse-to-fine frame tracker settings.
#[derive(Debug, Clone, Copy)]
pub struct TrackingSettings {
    /// Huber threshold on per-pixel tracking residuals.
    pub outlier_intensity_diff: f64,
    /// Pre-weight each pixel by its base-frame gradient magnitude.
    pub use_grad_weights: bool,
    pub optimize_affine_light: bool,
    /// Damping iterations per pyramid level.
    pub max_iterations: usize,
    pub initial_lambda: f64,
    /// Finest level the tracker descends to (0 = full resolution).
    pub finest_level: usize,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        TrackingSettings {
            outlier_intensity_diff: 12.0,
            use_grad_weights: false,
            optimize_affine_light: true,
            max_iterations: 30,
            initial_lambda: 1e-3,
            finest_level: 0,
        }
    }
}

/// Image pyramid depth used for keyframes and tracked frames.
#[derive(Debug, Clone, Copy)]
pub struct PyramidSettings {
    pub levels: usize,
}

impl Default for PyramidSettings {
    fn default() -> Self {
        PyramidSettings { levels: 5 }
    }
}

/// Top-level settings aggregate.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub energy: EnergySettings,
    pub tracking: TrackingSettings,
    pub pyramid: PyramidSettings,
}

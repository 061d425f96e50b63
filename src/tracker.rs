//! Coarse-to-fine photometric tracking of a new frame against the most
//! recent keyframe.
//!
//! This is a single-frame cost with no coupling between keyframes: every
//! base pixel with positive depth contributes one scalar residual
//! `r = affLight(I_tracked(π(motion · ray·depth))) − I_base`. Levels are
//! solved from coarsest to finest with a small damped Gauss-Newton loop;
//! the result seeds the windowed optimizer with a good initial pose.

use nalgebra::{SMatrix, SVector};
use tracing::debug;

use crate::camera::CameraModel;
use crate::image::ImagePyramid;
use crate::loss::LossFunction;
use crate::math::{skew, AffLight, MatX, SE3, Vec2, Vec3, Vec6};
use crate::settings::{AffineLightSettings, TrackingSettings};

type Vec8 = SVector<f64, 8>;
type Mat8 = SMatrix<f64, 8, 8>;

/// Base keyframe data for tracking: image pyramid plus per-level sparse
/// depth maps (entries ≤ 0 mean "no depth at this pixel").
pub struct DepthPyramid {
    pub images: ImagePyramid,
    pub depths: Vec<MatX>,
}

impl DepthPyramid {
    /// Downsample the base depth map alongside the image pyramid; each
    /// coarser cell takes the mean of its positive children.
    pub fn new(images: ImagePyramid, base_depths: MatX) -> Self {
        let mut depths = Vec::with_capacity(images.num_levels());
        depths.push(base_depths);
        for level in 1..images.num_levels() {
            let prev = &depths[level - 1];
            let (rows, cols) = (images.level(level).nrows(), images.level(level).ncols());
            let next = MatX::from_fn(rows, cols, |r, c| {
                let mut sum = 0.0;
                let mut count = 0;
                for dr in 0..2 {
                    for dc in 0..2 {
                        let (pr, pc) = (2 * r + dr, 2 * c + dc);
                        if pr < prev.nrows() && pc < prev.ncols() && prev[(pr, pc)] > 0.0 {
                            sum += prev[(pr, pc)];
                            count += 1;
                        }
                    }
                }
                if count > 0 {
                    sum / count as f64
                } else {
                    0.0
                }
            });
            depths.push(next);
        }
        DepthPyramid { images, depths }
    }
}

/// Per-level diagnostics handed to the surrounding system's debug views.
#[derive(Debug, Clone)]
pub struct LevelStats {
    pub level: usize,
    pub pixels_used: usize,
    pub pixels_outside: usize,
    pub final_energy: f64,
    pub rmse: f64,
}

pub struct TrackingResult {
    pub motion: SE3,
    pub aff_light: AffLight,
    pub level_stats: Vec<LevelStats>,
}

/// Tracks image pyramids against one depth-annotated base frame.
pub struct FrameTracker<'a> {
    cam_pyr: &'a [Box<dyn CameraModel>],
    base: DepthPyramid,
    settings: TrackingSettings,
    affine_bounds: AffineLightSettings,
}

struct TrackedPoint {
    pos: Vec3,
    base_intensity: f64,
    /// Robust loss of this pixel's residual: plain Huber, or Huber scaled
    /// by the base-frame gradient weight when pre-weighting is on.
    loss: LossFunction,
}

impl<'a> FrameTracker<'a> {
    pub fn new(
        cam_pyr: &'a [Box<dyn CameraModel>],
        base: DepthPyramid,
        settings: TrackingSettings,
        affine_bounds: AffineLightSettings,
    ) -> Self {
        FrameTracker {
            cam_pyr,
            base,
            settings,
            affine_bounds,
        }
    }

    /// Refine `(motion, affLight)` from the coarse guesses, coarsest level
    /// first. `motion` maps base-camera points into the tracked camera.
    pub fn track(
        &self,
        frame: &ImagePyramid,
        coarse_motion: &SE3,
        coarse_aff_light: &AffLight,
    ) -> TrackingResult {
        let mut motion = coarse_motion.clone();
        let mut aff_light = *coarse_aff_light;
        let mut level_stats = Vec::new();

        let top = self
            .base
            .images
            .num_levels()
            .min(frame.num_levels())
            .min(self.cam_pyr.len());
        for level in (self.settings.finest_level..top).rev() {
            let (refined_motion, refined_aff, stats) =
                self.track_level(level, frame, motion, aff_light);
            motion = refined_motion;
            aff_light = refined_aff;
            debug!(
                level,
                pixels = stats.pixels_used,
                rmse = stats.rmse,
                "tracked pyramid level"
            );
            level_stats.push(stats);
        }

        TrackingResult {
            motion,
            aff_light,
            level_stats,
        }
    }

    fn collect_points(&self, level: usize) -> Vec<TrackedPoint> {
        let cam = self.cam_pyr[level].as_ref();
        let image = self.base.images.level(level);
        let depths = &self.base.depths[level];
        let interp = self.base.images.interpolator(level);
        let c = 50.0;
        let huber = LossFunction::Huber {
            delta: self.settings.outlier_intensity_diff,
        };

        let mut points = Vec::new();
        for y in 0..image.nrows() {
            for x in 0..image.ncols() {
                let depth = depths[(y, x)];
                if depth <= 0.0 {
                    continue;
                }
                let pixel = Vec2::new(x as f64, y as f64);
                let loss = if self.settings.use_grad_weights {
                    let (value, grad) = interp.evaluate_with_gradient(&pixel);
                    if !value.is_finite() {
                        continue;
                    }
                    LossFunction::Scaled {
                        inner: Box::new(huber.clone()),
                        weight: c / (c * c + grad.norm_squared()).sqrt(),
                    }
                } else {
                    huber.clone()
                };
                points.push(TrackedPoint {
                    pos: cam.unmap(&pixel) * depth,
                    base_intensity: image[(y, x)],
                    loss,
                });
            }
        }
        points
    }

    fn track_level(
        &self,
        level: usize,
        frame: &ImagePyramid,
        coarse_motion: SE3,
        coarse_aff_light: AffLight,
    ) -> (SE3, AffLight, LevelStats) {
        let cam = self.cam_pyr[level].as_ref();
        let interp = frame.interpolator(level);
        let points = self.collect_points(level);

        let mut motion = coarse_motion;
        let mut aff_light = coarse_aff_light;
        let mut lambda = self.settings.initial_lambda;
        let (mut energy, mut used, mut outside) =
            self.evaluate_energy(&points, cam, &interp, &motion, &aff_light);

        for _iteration in 0..self.settings.max_iterations {
            let mut hessian = Mat8::zeros();
            let mut gradient = Vec8::zeros();

            for point in &points {
                let transformed = motion.transform(&point.pos);
                if !cam.is_mappable(&transformed) {
                    continue;
                }
                let (uv, dpi) = cam.diff_map(&transformed);
                let (intensity, grad) = interp.evaluate_with_gradient(&uv);
                if !intensity.is_finite() {
                    continue;
                }

                let ea = aff_light.ea();
                let r = aff_light.apply(intensity) - point.base_intensity;
                let [_, w, _] = point.loss.evaluate(r * r);

                // right-multiplied update: P(δ) = motion·exp(δ)·pos
                let rot = motion.rotation_matrix();
                let dp_dt = dpi * rot;
                let dp_dw = dpi * (-rot * skew(&point.pos));
                let dr_du = ea * grad;

                let mut jacobian = Vec8::zeros();
                for j in 0..3 {
                    jacobian[j] = dr_du.dot(&dp_dt.column(j).into_owned());
                    jacobian[3 + j] = dr_du.dot(&dp_dw.column(j).into_owned());
                }
                jacobian[6] = ea * (intensity - aff_light.b);
                jacobian[7] = -ea;

                hessian += w * jacobian * jacobian.transpose();
                gradient += w * r * jacobian;
            }

            if !self.settings.optimize_affine_light {
                for j in 6..8 {
                    for i in 0..8 {
                        hessian[(i, j)] = 0.0;
                        hessian[(j, i)] = 0.0;
                    }
                    hessian[(j, j)] = 1.0;
                    gradient[j] = 0.0;
                }
            }

            let mut damped = hessian;
            for i in 0..8 {
                damped[(i, i)] *= 1.0 + lambda;
            }
            let delta = match damped.cholesky() {
                Some(cholesky) => cholesky.solve(&gradient),
                None => {
                    lambda *= 10.0;
                    continue;
                }
            };

            let pose_delta = Vec6::new(delta[0], delta[1], delta[2], delta[3], delta[4], delta[5]);
            let candidate_motion = &motion * &SE3::exp(&(-pose_delta));
            let candidate_aff = AffLight::new(
                self.affine_bounds.clamp_a(aff_light.a - delta[6]),
                self.affine_bounds.clamp_b(aff_light.b - delta[7]),
            );

            let (new_energy, new_used, new_outside) =
                self.evaluate_energy(&points, cam, &interp, &candidate_motion, &candidate_aff);

            if new_energy < energy {
                motion = candidate_motion;
                aff_light = candidate_aff;
                energy = new_energy;
                used = new_used;
                outside = new_outside;
                lambda = (lambda * 0.1).max(1e-12);
                if delta.norm() < 1e-10 {
                    break;
                }
            } else {
                lambda *= 10.0;
                if lambda > 1e8 {
                    break;
                }
            }
        }

        let rmse = if used > 0 {
            (energy / used as f64).sqrt()
        } else {
            f64::INFINITY
        };
        (
            motion,
            aff_light,
            LevelStats {
                level,
                pixels_used: used,
                pixels_outside: outside,
                final_energy: energy,
                rmse,
            },
        )
    }

    fn evaluate_energy(
        &self,
        points: &[TrackedPoint],
        cam: &dyn CameraModel,
        interp: &crate::image::BiCubicInterpolator<'_>,
        motion: &SE3,
        aff_light: &AffLight,
    ) -> (f64, usize, usize) {
        let mut energy = 0.0;
        let mut used = 0;
        let mut outside = 0;
        for point in points {
            let transformed = motion.transform(&point.pos);
            if !cam.is_mappable(&transformed) {
                outside += 1;
                continue;
            }
            let intensity = interp.evaluate(&cam.map(&transformed));
            if !intensity.is_finite() {
                outside += 1;
                continue;
            }
            let r = aff_light.apply(intensity) - point.base_intensity;
            energy += point.loss.evaluate(r * r)[0];
            used += 1;
        }
        (energy, used, outside)
    }
}

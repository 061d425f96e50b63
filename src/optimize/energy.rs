//! The windowed photometric energy function.
//!
//! Construction runs the rig [`Reprojector`] against every keyframe of the
//! window in turn: each record it emits is a hosted point that lands on a
//! target image with the pattern border intact, and becomes a [`Residual`]
//! if the point is ACTIVE, inside the depth bounds and not hosted by the
//! target itself. Point indices handed to residuals are final and
//! contiguous `[0, P)` before anything is exposed, so residual and
//! parameter indexing can never drift apart.
//!
//! `optimize` runs damped Gauss-Newton steps: solve, apply, re-evaluate,
//! accept or roll back, with derivative rebuilds only after accepted
//! steps. Residual evaluation and Jacobian evaluation fan out over rayon;
//! accumulation into H and g is serial in residual index order, making
//! repeated runs bit-identical.

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::camera::CameraBundle;
use crate::error::{VoError, VoResult};
use crate::frame::{KeyFrame, OptimizedPoint, PointState};
use crate::loss::LossFunction;
use crate::math::{AffLight, SE3, VecX};
use crate::optimize::accumulated::{Gradient, GradientBlocks, Hessian, HessianBlocks};
use crate::optimize::motion::MotionDerivatives;
use crate::optimize::parameters::{Parameters, PointLocation};
use crate::optimize::residual::{CachedValues, Residual, ResidualJacobian};
use crate::optimize::step::StepController;
use crate::reprojector::Reprojector;
use crate::settings::EnergySettings;

/// Dense table of host-camera → target-camera transforms, rebuilt whenever
/// poses change.
pub struct PrecomputedHostToTarget {
    num_keyframes: usize,
    num_cameras: usize,
    table: Vec<SE3>,
}

impl PrecomputedHostToTarget {
    fn new(cam: &CameraBundle, parameters: &Parameters) -> Self {
        let num_keyframes = parameters.num_key_frames();
        let num_cameras = cam.size();
        let cells = num_keyframes * num_cameras * num_keyframes * num_cameras;
        let mut table = vec![SE3::identity(); cells];
        for host_ind in 0..num_keyframes {
            for target_ind in 0..num_keyframes {
                if host_ind == target_ind {
                    continue;
                }
                let host_body_to_target_body = &parameters.body_to_world(target_ind).inverse()
                    * parameters.body_to_world(host_ind);
                for host_cam_ind in 0..num_cameras {
                    let host_frame_to_target_body =
                        &host_body_to_target_body * &cam.slot(host_cam_ind).this_to_body;
                    for target_cam_ind in 0..num_cameras {
                        let index = cell_index(
                            num_keyframes,
                            num_cameras,
                            host_ind,
                            host_cam_ind,
                            target_ind,
                            target_cam_ind,
                        );
                        table[index] = &cam.slot(target_cam_ind).body_to_this
                            * &host_frame_to_target_body;
                    }
                }
            }
        }
        PrecomputedHostToTarget {
            num_keyframes,
            num_cameras,
            table,
        }
    }

    pub fn get(
        &self,
        host_ind: usize,
        host_cam_ind: usize,
        target_ind: usize,
        target_cam_ind: usize,
    ) -> &SE3 {
        &self.table[cell_index(
            self.num_keyframes,
            self.num_cameras,
            host_ind,
            host_cam_ind,
            target_ind,
            target_cam_ind,
        )]
    }
}

/// Lazy per-cell cache of motion derivatives; each cell is built on first
/// access and lives until poses change.
pub struct PrecomputedMotionDerivatives {
    num_keyframes: usize,
    num_cameras: usize,
    cam_to_body: Vec<SE3>,
    body_to_cam: Vec<SE3>,
    cells: Vec<Option<MotionDerivatives>>,
}

impl PrecomputedMotionDerivatives {
    fn new(cam: &CameraBundle, parameters: &Parameters) -> Self {
        let num_keyframes = parameters.num_key_frames();
        let num_cameras = cam.size();
        PrecomputedMotionDerivatives {
            num_keyframes,
            num_cameras,
            cam_to_body: (0..num_cameras)
                .map(|c| cam.slot(c).this_to_body.clone())
                .collect(),
            body_to_cam: (0..num_cameras)
                .map(|c| cam.slot(c).body_to_this.clone())
                .collect(),
            cells: vec![None; num_keyframes * num_cameras * num_keyframes * num_cameras],
        }
    }

    fn get(
        &mut self,
        parameters: &Parameters,
        host_ind: usize,
        host_cam_ind: usize,
        target_ind: usize,
        target_cam_ind: usize,
    ) -> &MotionDerivatives {
        let index = cell_index(
            self.num_keyframes,
            self.num_cameras,
            host_ind,
            host_cam_ind,
            target_ind,
            target_cam_ind,
        );
        if self.cells[index].is_none() {
            self.cells[index] = Some(MotionDerivatives::new(
                &self.cam_to_body[host_cam_ind],
                parameters.body_to_world(host_ind),
                parameters.body_to_world(target_ind),
                &self.body_to_cam[target_cam_ind],
            ));
        }
        self.cells[index]
            .as_ref()
            .expect("cell was just populated")
    }
}

/// Lazy per-cell cache of host→target light composites.
pub struct PrecomputedLightHostToTarget {
    num_keyframes: usize,
    num_cameras: usize,
    cells: Vec<Option<AffLight>>,
}

impl PrecomputedLightHostToTarget {
    fn new(parameters: &Parameters) -> Self {
        let num_keyframes = parameters.num_key_frames();
        let num_cameras = parameters.cam_bundle_size();
        PrecomputedLightHostToTarget {
            num_keyframes,
            num_cameras,
            cells: vec![None; num_keyframes * num_cameras * num_keyframes * num_cameras],
        }
    }

    fn get(
        &mut self,
        parameters: &Parameters,
        host_ind: usize,
        host_cam_ind: usize,
        target_ind: usize,
        target_cam_ind: usize,
    ) -> AffLight {
        let index = cell_index(
            self.num_keyframes,
            self.num_cameras,
            host_ind,
            host_cam_ind,
            target_ind,
            target_cam_ind,
        );
        if let Some(light) = self.cells[index] {
            return light;
        }
        let light = parameters.light_world_to_frame(target_ind, target_cam_ind)
            * parameters
                .light_world_to_frame(host_ind, host_cam_ind)
                .inverse();
        self.cells[index] = Some(light);
        light
    }
}

fn cell_index(
    num_keyframes: usize,
    num_cameras: usize,
    host_ind: usize,
    host_cam_ind: usize,
    target_ind: usize,
    target_cam_ind: usize,
) -> usize {
    ((host_ind * num_cameras + host_cam_ind) * num_keyframes + target_ind) * num_cameras
        + target_cam_ind
}

/// Raw residual values plus the caches the Jacobian path reuses.
pub struct Values {
    vals: Vec<(VecX, CachedValues)>,
}

impl Values {
    pub fn values(&self, residual_ind: usize) -> &VecX {
        &self.vals[residual_ind].0
    }

    pub fn cached(&self, residual_ind: usize) -> &CachedValues {
        &self.vals[residual_ind].1
    }

    /// Total robust energy `Σ ρ(r²)` over all finite samples.
    pub fn total_energy(&self, loss: &LossFunction) -> f64 {
        let mut energy = 0.0;
        for (values, _) in &self.vals {
            for i in 0..values.len() {
                let v = values[i];
                if v.is_finite() {
                    energy += loss.evaluate(v * v)[0];
                }
            }
        }
        energy
    }
}

/// Per-residual Jacobians, rebuilt after every accepted step.
pub struct Derivatives {
    jacobians: Vec<ResidualJacobian>,
}

/// Windowed photometric energy over ≥ 2 keyframes.
///
/// Keyframes are borrowed for the lifetime of the optimization; their
/// state is only written back by `apply` at the end of `optimize`.
pub struct EnergyFunction<'a> {
    cam: &'a CameraBundle,
    key_frames: &'a mut [KeyFrame],
    parameters: Parameters,
    residuals: Vec<Residual>,
    loss: LossFunction,
    settings: EnergySettings,
}

impl<'a> EnergyFunction<'a> {
    pub fn new(
        cam: &'a CameraBundle,
        key_frames: &'a mut [KeyFrame],
        settings: EnergySettings,
    ) -> VoResult<Self> {
        if key_frames.len() < 2 {
            return Err(VoError::InvalidInput(format!(
                "energy function needs at least 2 keyframes, got {}",
                key_frames.len()
            )));
        }
        settings.validate().map_err(VoError::InvalidInput)?;

        let loss = LossFunction::from_settings(
            settings.optimization.loss_type,
            settings.residual.intensity.outlier_diff,
        );
        let mut parameters = Parameters::new(cam, key_frames);
        let host_to_target = PrecomputedHostToTarget::new(cam, &parameters);

        let pattern_border = settings.residual.pattern.height;
        let num_keyframes = key_frames.len();
        let depth_bounds = &settings.residual.depth;

        let mut residuals = Vec::new();
        let mut used_points: Vec<PointLocation> = Vec::new();
        let mut used_index: HashMap<(usize, usize, usize), usize> = HashMap::new();

        // the reprojector is the visibility pre-filter: every record it
        // emits already passed isMappable and the pattern-border check
        for target_ind in 0..num_keyframes {
            let reprojector: Reprojector<OptimizedPoint> = Reprojector::new(
                key_frames,
                cam,
                &key_frames[target_ind].body_to_world,
                pattern_border,
            );
            for reprojection in reprojector.reproject() {
                if reprojection.host_ind == target_ind {
                    continue;
                }
                let entry =
                    &key_frames[reprojection.host_ind].frames[reprojection.host_cam_ind];
                let point = &entry.optimized_points[reprojection.point_ind];
                if point.state != PointState::Active {
                    continue;
                }
                let depth = point.depth();
                if depth <= depth_bounds.min || depth >= depth_bounds.max {
                    continue;
                }

                let key = (
                    reprojection.host_ind,
                    reprojection.host_cam_ind,
                    reprojection.point_ind,
                );
                let point_slot = match used_index.get(&key) {
                    Some(&slot) => slot,
                    None => {
                        used_points.push(PointLocation {
                            host_ind: reprojection.host_ind,
                            host_cam_ind: reprojection.host_cam_ind,
                            point_ind: reprojection.point_ind,
                        });
                        used_index.insert(key, used_points.len() - 1);
                        used_points.len() - 1
                    }
                };

                residuals.push(Residual::new(
                    reprojection.host_ind,
                    reprojection.host_cam_ind,
                    target_ind,
                    reprojection.target_cam_ind,
                    point_slot,
                    cam.cam(reprojection.host_cam_ind),
                    cam.cam(reprojection.target_cam_ind),
                    entry,
                    point,
                    host_to_target.get(
                        reprojection.host_ind,
                        reprojection.host_cam_ind,
                        target_ind,
                        reprojection.target_cam_ind,
                    ),
                    &settings.residual,
                ));
            }
        }

        parameters.set_points(used_points, key_frames);

        info!(
            residuals = residuals.len(),
            points = parameters.num_points(),
            keyframes = num_keyframes,
            "created energy function"
        );

        Ok(EnergyFunction {
            cam,
            key_frames,
            parameters,
            residuals,
            loss,
            settings,
        })
    }

    pub fn num_points(&self) -> usize {
        self.parameters.num_points()
    }

    pub fn num_residuals(&self) -> usize {
        self.residuals.len()
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Total robust energy at the current estimate.
    pub fn total_energy(&self) -> f64 {
        let h2t = PrecomputedHostToTarget::new(self.cam, &self.parameters);
        let mut light = PrecomputedLightHostToTarget::new(&self.parameters);
        self.create_values(&h2t, &mut light).total_energy(&self.loss)
    }

    /// Raw per-pixel residual values of one residual at the current
    /// estimate, for inspection and marginalization preparation.
    pub fn residual_values(&self, residual_ind: usize) -> VecX {
        let h2t = PrecomputedHostToTarget::new(self.cam, &self.parameters);
        let mut light = PrecomputedLightHostToTarget::new(&self.parameters);
        let values = self.create_values(&h2t, &mut light);
        values.values(residual_ind).clone()
    }

    /// Gauss-Newton Hessian at the current estimate.
    pub fn hessian(&self) -> Hessian {
        let h2t = PrecomputedHostToTarget::new(self.cam, &self.parameters);
        let mut motion = PrecomputedMotionDerivatives::new(self.cam, &self.parameters);
        let mut light = PrecomputedLightHostToTarget::new(&self.parameters);
        let values = self.create_values(&h2t, &mut light);
        let derivatives = self.create_derivatives(&values, &h2t, &mut motion, &mut light);
        self.build_normal_equations(&values, &derivatives).0
    }

    /// Gradient `Σ Jᵀ·w·r` at the current estimate.
    pub fn gradient(&self) -> Gradient {
        let h2t = PrecomputedHostToTarget::new(self.cam, &self.parameters);
        let mut motion = PrecomputedMotionDerivatives::new(self.cam, &self.parameters);
        let mut light = PrecomputedLightHostToTarget::new(&self.parameters);
        let values = self.create_values(&h2t, &mut light);
        let derivatives = self.create_derivatives(&values, &h2t, &mut motion, &mut light);
        self.build_normal_equations(&values, &derivatives).1
    }

    /// Run up to `max_iterations` damped steps, then write the estimate
    /// back to the keyframes. A no-op when no residuals exist.
    pub fn optimize(&mut self, max_iterations: usize) {
        if self.residuals.is_empty() {
            warn!("energy function has no residuals, optimize is a no-op");
            return;
        }

        let mut controller = StepController::new(&self.settings.optimization.step_control);
        let mut h2t = PrecomputedHostToTarget::new(self.cam, &self.parameters);
        let mut light = PrecomputedLightHostToTarget::new(&self.parameters);
        let mut values = self.create_values(&h2t, &mut light);
        let mut motion = PrecomputedMotionDerivatives::new(self.cam, &self.parameters);
        let derivatives = self.create_derivatives(&values, &h2t, &mut motion, &mut light);
        let (mut hessian, mut gradient) = self.build_normal_equations(&values, &derivatives);

        for iteration in 0..max_iterations {
            let current_energy = values.total_energy(&self.loss);
            let damped = hessian.levenberg_marquardt_damp(controller.lambda());

            let mut delta = match damped.solve(&gradient) {
                Ok(delta) => delta,
                Err(err) => {
                    debug!(%err, iteration, "solve failed, inflating damping");
                    controller.reject();
                    continue;
                }
            };

            if !self.settings.affine_light.optimize_affine_light {
                delta.set_affine_zero();
            }
            delta.clamp_depths(self.settings.optimization.max_abs_delta_d);

            let predicted_decrease =
                gradient.dot_delta(&delta) - 0.5 * damped.quadratic_form(&delta);

            let saved = self.parameters.save_state();
            self.parameters.update(&delta, &self.settings);

            let new_h2t = PrecomputedHostToTarget::new(self.cam, &self.parameters);
            let mut new_light = PrecomputedLightHostToTarget::new(&self.parameters);
            let new_values = self.create_values(&new_h2t, &mut new_light);
            let new_energy = new_values.total_energy(&self.loss);

            let accepted = controller.new_step(
                current_energy,
                new_energy,
                current_energy - predicted_decrease,
            );

            debug!(
                iteration,
                current_energy, new_energy, predicted_decrease, accepted, "optimization step"
            );

            if accepted {
                values = new_values;
                h2t = new_h2t;
                light = new_light;
                motion = PrecomputedMotionDerivatives::new(self.cam, &self.parameters);
                let derivatives = self.create_derivatives(&values, &h2t, &mut motion, &mut light);
                let rebuilt = self.build_normal_equations(&values, &derivatives);
                hessian = rebuilt.0;
                gradient = rebuilt.1;
            } else {
                self.parameters.recover_state(saved);
            }
        }

        self.parameters.apply(self.key_frames);
        info!(final_energy = self.total_energy(), "optimization finished");
    }

    fn create_values(
        &self,
        host_to_target: &PrecomputedHostToTarget,
        light: &mut PrecomputedLightHostToTarget,
    ) -> Values {
        // resolve the lazy caches serially, then fan the expensive
        // interpolation out over residual slots
        let inputs: Vec<(SE3, AffLight, f64)> = self
            .residuals
            .iter()
            .map(|r| {
                (
                    host_to_target
                        .get(r.host_ind(), r.host_cam_ind(), r.target_ind(), r.target_cam_ind())
                        .clone(),
                    light.get(
                        &self.parameters,
                        r.host_ind(),
                        r.host_cam_ind(),
                        r.target_ind(),
                        r.target_cam_ind(),
                    ),
                    self.parameters.log_depth(r.point_ind()),
                )
            })
            .collect();

        let vals = self
            .residuals
            .par_iter()
            .zip(inputs.par_iter())
            .map(|(residual, (h2t, l, log_depth))| {
                residual.values(
                    h2t,
                    l,
                    *log_depth,
                    self.cam.cam(residual.target_cam_ind()),
                    &self.key_frames[residual.target_ind()].frames[residual.target_cam_ind()],
                )
            })
            .collect();
        Values { vals }
    }

    fn create_derivatives(
        &self,
        values: &Values,
        host_to_target: &PrecomputedHostToTarget,
        motion: &mut PrecomputedMotionDerivatives,
        light: &mut PrecomputedLightHostToTarget,
    ) -> Derivatives {
        let inputs: Vec<(SE3, MotionDerivatives, AffLight, AffLight, f64)> = self
            .residuals
            .iter()
            .map(|r| {
                let (h, hc, t, tc) =
                    (r.host_ind(), r.host_cam_ind(), r.target_ind(), r.target_cam_ind());
                (
                    host_to_target.get(h, hc, t, tc).clone(),
                    motion.get(&self.parameters, h, hc, t, tc).clone(),
                    self.parameters.light_world_to_frame(h, hc),
                    light.get(&self.parameters, h, hc, t, tc),
                    self.parameters.log_depth(r.point_ind()),
                )
            })
            .collect();

        let jacobians = self
            .residuals
            .par_iter()
            .enumerate()
            .zip(inputs.par_iter())
            .map(
                |((residual_ind, residual), (h2t, md, light_host, light_h2t, log_depth))| {
                    residual.jacobian(
                        h2t,
                        md,
                        light_host,
                        light_h2t,
                        *log_depth,
                        values.cached(residual_ind),
                        self.cam.cam(residual.target_cam_ind()),
                        &self.key_frames[residual.target_ind()].frames
                            [residual.target_cam_ind()],
                        &self.settings.residual.depth,
                    )
                },
            )
            .collect();
        Derivatives { jacobians }
    }

    /// Serial accumulation of H and g in residual index order.
    fn build_normal_equations(
        &self,
        values: &Values,
        derivatives: &Derivatives,
    ) -> (Hessian, Gradient) {
        let mut hessian_blocks = HessianBlocks::new(
            self.parameters.num_key_frames(),
            self.parameters.cam_bundle_size(),
            self.parameters.num_points(),
        );
        let mut gradient_blocks = GradientBlocks::new(
            self.parameters.num_key_frames(),
            self.parameters.cam_bundle_size(),
            self.parameters.num_points(),
        );

        for (residual_ind, residual) in self.residuals.iter().enumerate() {
            let weights = residual.weights(
                values.values(residual_ind),
                &self.loss,
                &self.settings.residual.weighting,
            );
            let jacobian = &derivatives.jacobians[residual_ind];
            hessian_blocks.add(residual, &residual.delta_hessian(&weights, jacobian));
            gradient_blocks.add(
                residual,
                &residual.delta_gradient(&weights, values.values(residual_ind), jacobian),
            );
        }

        (Hessian::new(hessian_blocks), Gradient::new(gradient_blocks))
    }
}

//! One host→target photometric patch residual.
//!
//! A residual samples the fixed pixel pattern around its point in the host
//! frame and compares against the target frame at the reprojected
//! positions. Pattern reprojection offsets, host intensities and
//! host-gradient weights are cached at construction and survive across
//! damping steps; only the central reprojection moves with the parameters.

use crate::camera::CameraModel;
use crate::frame::{KeyFrameEntry, OptimizedPoint};
use crate::loss::LossFunction;
use crate::math::{AffLight, Mat2, Mat23, Mat26, Mat6, Mat62, SE3, Vec2, Vec3, Vec6, VecX};
use crate::optimize::motion::MotionDerivatives;
use crate::settings::{DepthSettings, ResidualSettings, WeightingSettings};

/// Map a host-camera ray through a frame-to-frame transform, falling back
/// to the rotation-only action for points at infinity.
pub fn remap_depthed(frame_to_frame: &SE3, ray: &Vec3, depth: f64) -> Vec3 {
    if depth.is_finite() {
        frame_to_frame.transform(&(ray * depth))
    } else {
        frame_to_frame.rotate(ray)
    }
}

/// Intermediate results shared between the value and Jacobian paths.
#[derive(Debug, Clone)]
pub struct CachedValues {
    /// Central reprojection in the target image.
    pub reproj: Vec2,
    /// Host intensities mapped through the host→target light transform.
    pub transformed_host: Vec<f64>,
}

/// Per-pixel derivative rows of one residual.
pub struct ResidualJacobian {
    /// 2×1 effect of host log-depth on the target pixel; exactly zero for
    /// points at infinity.
    pub dp_dlogd: Vec2,
    /// ∇I_target at each reprojected pattern position (zero off-image).
    pub grad_itarget: Vec<Vec2>,
    pub dhost: FrameSubJacobian,
    pub dtarget: FrameSubJacobian,
    pub is_inf_depth: bool,
}

/// Pose and affine derivative blocks of one frame side.
pub struct FrameSubJacobian {
    /// 2×6 pixel motion per pose tangent `[t, ω]`.
    pub dp_dqt: Mat26,
    /// Per-pixel residual derivative w.r.t. the frame's (a, b).
    pub dr_dab: Vec<Vec2>,
}

/// Frame-frame block contributions of one residual.
#[derive(Debug, Clone)]
pub struct FrameFrameHessian {
    pub pose_pose: Mat6,
    pub pose_ab: Mat62,
    pub ab_pose: Mat26,
    pub ab_ab: Mat2,
}

impl FrameFrameHessian {
    pub fn transpose(&self) -> FrameFrameHessian {
        FrameFrameHessian {
            pose_pose: self.pose_pose.transpose(),
            pose_ab: self.ab_pose.transpose(),
            ab_pose: self.pose_ab.transpose(),
            ab_ab: self.ab_ab.transpose(),
        }
    }
}

/// Frame-point block contributions of one residual.
#[derive(Debug, Clone)]
pub struct FramePointHessian {
    pub pose_d: Vec6,
    pub ab_d: Vec2,
}

/// All Hessian blocks one residual contributes.
pub struct DeltaHessian {
    pub host_host: FrameFrameHessian,
    pub host_target: FrameFrameHessian,
    pub target_target: FrameFrameHessian,
    pub host_point: FramePointHessian,
    pub target_point: FramePointHessian,
    pub point_point: f64,
}

/// Gradient pieces of one frame side.
#[derive(Debug, Clone)]
pub struct FrameGradient {
    pub pose: Vec6,
    pub ab: Vec2,
}

/// All gradient entries one residual contributes.
pub struct DeltaGradient {
    pub host: FrameGradient,
    pub target: FrameGradient,
    pub point: f64,
}

/// Photometric patch residual between a (host, hostCam) keyframe entry and
/// a (target, targetCam) entry, tied to one optimized point.
pub struct Residual {
    host_ind: usize,
    host_cam_ind: usize,
    target_ind: usize,
    target_cam_ind: usize,
    point_ind: usize,

    host_point: Vec2,
    host_dir: Vec3,
    /// Reprojected pattern offsets at linearization depth.
    reproj_pattern: Vec<Vec2>,
    host_intensities: Vec<f64>,
    /// Huber-style pre-weights from the host intensity gradient.
    grad_weights: Vec<f64>,
}

impl Residual {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host_ind: usize,
        host_cam_ind: usize,
        target_ind: usize,
        target_cam_ind: usize,
        point_ind: usize,
        cam_host: &dyn CameraModel,
        cam_target: &dyn CameraModel,
        host_entry: &KeyFrameEntry,
        point: &OptimizedPoint,
        host_to_target_image: &SE3,
        settings: &ResidualSettings,
    ) -> Self {
        let pattern = &settings.pattern.pattern;
        let depth = point.log_depth.exp();
        let reproj = cam_target.map(&remap_depthed(host_to_target_image, &point.dir, depth));

        let mut reproj_pattern = Vec::with_capacity(pattern.len());
        for offset in pattern {
            let shifted_ray = cam_host.unmap(&(point.p + offset));
            let mapped = cam_target.map(&remap_depthed(host_to_target_image, &shifted_ray, depth));
            reproj_pattern.push(mapped - reproj);
        }

        let host_interp = host_entry.pyramid.interpolator(0);
        let mut host_intensities = Vec::with_capacity(pattern.len());
        let mut grad_weights = Vec::with_capacity(pattern.len());
        let c = settings.weighting.c;
        for offset in pattern {
            let (intensity, grad) = host_interp.evaluate_with_gradient(&(point.p + offset));
            host_intensities.push(intensity);
            grad_weights.push(c / (c * c + grad.norm_squared()).sqrt());
        }

        Residual {
            host_ind,
            host_cam_ind,
            target_ind,
            target_cam_ind,
            point_ind,
            host_point: point.p,
            host_dir: point.dir,
            reproj_pattern,
            host_intensities,
            grad_weights,
        }
    }

    pub fn host_ind(&self) -> usize {
        self.host_ind
    }

    pub fn host_cam_ind(&self) -> usize {
        self.host_cam_ind
    }

    pub fn target_ind(&self) -> usize {
        self.target_ind
    }

    pub fn target_cam_ind(&self) -> usize {
        self.target_cam_ind
    }

    pub fn point_ind(&self) -> usize {
        self.point_ind
    }

    /// Host pixel of the underlying point.
    pub fn host_point(&self) -> &Vec2 {
        &self.host_point
    }

    pub fn pattern_size(&self) -> usize {
        self.reproj_pattern.len()
    }

    /// Raw per-pixel residuals at the given relative pose, light transform
    /// and log-depth. Off-image samples are ∞ and carry zero weight
    /// downstream; the cached transformed host intensities feed the
    /// Jacobian path.
    pub fn values(
        &self,
        host_to_target_image: &SE3,
        light_host_to_target: &AffLight,
        log_depth: f64,
        cam_target: &dyn CameraModel,
        target_entry: &KeyFrameEntry,
    ) -> (VecX, CachedValues) {
        let target_interp = target_entry.pyramid.interpolator(0);
        let depth = log_depth.exp();
        let reproj = cam_target.map(&remap_depthed(host_to_target_image, &self.host_dir, depth));

        let mut result = VecX::zeros(self.pattern_size());
        let mut transformed_host = Vec::with_capacity(self.pattern_size());
        for i in 0..self.pattern_size() {
            let target_intensity = target_interp.evaluate(&(reproj + self.reproj_pattern[i]));
            let host_intensity = light_host_to_target.apply(self.host_intensities[i]);
            transformed_host.push(host_intensity);
            result[i] = target_intensity - host_intensity;
        }

        (
            result,
            CachedValues {
                reproj,
                transformed_host,
            },
        )
    }

    /// Loss-corrected sample weights: `gradWeight · (ρ' + 2ρ''r²)` with a
    /// `loss_eps·ρ'` floor against negative effective weights. Non-finite
    /// samples get weight 0.
    pub fn weights(
        &self,
        values: &VecX,
        loss: &LossFunction,
        weighting: &WeightingSettings,
    ) -> VecX {
        let mut weights = VecX::zeros(self.pattern_size());
        for i in 0..self.pattern_size() {
            let v = values[i];
            if !v.is_finite() {
                continue;
            }
            let v2 = v * v;
            let [_, rho1, rho2] = loss.evaluate(v2);
            let mut w = rho1 + 2.0 * rho2 * v2;
            if w < 0.0 {
                w = weighting.loss_eps * rho1;
            }
            weights[i] = self.grad_weights[i] * w;
        }
        weights
    }

    /// Analytic derivatives of every pixel residual. For non-finite depth
    /// the depth substitute `depth.max` enters the pose rows while the
    /// log-depth column is exactly zero.
    #[allow(clippy::too_many_arguments)]
    pub fn jacobian(
        &self,
        host_to_target: &SE3,
        motion: &MotionDerivatives,
        light_world_to_host: &AffLight,
        light_host_to_target: &AffLight,
        log_depth: f64,
        cached: &CachedValues,
        cam_target: &dyn CameraModel,
        target_entry: &KeyFrameEntry,
        depth_settings: &DepthSettings,
    ) -> ResidualJacobian {
        let target_interp = target_entry.pyramid.interpolator(0);

        let mut depth = log_depth.exp();
        let is_inf_depth = !depth.is_finite();
        if is_inf_depth {
            depth = depth_settings.max;
        }
        let host_vec = self.host_dir * depth;
        let target_vec = host_to_target.transform(&host_vec);
        let (reproj, dpi) = cam_target.diff_map(&target_vec);

        let mut grad_itarget = Vec::with_capacity(self.pattern_size());
        for offset in &self.reproj_pattern {
            let (value, grad) = target_interp.evaluate_with_gradient(&(reproj + offset));
            grad_itarget.push(if value.is_finite() { grad } else { Vec2::zeros() });
        }

        let dp_dlogd = if is_inf_depth {
            Vec2::zeros()
        } else {
            dpi * host_to_target.rotate(&host_vec)
        };

        let world = motion.world_point(&host_vec);
        let dhost_pose = concat_pose_block(
            &(dpi * motion.daction_dt_host()),
            &(dpi * motion.daction_dw_host(&world)),
        );
        let dtarget_pose = concat_pose_block(
            &(dpi * motion.daction_dt_target()),
            &(dpi * motion.daction_dw_target(&world)),
        );

        // closed-form light rows for r = I_t − e^{a'}(I_h − b'), with the
        // composite a' = a_t − a_h (see the light model module)
        let ea_h2t = light_host_to_target.ea();
        let ea_target = ea_h2t * light_world_to_host.ea();
        let mut dr_dab_host = Vec::with_capacity(self.pattern_size());
        let mut dr_dab_target = Vec::with_capacity(self.pattern_size());
        for i in 0..self.pattern_size() {
            dr_dab_host.push(Vec2::new(ea_h2t * self.host_intensities[i], -ea_target));
            dr_dab_target.push(Vec2::new(-cached.transformed_host[i], ea_target));
        }

        ResidualJacobian {
            dp_dlogd,
            grad_itarget,
            dhost: FrameSubJacobian {
                dp_dqt: dhost_pose,
                dr_dab: dr_dab_host,
            },
            dtarget: FrameSubJacobian {
                dp_dqt: dtarget_pose,
                dr_dab: dr_dab_target,
            },
            is_inf_depth,
        }
    }

    /// Per-residual contributions to the global Hessian blocks, built from
    /// `Σ wᵢ gᵢ gᵢᵀ` and the dense Jacobian blocks.
    pub fn delta_hessian(&self, weights: &VecX, jacobian: &ResidualJacobian) -> DeltaHessian {
        let mut sum_wgg = Mat2::zeros();
        for i in 0..self.pattern_size() {
            let g = jacobian.grad_itarget[i];
            sum_wgg += weights[i] * g * g.transpose();
        }
        let sum_gradab_host = sum_gradab(weights, &jacobian.grad_itarget, &jacobian.dhost.dr_dab);
        let sum_gradab_target =
            sum_gradab(weights, &jacobian.grad_itarget, &jacobian.dtarget.dr_dab);

        let host_host = frame_frame_hessian::<true>(
            &jacobian.dhost.dp_dqt,
            &jacobian.dhost.dp_dqt,
            &jacobian.dhost.dr_dab,
            &jacobian.dhost.dr_dab,
            weights,
            &sum_wgg,
            &sum_gradab_host,
            &sum_gradab_host,
        );
        let host_target = frame_frame_hessian::<false>(
            &jacobian.dhost.dp_dqt,
            &jacobian.dtarget.dp_dqt,
            &jacobian.dhost.dr_dab,
            &jacobian.dtarget.dr_dab,
            weights,
            &sum_wgg,
            &sum_gradab_host,
            &sum_gradab_target,
        );
        let target_target = frame_frame_hessian::<true>(
            &jacobian.dtarget.dp_dqt,
            &jacobian.dtarget.dp_dqt,
            &jacobian.dtarget.dr_dab,
            &jacobian.dtarget.dr_dab,
            weights,
            &sum_wgg,
            &sum_gradab_target,
            &sum_gradab_target,
        );

        let host_point = frame_point_hessian(
            &jacobian.dhost.dp_dqt,
            &jacobian.dp_dlogd,
            &sum_wgg,
            &sum_gradab_host,
        );
        let target_point = frame_point_hessian(
            &jacobian.dtarget.dp_dqt,
            &jacobian.dp_dlogd,
            &sum_wgg,
            &sum_gradab_target,
        );

        let point_point = jacobian.dp_dlogd.dot(&(sum_wgg * jacobian.dp_dlogd));

        DeltaHessian {
            host_host,
            host_target,
            target_target,
            host_point,
            target_point,
            point_point,
        }
    }

    /// Per-residual contributions to the global gradient. Non-finite
    /// samples are skipped outright.
    pub fn delta_gradient(
        &self,
        weights: &VecX,
        values: &VecX,
        jacobian: &ResidualJacobian,
    ) -> DeltaGradient {
        let mut sum_wgr = Vec2::zeros();
        let mut ab_host = Vec2::zeros();
        let mut ab_target = Vec2::zeros();
        for i in 0..self.pattern_size() {
            let r = values[i];
            if !r.is_finite() {
                continue;
            }
            let wr = weights[i] * r;
            sum_wgr += wr * jacobian.grad_itarget[i];
            ab_host += wr * jacobian.dhost.dr_dab[i];
            ab_target += wr * jacobian.dtarget.dr_dab[i];
        }

        DeltaGradient {
            host: FrameGradient {
                pose: jacobian.dhost.dp_dqt.transpose() * sum_wgr,
                ab: ab_host,
            },
            target: FrameGradient {
                pose: jacobian.dtarget.dp_dqt.transpose() * sum_wgr,
                ab: ab_target,
            },
            point: jacobian.dp_dlogd.dot(&sum_wgr),
        }
    }
}

fn concat_pose_block(dp_dt: &Mat23, dp_dw: &Mat23) -> Mat26 {
    let mut block = Mat26::zeros();
    block.fixed_view_mut::<2, 3>(0, 0).copy_from(dp_dt);
    block.fixed_view_mut::<2, 3>(0, 3).copy_from(dp_dw);
    block
}

/// `Σ wᵢ gᵢ · dab_iᵀ` (2×2).
fn sum_gradab(weights: &VecX, grad_itarget: &[Vec2], dr_dab: &[Vec2]) -> Mat2 {
    let mut sum = Mat2::zeros();
    for i in 0..grad_itarget.len() {
        sum += weights[i] * grad_itarget[i] * dr_dab[i].transpose();
    }
    sum
}

/// Frame-frame block assembly; the same-frame specialization reuses the
/// transpose of the pose-affine coupling.
fn frame_frame_hessian<const SAME_FRAME: bool>(
    dp1: &Mat26,
    dp2: &Mat26,
    dab1: &[Vec2],
    dab2: &[Vec2],
    weights: &VecX,
    sum_wgg: &Mat2,
    sum_gradab1: &Mat2,
    sum_gradab2: &Mat2,
) -> FrameFrameHessian {
    let pose_pose = dp1.transpose() * sum_wgg * dp2;
    let pose_ab = dp1.transpose() * sum_gradab2;
    let ab_pose = if SAME_FRAME {
        pose_ab.transpose()
    } else {
        sum_gradab1.transpose() * dp2
    };
    let mut ab_ab = Mat2::zeros();
    for i in 0..dab1.len() {
        ab_ab += weights[i] * dab1[i] * dab2[i].transpose();
    }
    FrameFrameHessian {
        pose_pose,
        pose_ab,
        ab_pose,
        ab_ab,
    }
}

fn frame_point_hessian(
    dp: &Mat26,
    dp_dlogd: &Vec2,
    sum_wgg: &Mat2,
    sum_gradab: &Mat2,
) -> FramePointHessian {
    FramePointHessian {
        pose_d: dp.transpose() * sum_wgg * dp_dlogd,
        ab_d: sum_gradab.transpose() * dp_dlogd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PinholeCamera;
    use crate::frame::KeyFrameEntry;
    use crate::image::{image_from_fn, ImagePyramid};
    use crate::settings::EnergySettings;

    fn camera() -> PinholeCamera {
        PinholeCamera::new(100.0, 100.0, 50.0, 50.0, 100, 100)
    }

    /// Smooth quadratic image: the bicubic interpolant reproduces it
    /// exactly, so finite differences of the sampled residual are accurate.
    fn quadratic_entry() -> KeyFrameEntry {
        let img = image_from_fn(100, 100, |x, y| {
            40.0 + 0.6 * x - 0.4 * y + 0.015 * x * x + 0.01 * y * y + 0.008 * x * y
        });
        KeyFrameEntry::new(ImagePyramid::new(img, 1))
    }

    fn test_point(cam: &PinholeCamera, p: Vec2, log_depth: f64) -> OptimizedPoint {
        OptimizedPoint::new(p, cam.unmap(&p), log_depth)
    }

    fn build_residual(
        host_to_target: &SE3,
        point: &OptimizedPoint,
        settings: &EnergySettings,
    ) -> (Residual, KeyFrameEntry, KeyFrameEntry) {
        let cam = camera();
        let host_entry = quadratic_entry();
        let target_entry = quadratic_entry();
        let residual = Residual::new(
            0,
            0,
            1,
            0,
            0,
            &cam,
            &cam,
            &host_entry,
            point,
            host_to_target,
            &settings.residual,
        );
        (residual, host_entry, target_entry)
    }

    #[test]
    fn test_values_are_zero_for_identical_images_at_identity() {
        let cam = camera();
        let settings = EnergySettings::default();
        let point = test_point(&cam, Vec2::new(50.0, 50.0), 0.0);
        let (residual, _host, target) = build_residual(&SE3::identity(), &point, &settings);
        let (values, cached) = residual.values(
            &SE3::identity(),
            &AffLight::identity(),
            0.0,
            &cam,
            &target,
        );
        assert!((cached.reproj - point.p).norm() < 1e-9);
        for i in 0..values.len() {
            assert!(values[i].abs() < 1e-8, "sample {i} = {}", values[i]);
        }
    }

    #[test]
    fn test_off_image_samples_are_infinite_but_harmless() {
        let cam = camera();
        let settings = EnergySettings::default();
        // point near the border: inside with PH margin at construction
        let point = test_point(&cam, Vec2::new(4.0, 50.0), 0.0);
        let (residual, _host, target) = build_residual(&SE3::identity(), &point, &settings);

        // push the reprojection outside with a lateral move
        let shifted = SE3::from_translation(Vec3::new(-0.05, 0.0, 0.0));
        let (values, _) =
            residual.values(&shifted, &AffLight::identity(), 0.0, &cam, &target);
        assert!(values.iter().any(|v| v.is_infinite()));

        let loss = LossFunction::Trivial;
        let weights = residual.weights(&values, &loss, &settings.residual.weighting);
        for i in 0..values.len() {
            if values[i].is_infinite() {
                assert_eq!(weights[i], 0.0);
            }
        }
    }

    #[test]
    fn test_infinite_depth_zeroes_point_column() {
        let cam = camera();
        let settings = EnergySettings::default();
        let point = test_point(&cam, Vec2::new(50.0, 50.0), 0.0);
        let host_to_target = SE3::from_translation(Vec3::new(0.02, 0.0, 0.0));
        let (residual, _host, target) = build_residual(&host_to_target, &point, &settings);

        let motion = MotionDerivatives::new(
            &SE3::identity(),
            &SE3::identity(),
            &host_to_target.inverse(),
            &SE3::identity(),
        );
        let (_, cached) = residual.values(
            &host_to_target,
            &AffLight::identity(),
            f64::INFINITY,
            &cam,
            &target,
        );
        let jac = residual.jacobian(
            &host_to_target,
            &motion,
            &AffLight::identity(),
            &AffLight::identity(),
            f64::INFINITY,
            &cached,
            &cam,
            &target,
            &settings.residual.depth,
        );
        assert!(jac.is_inf_depth);
        assert_eq!(jac.dp_dlogd, Vec2::zeros());
    }

    /// Finite-difference check of the pose, depth and affine derivative
    /// rows through the full value path.
    #[test]
    fn test_jacobian_matches_finite_differences() {
        let cam = camera();
        let settings = EnergySettings::default();
        let point = test_point(&cam, Vec2::new(46.0, 54.0), 0.1);

        let body_host = SE3::new(
            crate::math::so3_exp(&Vec3::new(0.01, -0.02, 0.005)),
            Vec3::new(0.02, 0.01, -0.03),
        );
        let body_target = SE3::new(
            crate::math::so3_exp(&Vec3::new(-0.015, 0.01, 0.02)),
            Vec3::new(-0.04, 0.02, 0.05),
        );
        let host_to_target = &body_target.inverse() * &body_host;

        let light_host = AffLight::new(0.08, 2.0);
        let light_target = AffLight::new(-0.05, -1.0);
        let light_h2t = light_target * light_host.inverse();

        let (residual, _host, target) = build_residual(&host_to_target, &point, &settings);
        let motion = MotionDerivatives::new(
            &SE3::identity(),
            &body_host,
            &body_target,
            &SE3::identity(),
        );
        let log_depth = point.log_depth;
        let (values0, cached) =
            residual.values(&host_to_target, &light_h2t, log_depth, &cam, &target);
        let jac = residual.jacobian(
            &host_to_target,
            &motion,
            &light_host,
            &light_h2t,
            log_depth,
            &cached,
            &cam,
            &target,
            &settings.residual.depth,
        );

        let eps = 1e-6;
        let pattern_size = residual.pattern_size();

        let eval = |h2t: &SE3, l_h: &AffLight, l_t: &AffLight, logd: f64| -> VecX {
            let l = *l_t * l_h.inverse();
            residual.values(h2t, &l, logd, &cam, &target).0
        };

        // log-depth column
        let vp = eval(&host_to_target, &light_host, &light_target, log_depth + eps);
        let vm = eval(&host_to_target, &light_host, &light_target, log_depth - eps);
        for i in 0..pattern_size {
            let numeric = (vp[i] - vm[i]) / (2.0 * eps);
            let analytic = jac.grad_itarget[i].dot(&jac.dp_dlogd);
            assert!(
                (numeric - analytic).abs() < 2e-4 * (1.0 + numeric.abs()),
                "logd sample {i}: numeric {numeric} analytic {analytic}"
            );
        }

        // pose tangent columns, host then target
        for axis in 0..6 {
            let mut unit = Vec6::zeros();
            unit[axis] = eps;
            let perturb = |pose: &SE3, xi: &Vec6| {
                let dt = Vec3::new(xi[0], xi[1], xi[2]);
                let dw = Vec3::new(xi[3], xi[4], xi[5]);
                SE3::new(crate::math::so3_exp(&dw) * pose.rotation(), pose.translation() + dt)
            };

            let h2t_p = &perturb(&body_target, &Vec6::zeros()).inverse() * &perturb(&body_host, &unit);
            let h2t_m =
                &perturb(&body_target, &Vec6::zeros()).inverse() * &perturb(&body_host, &(-unit));
            let vp = eval(&h2t_p, &light_host, &light_target, log_depth);
            let vm = eval(&h2t_m, &light_host, &light_target, log_depth);
            for i in 0..pattern_size {
                let numeric = (vp[i] - vm[i]) / (2.0 * eps);
                let analytic = jac.grad_itarget[i].dot(&(jac.dhost.dp_dqt * (unit / eps)));
                assert!(
                    (numeric - analytic).abs() < 2e-3 * (1.0 + numeric.abs()),
                    "host axis {axis} sample {i}: numeric {numeric} analytic {analytic}"
                );
            }

            let h2t_p = &perturb(&body_target, &unit).inverse() * &body_host;
            let h2t_m = &perturb(&body_target, &(-unit)).inverse() * &body_host;
            let vp = eval(&h2t_p, &light_host, &light_target, log_depth);
            let vm = eval(&h2t_m, &light_host, &light_target, log_depth);
            for i in 0..pattern_size {
                let numeric = (vp[i] - vm[i]) / (2.0 * eps);
                let analytic = jac.grad_itarget[i].dot(&(jac.dtarget.dp_dqt * (unit / eps)));
                assert!(
                    (numeric - analytic).abs() < 2e-3 * (1.0 + numeric.abs()),
                    "target axis {axis} sample {i}: numeric {numeric} analytic {analytic}"
                );
            }
        }

        // affine columns: (a_h, b_h, a_t, b_t)
        let perturb_light = |l: &AffLight, da: f64, db: f64| AffLight::new(l.a + da, l.b + db);
        let cases: [(AffLight, AffLight, AffLight, AffLight); 4] = [
            (
                perturb_light(&light_host, eps, 0.0),
                perturb_light(&light_host, -eps, 0.0),
                light_target,
                light_target,
            ),
            (
                perturb_light(&light_host, 0.0, eps),
                perturb_light(&light_host, 0.0, -eps),
                light_target,
                light_target,
            ),
            (
                light_host,
                light_host,
                perturb_light(&light_target, eps, 0.0),
                perturb_light(&light_target, -eps, 0.0),
            ),
            (
                light_host,
                light_host,
                perturb_light(&light_target, 0.0, eps),
                perturb_light(&light_target, 0.0, -eps),
            ),
        ];
        for (case, (lh_p, lh_m, lt_p, lt_m)) in cases.iter().enumerate() {
            let vp = eval(&host_to_target, lh_p, lt_p, log_depth);
            let vm = eval(&host_to_target, lh_m, lt_m, log_depth);
            for i in 0..pattern_size {
                let numeric = (vp[i] - vm[i]) / (2.0 * eps);
                let analytic = match case {
                    0 => jac.dhost.dr_dab[i].x,
                    1 => jac.dhost.dr_dab[i].y,
                    2 => jac.dtarget.dr_dab[i].x,
                    _ => jac.dtarget.dr_dab[i].y,
                };
                assert!(
                    (numeric - analytic).abs() < 1e-5 * (1.0 + numeric.abs()),
                    "affine case {case} sample {i}: numeric {numeric} analytic {analytic}"
                );
            }
        }

        // finally the raw values themselves must be finite here
        assert!(values0.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_delta_hessian_blocks_are_consistent() {
        let cam = camera();
        let settings = EnergySettings::default();
        let point = test_point(&cam, Vec2::new(52.0, 48.0), 0.0);
        let host_to_target = SE3::from_translation(Vec3::new(0.01, -0.005, 0.002));
        let (residual, _host, target) = build_residual(&host_to_target, &point, &settings);
        let motion = MotionDerivatives::new(
            &SE3::identity(),
            &SE3::identity(),
            &host_to_target.inverse(),
            &SE3::identity(),
        );
        let (values, cached) = residual.values(
            &host_to_target,
            &AffLight::identity(),
            0.0,
            &cam,
            &target,
        );
        let jac = residual.jacobian(
            &host_to_target,
            &motion,
            &AffLight::identity(),
            &AffLight::identity(),
            0.0,
            &cached,
            &cam,
            &target,
            &settings.residual.depth,
        );
        let loss = LossFunction::Trivial;
        let weights = residual.weights(&values, &loss, &settings.residual.weighting);
        let dh = residual.delta_hessian(&weights, &jac);

        // same-frame blocks are symmetric
        assert!((dh.host_host.pose_pose - dh.host_host.pose_pose.transpose()).norm() < 1e-12);
        assert!((dh.host_host.ab_pose - dh.host_host.pose_ab.transpose()).norm() < 1e-12);
        // point-point is a weighted square
        assert!(dh.point_point >= 0.0);
        // cross-block transpose identity
        let t = dh.host_target.transpose();
        assert!((t.pose_pose - dh.host_target.pose_pose.transpose()).norm() < 1e-12);
    }
}

//! Parameter store of the windowed optimizer.
//!
//! Owns the current estimate: per-keyframe body-to-world transforms,
//! per-(keyframe, camera) affine light and per-point log-depth. Keyframe 0
//! is the gauge anchor; its pose and light are never touched. Updates are
//! applied in tangent space with the descent convention `x ← x ⊖ δ`,
//! clamped to the configured depth and affine bounds. `save_state` /
//! `recover_state` implement full rollback for rejected steps; `apply`
//! writes the local estimate back to the external keyframes.

use crate::camera::CameraBundle;
use crate::frame::KeyFrame;
use crate::math::{so3_exp, AffLight, SE3};
use crate::optimize::delta::{DeltaParameterVector, FrameParameterOrder};
use crate::settings::EnergySettings;

/// Identifies an optimized point inside the external keyframe structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointLocation {
    pub host_ind: usize,
    pub host_cam_ind: usize,
    pub point_ind: usize,
}

/// Snapshot of the mutable state, used for step rollback.
#[derive(Debug, Clone)]
pub struct ParametersState {
    body_to_world: Vec<SE3>,
    light: Vec<Vec<AffLight>>,
    log_depths: Vec<f64>,
}

pub struct Parameters {
    order: FrameParameterOrder,
    body_to_world: Vec<SE3>,
    /// light[k][c] is the world→(keyframe k, camera c) transform.
    light: Vec<Vec<AffLight>>,
    log_depths: Vec<f64>,
    point_locations: Vec<PointLocation>,
}

impl Parameters {
    /// Copy the mutable state out of the external keyframes.
    pub fn new(cam: &CameraBundle, key_frames: &[KeyFrame]) -> Self {
        let body_to_world = key_frames.iter().map(|kf| kf.body_to_world.clone()).collect();
        let light = key_frames
            .iter()
            .map(|kf| {
                kf.frames
                    .iter()
                    .map(|entry| entry.light_world_to_this)
                    .collect()
            })
            .collect();
        Parameters {
            order: FrameParameterOrder::new(key_frames.len(), cam.size()),
            body_to_world,
            light,
            log_depths: Vec::new(),
            point_locations: Vec::new(),
        }
    }

    /// Register the contiguous `[0, P)` list of points used by the energy
    /// function, pulling their current log-depths from the keyframes.
    pub fn set_points(&mut self, locations: Vec<PointLocation>, key_frames: &[KeyFrame]) {
        self.log_depths = locations
            .iter()
            .map(|loc| {
                key_frames[loc.host_ind].frames[loc.host_cam_ind].optimized_points[loc.point_ind]
                    .log_depth
            })
            .collect();
        self.point_locations = locations;
    }

    pub fn order(&self) -> &FrameParameterOrder {
        &self.order
    }

    pub fn num_key_frames(&self) -> usize {
        self.order.num_keyframes()
    }

    pub fn cam_bundle_size(&self) -> usize {
        self.order.num_cameras()
    }

    pub fn num_points(&self) -> usize {
        self.log_depths.len()
    }

    pub fn body_to_world(&self, frame_ind: usize) -> &SE3 {
        &self.body_to_world[frame_ind]
    }

    pub fn light_world_to_frame(&self, frame_ind: usize, cam_ind: usize) -> AffLight {
        self.light[frame_ind][cam_ind]
    }

    pub fn log_depth(&self, point_ind: usize) -> f64 {
        self.log_depths[point_ind]
    }

    pub fn point_location(&self, point_ind: usize) -> PointLocation {
        self.point_locations[point_ind]
    }

    /// Apply a solved step with the descent convention `x ← x ⊖ δ`.
    ///
    /// Keyframe 0 is skipped entirely (gauge). The optional bootstrap
    /// constraint restricts keyframe 1's translation to the sphere around
    /// keyframe 0 or freezes it when the baseline is below the minimum
    /// radius. Affine and log-depth results are clamped to their bounds.
    pub fn update(&mut self, delta: &DeltaParameterVector, settings: &EnergySettings) {
        let opt = &settings.optimization;
        for frame_ind in 1..self.order.num_keyframes() {
            let mut dt = delta.translation_block(frame_ind);
            let mut dw = delta.rotation_block(frame_ind);

            if frame_ind == 1 && opt.constrain_second_kf {
                if opt.fixed_rotation_on_second_kf {
                    dw.fill(0.0);
                }
                let center = *self.body_to_world[0].translation();
                let current = *self.body_to_world[1].translation();
                let radial = current - center;
                let radius = radial.norm();
                if radius > opt.min_first_to_second_radius {
                    // move on the sphere: project the step onto the tangent
                    // plane, then retract back to the original radius
                    let normal = radial / radius;
                    let dt_tangent = dt - normal * normal.dot(&dt);
                    let moved = current - dt_tangent - center;
                    let new_translation = center + moved.normalize() * radius;
                    let pose = &mut self.body_to_world[1];
                    pose.set_rotation(so3_exp(&(-dw)) * pose.rotation());
                    pose.set_translation(new_translation);
                    self.update_affine(delta, frame_ind, settings);
                    continue;
                } else {
                    dt.fill(0.0);
                }
            }

            let pose = &mut self.body_to_world[frame_ind];
            pose.set_rotation(so3_exp(&(-dw)) * pose.rotation());
            pose.set_translation(pose.translation() - dt);
            self.update_affine(delta, frame_ind, settings);
        }

        let depth = &settings.residual.depth;
        for (point_ind, log_depth) in self.log_depths.iter_mut().enumerate() {
            let updated = *log_depth - delta.point_delta(point_ind);
            if updated.is_finite() {
                *log_depth = updated.clamp(depth.min_log(), depth.max_log());
            }
        }
    }

    fn update_affine(
        &mut self,
        delta: &DeltaParameterVector,
        frame_ind: usize,
        settings: &EnergySettings,
    ) {
        if !settings.affine_light.optimize_affine_light {
            return;
        }
        for cam_ind in 0..self.order.num_cameras() {
            let dab = delta.affine_block(frame_ind, cam_ind);
            let light = &mut self.light[frame_ind][cam_ind];
            light.a = settings.affine_light.clamp_a(light.a - dab.x);
            light.b = settings.affine_light.clamp_b(light.b - dab.y);
        }
    }

    pub fn save_state(&self) -> ParametersState {
        ParametersState {
            body_to_world: self.body_to_world.clone(),
            light: self.light.clone(),
            log_depths: self.log_depths.clone(),
        }
    }

    pub fn recover_state(&mut self, state: ParametersState) {
        self.body_to_world = state.body_to_world;
        self.light = state.light;
        self.log_depths = state.log_depths;
    }

    /// Write the local estimate back to the external keyframes.
    pub fn apply(&self, key_frames: &mut [KeyFrame]) {
        for (frame_ind, key_frame) in key_frames.iter_mut().enumerate() {
            key_frame.body_to_world = self.body_to_world[frame_ind].clone();
            for (cam_ind, entry) in key_frame.frames.iter_mut().enumerate() {
                entry.light_world_to_this = self.light[frame_ind][cam_ind];
            }
        }
        for (point_ind, loc) in self.point_locations.iter().enumerate() {
            key_frames[loc.host_ind].frames[loc.host_cam_ind].optimized_points[loc.point_ind]
                .log_depth = self.log_depths[point_ind];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraModel, PinholeCamera};
    use crate::frame::{KeyFrameEntry, OptimizedPoint};
    use crate::image::{image_from_fn, ImagePyramid};
    use crate::math::{Vec2, Vec3};

    fn bundle() -> CameraBundle {
        CameraBundle::new(vec![(
            Box::new(PinholeCamera::new(100.0, 100.0, 50.0, 50.0, 100, 100))
                as Box<dyn CameraModel>,
            SE3::identity(),
        )])
    }

    fn keyframes(n: usize) -> Vec<KeyFrame> {
        (0..n)
            .map(|i| {
                let pyramid = ImagePyramid::new(image_from_fn(32, 32, |x, y| x + y), 1);
                let mut entry = KeyFrameEntry::new(pyramid);
                entry.optimized_points.push(OptimizedPoint::new(
                    Vec2::new(16.0, 16.0),
                    Vec3::new(0.0, 0.0, 1.0),
                    0.0,
                ));
                KeyFrame::new(
                    SE3::from_translation(Vec3::new(i as f64, 0.0, 0.0)),
                    vec![entry],
                )
            })
            .collect()
    }

    fn params_with_points(key_frames: &[KeyFrame]) -> Parameters {
        let cam = bundle();
        let mut params = Parameters::new(&cam, key_frames);
        let locations = (0..key_frames.len())
            .map(|host_ind| PointLocation {
                host_ind,
                host_cam_ind: 0,
                point_ind: 0,
            })
            .collect();
        params.set_points(locations, key_frames);
        params
    }

    #[test]
    fn test_update_skips_gauge_frame() {
        let kfs = keyframes(3);
        let mut params = params_with_points(&kfs);
        let anchor_before = params.body_to_world(0).clone();
        let light_before = params.light_world_to_frame(0, 0);
        let second_before = params.body_to_world(1).clone();
        // keyframe 0 owns no block in the layout, so even a dense step
        // cannot move it
        let mut frame = crate::math::VecX::zeros(16);
        for v in frame.iter_mut() {
            *v = 0.1;
        }
        let delta =
            DeltaParameterVector::from_parts(3, 1, frame, crate::math::VecX::from_vec(vec![0.0; 3]));
        params.update(&delta, &EnergySettings::default());
        assert_eq!(params.body_to_world(0), &anchor_before);
        assert_eq!(params.light_world_to_frame(0, 0), light_before);
        assert_ne!(params.body_to_world(1), &second_before);
    }

    #[test]
    fn test_save_update_recover_restores_state() {
        let kfs = keyframes(2);
        let mut params = params_with_points(&kfs);
        let saved = params.save_state();
        let pose_before = params.body_to_world(1).clone();
        let depth_before = params.log_depth(0);

        let settings = EnergySettings::default();
        let mut delta = DeltaParameterVector::zeros(2, 1, 2);
        // craft a nonzero step through the public solve-free path
        let frame = {
            let mut f = delta.frame().clone();
            for v in f.iter_mut() {
                *v = 0.01;
            }
            f
        };
        let point = {
            let mut p = delta.point().clone();
            for v in p.iter_mut() {
                *v = 0.02;
            }
            p
        };
        delta = DeltaParameterVector::from_parts(2, 1, frame, point);
        params.update(&delta, &settings);
        assert_ne!(params.body_to_world(1), &pose_before);
        assert_ne!(params.log_depth(0), depth_before);

        params.recover_state(saved);
        assert_eq!(params.body_to_world(1), &pose_before);
        assert_eq!(params.log_depth(0), depth_before);
    }

    #[test]
    fn test_update_clamps_depth_bounds() {
        let kfs = keyframes(2);
        let mut params = params_with_points(&kfs);
        let mut settings = EnergySettings::default();
        settings.residual.depth.min = 0.5;
        settings.residual.depth.max = 2.0;

        let point = crate::math::VecX::from_vec(vec![-100.0, 100.0]);
        let delta = DeltaParameterVector::from_parts(2, 1, crate::math::VecX::zeros(8), point);
        params.update(&delta, &settings);
        assert!((params.log_depth(0) - 2.0f64.ln()).abs() < 1e-12);
        assert!((params.log_depth(1) - 0.5f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_spherical_constraint_preserves_radius() {
        let kfs = keyframes(2);
        let mut params = params_with_points(&kfs);
        let mut settings = EnergySettings::default();
        settings.optimization.constrain_second_kf = true;
        settings.optimization.min_first_to_second_radius = 0.1;

        let radius_before = (params.body_to_world(1).translation()
            - params.body_to_world(0).translation())
        .norm();

        let mut frame = crate::math::VecX::zeros(8);
        frame[0] = 0.05;
        frame[1] = 0.2;
        frame[2] = -0.1;
        let delta = DeltaParameterVector::from_parts(2, 1, frame, crate::math::VecX::zeros(2));
        params.update(&delta, &settings);

        let radius_after = (params.body_to_world(1).translation()
            - params.body_to_world(0).translation())
        .norm();
        assert!((radius_after - radius_before).abs() < 1e-12);
    }

    #[test]
    fn test_apply_writes_back_to_keyframes() {
        let mut kfs = keyframes(2);
        let mut params = params_with_points(&kfs);
        let mut frame = crate::math::VecX::zeros(8);
        frame[0] = 0.25;
        let point = crate::math::VecX::from_vec(vec![0.1, -0.1]);
        let delta = DeltaParameterVector::from_parts(2, 1, frame, point);
        params.update(&delta, &EnergySettings::default());
        params.apply(&mut kfs);
        assert_eq!(&kfs[1].body_to_world, params.body_to_world(1));
        assert_eq!(
            kfs[0].frames[0].optimized_points[0].log_depth,
            params.log_depth(0)
        );
    }
}

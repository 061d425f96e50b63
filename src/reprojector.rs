//! Rig-wide point reprojection into a candidate target frame.
//!
//! This is the pre-filter deciding which (host, target) pairs can carry
//! residuals: a [`Reprojection`] is emitted exactly when the point is
//! mappable in the target camera and lands on the image with the requested
//! border. Iteration order is deterministic: target camera outer, then
//! host keyframe, host camera, point.

use std::marker::PhantomData;

use crate::camera::CameraBundle;
use crate::frame::{ImmaturePoint, KeyFrame, KeyFrameEntry, OptimizedPoint};
use crate::math::{SE3, Vec2, Vec3};

/// One successful projection of a hosted point into a target camera.
#[derive(Debug, Clone)]
pub struct Reprojection {
    pub host_ind: usize,
    pub host_cam_ind: usize,
    pub target_cam_ind: usize,
    pub point_ind: usize,
    pub reprojected: Vec2,
    pub reprojected_depth: f64,
}

/// Point kinds the reprojector understands. Two concrete sources share
/// the generic projection core; there is no runtime dispatch.
pub trait ReprojectablePoint {
    fn of(entry: &KeyFrameEntry) -> &[Self]
    where
        Self: Sized;

    fn direction(&self) -> &Vec3;

    fn depth(&self) -> f64;
}

impl ReprojectablePoint for OptimizedPoint {
    fn of(entry: &KeyFrameEntry) -> &[Self] {
        &entry.optimized_points
    }

    fn direction(&self) -> &Vec3 {
        &self.dir
    }

    fn depth(&self) -> f64 {
        OptimizedPoint::depth(self)
    }
}

impl ReprojectablePoint for ImmaturePoint {
    fn of(entry: &KeyFrameEntry) -> &[Self] {
        &entry.immature_points
    }

    fn direction(&self) -> &Vec3 {
        &self.dir
    }

    fn depth(&self) -> f64 {
        self.depth
    }
}

/// Projects every point hosted by the given keyframes into every camera of
/// a target rig pose.
pub struct Reprojector<'a, P> {
    key_frames: &'a [KeyFrame],
    cam: &'a CameraBundle,
    target_world_to_body: SE3,
    border: i32,
    _point: PhantomData<P>,
}

impl<'a, P: ReprojectablePoint> Reprojector<'a, P> {
    pub fn new(
        key_frames: &'a [KeyFrame],
        cam: &'a CameraBundle,
        target_body_to_world: &SE3,
        border: i32,
    ) -> Self {
        Reprojector {
            key_frames,
            cam,
            target_world_to_body: target_body_to_world.inverse(),
            border,
            _point: PhantomData,
        }
    }

    pub fn reproject(&self) -> Vec<Reprojection> {
        let mut reprojections = Vec::new();
        let num_cams = self.cam.size();
        for target_cam_ind in 0..num_cams {
            let target_cam = self.cam.cam(target_cam_ind);
            let world_to_target_cam =
                &self.cam.slot(target_cam_ind).body_to_this * &self.target_world_to_body;
            for (host_ind, key_frame) in self.key_frames.iter().enumerate() {
                let host_body_to_target_cam = &world_to_target_cam * &key_frame.body_to_world;
                for host_cam_ind in 0..num_cams {
                    let host_cam_to_target_cam =
                        &host_body_to_target_cam * &self.cam.slot(host_cam_ind).this_to_body;
                    let points = P::of(&key_frame.frames[host_cam_ind]);
                    for (point_ind, point) in points.iter().enumerate() {
                        let v_in_target = host_cam_to_target_cam
                            .transform(&(point.direction() * point.depth()));
                        if !target_cam.is_mappable(&v_in_target) {
                            continue;
                        }
                        let reprojected = target_cam.map(&v_in_target);
                        if !target_cam.is_on_image(&reprojected, self.border) {
                            continue;
                        }
                        reprojections.push(Reprojection {
                            host_ind,
                            host_cam_ind,
                            target_cam_ind,
                            point_ind,
                            reprojected,
                            reprojected_depth: v_in_target.norm(),
                        });
                    }
                }
            }
        }
        reprojections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraModel, PinholeCamera};
    use crate::frame::KeyFrameEntry;
    use crate::image::{image_from_fn, ImagePyramid};

    fn single_cam_bundle() -> CameraBundle {
        CameraBundle::new(vec![(
            Box::new(PinholeCamera::new(100.0, 100.0, 50.0, 50.0, 100, 100))
                as Box<dyn CameraModel>,
            SE3::identity(),
        )])
    }

    fn keyframe_with_point(p: Vec2, depth: f64, cam: &CameraBundle) -> KeyFrame {
        let pyramid = ImagePyramid::new(image_from_fn(100, 100, |x, y| x + y), 1);
        let mut entry = KeyFrameEntry::new(pyramid);
        let dir = cam.cam(0).unmap(&p);
        entry
            .optimized_points
            .push(OptimizedPoint::new(p, dir, depth.ln()));
        KeyFrame::new(SE3::identity(), vec![entry])
    }

    #[test]
    fn test_reprojects_point_at_same_pose_onto_itself() {
        let cam = single_cam_bundle();
        let kf = keyframe_with_point(Vec2::new(40.0, 60.0), 2.0, &cam);
        let frames = [kf];
        let reprojector: Reprojector<OptimizedPoint> =
            Reprojector::new(&frames, &cam, &SE3::identity(), 2);
        let reprojections = reprojector.reproject();
        assert_eq!(reprojections.len(), 1);
        assert!((reprojections[0].reprojected - Vec2::new(40.0, 60.0)).norm() < 1e-9);
        assert!((reprojections[0].reprojected_depth - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_omits_point_leaving_the_border() {
        let cam = single_cam_bundle();
        let kf = keyframe_with_point(Vec2::new(3.0, 50.0), 1.0, &cam);
        let frames = [kf];
        // shift the target so the point projects off the 4-pixel border
        let target = SE3::from_translation(Vec3::new(0.05, 0.0, 0.0));
        let reprojector: Reprojector<OptimizedPoint> =
            Reprojector::new(&frames, &cam, &target, 4);
        assert!(reprojector.reproject().is_empty());
    }

    #[test]
    fn test_immature_points_use_plain_depth() {
        let cam = single_cam_bundle();
        let pyramid = ImagePyramid::new(image_from_fn(100, 100, |x, y| x * y), 1);
        let mut entry = KeyFrameEntry::new(pyramid);
        let p = Vec2::new(55.0, 45.0);
        entry.immature_points.push(ImmaturePoint {
            dir: cam.cam(0).unmap(&p),
            p,
            depth: 3.0,
        });
        let frames = [KeyFrame::new(SE3::identity(), vec![entry])];
        let reprojector: Reprojector<ImmaturePoint> =
            Reprojector::new(&frames, &cam, &SE3::identity(), 0);
        let reprojections = reprojector.reproject();
        assert_eq!(reprojections.len(), 1);
        assert!((reprojections[0].reprojected - p).norm() < 1e-9);
    }
}

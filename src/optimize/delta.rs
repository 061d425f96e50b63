//! Integer parametrization layout and tangent-space update vectors.
//!
//! Keyframe 0 is the gauge anchor and owns no parameters. Every keyframe
//! k ≥ 1 owns a contiguous block of `6 + 2·C` scalars ordered
//! `[translation(3), rotation-tangent(3), (a, b) per rig camera]`; points
//! occupy a separate 1-scalar-per-point block. Both block sizes are fixed
//! over an optimizer invocation.

use crate::math::{Vec2, Vec3, VecX};

/// Maps (keyframe, camera) indices to offsets inside the frame block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameParameterOrder {
    num_keyframes: usize,
    num_cameras: usize,
}

impl FrameParameterOrder {
    pub fn new(num_keyframes: usize, num_cameras: usize) -> Self {
        FrameParameterOrder {
            num_keyframes,
            num_cameras,
        }
    }

    pub fn num_keyframes(&self) -> usize {
        self.num_keyframes
    }

    pub fn num_cameras(&self) -> usize {
        self.num_cameras
    }

    /// Scalars owned by one keyframe: 6 pose + 2 affine per camera.
    pub fn frame_block_size(&self) -> usize {
        6 + 2 * self.num_cameras
    }

    /// Start of keyframe `k`'s block; `k == 0` owns no parameters.
    pub fn frame_offset(&self, frame_ind: usize) -> usize {
        debug_assert!(frame_ind >= 1 && frame_ind < self.num_keyframes);
        (frame_ind - 1) * self.frame_block_size()
    }

    pub fn translation_offset(&self, frame_ind: usize) -> usize {
        self.frame_offset(frame_ind)
    }

    pub fn rotation_offset(&self, frame_ind: usize) -> usize {
        self.frame_offset(frame_ind) + 3
    }

    pub fn affine_offset(&self, frame_ind: usize, cam_ind: usize) -> usize {
        debug_assert!(cam_ind < self.num_cameras);
        self.frame_offset(frame_ind) + 6 + 2 * cam_ind
    }

    /// Total frame-parameter dimension F.
    pub fn total_frame_parameters(&self) -> usize {
        (self.num_keyframes - 1) * self.frame_block_size()
    }
}

/// Tangent-space step for all frames and points, laid out by
/// [`FrameParameterOrder`].
#[derive(Debug, Clone)]
pub struct DeltaParameterVector {
    order: FrameParameterOrder,
    frame: VecX,
    point: VecX,
}

impl DeltaParameterVector {
    pub fn zeros(num_keyframes: usize, num_cameras: usize, num_points: usize) -> Self {
        let order = FrameParameterOrder::new(num_keyframes, num_cameras);
        DeltaParameterVector {
            frame: VecX::zeros(order.total_frame_parameters()),
            point: VecX::zeros(num_points),
            order,
        }
    }

    pub fn from_parts(
        num_keyframes: usize,
        num_cameras: usize,
        frame: VecX,
        point: VecX,
    ) -> Self {
        let order = FrameParameterOrder::new(num_keyframes, num_cameras);
        debug_assert_eq!(frame.len(), order.total_frame_parameters());
        DeltaParameterVector {
            order,
            frame,
            point,
        }
    }

    pub fn order(&self) -> &FrameParameterOrder {
        &self.order
    }

    pub fn frame(&self) -> &VecX {
        &self.frame
    }

    pub fn point(&self) -> &VecX {
        &self.point
    }

    pub fn translation_block(&self, frame_ind: usize) -> Vec3 {
        let off = self.order.translation_offset(frame_ind);
        Vec3::new(self.frame[off], self.frame[off + 1], self.frame[off + 2])
    }

    pub fn rotation_block(&self, frame_ind: usize) -> Vec3 {
        let off = self.order.rotation_offset(frame_ind);
        Vec3::new(self.frame[off], self.frame[off + 1], self.frame[off + 2])
    }

    pub fn affine_block(&self, frame_ind: usize, cam_ind: usize) -> Vec2 {
        let off = self.order.affine_offset(frame_ind, cam_ind);
        Vec2::new(self.frame[off], self.frame[off + 1])
    }

    pub fn point_delta(&self, point_ind: usize) -> f64 {
        self.point[point_ind]
    }

    pub fn dot(&self, other: &DeltaParameterVector) -> f64 {
        self.frame.dot(&other.frame) + self.point.dot(&other.point)
    }

    /// Zero all affine sub-blocks (affine light frozen).
    pub fn set_affine_zero(&mut self) {
        for frame_ind in 1..self.order.num_keyframes() {
            for cam_ind in 0..self.order.num_cameras() {
                let off = self.order.affine_offset(frame_ind, cam_ind);
                self.frame[off] = 0.0;
                self.frame[off + 1] = 0.0;
            }
        }
    }

    /// Zero every point entry whose magnitude exceeds `max_abs_delta_d`.
    /// Entries within the bound keep their value and sign.
    pub fn clamp_depths(&mut self, max_abs_delta_d: f64) {
        for d in self.point.iter_mut() {
            if d.abs() > max_abs_delta_d {
                *d = 0.0;
            }
        }
    }
}

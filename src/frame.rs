//! Keyframe state shared between the tracker and the windowed optimizer.
//!
//! A [`KeyFrame`] owns one [`KeyFrameEntry`] per rig camera. Pyramids and
//! interpolators are immutable after construction; pose, affine light and
//! point depths are mutated only by the optimizer through its parameter
//! store and written back at `apply()`.

use crate::image::ImagePyramid;
use crate::math::{AffLight, SE3, Vec2, Vec3};

/// Lifecycle state of an optimized point. Only ACTIVE points contribute
/// to the windowed energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointState {
    Active,
    /// Left the image of every plausible target.
    Oob,
    /// Rejected by residual statistics.
    Outlier,
    /// Absorbed into the marginalization prior.
    Marginalized,
}

/// Inverse-depth point anchored to the keyframe camera that hosts it.
#[derive(Debug, Clone)]
pub struct OptimizedPoint {
    /// Host pixel.
    pub p: Vec2,
    /// Unit bearing of the host pixel in the host camera frame.
    pub dir: Vec3,
    /// log(depth); non-finite values mean a point at infinity.
    pub log_depth: f64,
    pub state: PointState,
}

impl OptimizedPoint {
    pub fn new(p: Vec2, dir: Vec3, log_depth: f64) -> Self {
        OptimizedPoint {
            p,
            dir,
            log_depth,
            state: PointState::Active,
        }
    }

    pub fn depth(&self) -> f64 {
        self.log_depth.exp()
    }
}

/// Depth hypothesis still being refined by the immature-point tracker.
/// Carries a plain depth; promotion to [`OptimizedPoint`] is decided by
/// the surrounding system.
#[derive(Debug, Clone)]
pub struct ImmaturePoint {
    pub p: Vec2,
    pub dir: Vec3,
    pub depth: f64,
}

/// Per-(keyframe, camera) state.
pub struct KeyFrameEntry {
    pub pyramid: ImagePyramid,
    pub light_world_to_this: AffLight,
    pub optimized_points: Vec<OptimizedPoint>,
    pub immature_points: Vec<ImmaturePoint>,
}

impl KeyFrameEntry {
    pub fn new(pyramid: ImagePyramid) -> Self {
        KeyFrameEntry {
            pyramid,
            light_world_to_this: AffLight::identity(),
            optimized_points: Vec::new(),
            immature_points: Vec::new(),
        }
    }
}

/// One accepted image batch across the rig.
pub struct KeyFrame {
    pub body_to_world: SE3,
    pub frames: Vec<KeyFrameEntry>,
}

impl KeyFrame {
    pub fn new(body_to_world: SE3, frames: Vec<KeyFrameEntry>) -> Self {
        KeyFrame {
            body_to_world,
            frames,
        }
    }
}

//! # sparsevo
//!
//! Direct, sparse, multi-camera visual odometry core. The crate tracks the
//! 6-DoF motion of a calibrated rigid camera rig through photometric
//! alignment alone: no feature matching after bootstrap, residuals sampled
//! on small fixed patterns with bicubic interpolation, and joint bundle
//! adjustment over keyframe poses, per-frame affine brightness and point
//! inverse depths.
//!
//! ## Architecture
//!
//! - **Camera models** ([`camera`]): pinhole and extended-unified (fisheye)
//!   projection with analytic Jacobians, assembled into a rigid
//!   [`camera::CameraBundle`] rig.
//! - **Image pyramids** ([`image`]): Gaussian pyramids with bicubic
//!   sub-pixel sampling returning intensity and spatial gradient.
//! - **Frame tracker** ([`tracker`]): coarse-to-fine pose + affine light
//!   alignment of new frames against the latest depth-annotated keyframe.
//! - **Windowed optimizer** ([`optimize`]): the photometric energy over a
//!   sliding keyframe window, minimized by Levenberg-Marquardt over a
//!   block-sparse Hessian with Schur elimination of the point block.
//!
//! ## Example
//!
//! ```no_run
//! use sparsevo::{CameraBundle, EnergyFunction, Settings};
//! # fn demo(cam: &CameraBundle, key_frames: &mut [sparsevo::KeyFrame]) -> sparsevo::VoResult<()> {
//! let settings = Settings::default();
//! let mut energy = EnergyFunction::new(cam, key_frames, settings.energy)?;
//! energy.optimize(10);
//! # Ok(())
//! # }
//! ```

pub mod camera;
pub mod error;
pub mod frame;
pub mod image;
pub mod logger;
pub mod loss;
pub mod math;
pub mod optimize;
pub mod reprojector;
pub mod settings;
pub mod tracker;

pub use camera::{CameraBundle, CameraModel, EucmCamera, PinholeCamera};
pub use error::{VoError, VoResult};
pub use frame::{ImmaturePoint, KeyFrame, KeyFrameEntry, OptimizedPoint, PointState};
pub use image::{BiCubicInterpolator, ImagePyramid};
pub use logger::{init_logger, init_logger_with_level};
pub use loss::LossFunction;
pub use math::{AffLight, SE3};
pub use optimize::EnergyFunction;
pub use reprojector::{Reprojection, Reprojector};
pub use settings::Settings;
pub use tracker::{DepthPyramid, FrameTracker, TrackingResult};

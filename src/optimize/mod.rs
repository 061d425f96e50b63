//! Windowed photometric bundle adjustment.
//!
//! The backend couples keyframe poses, per-(frame, camera) affine light
//! and point log-depths through bicubic-sampled intensity residuals. The
//! normal equations are block-structured; the point block is eliminated by
//! a Schur complement and the reduced dense frame system is solved by
//! symmetric factorization. A Levenberg-Marquardt controller accepts or
//! rejects steps by predicted-vs-actual energy decrease.

use thiserror::Error;

pub mod accumulated;
pub mod delta;
pub mod energy;
pub mod motion;
pub mod parameters;
pub mod residual;
pub mod step;

pub use accumulated::{Gradient, GradientBlocks, Hessian, HessianBlocks};
pub use delta::{DeltaParameterVector, FrameParameterOrder};
pub use energy::EnergyFunction;
pub use motion::MotionDerivatives;
pub use parameters::{Parameters, ParametersState, PointLocation};
pub use residual::{DeltaGradient, DeltaHessian, Residual, ResidualJacobian};
pub use step::StepController;

/// Solver-specific errors. Transient ill-conditioning is absorbed by the
/// damping loop; only unrecoverable failures surface.
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    /// The Schur-reduced frame system stayed singular through all
    /// regularization retries.
    #[error("Schur-reduced system singular after {attempts} regularization attempts")]
    SingularSystem { attempts: usize },

    /// Non-finite value encountered where a finite one is required.
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
}

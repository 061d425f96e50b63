//! Error types for the sparsevo library
//!
//! Transient numerical issues (non-positive-definite systems, off-image
//! projections, rejected damping steps) are absorbed inside the optimizer
//! and never surface here. Only violated preconditions and unrecoverable
//! solver failures are reported.

use thiserror::Error;

/// Main result type used throughout the sparsevo library
pub type VoResult<T> = Result<T, VoError>;

/// Main error type for the sparsevo library
#[derive(Debug, Clone, Error)]
pub enum VoError {
    /// A precondition on caller-supplied data was violated
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Linear system solve failed beyond what damping can recover
    #[error("Solver error: {0}")]
    Solver(#[from] crate::optimize::SolverError),

    /// General computation errors
    #[error("Computation error: {0}")]
    Computation(String),
}

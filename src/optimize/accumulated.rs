//! Block-structured normal equations of the windowed energy.
//!
//! Residual contributions are accumulated in deterministic index order
//! into a dense frame-frame matrix (the window is small), a dense
//! frame-point row block and the scalar point diagonal. Keyframe 0 owns no
//! parameters, so its rows and columns are dropped at accumulation time.
//!
//! Solving eliminates the point block by the Schur complement:
//!
//! ```text
//! S  = H_ff − H_fp · H_pp⁻¹ · H_fpᵀ
//! y  = g_f  − H_fp · H_pp⁻¹ · g_p
//! S·δ_f = y,   δ_p = H_pp⁻¹ · (g_p − H_fpᵀ · δ_f)
//! ```
//!
//! with a Cholesky factorization of S and progressive diagonal
//! regularization retries when S is not positive definite.

use tracing::debug;

use crate::math::{MatX, VecX};
use crate::optimize::delta::{DeltaParameterVector, FrameParameterOrder};
use crate::optimize::residual::{
    DeltaGradient, DeltaHessian, FrameFrameHessian, FramePointHessian, Residual,
};
use crate::optimize::SolverError;

/// Point diagonal entries at or below this are treated as unobserved:
/// their inverse is zero and their step stays zero.
const POINT_DIAG_EPS: f64 = 1e-12;

const REGULARIZATION_ATTEMPTS: usize = 5;

/// Accumulator for the Hessian blocks over all residuals.
pub struct HessianBlocks {
    order: FrameParameterOrder,
    frame_frame: MatX,
    frame_point: MatX,
    point_point: VecX,
}

impl HessianBlocks {
    pub fn new(num_keyframes: usize, num_cameras: usize, num_points: usize) -> Self {
        let order = FrameParameterOrder::new(num_keyframes, num_cameras);
        let f = order.total_frame_parameters();
        HessianBlocks {
            order,
            frame_frame: MatX::zeros(f, f),
            frame_point: MatX::zeros(f, num_points),
            point_point: VecX::zeros(num_points),
        }
    }

    pub fn add(&mut self, residual: &Residual, delta: &DeltaHessian) {
        let (h, hc) = (residual.host_ind(), residual.host_cam_ind());
        let (t, tc) = (residual.target_ind(), residual.target_cam_ind());
        let p = residual.point_ind();

        if h > 0 {
            self.add_frame_frame(h, hc, h, hc, &delta.host_host);
            self.add_frame_point(h, hc, p, &delta.host_point);
        }
        if t > 0 {
            self.add_frame_frame(t, tc, t, tc, &delta.target_target);
            self.add_frame_point(t, tc, p, &delta.target_point);
        }
        if h > 0 && t > 0 {
            self.add_frame_frame(h, hc, t, tc, &delta.host_target);
            self.add_frame_frame(t, tc, h, hc, &delta.host_target.transpose());
        }
        self.point_point[p] += delta.point_point;
    }

    fn add_frame_frame(
        &mut self,
        k1: usize,
        c1: usize,
        k2: usize,
        c2: usize,
        block: &FrameFrameHessian,
    ) {
        let pose1 = self.order.frame_offset(k1);
        let pose2 = self.order.frame_offset(k2);
        let ab1 = self.order.affine_offset(k1, c1);
        let ab2 = self.order.affine_offset(k2, c2);

        add_block(&mut self.frame_frame, pose1, pose2, &block.pose_pose);
        add_block(&mut self.frame_frame, pose1, ab2, &block.pose_ab);
        add_block(&mut self.frame_frame, ab1, pose2, &block.ab_pose);
        add_block(&mut self.frame_frame, ab1, ab2, &block.ab_ab);
    }

    fn add_frame_point(&mut self, k: usize, c: usize, p: usize, block: &FramePointHessian) {
        let pose = self.order.frame_offset(k);
        let ab = self.order.affine_offset(k, c);
        for i in 0..6 {
            self.frame_point[(pose + i, p)] += block.pose_d[i];
        }
        self.frame_point[(ab, p)] += block.ab_d[0];
        self.frame_point[(ab + 1, p)] += block.ab_d[1];
    }
}

/// Accumulator for the gradient over all residuals.
pub struct GradientBlocks {
    order: FrameParameterOrder,
    frame: VecX,
    point: VecX,
}

impl GradientBlocks {
    pub fn new(num_keyframes: usize, num_cameras: usize, num_points: usize) -> Self {
        let order = FrameParameterOrder::new(num_keyframes, num_cameras);
        GradientBlocks {
            frame: VecX::zeros(order.total_frame_parameters()),
            point: VecX::zeros(num_points),
            order,
        }
    }

    pub fn add(&mut self, residual: &Residual, delta: &DeltaGradient) {
        let (h, hc) = (residual.host_ind(), residual.host_cam_ind());
        let (t, tc) = (residual.target_ind(), residual.target_cam_ind());

        if h > 0 {
            let pose = self.order.frame_offset(h);
            let ab = self.order.affine_offset(h, hc);
            for i in 0..6 {
                self.frame[pose + i] += delta.host.pose[i];
            }
            self.frame[ab] += delta.host.ab[0];
            self.frame[ab + 1] += delta.host.ab[1];
        }
        if t > 0 {
            let pose = self.order.frame_offset(t);
            let ab = self.order.affine_offset(t, tc);
            for i in 0..6 {
                self.frame[pose + i] += delta.target.pose[i];
            }
            self.frame[ab] += delta.target.ab[0];
            self.frame[ab + 1] += delta.target.ab[1];
        }
        self.point[residual.point_ind()] += delta.point;
    }
}

fn add_block<R: nalgebra::Dim, C: nalgebra::Dim, S>(
    target: &mut MatX,
    row: usize,
    col: usize,
    block: &nalgebra::Matrix<f64, R, C, S>,
) where
    S: nalgebra::storage::Storage<f64, R, C>,
{
    for r in 0..block.nrows() {
        for c in 0..block.ncols() {
            target[(row + r, col + c)] += block[(r, c)];
        }
    }
}

/// Gradient `g = Σ Jᵀ·w·r` in parameter layout order.
pub struct Gradient {
    frame: VecX,
    point: VecX,
}

impl Gradient {
    pub fn new(blocks: GradientBlocks) -> Self {
        Gradient {
            frame: blocks.frame,
            point: blocks.point,
        }
    }

    pub fn frame(&self) -> &VecX {
        &self.frame
    }

    pub fn point(&self) -> &VecX {
        &self.point
    }

    /// `δᵀ·g` for the predicted-decrease formula.
    pub fn dot_delta(&self, delta: &DeltaParameterVector) -> f64 {
        self.frame.dot(delta.frame()) + self.point.dot(delta.point())
    }
}

/// Block-structured Gauss-Newton Hessian `H = Σ Jᵀ·w·J`.
pub struct Hessian {
    order: FrameParameterOrder,
    frame_frame: MatX,
    frame_point: MatX,
    point_point: VecX,
}

impl Hessian {
    pub fn new(blocks: HessianBlocks) -> Self {
        Hessian {
            order: blocks.order,
            frame_frame: blocks.frame_frame,
            frame_point: blocks.frame_point,
            point_point: blocks.point_point,
        }
    }

    pub fn frame_frame(&self) -> &MatX {
        &self.frame_frame
    }

    pub fn frame_point(&self) -> &MatX {
        &self.frame_point
    }

    pub fn point_point(&self) -> &VecX {
        &self.point_point
    }

    /// Marquardt diagonal scaling: every diagonal entry of the frame and
    /// point blocks is multiplied by `1 + λ`.
    pub fn levenberg_marquardt_damp(&self, lambda: f64) -> Hessian {
        let mut damped = Hessian {
            order: self.order,
            frame_frame: self.frame_frame.clone(),
            frame_point: self.frame_point.clone(),
            point_point: self.point_point.clone(),
        };
        let scale = 1.0 + lambda;
        for i in 0..damped.frame_frame.nrows() {
            damped.frame_frame[(i, i)] *= scale;
        }
        for p in 0..damped.point_point.len() {
            damped.point_point[p] *= scale;
        }
        damped
    }

    /// `δᵀ·H·δ`, used by the predicted-decrease formula.
    pub fn quadratic_form(&self, delta: &DeltaParameterVector) -> f64 {
        let df = delta.frame();
        let dp = delta.point();
        let mut result = (df.transpose() * &self.frame_frame * df)[(0, 0)];
        result += 2.0 * (df.transpose() * &self.frame_point * dp)[(0, 0)];
        for p in 0..dp.len() {
            result += self.point_point[p] * dp[p] * dp[p];
        }
        result
    }

    /// Solve `H·δ = g` by eliminating the point block with the Schur
    /// complement and factorizing the reduced frame system.
    pub fn solve(&self, gradient: &Gradient) -> Result<DeltaParameterVector, SolverError> {
        let point_inv = self.point_point.map(|v| {
            if v > POINT_DIAG_EPS {
                1.0 / v
            } else {
                0.0
            }
        });

        // scale frame-point columns by H_pp⁻¹ once, reuse for S, y and δ_p
        let mut fp_pinv = self.frame_point.clone();
        for (j, inv) in point_inv.iter().enumerate() {
            for i in 0..fp_pinv.nrows() {
                fp_pinv[(i, j)] *= inv;
            }
        }

        let schur = &self.frame_frame - &fp_pinv * self.frame_point.transpose();
        let reduced_rhs = &gradient.frame - &fp_pinv * &gradient.point;

        let delta_frame = solve_symmetric(&schur, &reduced_rhs)?;

        let back = &gradient.point - self.frame_point.transpose() * &delta_frame;
        let delta_point = VecX::from_fn(back.len(), |i, _| point_inv[i] * back[i]);

        Ok(DeltaParameterVector::from_parts(
            self.order.num_keyframes(),
            self.order.num_cameras(),
            delta_frame,
            delta_point,
        ))
    }

    /// Assemble the full dense system; used by tests to verify the Schur
    /// path against a direct factorization.
    pub fn to_dense(&self) -> MatX {
        let f = self.frame_frame.nrows();
        let p = self.point_point.len();
        let mut dense = MatX::zeros(f + p, f + p);
        dense.view_mut((0, 0), (f, f)).copy_from(&self.frame_frame);
        dense
            .view_mut((0, f), (f, p))
            .copy_from(&self.frame_point);
        dense
            .view_mut((f, 0), (p, f))
            .copy_from(&self.frame_point.transpose());
        for i in 0..p {
            dense[(f + i, f + i)] = self.point_point[i];
        }
        dense
    }
}

/// Cholesky solve with progressive diagonal regularization fallback.
fn solve_symmetric(matrix: &MatX, rhs: &VecX) -> Result<VecX, SolverError> {
    if let Some(cholesky) = matrix.clone().cholesky() {
        return Ok(cholesky.solve(rhs));
    }

    let n = matrix.nrows();
    let mut max_diag = 0.0f64;
    for i in 0..n {
        max_diag = max_diag.max(matrix[(i, i)].abs());
    }
    let base = max_diag.max(1.0);

    for attempt in 0..REGULARIZATION_ATTEMPTS {
        let reg = base * 10.0f64.powi(attempt as i32 - 8);
        let mut regularized = matrix.clone();
        for i in 0..n {
            regularized[(i, i)] += reg;
        }
        if let Some(cholesky) = regularized.cholesky() {
            debug!(regularization = reg, "Schur system factorized after regularization");
            return Ok(cholesky.solve(rhs));
        }
    }

    Err(SolverError::SingularSystem {
        attempts: REGULARIZATION_ATTEMPTS,
    })
}

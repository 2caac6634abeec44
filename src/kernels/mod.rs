//! Numeric kernels for square and over-determined residual blocks.
//!
//! Every kernel minimizes `0.5 * ||F(x)||^2` for a [`Residuals`] implementation and stops when
//! the largest absolute residual drops below `precision`. Kernels check a
//! [`CancellationToken`] once per iteration so the orchestrator can abandon a block after its
//! deadline.
//!
//! - [`newton::NewtonLineSearch`]: Newton steps with backtracking on the merit function
//! - [`dogleg::Dogleg`]: Powell dogleg trust region on the second order model
//! - [`levenberg::LevenbergMarquardt`]: damped Gauss-Newton, also for `M > N`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::config::{SolveMethod, SolverConfig};
use crate::errors::SolveError;

pub mod dogleg;
pub mod levenberg;
pub mod newton;

/// A residual vector `F: R^N -> R^M` with its Jacobian.
///
/// Buffers are row-major and sized by the caller: `M` residuals, `M * N` Jacobian entries and
/// `N * N` Hessian entries.
pub trait Residuals: Send + Sync {
    fn num_equations(&self) -> usize;
    fn num_variables(&self) -> usize;
    fn residuals_into(&self, x: &[f64], out: &mut [f64]);
    fn jacobian_into(&self, x: &[f64], out: &mut [f64]);

    /// Writes `sum_i weights[i] * H_i(x)`. Returns false when second derivatives are unavailable.
    fn weighted_hessian_into(&self, _x: &[f64], _weights: &[f64], _out: &mut [f64]) -> bool {
        false
    }
}

/// Shared flag a running kernel polls to learn it should stop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), SolveError> {
        if self.is_cancelled() {
            Err(SolveError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Tolerances shared by all kernels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelOptions {
    pub max_iterations: usize,
    /// Residual tolerance, also the relative step tolerance
    pub precision: f64,
    /// Stop when every component of `J^T F` is below this
    pub gradient_precision: f64,
    /// Longest step a single iteration may take
    pub max_jump: f64,
    /// Initial dogleg radius
    pub trust_region_radius: f64,
}

impl From<&SolverConfig> for KernelOptions {
    fn from(config: &SolverConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            precision: config.precision,
            gradient_precision: config.gradient_precision,
            max_jump: config.max_jump,
            trust_region_radius: config.trust_region_radius,
        }
    }
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self::from(&SolverConfig::default())
    }
}

/// Result of one kernel run.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelReport {
    pub values: Vec<f64>,
    pub iterations: usize,
    /// Largest absolute residual at `values`
    pub residual_norm: f64,
    pub converged: bool,
}

/// A nonlinear least-squares method.
pub trait NumericKernel: Send + Sync {
    fn name(&self) -> &'static str;

    fn solve(
        &self,
        problem: &dyn Residuals,
        x0: &[f64],
        cancel: &CancellationToken,
    ) -> Result<KernelReport, SolveError>;
}

/// Kernel implementing `method`.
pub fn kernel_for(method: SolveMethod, options: KernelOptions) -> Box<dyn NumericKernel> {
    match method {
        SolveMethod::NewtonLineSearch => Box::new(newton::NewtonLineSearch::new(options)),
        SolveMethod::Dogleg => Box::new(dogleg::Dogleg::new(options)),
        SolveMethod::LevenbergMarquardt => Box::new(levenberg::LevenbergMarquardt::new(options)),
    }
}

/// Residual and Jacobian evaluation with finiteness checks.
pub(crate) struct Workspace<'a> {
    problem: &'a dyn Residuals,
    pub m: usize,
    pub n: usize,
    jac: Vec<f64>,
}

impl<'a> Workspace<'a> {
    pub fn new(problem: &'a dyn Residuals) -> Self {
        let m = problem.num_equations();
        let n = problem.num_variables();
        Self {
            problem,
            m,
            n,
            jac: vec![0.0; m * n],
        }
    }

    /// Residuals at `x`, or `None` if any entry is not finite.
    pub fn try_residuals(&self, x: &DVector<f64>) -> Option<DVector<f64>> {
        let mut out = vec![0.0; self.m];
        self.problem.residuals_into(x.as_slice(), &mut out);
        out.iter()
            .all(|v| v.is_finite())
            .then(|| DVector::from_vec(out))
    }

    pub fn residuals(&self, x: &DVector<f64>, iteration: usize) -> Result<DVector<f64>, SolveError> {
        self.try_residuals(x)
            .ok_or(SolveError::NonFinite { iteration })
    }

    pub fn jacobian(&mut self, x: &DVector<f64>, iteration: usize) -> Result<DMatrix<f64>, SolveError> {
        self.problem.jacobian_into(x.as_slice(), &mut self.jac);
        if self.jac.iter().any(|v| !v.is_finite()) {
            return Err(SolveError::NonFinite { iteration });
        }
        Ok(DMatrix::from_row_slice(self.m, self.n, &self.jac))
    }

    /// `sum_i r_i H_i` at `x`, if the problem provides second derivatives.
    pub fn weighted_hessian(&self, x: &DVector<f64>, r: &DVector<f64>) -> Option<DMatrix<f64>> {
        let mut out = vec![0.0; self.n * self.n];
        if !self
            .problem
            .weighted_hessian_into(x.as_slice(), r.as_slice(), &mut out)
        {
            return None;
        }
        out.iter()
            .all(|v| v.is_finite())
            .then(|| DMatrix::from_row_slice(self.n, self.n, &out))
    }
}

pub(crate) fn max_abs(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

pub(crate) fn merit(r: &DVector<f64>) -> f64 {
    0.5 * r.norm_squared()
}

/// Scales `step` down so its length does not exceed `max_jump`.
pub(crate) fn clamp_step(step: &mut DVector<f64>, max_jump: f64) {
    let len = step.norm();
    if len > max_jump && len > 0.0 {
        *step *= max_jump / len;
    }
}

/// True when `step` is negligible relative to `x`.
pub(crate) fn step_is_small(step: &DVector<f64>, x: &DVector<f64>, precision: f64) -> bool {
    step.iter()
        .zip(x.iter())
        .all(|(s, xi)| s.abs() <= precision * xi.abs().max(1.0))
}

pub(crate) fn report(x: DVector<f64>, r: &DVector<f64>, iterations: usize, precision: f64) -> KernelReport {
    let residual_norm = max_abs(r);
    KernelReport {
        values: x.iter().copied().collect(),
        iterations,
        residual_norm,
        converged: residual_norm <= precision,
    }
}

#[cfg(test)]
pub(crate) mod test_problems {
    use super::Residuals;

    /// `x + y = 4, x - y = 0`
    pub struct Linear2;

    impl Residuals for Linear2 {
        fn num_equations(&self) -> usize {
            2
        }
        fn num_variables(&self) -> usize {
            2
        }
        fn residuals_into(&self, x: &[f64], out: &mut [f64]) {
            out[0] = x[0] + x[1] - 4.0;
            out[1] = x[0] - x[1];
        }
        fn jacobian_into(&self, _x: &[f64], out: &mut [f64]) {
            out.copy_from_slice(&[1.0, 1.0, 1.0, -1.0]);
        }
    }

    /// `x^2 + y^2 = 4, x*y = 1` with second derivatives
    pub struct Circle;

    impl Residuals for Circle {
        fn num_equations(&self) -> usize {
            2
        }
        fn num_variables(&self) -> usize {
            2
        }
        fn residuals_into(&self, x: &[f64], out: &mut [f64]) {
            out[0] = x[0] * x[0] + x[1] * x[1] - 4.0;
            out[1] = x[0] * x[1] - 1.0;
        }
        fn jacobian_into(&self, x: &[f64], out: &mut [f64]) {
            out.copy_from_slice(&[2.0 * x[0], 2.0 * x[1], x[1], x[0]]);
        }
        fn weighted_hessian_into(&self, _x: &[f64], w: &[f64], out: &mut [f64]) -> bool {
            out.copy_from_slice(&[2.0 * w[0], w[1], w[1], 2.0 * w[0]]);
            true
        }
    }

    /// Three lines through (1, 2): `x = 1, y = 2, x + y = 3`
    pub struct Overdetermined;

    impl Residuals for Overdetermined {
        fn num_equations(&self) -> usize {
            3
        }
        fn num_variables(&self) -> usize {
            2
        }
        fn residuals_into(&self, x: &[f64], out: &mut [f64]) {
            out[0] = x[0] - 1.0;
            out[1] = x[1] - 2.0;
            out[2] = x[0] + x[1] - 3.0;
        }
        fn jacobian_into(&self, _x: &[f64], out: &mut [f64]) {
            out.copy_from_slice(&[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        }
    }

    /// `x^2 + 1 = 0` has no real root
    pub struct NoRoot;

    impl Residuals for NoRoot {
        fn num_equations(&self) -> usize {
            1
        }
        fn num_variables(&self) -> usize {
            1
        }
        fn residuals_into(&self, x: &[f64], out: &mut [f64]) {
            out[0] = x[0] * x[0] + 1.0;
        }
        fn jacobian_into(&self, x: &[f64], out: &mut [f64]) {
            out[0] = 2.0 * x[0];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.check(), Err(SolveError::Cancelled)));
    }

    #[test]
    fn test_clamp_step() {
        let mut step = DVector::from_vec(vec![3.0, 4.0]);
        clamp_step(&mut step, 1.0);
        assert!((step.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_every_method_solves_the_linear_pair() -> Result<(), Box<dyn std::error::Error>> {
        for method in [
            SolveMethod::NewtonLineSearch,
            SolveMethod::Dogleg,
            SolveMethod::LevenbergMarquardt,
        ] {
            let kernel = kernel_for(method, KernelOptions::default());
            let report = kernel.solve(&test_problems::Linear2, &[0.0, 0.0], &CancellationToken::new())?;
            assert!(report.converged, "{}", kernel.name());
            assert!((report.values[0] - 2.0).abs() < 1e-8);
            assert!((report.values[1] - 2.0).abs() < 1e-8);
        }
        Ok(())
    }
}

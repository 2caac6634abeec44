//! Newton-Raphson with a backtracking line search.
//!
//! The step solves `J dx = -F` by LU decomposition. When `J` is singular and the problem
//! supplies second derivatives, the Newton step of the merit function is used instead,
//! `(J^T J + sum_i F_i H_i) dx = -J^T F`, provided it is a descent direction. Otherwise the SVD
//! pseudo-inverse of `J` gives the step. The step length is halved until the merit function `0.5 * ||F||^2`
//! satisfies the Armijo condition.

use nalgebra::DVector;
use tracing::debug;

use super::{
    clamp_step, max_abs, merit, report, step_is_small, CancellationToken, KernelOptions,
    KernelReport, NumericKernel, Residuals, Workspace,
};
use crate::errors::SolveError;

const ARMIJO: f64 = 1e-4;
const MIN_STEP_FRACTION: f64 = 1e-10;

pub struct NewtonLineSearch {
    options: KernelOptions,
}

impl NewtonLineSearch {
    pub fn new(options: KernelOptions) -> Self {
        Self { options }
    }
}

impl NumericKernel for NewtonLineSearch {
    fn name(&self) -> &'static str {
        "NewtonLineSearch"
    }

    fn solve(
        &self,
        problem: &dyn Residuals,
        x0: &[f64],
        cancel: &CancellationToken,
    ) -> Result<KernelReport, SolveError> {
        let opts = &self.options;
        let mut ws = Workspace::new(problem);
        if ws.m != ws.n {
            return Err(SolveError::NotSquare {
                equations: ws.m,
                variables: ws.n,
            });
        }

        let mut x = DVector::from_column_slice(x0);
        let mut r = ws.residuals(&x, 0)?;

        for iteration in 0..opts.max_iterations {
            cancel.check()?;
            if max_abs(&r) <= opts.precision {
                return Ok(report(x, &r, iteration, opts.precision));
            }

            let jac = ws.jacobian(&x, iteration)?;
            let gradient = jac.transpose() * &r;
            if max_abs(&gradient) <= opts.gradient_precision {
                debug!(iteration, "gradient vanished away from a root");
                return Ok(report(x, &r, iteration, opts.precision));
            }

            let rhs = -&r;
            let mut dx = match jac.clone().lu().solve(&rhs) {
                Some(dx) => dx,
                None => {
                    let second_order = ws
                        .weighted_hessian(&x, &r)
                        .map(|h| jac.transpose() * &jac + h)
                        .and_then(|b| b.lu().solve(&-&gradient))
                        .filter(|dx| gradient.dot(dx) < 0.0);
                    match second_order {
                        Some(dx) => {
                            debug!(iteration, "singular Jacobian, using the merit Hessian");
                            dx
                        }
                        None => jac
                            .svd(true, true)
                            .solve(&rhs, f64::EPSILON)
                            .map_err(|_| SolveError::Singular { iteration })?,
                    }
                }
            };
            clamp_step(&mut dx, opts.max_jump);

            // Directional derivative of the merit function along dx
            let slope = gradient.dot(&dx);
            let f0 = merit(&r);
            let mut lambda = 1.0;
            let accepted = loop {
                let trial = &x + &dx * lambda;
                if let Some(r_trial) = ws.try_residuals(&trial) {
                    if merit(&r_trial) <= f0 + ARMIJO * lambda * slope.min(0.0) {
                        break Some((trial, r_trial));
                    }
                }
                lambda *= 0.5;
                if lambda < MIN_STEP_FRACTION {
                    break None;
                }
            };

            let Some((trial, r_trial)) = accepted else {
                debug!(iteration, "line search failed to decrease the residual");
                return Ok(report(x, &r, iteration, opts.precision));
            };

            let small = step_is_small(&(&dx * lambda), &x, opts.precision);
            x = trial;
            r = r_trial;
            if small && max_abs(&r) > opts.precision {
                debug!(iteration, "step below tolerance");
                return Ok(report(x, &r, iteration + 1, opts.precision));
            }
        }

        Ok(report(x, &r, opts.max_iterations, opts.precision))
    }
}

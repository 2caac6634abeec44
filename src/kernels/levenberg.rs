//! Levenberg-Marquardt for square and over-determined blocks.
//!
//! Each iteration solves `(J^T J + mu * D) dx = -J^T F` with `D` the diagonal of `J^T J`
//! (entries floored at 1e-12). `mu` is divided by 3 after a successful
//! step and doubled after a rejected one.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use super::{
    clamp_step, max_abs, merit, report, step_is_small, CancellationToken, KernelOptions,
    KernelReport, NumericKernel, Residuals, Workspace,
};
use crate::errors::SolveError;

const MAX_DAMPING: f64 = 1e16;

pub struct LevenbergMarquardt {
    options: KernelOptions,
}

impl LevenbergMarquardt {
    pub fn new(options: KernelOptions) -> Self {
        Self { options }
    }
}

impl NumericKernel for LevenbergMarquardt {
    fn name(&self) -> &'static str {
        "LevenbergMarquardt"
    }

    fn solve(
        &self,
        problem: &dyn Residuals,
        x0: &[f64],
        cancel: &CancellationToken,
    ) -> Result<KernelReport, SolveError> {
        let opts = &self.options;
        let mut ws = Workspace::new(problem);
        if ws.m < ws.n {
            return Err(SolveError::UnderDetermined {
                equations: ws.m,
                variables: ws.n,
            });
        }

        let mut x = DVector::from_column_slice(x0);
        let mut r = ws.residuals(&x, 0)?;
        let mut mu: Option<f64> = None;

        for iteration in 0..opts.max_iterations {
            cancel.check()?;
            if max_abs(&r) <= opts.precision {
                return Ok(report(x, &r, iteration, opts.precision));
            }

            let jac = ws.jacobian(&x, iteration)?;
            let jt = jac.transpose();
            let jtj = &jt * &jac;
            let gradient = &jt * &r;
            if max_abs(&gradient) <= opts.gradient_precision {
                debug!(iteration, "gradient vanished away from a root");
                return Ok(report(x, &r, iteration, opts.precision));
            }

            let diagonal = jtj.diagonal().map(|d| d.max(1e-12));
            let mut damping = *mu.get_or_insert_with(|| 1e-3 * diagonal.max());
            let f0 = merit(&r);

            // Inner loop: raise the damping until the step decreases the merit function
            let accepted = loop {
                let system = &jtj + DMatrix::from_diagonal(&(&diagonal * damping));
                let Some(chol) = system.cholesky() else {
                    damping *= 2.0;
                    if damping > MAX_DAMPING {
                        break None;
                    }
                    continue;
                };
                let mut dx = chol.solve(&-&gradient);
                clamp_step(&mut dx, opts.max_jump);
                let trial = &x + &dx;
                match ws.try_residuals(&trial) {
                    Some(r_trial) if merit(&r_trial) < f0 => break Some((dx, trial, r_trial)),
                    _ => {
                        damping *= 2.0;
                        if damping > MAX_DAMPING {
                            break None;
                        }
                    }
                }
            };

            let Some((dx, trial, r_trial)) = accepted else {
                debug!(iteration, "damping saturated without decrease");
                return Ok(report(x, &r, iteration, opts.precision));
            };

            mu = Some((damping / 3.0).max(1e-15));
            let small = step_is_small(&dx, &x, opts.precision);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::test_problems::{Circle, Overdetermined};
    use float_cmp::approx_eq;

    struct Wide;

    impl Residuals for Wide {
        fn num_equations(&self) -> usize {
            1
        }
        fn num_variables(&self) -> usize {
            2
        }
        fn residuals_into(&self, x: &[f64], out: &mut [f64]) {
            out[0] = x[0] + x[1];
        }
        fn jacobian_into(&self, _x: &[f64], out: &mut [f64]) {
            out.copy_from_slice(&[1.0, 1.0]);
        }
    }

    #[test]
    fn test_consistent_overdetermined_block() -> Result<(), Box<dyn std::error::Error>> {
        let kernel = LevenbergMarquardt::new(KernelOptions::default());
        let report = kernel.solve(&Overdetermined, &[0.0, 0.0], &CancellationToken::new())?;
        assert!(report.converged);
        assert!(approx_eq!(f64, report.values[0], 1.0, epsilon = 1e-8));
        assert!(approx_eq!(f64, report.values[1], 2.0, epsilon = 1e-8));
        Ok(())
    }

    #[test]
    fn test_nonlinear_square_block() -> Result<(), Box<dyn std::error::Error>> {
        let kernel = LevenbergMarquardt::new(KernelOptions::default());
        let report = kernel.solve(&Circle, &[2.0, 0.5], &CancellationToken::new())?;
        assert!(report.converged);
        Ok(())
    }

    #[test]
    fn test_rejects_more_unknowns_than_equations() {
        let kernel = LevenbergMarquardt::new(KernelOptions::default());
        let result = kernel.solve(&Wide, &[0.0, 0.0], &CancellationToken::new());
        assert!(matches!(
            result,
            Err(SolveError::UnderDetermined { equations: 1, variables: 2 })
        ));
    }
}

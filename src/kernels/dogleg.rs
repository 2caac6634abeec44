//! Powell dogleg trust-region method.
//!
//! The quadratic model of `0.5 * ||F||^2` uses `B = J^T J + sum_i r_i H_i` when the problem
//! supplies Hessians, and the Gauss-Newton matrix `J^T J` otherwise. If `B` is not positive
//! definite the Gauss-Newton matrix is used for that iteration.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use super::{
    max_abs, merit, report, step_is_small, CancellationToken, KernelOptions, KernelReport,
    NumericKernel, Residuals, Workspace,
};
use crate::errors::SolveError;

/// Minimum ratio of actual to predicted reduction for a step to be accepted.
const ACCEPT_RATIO: f64 = 1e-4;

pub struct Dogleg {
    options: KernelOptions,
}

impl Dogleg {
    pub fn new(options: KernelOptions) -> Self {
        Self { options }
    }
}

/// The dogleg step inside a region of radius `delta`.
fn dogleg_step(
    gradient: &DVector<f64>,
    model: &DMatrix<f64>,
    newton: &DVector<f64>,
    delta: f64,
) -> DVector<f64> {
    if newton.norm() <= delta {
        return newton.clone();
    }

    let g_norm = gradient.norm();
    let curvature = (gradient.transpose() * model * gradient)[(0, 0)];
    if curvature <= 0.0 {
        return -gradient * (delta / g_norm);
    }

    // Cauchy point, the model minimizer along the steepest descent direction
    let cauchy = -gradient * (g_norm * g_norm / curvature);
    let c_norm = cauchy.norm();
    if c_norm >= delta {
        return cauchy * (delta / c_norm);
    }

    // Path from the Cauchy point towards the Newton point, cut at the boundary
    let d = newton - &cauchy;
    let a = d.norm_squared();
    let b = 2.0 * cauchy.dot(&d);
    let c = c_norm * c_norm - delta * delta;
    let tau = (-b + (b * b - 4.0 * a * c).max(0.0).sqrt()) / (2.0 * a);
    cauchy + d * tau
}

impl NumericKernel for Dogleg {
    fn name(&self) -> &'static str {
        "Dogleg"
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
        let mut delta = opts.trust_region_radius.min(opts.max_jump);

        for iteration in 0..opts.max_iterations {
            cancel.check()?;
            if max_abs(&r) <= opts.precision {
                return Ok(report(x, &r, iteration, opts.precision));
            }

            let jac = ws.jacobian(&x, iteration)?;
            let jt = jac.transpose();
            let gradient = &jt * &r;
            if max_abs(&gradient) <= opts.gradient_precision {
                debug!(iteration, "gradient vanished away from a root");
                return Ok(report(x, &r, iteration, opts.precision));
            }

            let gauss_newton = &jt * &jac;
            let model = ws
                .weighted_hessian(&x, &r)
                .map(|h| &gauss_newton + h)
                .filter(|b| b.clone().cholesky().is_some())
                .unwrap_or_else(|| gauss_newton.clone());

            let newton = match model.clone().cholesky() {
                Some(chol) => chol.solve(&-&gradient),
                None => match jac.clone().lu().solve(&-&r) {
                    Some(dx) => dx,
                    None => jac
                        .svd(true, true)
                        .solve(&-&r, f64::EPSILON)
                        .map_err(|_| SolveError::Singular { iteration })?,
                },
            };

            let step = dogleg_step(&gradient, &model, &newton, delta);
            let predicted = -(gradient.dot(&step) + 0.5 * (step.transpose() * &model * &step)[(0, 0)]);
            let trial = &x + &step;

            let rho = match ws.try_residuals(&trial) {
                Some(r_trial) if predicted > 0.0 => {
                    let rho = (merit(&r) - merit(&r_trial)) / predicted;
                    if rho > ACCEPT_RATIO {
                        let small = step_is_small(&step, &x, opts.precision);
                        x = trial;
                        r = r_trial;
                        if small && max_abs(&r) > opts.precision {
                            debug!(iteration, "step below tolerance");
                            return Ok(report(x, &r, iteration + 1, opts.precision));
                        }
                    }
                    rho
                }
                _ => 0.0,
            };

            if rho < 0.25 {
                delta *= 0.25;
            } else if rho > 0.75 && (step.norm() - delta).abs() <= 1e-9 * delta {
                delta = (2.0 * delta).min(opts.max_jump);
            }

            if delta <= opts.precision * x.norm().max(1.0) * 1e-3 {
                debug!(iteration, delta, "trust region collapsed");
                return Ok(report(x, &r, iteration + 1, opts.precision));
            }
        }

        Ok(report(x, &r, opts.max_iterations, opts.precision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::test_problems::{Circle, Linear2, NoRoot};
    use float_cmp::approx_eq;

    #[test]
    fn test_nonlinear_pair_with_hessians() -> Result<(), Box<dyn std::error::Error>> {
        let kernel = Dogleg::new(KernelOptions::default());
        let report = kernel.solve(&Circle, &[3.0, 0.1], &CancellationToken::new())?;
        assert!(report.converged);
        let (x, y) = (report.values[0], report.values[1]);
        assert!(approx_eq!(f64, x * x + y * y, 4.0, epsilon = 1e-8));
        assert!(approx_eq!(f64, x * y, 1.0, epsilon = 1e-8));
        Ok(())
    }

    #[test]
    fn test_far_start_is_limited_by_the_radius() -> Result<(), Box<dyn std::error::Error>> {
        let kernel = Dogleg::new(KernelOptions::default());
        let report = kernel.solve(&Linear2, &[100.0, -50.0], &CancellationToken::new())?;
        assert!(report.converged);
        // 1.0 initial radius, doubling per accepted step
        assert!(report.iterations > 1);
        Ok(())
    }

    #[test]
    fn test_no_root_is_not_converged() -> Result<(), Box<dyn std::error::Error>> {
        let kernel = Dogleg::new(KernelOptions::default());
        let report = kernel.solve(&NoRoot, &[2.0], &CancellationToken::new())?;
        assert!(!report.converged);
        Ok(())
    }

    #[test]
    fn test_dogleg_step_inside_region_is_newton() {
        let g = DVector::from_vec(vec![1.0, 0.0]);
        let b = DMatrix::identity(2, 2);
        let newton = DVector::from_vec(vec![-1.0, 0.0]);
        assert_eq!(dogleg_step(&g, &b, &newton, 2.0), newton);
        let cut = dogleg_step(&g, &b, &newton, 0.5);
        assert!(approx_eq!(f64, cut.norm(), 0.5, ulps = 2));
    }
}

//! Solving one block under a deadline.
//!
//! The orchestrator compiles the residuals of a block with already-solved values bound as
//! constants, picks a kernel, and runs it on a worker thread. The calling thread polls the
//! result channel until the configured deadline; on expiry it raises the kernel's
//! [`CancellationToken`] and reports [`BlockOutcome::TimedOut`].

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::{SolveMethod, SolverConfig};
use crate::equation::Equation;
use crate::errors::SolveError;
use crate::kernels::{
    kernel_for, CancellationToken, KernelOptions, KernelReport, NumericKernel, Residuals,
};
use crate::system::EquationSystem;

/// Final state of a block solve.
#[derive(Debug)]
pub enum BlockOutcome {
    Converged { iterations: usize },
    /// The kernel stopped above the residual tolerance; its values are kept
    NonConverged { residual_norm: f64 },
    TimedOut,
    Failed(SolveError),
}

impl BlockOutcome {
    /// True when the result carries values that should be written back.
    pub fn has_values(&self) -> bool {
        matches!(
            self,
            BlockOutcome::Converged { .. } | BlockOutcome::NonConverged { .. }
        )
    }

    /// True for outcomes that fail the run.
    pub fn is_error(&self) -> bool {
        matches!(self, BlockOutcome::TimedOut | BlockOutcome::Failed(_))
    }
}

#[derive(Debug)]
pub struct BlockResult {
    pub variables: Vec<String>,
    /// One value per variable, empty unless the outcome has values
    pub values: Vec<f64>,
    pub outcome: BlockOutcome,
}

impl BlockResult {
    fn failed(variables: &[String], error: SolveError) -> Self {
        error!(variables = ?variables, %error, "block failed");
        Self {
            variables: variables.to_vec(),
            values: Vec::new(),
            outcome: BlockOutcome::Failed(error),
        }
    }
}

pub struct SolveOrchestrator {
    config: SolverConfig,
    kernel_override: Option<Arc<dyn NumericKernel>>,
}

impl SolveOrchestrator {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            kernel_override: None,
        }
    }

    /// Uses `kernel` for every block instead of the configured methods.
    pub fn with_kernel(mut self, kernel: Arc<dyn NumericKernel>) -> Self {
        self.kernel_override = Some(kernel);
        self
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solves `residuals` for `variables`.
    ///
    /// * `bindings` - values of solved variables, inlined as constants
    /// * `initial_values` - starting points by internal name
    pub fn solve_block(
        &self,
        residuals: &[String],
        variables: &[String],
        bindings: &HashMap<String, f64>,
        initial_values: &HashMap<String, f64>,
    ) -> BlockResult {
        let (m, n) = (residuals.len(), variables.len());
        if m < n {
            return BlockResult::failed(
                variables,
                SolveError::UnderDetermined {
                    equations: m,
                    variables: n,
                },
            );
        }

        let x0: Vec<f64> = variables
            .iter()
            .map(|v| {
                initial_values
                    .get(v)
                    .copied()
                    .unwrap_or(self.config.default_initial_value)
            })
            .collect();
        let var_map: HashMap<String, u32> = variables
            .iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), i as u32))
            .collect();

        let mut method = self.config.method_for(n);
        if m != n && method != SolveMethod::LevenbergMarquardt {
            warn!(
                equations = m,
                variables = n,
                "block is not square, using LevenbergMarquardt"
            );
            method = SolveMethod::LevenbergMarquardt;
        }

        let problem: Arc<dyn Residuals> = if m == 1 && n == 1 {
            let equation = match Equation::from_var_map(residuals[0].clone(), &var_map, bindings) {
                Ok(equation) => equation,
                Err(e) => return BlockResult::failed(variables, e.into()),
            };
            if let Some(result) = self.affine_shortcut(&equation, &variables[0], x0[0]) {
                return result;
            }
            Arc::new(equation)
        } else {
            let built = EquationSystem::from_var_map(residuals.to_vec(), &var_map, bindings)
                .and_then(|system| match method {
                    SolveMethod::LevenbergMarquardt => Ok(system),
                    _ => system.with_hessians(),
                });
            match built {
                Ok(system) => Arc::new(system),
                Err(e) => return BlockResult::failed(variables, e.into()),
            }
        };

        let kernel = self
            .kernel_override
            .clone()
            .unwrap_or_else(|| Arc::from(kernel_for(method, KernelOptions::from(&self.config))));
        debug!(kernel = kernel.name(), variables = ?variables, "dispatching block");

        match self.dispatch(problem, kernel, x0) {
            Dispatch::Finished(Ok(report)) => self.finish(variables, report),
            Dispatch::Finished(Err(e)) => BlockResult::failed(variables, e),
            Dispatch::TimedOut => {
                warn!(
                    variables = ?variables,
                    timeout = self.config.timeout,
                    "block exceeded the time limit"
                );
                BlockResult {
                    variables: variables.to_vec(),
                    values: Vec::new(),
                    outcome: BlockOutcome::TimedOut,
                }
            }
        }
    }

    /// `x = x0 - r(x0) / a` for a residual that is affine in its only variable.
    fn affine_shortcut(&self, equation: &Equation, variable: &str, x0: f64) -> Option<BlockResult> {
        let slope = equation.affine_slope(variable)?;
        let r0 = equation.eval(&[x0]).ok()?;
        let x = x0 - r0 / slope;
        let result = if x.is_finite() {
            debug!(variable, value = x, "affine residual solved directly");
            BlockResult {
                variables: vec![variable.to_string()],
                values: vec![x],
                outcome: BlockOutcome::Converged { iterations: 0 },
            }
        } else {
            BlockResult::failed(&[variable.to_string()], SolveError::NonFinite { iteration: 0 })
        };
        Some(result)
    }

    fn dispatch(
        &self,
        problem: Arc<dyn Residuals>,
        kernel: Arc<dyn NumericKernel>,
        x0: Vec<f64>,
    ) -> Dispatch {
        let token = CancellationToken::new();
        let (sender, receiver) = mpsc::channel();
        let worker_token = token.clone();
        let spawned = std::thread::Builder::new()
            .name("eqsolve-block".to_string())
            .spawn(move || {
                let result = kernel.solve(problem.as_ref(), &x0, &worker_token);
                // The receiver is gone after a timeout
                let _ = sender.send(result);
            });
        if spawned.is_err() {
            return Dispatch::Finished(Err(SolveError::WorkerLost));
        }

        let deadline = Instant::now().checked_add(self.config.timeout_duration());
        let poll = self.config.poll_interval();
        loop {
            match receiver.recv_timeout(poll) {
                Ok(result) => return Dispatch::Finished(result),
                Err(RecvTimeoutError::Timeout) => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        token.cancel();
                        return Dispatch::TimedOut;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Dispatch::Finished(Err(SolveError::WorkerLost))
                }
            }
        }
    }

    fn finish(&self, variables: &[String], report: KernelReport) -> BlockResult {
        let outcome = if report.converged {
            info!(
                variables = ?variables,
                iterations = report.iterations,
                "block solved"
            );
            BlockOutcome::Converged {
                iterations: report.iterations,
            }
        } else {
            warn!(
                variables = ?variables,
                residual = report.residual_norm,
                iterations = report.iterations,
                "block did not converge"
            );
            BlockOutcome::NonConverged {
                residual_norm: report.residual_norm,
            }
        };
        BlockResult {
            variables: variables.to_vec(),
            values: report.values,
            outcome,
        }
    }
}

enum Dispatch {
    Finished(Result<KernelReport, SolveError>),
    TimedOut,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use std::time::Duration;

    /// Kernel that runs until it is cancelled.
    pub(crate) struct Stall;

    impl NumericKernel for Stall {
        fn name(&self) -> &'static str {
            "Stall"
        }

        fn solve(
            &self,
            _problem: &dyn Residuals,
            _x0: &[f64],
            cancel: &CancellationToken,
        ) -> Result<KernelReport, SolveError> {
            let started = Instant::now();
            while !cancel.is_cancelled() && started.elapsed() < Duration::from_secs(30) {
                std::thread::sleep(Duration::from_millis(2));
            }
            Err(SolveError::Cancelled)
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_linear_pair() {
        let orchestrator = SolveOrchestrator::new(SolverConfig::default());
        let result = orchestrator.solve_block(
            &strings(&["x+y-1*(4)", "x-y-1*(0)"]),
            &strings(&["x", "y"]),
            &HashMap::new(),
            &HashMap::new(),
        );
        assert!(matches!(result.outcome, BlockOutcome::Converged { .. }));
        assert!(approx_eq!(f64, result.values[0], 2.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, result.values[1], 2.0, epsilon = 1e-9));
    }

    #[test]
    fn test_affine_single_equation_uses_bindings() {
        let orchestrator = SolveOrchestrator::new(SolverConfig::default());
        let bindings = HashMap::from([("x".to_string(), 2.0)]);
        let result = orchestrator.solve_block(
            &strings(&["y-1*(x+1)"]),
            &strings(&["y"]),
            &bindings,
            &HashMap::new(),
        );
        assert!(matches!(result.outcome, BlockOutcome::Converged { iterations: 0 }));
        assert_eq!(result.values, vec![3.0]);
    }

    #[test]
    fn test_nonlinear_single_equation_from_initial_value() {
        let orchestrator = SolveOrchestrator::new(SolverConfig::default());
        let initial = HashMap::from([("x".to_string(), -3.0)]);
        let result = orchestrator.solve_block(
            &strings(&["x^2-1*(4)"]),
            &strings(&["x"]),
            &HashMap::new(),
            &initial,
        );
        assert!(matches!(result.outcome, BlockOutcome::Converged { .. }));
        assert!(approx_eq!(f64, result.values[0], -2.0, epsilon = 1e-9));
    }

    #[test]
    fn test_dogleg_block() {
        let config = SolverConfig {
            multi_variable_method: SolveMethod::Dogleg,
            ..SolverConfig::default()
        };
        let initial = HashMap::from([("x".to_string(), 2.0), ("y".to_string(), 0.5)]);
        let result = SolveOrchestrator::new(config).solve_block(
            &strings(&["x^2+y^2-1*(4)", "x*y-1*(1)"]),
            &strings(&["x", "y"]),
            &HashMap::new(),
            &initial,
        );
        assert!(matches!(result.outcome, BlockOutcome::Converged { .. }));
    }

    #[test]
    fn test_under_determined_block_fails() {
        let orchestrator = SolveOrchestrator::new(SolverConfig::default());
        let result = orchestrator.solve_block(
            &strings(&["x+y-1*(1)"]),
            &strings(&["x", "y"]),
            &HashMap::new(),
            &HashMap::new(),
        );
        assert!(matches!(
            result.outcome,
            BlockOutcome::Failed(SolveError::UnderDetermined { .. })
        ));
        assert!(result.values.is_empty());
    }

    #[test]
    fn test_over_determined_block_falls_back_to_levenberg_marquardt() {
        let orchestrator = SolveOrchestrator::new(SolverConfig::default());
        let result = orchestrator.solve_block(
            &strings(&["x-1*(1)", "y-1*(2)", "x+y-1*(3)"]),
            &strings(&["x", "y"]),
            &HashMap::new(),
            &HashMap::new(),
        );
        assert!(matches!(result.outcome, BlockOutcome::Converged { .. }));
        assert!(approx_eq!(f64, result.values[1], 2.0, epsilon = 1e-8));
    }

    #[test]
    fn test_no_root_keeps_best_effort_values() {
        let orchestrator = SolveOrchestrator::new(SolverConfig::default());
        let result = orchestrator.solve_block(
            &strings(&["x^2-1*(-1)"]),
            &strings(&["x"]),
            &HashMap::new(),
            &HashMap::new(),
        );
        assert!(matches!(result.outcome, BlockOutcome::NonConverged { .. }));
        assert_eq!(result.values.len(), 1);
    }

    #[test]
    fn test_timeout_discards_values() {
        let config = SolverConfig {
            timeout: 0.05,
            poll_interval_ms: 5,
            ..SolverConfig::default()
        };
        let orchestrator = SolveOrchestrator::new(config).with_kernel(Arc::new(Stall));
        let started = Instant::now();
        let result = orchestrator.solve_block(
            &strings(&["x+y-1*(4)", "x-y-1*(0)"]),
            &strings(&["x", "y"]),
            &HashMap::new(),
            &HashMap::new(),
        );
        assert!(matches!(result.outcome, BlockOutcome::TimedOut));
        assert!(result.values.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_unknown_name_is_a_hard_error() {
        let orchestrator = SolveOrchestrator::new(SolverConfig::default());
        let result = orchestrator.solve_block(
            &strings(&["x-1*(q)"]),
            &strings(&["x"]),
            &HashMap::new(),
            &HashMap::new(),
        );
        assert!(result.outcome.is_error());
    }
}

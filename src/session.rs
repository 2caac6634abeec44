//! The solving context.
//!
//! A `Session` owns every store: the equation arena, the variable registry, ODE problems,
//! initial values and the run flags. Lines are added with [`Session::translate_line`]; a
//! call to [`Session::decompose_and_solve`] then solves everything that can be solved.
//!
//! ```
//! use eqsolve::{Session, SolverConfig};
//!
//! let mut session = Session::new(SolverConfig::default());
//! assert!(session.translate_line("x + y = 4").is_success());
//! assert!(session.translate_line("x - y = 0").is_success());
//!
//! let summary = session.decompose_and_solve();
//! assert_eq!(summary.solved_count, 2);
//! assert!(!summary.error_flag);
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::SolverConfig;
use crate::equation::parse_residual;
use crate::graph::{Decomposer, DependencyGraph};
use crate::kernels::NumericKernel;
use crate::ode::{self, OdeProblem};
use crate::orchestrator::{BlockOutcome, BlockResult, SolveOrchestrator};
use crate::registry::{internal_name, VariableRegistry};
use crate::translator::{canonical_constant, canonical_function, EquationTranslator, ParseError};

/// Handle of a stored equation. Never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EquationId(pub usize);

/// A variable of an equation with the symbolic partial derivative of the residual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquationVariable {
    pub name: String,
    /// Simplified derivative, empty if the residual could not be differentiated
    pub derivative: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEquation {
    pub residual: String,
    pub variables: Vec<EquationVariable>,
    /// 1-based source line
    pub line: usize,
}

impl NormalizedEquation {
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|v| v.name.as_str())
    }
}

/// A block result with the equations it was solved from.
#[derive(Debug)]
pub struct SolvedBlock {
    pub equations: Vec<EquationId>,
    pub result: BlockResult,
}

#[derive(Debug, Default)]
pub struct SolveSummary {
    /// Variables solved by this call
    pub solved_count: usize,
    pub error_flag: bool,
    /// Every attempted block in solve order
    pub blocks: Vec<SolvedBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResidualStatus {
    Ok,
    /// Above ten times the precision
    High,
    NonFinite,
    /// Some variable of the equation has no value
    Unevaluated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResidualEntry {
    pub equation: EquationId,
    pub line: usize,
    /// Residual value, NaN when unevaluated
    pub value: f64,
    pub status: ResidualStatus,
}

pub struct Session {
    config: SolverConfig,
    translator: EquationTranslator,
    equations: Vec<NormalizedEquation>,
    unsolved: BTreeSet<EquationId>,
    solved_equations: Vec<EquationId>,
    registry: VariableRegistry,
    ode_problems: Vec<OdeProblem>,
    initial_values: HashMap<String, f64>,
    error_flag: bool,
    timeout_flag: bool,
    high_residual_flag: bool,
    line_counter: usize,
    kernel_override: Option<Arc<dyn NumericKernel>>,
}

impl Session {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            translator: EquationTranslator::new(config.angle_mode),
            config,
            equations: Vec::new(),
            unsolved: BTreeSet::new(),
            solved_equations: Vec::new(),
            registry: VariableRegistry::new(),
            ode_problems: Vec::new(),
            initial_values: HashMap::new(),
            error_flag: false,
            timeout_flag: false,
            high_residual_flag: false,
            line_counter: 0,
            kernel_override: None,
        }
    }

    /// Solves every block with `kernel` instead of the configured methods.
    pub fn with_kernel(mut self, kernel: Arc<dyn NumericKernel>) -> Self {
        self.kernel_override = Some(kernel);
        self
    }

    /// Translates the next line. ODE statements are extracted instead of stored as equations.
    pub fn translate_line(&mut self, line: &str) -> ParseError {
        let number = self.line_counter + 1;
        self.translate_line_at(line, number)
    }

    /// Translates `line` as source line `number`.
    pub fn translate_line_at(&mut self, line: &str, number: usize) -> ParseError {
        self.line_counter = self.line_counter.max(number);
        if self.extract_ode(line).is_some() {
            return ParseError::success();
        }

        let translation = match self.translator.translate(line) {
            Ok(Some(translation)) => translation,
            Ok(None) => return ParseError::success(),
            Err(error) => {
                debug!(line = number, %error, "line rejected");
                return error;
            }
        };

        let variables = derivative_placeholders(&translation.residual, &translation.variables);
        for variable in &translation.variables {
            if self.registry.solved_value(variable).is_none() {
                self.registry.add_count(variable, 1);
            }
        }
        self.record_original_case(line);

        let id = EquationId(self.equations.len());
        self.equations.push(NormalizedEquation {
            residual: translation.residual,
            variables,
            line: number,
        });
        self.unsolved.insert(id);
        ParseError::success()
    }

    /// Stores `line` as an ODE problem if it is one.
    pub fn extract_ode(&mut self, line: &str) -> Option<OdeProblem> {
        let problem = ode::extract(line)?;
        self.registry.record_original_case(&problem.target);
        self.registry
            .record_original_case(&problem.integration_variable);
        for name in problem.referenced_identifiers() {
            self.registry.add_count(&name, 1);
            self.registry.record_original_case(&name);
        }
        self.ode_problems.push(problem.clone());
        Some(problem)
    }

    /// Remembers the spelling of every identifier of `line`.
    pub fn record_original_case(&mut self, line: &str) {
        for word in line.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_')) {
            if !ode::check_variable(word) {
                continue;
            }
            let lower = word.to_ascii_lowercase();
            if canonical_function(&lower).is_none() && canonical_constant(&lower).is_none() {
                self.registry.record_original_case(word);
            }
        }
    }

    pub fn set_initial_value(&mut self, name: &str, value: f64) {
        self.initial_values.insert(internal_name(name), value);
    }

    /// Solves single-variable equations first, then the decomposed remainder block by block.
    pub fn decompose_and_solve(&mut self) -> SolveSummary {
        let mut orchestrator = SolveOrchestrator::new(self.config.clone());
        if let Some(kernel) = &self.kernel_override {
            orchestrator = orchestrator.with_kernel(Arc::clone(kernel));
        }
        let mut summary = SolveSummary::default();

        // Singleton pre-pass; solved values may unlock further singletons
        let mut failed: HashSet<EquationId> = HashSet::new();
        while let Some(id) = self.next_singleton(&failed) {
            let variables = self.unsolved_variables(id);
            let residual = self.equations[id.0].residual.clone();
            let result = orchestrator.solve_block(
                &[residual],
                &variables,
                self.registry.solved(),
                &self.initial_values,
            );
            if !self.apply(&[id], result, &mut summary) {
                failed.insert(id);
            }
        }

        let rows: Vec<(EquationId, Vec<String>)> = self
            .unsolved
            .iter()
            .filter(|id| !failed.contains(id))
            .map(|&id| (id, self.unsolved_variables(id)))
            .collect();
        let graph = DependencyGraph::build(
            rows.iter().map(|(id, names)| (*id, names.as_slice())),
            |_| true,
        );
        let decomposition = Decomposer::new(self.config.max_start_candidates).decompose(&graph);
        debug!(
            blocks = decomposition.blocks.len(),
            consistency = decomposition.consistency.len(),
            "decomposed"
        );

        for block in decomposition.blocks {
            let blocked = block.equations.iter().any(|id| {
                self.unsolved_variables(*id)
                    .iter()
                    .any(|v| !block.variables.contains(v))
            });
            if blocked {
                warn!(variables = ?block.variables, "skipping block that depends on unsolved variables");
                continue;
            }
            let residuals: Vec<String> = block
                .equations
                .iter()
                .map(|id| self.equations[id.0].residual.clone())
                .collect();
            let result = orchestrator.solve_block(
                &residuals,
                &block.variables,
                self.registry.solved(),
                &self.initial_values,
            );
            self.apply(&block.equations, result, &mut summary);
        }

        summary.error_flag = self.error_flag;
        summary
    }

    /// Writes a block result back. Returns true if values were written.
    fn apply(&mut self, ids: &[EquationId], result: BlockResult, summary: &mut SolveSummary) -> bool {
        let written = result.outcome.has_values();
        if written {
            for (name, value) in result.variables.iter().zip(&result.values) {
                self.registry.mark_solved(name, *value);
            }
            for id in ids {
                if self.unsolved.remove(id) {
                    self.solved_equations.push(*id);
                }
            }
            summary.solved_count += result.variables.len();
        }
        match result.outcome {
            BlockOutcome::TimedOut => {
                self.timeout_flag = true;
                self.error_flag = true;
            }
            BlockOutcome::Failed(_) => self.error_flag = true,
            BlockOutcome::Converged { .. } | BlockOutcome::NonConverged { .. } => {}
        }
        summary.blocks.push(SolvedBlock {
            equations: ids.to_vec(),
            result,
        });
        written
    }

    fn next_singleton(&self, failed: &HashSet<EquationId>) -> Option<EquationId> {
        self.unsolved
            .iter()
            .copied()
            .find(|id| !failed.contains(id) && self.unsolved_variables(*id).len() == 1)
    }

    /// Variables of an equation that have no value yet.
    fn unsolved_variables(&self, id: EquationId) -> Vec<String> {
        self.equations
            .get(id.0)
            .map(|e| {
                e.variable_names()
                    .filter(|v| self.registry.solved_value(v).is_none())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Residual of every stored equation at the solved values.
    ///
    /// Sets the high-residual flag for residuals above `10 * precision` and the error flag for
    /// non-finite ones.
    pub fn residual_report(&mut self) -> Vec<ResidualEntry> {
        let solved = self.registry.solved();
        let tolerance = self.config.precision * 10.0;
        let entries: Vec<ResidualEntry> = self
            .equations
            .par_iter()
            .enumerate()
            .map(|(i, equation)| {
                let complete = equation.variable_names().all(|v| solved.contains_key(v));
                let value = if complete {
                    parse_residual(&equation.residual, &HashMap::new(), solved)
                        .map(|ast| ast.evaluate(&[]))
                        .ok()
                } else {
                    None
                };
                let (value, status) = match value {
                    None => (f64::NAN, ResidualStatus::Unevaluated),
                    Some(v) if !v.is_finite() => (v, ResidualStatus::NonFinite),
                    Some(v) if v.abs() > tolerance => (v, ResidualStatus::High),
                    Some(v) => (v, ResidualStatus::Ok),
                };
                ResidualEntry {
                    equation: EquationId(i),
                    line: equation.line,
                    value,
                    status,
                }
            })
            .collect();

        for entry in &entries {
            match entry.status {
                ResidualStatus::High => self.high_residual_flag = true,
                ResidualStatus::NonFinite => self.error_flag = true,
                ResidualStatus::Ok | ResidualStatus::Unevaluated => {}
            }
        }
        entries
    }

    /// Reinitializes every store and flag. The configuration is kept.
    pub fn purge_all(&mut self) {
        self.equations.clear();
        self.unsolved.clear();
        self.solved_equations.clear();
        self.registry.clear();
        self.ode_problems.clear();
        self.initial_values.clear();
        self.error_flag = false;
        self.timeout_flag = false;
        self.high_residual_flag = false;
        self.line_counter = 0;
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn equations(&self) -> &[NormalizedEquation] {
        &self.equations
    }

    pub fn equation(&self, id: EquationId) -> Option<&NormalizedEquation> {
        self.equations.get(id.0)
    }

    pub fn unsolved_equations(&self) -> impl Iterator<Item = EquationId> + '_ {
        self.unsolved.iter().copied()
    }

    pub fn solved_equations(&self) -> &[EquationId] {
        &self.solved_equations
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub fn solved_value(&self, name: &str) -> Option<f64> {
        self.registry.solved_value(name)
    }

    pub fn ode_problems(&self) -> &[OdeProblem] {
        &self.ode_problems
    }

    pub fn initial_values(&self) -> &HashMap<String, f64> {
        &self.initial_values
    }

    pub fn error_flag(&self) -> bool {
        self.error_flag
    }

    pub fn timeout_flag(&self) -> bool {
        self.timeout_flag
    }

    pub fn high_residual_flag(&self) -> bool {
        self.high_residual_flag
    }

    /// Marks the run as failed, for errors found outside the solve.
    pub fn raise_error(&mut self) {
        self.error_flag = true;
    }
}

/// Pairs every variable with the simplified partial derivative of `residual`.
fn derivative_placeholders(residual: &str, variables: &[String]) -> Vec<EquationVariable> {
    let var_map: HashMap<String, u32> = variables
        .iter()
        .enumerate()
        .map(|(i, v)| (v.clone(), i as u32))
        .collect();
    let ast = parse_residual(residual, &var_map, &HashMap::new()).ok();
    variables
        .iter()
        .map(|name| EquationVariable {
            name: name.clone(),
            derivative: ast
                .as_ref()
                .map(|a| a.derivative(name).simplify().to_string())
                .unwrap_or_default(),
        })
        .collect()
}

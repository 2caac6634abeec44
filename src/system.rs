//! Blocks of residual equations compiled together.
//!
//! An `EquationSystem` compiles the residual vector of a block into one JIT function and its
//! Jacobian into a second, row-major one. Hessians of every residual are compiled on request for
//! kernels that use second order information (dogleg).
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use eqsolve::system::EquationSystem;
//!
//! let var_map = HashMap::from([("x".to_string(), 0), ("y".to_string(), 1)]);
//! let system = EquationSystem::from_var_map(
//!     vec!["x+y-1*(4)".to_string(), "x-y-1*(0)".to_string()],
//!     &var_map,
//!     &HashMap::new(),
//! ).unwrap();
//!
//! assert_eq!(system.eval(&[2.0, 2.0]).unwrap(), vec![0.0, 0.0]);
//! assert_eq!(system.jacobian(&[2.0, 2.0]).unwrap(), vec![vec![1.0, 1.0], vec![1.0, -1.0]]);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use itertools::Itertools;
use rayon::prelude::*;

use crate::builder::{build_combined_function, build_matrix_function};
use crate::equation::parse_residual;
use crate::errors::EquationError;
use crate::expr::Expr;
use crate::kernels::Residuals;
use crate::types::{CombinedJITFunction, MatrixJITFunction};

/// A compiled block of residuals sharing one input ordering.
pub struct EquationSystem {
    /// Normalized residual strings
    pub equations: Vec<String>,
    /// Simplified trees, one per residual
    pub asts: Vec<Expr>,
    /// Input index of every block variable
    pub variable_map: HashMap<String, u32>,
    /// Variables in input order
    pub sorted_variables: Vec<String>,
    /// Evaluates all residuals at once
    pub combined_fun: CombinedJITFunction,
    /// Row-major Jacobian, `equations x variables`
    pub jacobian_fun: MatrixJITFunction,
    /// Row-major Hessian of each residual, present after `with_hessians`
    pub hessian_funs: Option<Vec<MatrixJITFunction>>,
}

impl EquationSystem {
    /// Creates a system with explicit input ordering; names in `bindings` become constants.
    pub fn from_var_map(
        equations: Vec<String>,
        variable_map: &HashMap<String, u32>,
        bindings: &HashMap<String, f64>,
    ) -> Result<Self, EquationError> {
        let asts = equations
            .iter()
            .map(|e| parse_residual(e, variable_map, bindings))
            .collect::<Result<Vec<_>, _>>()?;

        let sorted_variables: Vec<String> = variable_map
            .iter()
            .sorted_by_key(|(_, &idx)| idx)
            .map(|(var, _)| var.clone())
            .collect();
        let n_inputs = sorted_variables.len();

        let combined_fun = build_combined_function(asts.clone(), n_inputs)?;

        let jacobian: Vec<Vec<Expr>> = asts
            .par_iter()
            .map(|ast| {
                sorted_variables
                    .iter()
                    .map(|v| *ast.derivative(v).simplify())
                    .collect()
            })
            .collect();
        let jacobian_fun = build_matrix_function(jacobian, n_inputs)?;

        Ok(Self {
            equations,
            asts,
            variable_map: variable_map.clone(),
            sorted_variables,
            combined_fun,
            jacobian_fun,
            hessian_funs: None,
        })
    }

    /// Compiles the Hessian of every residual.
    pub fn with_hessians(mut self) -> Result<Self, EquationError> {
        let n_inputs = self.sorted_variables.len();
        let hessians = self
            .asts
            .iter()
            .map(|ast| {
                let grid: Vec<Vec<Expr>> = self
                    .sorted_variables
                    .iter()
                    .map(|vi| {
                        let first = ast.derivative(vi).simplify();
                        self.sorted_variables
                            .iter()
                            .map(|vj| *first.derivative(vj).simplify())
                            .collect()
                    })
                    .collect();
                build_matrix_function(grid, n_inputs)
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.hessian_funs = Some(hessians);
        Ok(self)
    }

    /// Evaluates all residuals into `results`.
    pub fn eval_into<'a>(
        &self,
        inputs: &[f64],
        results: &'a mut [f64],
    ) -> Result<&'a [f64], EquationError> {
        self.validate_input_length(inputs)?;
        if results.len() != self.equations.len() {
            return Err(EquationError::InvalidOutputLength {
                expected: self.equations.len(),
                got: results.len(),
            });
        }
        (self.combined_fun)(inputs, results);
        Ok(results)
    }

    pub fn eval(&self, inputs: &[f64]) -> Result<Vec<f64>, EquationError> {
        let mut results = vec![0.0; self.equations.len()];
        self.eval_into(inputs, &mut results)?;
        Ok(results)
    }

    /// Jacobian at `inputs`, one row per residual.
    pub fn jacobian(&self, inputs: &[f64]) -> Result<Vec<Vec<f64>>, EquationError> {
        self.validate_input_length(inputs)?;
        let n = self.sorted_variables.len();
        let mut flat = vec![0.0; self.equations.len() * n];
        (self.jacobian_fun)(inputs, &mut flat);
        Ok(flat.chunks(n.max(1)).map(<[f64]>::to_vec).collect())
    }

    pub fn sorted_variables(&self) -> &[String] {
        &self.sorted_variables
    }

    pub fn num_equations(&self) -> usize {
        self.equations.len()
    }

    fn validate_input_length(&self, inputs: &[f64]) -> Result<(), EquationError> {
        if inputs.len() != self.sorted_variables.len() {
            return Err(EquationError::InvalidInputLength {
                expected: self.sorted_variables.len(),
                got: inputs.len(),
            });
        }
        Ok(())
    }
}

impl Residuals for EquationSystem {
    fn num_equations(&self) -> usize {
        self.equations.len()
    }

    fn num_variables(&self) -> usize {
        self.sorted_variables.len()
    }

    fn residuals_into(&self, x: &[f64], out: &mut [f64]) {
        (self.combined_fun)(x, out);
    }

    fn jacobian_into(&self, x: &[f64], out: &mut [f64]) {
        (self.jacobian_fun)(x, out);
    }

    fn weighted_hessian_into(&self, x: &[f64], weights: &[f64], out: &mut [f64]) -> bool {
        let Some(hessians) = &self.hessian_funs else {
            return false;
        };
        out.iter_mut().for_each(|v| *v = 0.0);
        let mut scratch = vec![0.0; out.len()];
        for (hessian, w) in hessians.iter().zip(weights) {
            hessian(x, &mut scratch);
            for (acc, h) in out.iter_mut().zip(&scratch) {
                *acc += w * h;
            }
        }
        true
    }
}

impl Clone for EquationSystem {
    fn clone(&self) -> Self {
        Self {
            equations: self.equations.clone(),
            asts: self.asts.clone(),
            variable_map: self.variable_map.clone(),
            sorted_variables: self.sorted_variables.clone(),
            combined_fun: Arc::clone(&self.combined_fun),
            jacobian_fun: Arc::clone(&self.jacobian_fun),
            hessian_funs: self.hessian_funs.clone(),
        }
    }
}

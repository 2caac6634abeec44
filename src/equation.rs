//! Single residual equations with JIT-compiled derivatives.
//!
//! An `Equation` wraps one normalized residual string (`A-1*(B)`). On construction it is parsed,
//! converted to an [`Expr`], simplified and compiled together with its first and second order
//! partial derivatives.
//! Size-1 blocks are solved directly on an `Equation`; larger blocks use
//! [`crate::system::EquationSystem`].
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use eqsolve::Equation;
//!
//! let var_map = HashMap::from([("x".to_string(), 0)]);
//! let bindings = HashMap::from([("q".to_string(), 4.0)]);
//! let eq = Equation::from_var_map("x^2-1*(q)".to_string(), &var_map, &bindings).unwrap();
//! assert_eq!(eq.eval(&[3.0]).unwrap(), 5.0);
//! assert_eq!(eq.affine_slope("x"), None);
//! ```

use std::collections::HashMap;

use evalexpr::{build_operator_tree, DefaultNumericTypes};

use crate::builder::build_function;
use crate::convert::build_ast;
use crate::errors::EquationError;
use crate::expr::Expr;
use crate::kernels::Residuals;
use crate::types::JITFunction;
use colored::Colorize;
use itertools::Itertools;

/// A compiled residual with first and second order partial derivatives.
pub struct Equation {
    residual: String,
    ast: Box<Expr>,
    fun: JITFunction,
    derivatives_first_order: Vec<JITFunction>,
    derivatives_second_order: Vec<Vec<JITFunction>>,
    sorted_variables: Vec<String>,
}

impl std::fmt::Debug for Equation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, "    {}: {}", "Residual".cyan(), self.residual)?;
        writeln!(f, "    {}: {}", "Simplified".cyan(), self.ast)?;
        writeln!(f, "    {}: {:?}", "Variables".cyan(), self.sorted_variables)?;
        writeln!(f, "}}")
    }
}

impl std::fmt::Display for Equation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = 0", self.ast)
    }
}

impl Equation {
    /// Creates an equation with explicit input ordering.
    ///
    /// Names in `bindings` are inlined as constants; every other free name must be in `var_map`.
    pub fn from_var_map(
        residual: String,
        var_map: &HashMap<String, u32>,
        bindings: &HashMap<String, f64>,
    ) -> Result<Self, EquationError> {
        let ast = parse_residual(&residual, var_map, bindings)?;

        let sorted_variables: Vec<String> = var_map
            .iter()
            .sorted_by_key(|(_, &idx)| idx)
            .map(|(var, _)| var.clone())
            .collect();
        let n_inputs = sorted_variables.len();

        let fun = build_function(ast.clone(), n_inputs)?;

        let first: Vec<Box<Expr>> = sorted_variables
            .iter()
            .map(|v| ast.derivative(v).simplify())
            .collect();
        let derivatives_first_order = first
            .iter()
            .map(|d| build_function((**d).clone(), n_inputs))
            .collect::<Result<Vec<_>, _>>()?;

        let derivatives_second_order = first
            .iter()
            .map(|d| {
                sorted_variables
                    .iter()
                    .map(|v| build_function(*d.derivative(v).simplify(), n_inputs))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            residual,
            ast: Box::new(ast),
            fun,
            derivatives_first_order,
            derivatives_second_order,
            sorted_variables,
        })
    }

    pub fn eval(&self, values: &[f64]) -> Result<f64, EquationError> {
        self.validate_input_length(values)?;
        Ok((self.fun)(values))
    }

    /// Slope `a` if the residual is `a * variable + c` with `a != 0`.
    pub fn affine_slope(&self, variable: &str) -> Option<f64> {
        let first = self.ast.derivative(variable).simplify();
        let second = first.derivative(variable).simplify();
        match (*first, *second) {
            (Expr::Const(a), Expr::Const(b)) if a != 0.0 && a.is_finite() && b == 0.0 => Some(a),
            _ => None,
        }
    }

    pub fn residual(&self) -> &str {
        &self.residual
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    pub fn sorted_variables(&self) -> &[String] {
        &self.sorted_variables
    }

    fn validate_input_length(&self, values: &[f64]) -> Result<(), EquationError> {
        if values.len() != self.sorted_variables.len() {
            return Err(EquationError::InvalidInputLength {
                expected: self.sorted_variables.len(),
                got: values.len(),
            });
        }
        Ok(())
    }
}

impl Residuals for Equation {
    fn num_equations(&self) -> usize {
        1
    }

    fn num_variables(&self) -> usize {
        self.sorted_variables.len()
    }

    fn residuals_into(&self, x: &[f64], out: &mut [f64]) {
        if let Some(slot) = out.first_mut() {
            *slot = (self.fun)(x);
        }
    }

    fn jacobian_into(&self, x: &[f64], out: &mut [f64]) {
        for (slot, d) in out.iter_mut().zip(&self.derivatives_first_order) {
            *slot = d(x);
        }
    }

    fn weighted_hessian_into(&self, x: &[f64], weights: &[f64], out: &mut [f64]) -> bool {
        let w = weights.first().copied().unwrap_or(0.0);
        let n = self.sorted_variables.len();
        for (i, row) in self.derivatives_second_order.iter().enumerate() {
            for (j, d) in row.iter().enumerate() {
                if let Some(slot) = out.get_mut(i * n + j) {
                    *slot = w * d(x);
                }
            }
        }
        true
    }
}

/// Parses a normalized residual and converts it into a simplified expression.
pub fn parse_residual(
    residual: &str,
    var_map: &HashMap<String, u32>,
    bindings: &HashMap<String, f64>,
) -> Result<Expr, EquationError> {
    let node = build_operator_tree::<DefaultNumericTypes>(residual)?;
    let ast = build_ast(&node, var_map, bindings)?;
    Ok(*ast.simplify())
}

//! Engineering equation solver.
//!
//! Lines like `Q = m*cp*(T_out - T_in)` are translated into residual form, grouped into the
//! smallest blocks that must be solved together, and solved block by block with JIT-compiled
//! residuals and Jacobians. Parsing builds on the [evalexpr](https://github.com/ISibboI/evalexpr)
//! crate; residuals and their symbolic derivatives are compiled with
//! [Cranelift](https://github.com/bytecodealliance/wasmtime/tree/main/cranelift).
//!
//! # Features
//!
//! - Per-line syntax checking with typed error kinds
//! - Block decomposition of the equation/variable graph
//! - Newton, dogleg and Levenberg-Marquardt kernels with a per-block timeout
//! - `SolveODE` statement extraction and substance property substitution
//!
//! # Example
//!
//! ```rust
//! use eqsolve::{Session, SolverConfig};
//!
//! let mut session = Session::new(SolverConfig::default());
//! session.translate_line("y = x + 1");
//! session.translate_line("x = 2");
//!
//! let summary = session.decompose_and_solve();
//! assert!(!summary.error_flag);
//! assert_eq!(session.solved_value("y"), Some(3.0));
//! ```

pub use config::{AngleMode, SolveMethod, SolverConfig};
pub use document::{render_report, run, Document, RunReport};
pub use equation::Equation;
pub use session::{EquationId, Session, SolveSummary};
pub use system::EquationSystem;
pub use translator::{EquationTranslator, ParseError, ParseErrorKind};

pub mod prelude {
    pub use crate::config::SolverConfig;
    pub use crate::equation::Equation;
    pub use crate::expr::Expr;
    pub use crate::kernels::{NumericKernel, Residuals};
    pub use crate::session::Session;
    pub use crate::thermo::{PropertyLookup, PropertyTable};
}

/// Bracket bookkeeping for the translator
pub mod brackets;
/// JIT compilation functionality using Cranelift
pub mod builder;
/// Solver configuration
pub mod config;
/// Conversion from parsed expressions to internal AST
pub mod convert;
/// Equation documents, the run driver and reports
pub mod document;
/// Single compiled residual with derivatives
pub mod equation;
/// Error types for the various failure modes
pub mod errors;
/// Expression tree representation and symbolic differentiation
pub mod expr;
/// Equation/variable graph and block decomposition
pub mod graph;
/// Numerical root-finding kernels
pub mod kernels;
/// `SolveODE` statement extraction
pub mod ode;
/// Timed block solves
pub mod orchestrator;
/// Variable occurrence counts and solved values
pub mod registry;
/// The solving context
pub mod session;
/// System of equations
pub mod system;
/// Substance property call substitution
pub mod thermo;
/// Line translation to residual form
pub mod translator;
/// Compiled function types
pub mod types;
/// Functions for linking external functions to the expression tree
pub(crate) mod operators;

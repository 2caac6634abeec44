//! Error types for the eqsolve crate.
//!
//! Each layer has its own error enum:
//!
//! - `ConvertError`: conversion from the evalexpr tree into `Expr`
//! - `BuilderError`: JIT compilation with Cranelift
//! - `EquationError`: building and evaluating residual functions
//! - `SolveError`: numeric kernels and block orchestration
//! - `ThermoError`: substitution of `Substance.Property(...)` calls
//! - `DocumentError`: reading equation documents and solver configuration
//!
//! Grammar failures while translating a line are not errors in this sense; they are reported
//! as [`crate::translator::ParseError`] values.

use cranelift_codegen::CodegenError;
use cranelift_module::ModuleError;
use evalexpr::{DefaultNumericTypes, EvalexprError};
use thiserror::Error;

/// Errors raised while converting an evalexpr tree into an `Expr`.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Exponent that could not be turned into an expression
    #[error("Could not convert exponent in Exp operator: {0}")]
    ExpOperator(String),
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),
    #[error("Unsupported function: {0}")]
    UnsupportedFunction(String),
    /// Root node without exactly one child
    #[error("Expected single child for root node: {0}")]
    RootNode(String),
    /// Constant that is not numeric
    #[error("Expected numeric constant: {0}")]
    ConstOperator(String),
    #[error("Variable not found: {0}")]
    VariableNotFound(String),
    /// Function called with the wrong number of arguments
    #[error("Function {name} expects one argument, got {got}")]
    Arity { name: String, got: usize },
}

/// Errors that can occur during JIT compilation of expressions.
#[derive(Error, Debug)]
pub enum BuilderError {
    /// Error when the target machine architecture is not supported
    #[error("host machine is not supported: {0}")]
    HostMachineNotSupported(String),
    /// Error during Cranelift code generation
    #[error("codegen error: {0}")]
    CodegenError(CodegenError),
    /// Error in the Cranelift JIT module
    #[error("module error: {0}")]
    ModuleError(ModuleError),
    /// Error when defining the JIT function
    #[error("function error: {0}")]
    FunctionError(String),
    /// Error when declaring the JIT function
    #[error("declaration error: {0}")]
    DeclarationError(String),
    /// Invalid setting passed to the Cranelift flag builder
    #[error("setting error: {0}")]
    SettingError(String),
}

/// High-level errors that can occur when working with residual equations.
#[derive(Debug, Error)]
pub enum EquationError {
    /// Error when parsing the residual string with evalexpr
    #[error("Failed to build Evalexpr AST: {0}")]
    BuildEvalexprError(#[from] EvalexprError<DefaultNumericTypes>),
    /// Error when converting from the evalexpr AST into `Expr`
    #[error("Failed to build JIT AST: {0}")]
    BuildJITError(#[from] ConvertError),
    /// Error when JIT compiling the expression
    #[error("Failed to build JIT function: {0}")]
    BuildFunctionError(#[from] BuilderError),
    /// Error when the input length is not the same as the number of variables
    #[error("Invalid input length: expected {expected}, got {got}")]
    InvalidInputLength { expected: usize, got: usize },
    /// Error when the output length is not the same as the number of equations
    #[error("Invalid output length: expected {expected}, got {got}")]
    InvalidOutputLength { expected: usize, got: usize },
}

/// Failures of a numeric solve.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error(transparent)]
    Equation(#[from] EquationError),
    /// Residual or Jacobian evaluation produced NaN or infinity
    #[error("evaluation produced a non-finite value at iteration {iteration}")]
    NonFinite { iteration: usize },
    /// Linear step could not be computed
    #[error("singular Jacobian at iteration {iteration}")]
    Singular { iteration: usize },
    /// Fewer equations than unknowns
    #[error("block is under-determined: {equations} equations for {variables} variables")]
    UnderDetermined { equations: usize, variables: usize },
    /// Kernel that needs as many equations as unknowns got a rectangular block
    #[error("method requires a square block: {equations} equations for {variables} variables")]
    NotSquare { equations: usize, variables: usize },
    /// Worker thread went away without reporting a result
    #[error("solver worker terminated unexpectedly")]
    WorkerLost,
    #[error("solve cancelled")]
    Cancelled,
}

/// Failures while rewriting thermodynamic property calls.
#[derive(Debug, Error)]
pub enum ThermoError {
    #[error("could not parse substance/property call: {0}")]
    Malformed(String),
    #[error("unknown property {substance}.{property}")]
    UnknownProperty { substance: String, property: String },
    #[error("{substance}.{property} expects {expected} arguments ({variables}), got {got}")]
    ArgumentCount {
        substance: String,
        property: String,
        expected: usize,
        got: usize,
        variables: String,
    },
    #[error("property call has no output variable: {0}")]
    NoOutput(String),
}

/// Failures while reading documents and configuration.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// Initial-value line that is not `name=value`
    #[error("line {line}: invalid initial value '{text}'")]
    InitialValue { line: usize, text: String },
    #[error("unterminated comment starting on line {0}")]
    UnterminatedComment(usize),
}

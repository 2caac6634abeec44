use std::sync::Arc;

/// Compiled residual or derivative of a single equation.
/// Takes the block's variable values and returns one number.
pub type JITFunction = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Compiled function that evaluates several expressions in one call.
/// Writes one value per expression into the output buffer.
pub type CombinedJITFunction = Arc<dyn Fn(&[f64], &mut [f64]) + Send + Sync>;

/// Compiled Jacobian: fills a row-major `equations x variables` buffer.
pub type MatrixJITFunction = Arc<dyn Fn(&[f64], &mut [f64]) + Send + Sync>;

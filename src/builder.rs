//! JIT compilation of residual expressions with Cranelift.
//!
//! The entry points are:
//! - `build_function()` compiles one expression into `fn(&[f64]) -> f64`
//! - `build_combined_function()` compiles several expressions into one call that fills a buffer
//! - `build_matrix_function()` compiles a row-major grid of expressions (a Jacobian)
//!
//! Every compiled function reads its inputs from a pointer to `f64`s. The safe wrappers check
//! buffer lengths before calling into machine code and yield NaN when the input is too short.

use std::sync::Arc;

use crate::{
    errors::{BuilderError, EquationError},
    expr::Expr,
    operators,
    types::{CombinedJITFunction, JITFunction, MatrixJITFunction},
};
use cranelift::prelude::*;
use cranelift_codegen::{ir::immediates::Offset32, Context};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};
use isa::TargetIsa;

struct ThreadSafeFunction(*const u8);
unsafe impl Send for ThreadSafeFunction {}
unsafe impl Sync for ThreadSafeFunction {}

impl ThreadSafeFunction {
    /// Entry point of the finalized code. Closures call this so they capture the wrapper.
    fn ptr(&self) -> *const u8 {
        self.0
    }
}

/// Compiles a single expression.
///
/// `n_inputs` is the number of variables the expression may reference; shorter input slices
/// evaluate to NaN instead of reading out of bounds.
pub fn build_function(expr: Expr, n_inputs: usize) -> Result<JITFunction, EquationError> {
    let isa = create_isa()?;
    let mut module = create_module(isa)?;
    let mut ctx = module.make_context();

    let mut sig = module.make_signature();
    sig.params
        .push(AbiParam::new(module.target_config().pointer_type()));
    sig.returns.push(AbiParam::new(types::F64));
    ctx.func.signature = sig;

    build_function_body(&mut ctx, &expr, &mut module)?;
    let code = Arc::new(compile_and_finalize(&mut module, &mut ctx, "residual")?);

    Ok(Arc::new(move |input: &[f64]| {
        if input.len() < n_inputs {
            return f64::NAN;
        }
        // SAFETY: compiled with signature fn(*const f64) -> f64 and only reads
        // offsets below n_inputs, which was checked above.
        unsafe {
            let f: extern "C" fn(*const f64) -> f64 = std::mem::transmute(code.ptr());
            f(input.as_ptr())
        }
    }))
}

/// Compiles several expressions into one function writing `exprs.len()` outputs.
pub fn build_combined_function(
    exprs: Vec<Expr>,
    n_inputs: usize,
) -> Result<CombinedJITFunction, EquationError> {
    let n_outputs = exprs.len();
    let code = build_vector_function(&exprs, "combined")?;
    Ok(wrap_vector_function(code, n_inputs, n_outputs))
}

/// Compiles a row-major `rows x cols` grid of expressions.
///
/// The output buffer receives entry `(i, j)` at index `i * cols + j`.
pub fn build_matrix_function(
    exprs: Vec<Vec<Expr>>,
    n_inputs: usize,
) -> Result<MatrixJITFunction, EquationError> {
    let flat: Vec<Expr> = exprs.into_iter().flatten().collect();
    let n_outputs = flat.len();
    let code = build_vector_function(&flat, "matrix")?;
    Ok(wrap_vector_function(code, n_inputs, n_outputs))
}

fn wrap_vector_function(
    code: ThreadSafeFunction,
    n_inputs: usize,
    n_outputs: usize,
) -> Arc<dyn Fn(&[f64], &mut [f64]) + Send + Sync> {
    let code = Arc::new(code);
    Arc::new(move |inputs: &[f64], results: &mut [f64]| {
        if inputs.len() < n_inputs || results.len() < n_outputs {
            results.iter_mut().for_each(|r| *r = f64::NAN);
            return;
        }
        // SAFETY: compiled with signature fn(*const f64, *mut f64); both buffers were
        // checked to be at least as long as the offsets the code touches.
        unsafe {
            let f: extern "C" fn(*const f64, *mut f64) = std::mem::transmute(code.ptr());
            f(inputs.as_ptr(), results.as_mut_ptr());
        }
    })
}

/// Creates an ISA for the host machine.
pub(crate) fn create_isa() -> Result<Arc<dyn TargetIsa>, BuilderError> {
    let mut flag_builder = settings::builder();

    // cranelift-jit rejects position-independent code on every host
    set_flag(&mut flag_builder, "use_colocated_libcalls", "false")?;
    set_flag(&mut flag_builder, "is_pic", "false")?;
    set_flag(&mut flag_builder, "opt_level", "speed")?;
    let verify = if cfg!(debug_assertions) { "true" } else { "false" };
    set_flag(&mut flag_builder, "enable_verifier", verify)?;

    let isa_builder = cranelift_native::builder().map_err(|msg| {
        BuilderError::HostMachineNotSupported(format!("{}: {msg}", target_lexicon::Triple::host()))
    })?;

    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(BuilderError::CodegenError)
}

fn set_flag(builder: &mut settings::Builder, name: &str, value: &str) -> Result<(), BuilderError> {
    builder
        .set(name, value)
        .map_err(|e| BuilderError::SettingError(format!("{name}={value}: {e}")))
}

/// Creates a JIT module with every host math function registered.
pub(crate) fn create_module(isa: Arc<dyn TargetIsa>) -> Result<JITModule, BuilderError> {
    let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
    for (name, ptr) in operators::symbols() {
        builder.symbol(name, ptr);
    }
    Ok(JITModule::new(builder))
}

fn build_function_body(
    ctx: &mut Context,
    ast: &Expr,
    module: &mut dyn Module,
) -> Result<(), EquationError> {
    let mut builder_ctx = FunctionBuilderContext::new();
    let mut func_builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);

    let entry_block = func_builder.create_block();
    let input_ptr = func_builder.append_block_param(entry_block, module.target_config().pointer_type());
    func_builder.switch_to_block(entry_block);
    func_builder.seal_block(entry_block);

    let result = ast.codegen(&mut func_builder, module, input_ptr)?;
    func_builder.ins().return_(&[result]);
    func_builder.finalize();

    Ok(())
}

fn compile_and_finalize(
    module: &mut JITModule,
    ctx: &mut Context,
    name: &str,
) -> Result<ThreadSafeFunction, BuilderError> {
    let func_id = module
        .declare_function(name, Linkage::Local, &ctx.func.signature)
        .map_err(|msg| BuilderError::DeclarationError(msg.to_string()))?;

    module
        .define_function(func_id, ctx)
        .map_err(|msg| BuilderError::FunctionError(msg.to_string()))?;

    module.clear_context(ctx);
    module
        .finalize_definitions()
        .map_err(BuilderError::ModuleError)?;

    // The module is never freed, so the code stays mapped for the life of the process.
    Ok(ThreadSafeFunction(module.get_finalized_function(func_id)))
}

/// Generates `fn(input: *const f64, output: *mut f64)` storing expression `i` at offset `8 * i`.
fn build_vector_function(exprs: &[Expr], name: &str) -> Result<ThreadSafeFunction, EquationError> {
    let isa = create_isa()?;
    let mut module = create_module(isa)?;
    let mut ctx = module.make_context();
    let mut builder_context = FunctionBuilderContext::new();

    let pointer_type = module.target_config().pointer_type();
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(pointer_type)); // input_ptr
    sig.params.push(AbiParam::new(pointer_type)); // output_ptr
    ctx.func.signature = sig;

    {
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_context);
        let entry_block = builder.create_block();
        builder.append_block_params_for_function_params(entry_block);
        builder.switch_to_block(entry_block);
        builder.seal_block(entry_block);

        let input_ptr = builder.block_params(entry_block)[0];
        let output_ptr = builder.block_params(entry_block)[1];

        for (i, expr) in exprs.iter().enumerate() {
            let value = expr.codegen(&mut builder, &mut module, input_ptr)?;
            let offset = i32::try_from(i * 8).map_err(|_| {
                BuilderError::FunctionError(format!("too many outputs: {}", exprs.len()))
            })?;
            builder
                .ins()
                .store(MemFlags::trusted(), value, output_ptr, Offset32::new(offset));
        }

        builder.ins().return_(&[]);
        builder.finalize();
    }

    Ok(compile_and_finalize(&mut module, &mut ctx, name)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Function;
    use float_cmp::approx_eq;

    fn x() -> Box<Expr> {
        Box::new(Expr::var("x", 0))
    }

    fn y() -> Box<Expr> {
        Box::new(Expr::var("y", 1))
    }

    #[test]
    fn test_build_function_matches_tree_evaluation() -> Result<(), Box<dyn std::error::Error>> {
        let expr = Expr::Add(
            Box::new(Expr::Func(Function::Sin, x())),
            Box::new(Expr::PowFloat(y(), 1.5)),
        );
        let f = build_function(expr.clone(), 2)?;
        let input = [0.7, 2.0];
        assert!(approx_eq!(f64, f(&input), expr.evaluate(&input), ulps = 4));
        Ok(())
    }

    #[test]
    fn test_isa_is_not_position_independent() -> Result<(), Box<dyn std::error::Error>> {
        let isa = create_isa()?;
        assert!(!isa.flags().is_pic());
        assert!(!isa.flags().use_colocated_libcalls());
        Ok(())
    }

    #[test]
    fn test_compiled_functions_cross_threads() -> Result<(), Box<dyn std::error::Error>> {
        let f = build_function(Expr::Mul(x(), y()), 2)?;
        let g = build_combined_function(vec![*x(), Expr::Add(x(), y())], 2)?;
        let (single, combined) = std::thread::scope(|scope| {
            let single = scope.spawn(|| f(&[3.0, 4.0]));
            let combined = scope.spawn(|| {
                let mut out = [0.0; 2];
                g(&[3.0, 4.0], &mut out);
                out
            });
            (single.join(), combined.join())
        });
        assert_eq!(single.map_err(|_| "worker panicked")?, 12.0);
        assert_eq!(combined.map_err(|_| "worker panicked")?, [3.0, 7.0]);
        Ok(())
    }

    #[test]
    fn test_short_input_is_nan() -> Result<(), Box<dyn std::error::Error>> {
        let f = build_function(Expr::Add(x(), y()), 2)?;
        assert!(f(&[1.0]).is_nan());
        Ok(())
    }

    #[test]
    fn test_integer_powers() -> Result<(), Box<dyn std::error::Error>> {
        for n in [-3, -1, 0, 1, 2, 5, 8] {
            let f = build_function(Expr::Pow(x(), n), 1)?;
            assert!(approx_eq!(f64, f(&[1.7]), 1.7f64.powi(n as i32), epsilon = 1e-12));
        }
        Ok(())
    }

    #[test]
    fn test_combined_function() -> Result<(), Box<dyn std::error::Error>> {
        let f = build_combined_function(
            vec![
                Expr::Mul(x(), y()),
                Expr::Func(Function::ArcTan, x()),
                Expr::Func(Function::Sqrt, y()),
            ],
            2,
        )?;
        let mut out = [0.0; 3];
        f(&[1.0, 4.0], &mut out);
        assert_eq!(out[0], 4.0);
        assert!(approx_eq!(f64, out[1], std::f64::consts::FRAC_PI_4, ulps = 2));
        assert_eq!(out[2], 2.0);
        Ok(())
    }

    #[test]
    fn test_matrix_function_is_row_major() -> Result<(), Box<dyn std::error::Error>> {
        let f = build_matrix_function(
            vec![
                vec![Expr::Const(1.0), Expr::Const(2.0)],
                vec![x(), y()].into_iter().map(|e| *e).collect(),
            ],
            2,
        )?;
        let mut out = [0.0; 4];
        f(&[3.0, 4.0], &mut out);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
        Ok(())
    }

    #[test]
    fn test_short_output_buffer_is_nan_filled() -> Result<(), Box<dyn std::error::Error>> {
        let f = build_combined_function(vec![*x(), *y()], 2)?;
        let mut out = [0.0; 1];
        f(&[1.0, 2.0], &mut out);
        assert!(out[0].is_nan());
        Ok(())
    }
}

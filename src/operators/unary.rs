//! Single-argument host functions (trigonometric, hyperbolic, exp and log).

use cranelift::prelude::FunctionBuilder;
use cranelift_codegen::ir::types::F64;
use cranelift_codegen::ir::{AbiParam, InstBuilder, Value};
use cranelift_module::{FuncId, Linkage, Module};

use crate::errors::{BuilderError, EquationError};
use crate::expr::Function;

macro_rules! host_fn {
    ($name:ident, $method:ident) => {
        extern "C" fn $name(x: f64) -> f64 {
            x.$method()
        }
    };
}

host_fn!(eqsolve_sin, sin);
host_fn!(eqsolve_cos, cos);
host_fn!(eqsolve_tan, tan);
host_fn!(eqsolve_exp, exp);
host_fn!(eqsolve_ln, ln);
host_fn!(eqsolve_sqrt, sqrt);
host_fn!(eqsolve_sinh, sinh);
host_fn!(eqsolve_cosh, cosh);
host_fn!(eqsolve_tanh, tanh);
host_fn!(eqsolve_asin, asin);
host_fn!(eqsolve_acos, acos);
host_fn!(eqsolve_atan, atan);

fn address(function: Function) -> *const u8 {
    let f: extern "C" fn(f64) -> f64 = match function {
        Function::Sin => eqsolve_sin,
        Function::Cos => eqsolve_cos,
        Function::Tan => eqsolve_tan,
        Function::Exp => eqsolve_exp,
        Function::Ln => eqsolve_ln,
        Function::Sqrt => eqsolve_sqrt,
        Function::Sinh => eqsolve_sinh,
        Function::Cosh => eqsolve_cosh,
        Function::Tanh => eqsolve_tanh,
        Function::ArcSin => eqsolve_asin,
        Function::ArcCos => eqsolve_acos,
        Function::ArcTan => eqsolve_atan,
    };
    f as *const u8
}

pub(crate) fn symbols() -> Vec<(&'static str, *const u8)> {
    Function::ALL
        .into_iter()
        .map(|f| (f.symbol(), address(f)))
        .collect()
}

/// Declares `function(f64) -> f64` in the module.
pub fn link_function(module: &mut dyn Module, function: Function) -> Result<FuncId, String> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(F64));
    sig.returns.push(AbiParam::new(F64));

    module
        .declare_function(function.symbol(), Linkage::Import, &sig)
        .map_err(|e| e.to_string())
}

/// Emits a call to `function(arg)` and returns the result value.
pub fn call_function(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    function: Function,
    arg: Value,
) -> Result<Value, EquationError> {
    let func_id = link_function(module, function).map_err(BuilderError::DeclarationError)?;
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[arg]);
    Ok(builder.inst_results(call)[0])
}

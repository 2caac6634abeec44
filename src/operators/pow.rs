//! Linking and calling the floating point power function in JIT-compiled code.

use cranelift::prelude::FunctionBuilder;
use cranelift_codegen::ir::types::F64;
use cranelift_codegen::ir::{AbiParam, InstBuilder, Value};
use cranelift_module::{FuncId, Linkage, Module};

use crate::errors::{BuilderError, EquationError};

pub(crate) const POWF_SYMBOL: &str = "eqsolve_powf";

pub(crate) extern "C" fn eqsolve_powf(base: f64, exponent: f64) -> f64 {
    base.powf(exponent)
}

/// Declares `powf(f64, f64) -> f64` in the module.
///
/// Declaring the same import twice returns the existing id, so callers may link per use.
pub fn link_powf(module: &mut dyn Module) -> Result<FuncId, String> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(F64)); // base
    sig.params.push(AbiParam::new(F64)); // exponent
    sig.returns.push(AbiParam::new(F64));

    module
        .declare_function(POWF_SYMBOL, Linkage::Import, &sig)
        .map_err(|e| e.to_string())
}

/// Emits a call to `powf(base, exponent)` and returns the result value.
pub fn call_powf(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    base: Value,
    exponent: Value,
) -> Result<Value, EquationError> {
    let func_id = link_powf(module).map_err(BuilderError::DeclarationError)?;
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[base, exponent]);
    Ok(builder.inst_results(call)[0])
}

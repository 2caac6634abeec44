//! Host functions called from JIT-compiled code.
//!
//! Cranelift has native instructions for arithmetic, `fabs` and `sqrt`; everything else is an
//! `extern "C"` wrapper registered with the JIT builder under the names returned by
//! [`crate::expr::Function::symbol`] and [`pow::POWF_SYMBOL`].

pub mod pow;
pub mod unary;

/// Every symbol the JIT module needs to resolve, paired with its address.
pub(crate) fn symbols() -> Vec<(&'static str, *const u8)> {
    let mut table = unary::symbols();
    table.push((pow::POWF_SYMBOL, pow::eqsolve_powf as *const u8));
    table
}

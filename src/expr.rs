//! Expression trees for residual equations.
//!
//! `Expr` is the symbolic form every normalized equation is converted into. It supports:
//!
//! - symbolic differentiation (`derivative`), used to build Jacobians and Hessians
//! - algebraic simplification (`simplify`), used to keep derivative trees small and to
//!   recognize affine residuals
//! - tree-walking evaluation (`evaluate`) for residual reports and constant folding
//! - Cranelift code generation (`codegen`) for the compiled residual functions
//!
//! Transcendental functions share a single `Func` node tagged with a [`Function`], so the
//! derivative table, the evaluator and the JIT all dispatch on the same enum.

use cranelift::prelude::*;
use cranelift_codegen::ir::{immediates::Offset32, Value};
use cranelift_module::Module;

use crate::{errors::EquationError, operators};

/// Reference to a variable of the block being compiled.
///
/// `index` is the variable's position in the input slice handed to compiled functions.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    pub name: String,
    pub index: u32,
}

/// Single-argument functions understood by the translator and the JIT.
///
/// Trigonometric functions take radians; degree-mode lines are wrapped in `Degree*(...)`
/// by the translator before they reach this point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Exp,
    Ln,
    Sqrt,
    Sinh,
    Cosh,
    Tanh,
    ArcSin,
    ArcCos,
    ArcTan,
}

impl Function {
    pub const ALL: [Function; 12] = [
        Function::Sin,
        Function::Cos,
        Function::Tan,
        Function::Exp,
        Function::Ln,
        Function::Sqrt,
        Function::Sinh,
        Function::Cosh,
        Function::Tanh,
        Function::ArcSin,
        Function::ArcCos,
        Function::ArcTan,
    ];

    /// Spelling used in normalized residual strings.
    pub fn canonical_name(self) -> &'static str {
        match self {
            Function::Sin => "Sin",
            Function::Cos => "Cos",
            Function::Tan => "Tan",
            Function::Exp => "Exp",
            Function::Ln => "Log",
            Function::Sqrt => "Sqrt",
            Function::Sinh => "Sinh",
            Function::Cosh => "Cosh",
            Function::Tanh => "Tanh",
            Function::ArcSin => "ArcSin",
            Function::ArcCos => "ArcCos",
            Function::ArcTan => "ArcTan",
        }
    }

    pub fn from_canonical(name: &str) -> Option<Function> {
        Function::ALL
            .into_iter()
            .find(|f| f.canonical_name() == name)
    }

    /// Symbol name the JIT module resolves for this function.
    pub fn symbol(self) -> &'static str {
        match self {
            Function::Sin => "eqsolve_sin",
            Function::Cos => "eqsolve_cos",
            Function::Tan => "eqsolve_tan",
            Function::Exp => "eqsolve_exp",
            Function::Ln => "eqsolve_ln",
            Function::Sqrt => "eqsolve_sqrt",
            Function::Sinh => "eqsolve_sinh",
            Function::Cosh => "eqsolve_cosh",
            Function::Tanh => "eqsolve_tanh",
            Function::ArcSin => "eqsolve_asin",
            Function::ArcCos => "eqsolve_acos",
            Function::ArcTan => "eqsolve_atan",
        }
    }

    pub fn apply(self, x: f64) -> f64 {
        match self {
            Function::Sin => x.sin(),
            Function::Cos => x.cos(),
            Function::Tan => x.tan(),
            Function::Exp => x.exp(),
            Function::Ln => x.ln(),
            Function::Sqrt => x.sqrt(),
            Function::Sinh => x.sinh(),
            Function::Cosh => x.cosh(),
            Function::Tanh => x.tanh(),
            Function::ArcSin => x.asin(),
            Function::ArcCos => x.acos(),
            Function::ArcTan => x.atan(),
        }
    }

    /// Derivative of `self(arg)` with respect to `arg`, as an expression in `arg`.
    fn outer_derivative(self, arg: &Expr) -> Expr {
        let a = || Box::new(arg.clone());
        let one = || Box::new(Expr::Const(1.0));
        match self {
            Function::Sin => Expr::Func(Function::Cos, a()),
            Function::Cos => Expr::Neg(Box::new(Expr::Func(Function::Sin, a()))),
            // 1 / cos(f)^2
            Function::Tan => Expr::Div(
                one(),
                Box::new(Expr::Pow(Box::new(Expr::Func(Function::Cos, a())), 2)),
            ),
            Function::Exp => Expr::Func(Function::Exp, a()),
            Function::Ln => Expr::Div(one(), a()),
            // 1 / (2 * sqrt(f))
            Function::Sqrt => Expr::Div(
                one(),
                Box::new(Expr::Mul(
                    Box::new(Expr::Const(2.0)),
                    Box::new(Expr::Func(Function::Sqrt, a())),
                )),
            ),
            Function::Sinh => Expr::Func(Function::Cosh, a()),
            Function::Cosh => Expr::Func(Function::Sinh, a()),
            // 1 - tanh(f)^2
            Function::Tanh => Expr::Sub(
                one(),
                Box::new(Expr::Pow(Box::new(Expr::Func(Function::Tanh, a())), 2)),
            ),
            // 1 / sqrt(1 - f^2)
            Function::ArcSin => Expr::Div(
                one(),
                Box::new(Expr::Func(
                    Function::Sqrt,
                    Box::new(Expr::Sub(one(), Box::new(Expr::Pow(a(), 2)))),
                )),
            ),
            Function::ArcCos => Expr::Neg(Box::new(Function::ArcSin.outer_derivative(arg))),
            // 1 / (1 + f^2)
            Function::ArcTan => Expr::Div(
                one(),
                Box::new(Expr::Add(one(), Box::new(Expr::Pow(a(), 2)))),
            ),
        }
    }

    /// Constant folding is skipped outside the real domain so the NaN surfaces at evaluation.
    fn folds(self, x: f64) -> bool {
        match self {
            Function::Ln => x > 0.0,
            Function::Sqrt => x >= 0.0,
            Function::ArcSin | Function::ArcCos => (-1.0..=1.0).contains(&x),
            _ => true,
        }
    }
}

/// An expression tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A constant floating point value
    Const(f64),
    /// A reference to a block variable
    Var(VarRef),
    Add(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Abs(Box<Expr>),
    /// Exponentiation by an integer constant
    Pow(Box<Expr>, i64),
    /// Exponentiation by a non-integer constant
    PowFloat(Box<Expr>, f64),
    /// Exponentiation by another expression
    PowExpr(Box<Expr>, Box<Expr>),
    /// Single-argument function call
    Func(Function, Box<Expr>),
    Neg(Box<Expr>),
}

impl Expr {
    pub fn var(name: &str, index: u32) -> Expr {
        Expr::Var(VarRef {
            name: name.to_string(),
            index,
        })
    }

    /// Evaluates the tree with `values` indexed by each variable's `index`.
    ///
    /// Out-of-range indices evaluate to NaN.
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        match self {
            Expr::Const(c) => *c,
            Expr::Var(v) => values.get(v.index as usize).copied().unwrap_or(f64::NAN),
            Expr::Add(l, r) => l.evaluate(values) + r.evaluate(values),
            Expr::Sub(l, r) => l.evaluate(values) - r.evaluate(values),
            Expr::Mul(l, r) => l.evaluate(values) * r.evaluate(values),
            Expr::Div(l, r) => l.evaluate(values) / r.evaluate(values),
            Expr::Abs(e) => e.evaluate(values).abs(),
            Expr::Pow(b, n) => powi(b.evaluate(values), *n),
            Expr::PowFloat(b, p) => b.evaluate(values).powf(*p),
            Expr::PowExpr(b, e) => b.evaluate(values).powf(e.evaluate(values)),
            Expr::Func(f, e) => f.apply(e.evaluate(values)),
            Expr::Neg(e) => -e.evaluate(values),
        }
    }

    /// Value of the tree if it contains no variables.
    pub fn constant_value(&self) -> Option<f64> {
        match self {
            Expr::Const(c) => Some(*c),
            Expr::Var(_) => None,
            Expr::Add(l, r) => Some(l.constant_value()? + r.constant_value()?),
            Expr::Sub(l, r) => Some(l.constant_value()? - r.constant_value()?),
            Expr::Mul(l, r) => Some(l.constant_value()? * r.constant_value()?),
            Expr::Div(l, r) => Some(l.constant_value()? / r.constant_value()?),
            Expr::Abs(e) => Some(e.constant_value()?.abs()),
            Expr::Pow(b, n) => Some(powi(b.constant_value()?, *n)),
            Expr::PowFloat(b, p) => Some(b.constant_value()?.powf(*p)),
            Expr::PowExpr(b, e) => Some(b.constant_value()?.powf(e.constant_value()?)),
            Expr::Func(f, e) => Some(f.apply(e.constant_value()?)),
            Expr::Neg(e) => Some(-e.constant_value()?),
        }
    }

    /// Names of the variables referenced by the tree, in first-occurrence order.
    pub fn variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut Vec<String>) {
        match self {
            Expr::Const(_) => {}
            Expr::Var(v) => {
                if !out.contains(&v.name) {
                    out.push(v.name.clone());
                }
            }
            Expr::Add(l, r)
            | Expr::Sub(l, r)
            | Expr::Mul(l, r)
            | Expr::Div(l, r)
            | Expr::PowExpr(l, r) => {
                l.collect_variables(out);
                r.collect_variables(out);
            }
            Expr::Abs(e)
            | Expr::Pow(e, _)
            | Expr::PowFloat(e, _)
            | Expr::Func(_, e)
            | Expr::Neg(e) => e.collect_variables(out),
        }
    }

    /// Computes the symbolic derivative of this expression with respect to a variable.
    ///
    /// The rules implemented are:
    /// - d/dx(c) = 0, d/dx(x) = 1, d/dx(y) = 0
    /// - Sum and difference rules
    /// - Product rule: d/dx(f * g) = f * dg/dx + g * df/dx
    /// - Quotient rule: d/dx(f/g) = (g * df/dx - f * dg/dx) / g^2
    /// - Power rule: d/dx(f^n) = n * f^(n-1) * df/dx
    /// - General power: d/dx(f^g) = f^g * (g' * ln(f) + g * f'/f)
    /// - Chain rule for every [`Function`] and for abs
    ///
    /// The result is not simplified.
    pub fn derivative(&self, with_respect_to: &str) -> Box<Expr> {
        match self {
            Expr::Const(_) => Box::new(Expr::Const(0.0)),

            Expr::Var(var_ref) => {
                if var_ref.name == with_respect_to {
                    Box::new(Expr::Const(1.0))
                } else {
                    Box::new(Expr::Const(0.0))
                }
            }

            Expr::Add(left, right) => Box::new(Expr::Add(
                left.derivative(with_respect_to),
                right.derivative(with_respect_to),
            )),

            Expr::Sub(left, right) => Box::new(Expr::Sub(
                left.derivative(with_respect_to),
                right.derivative(with_respect_to),
            )),

            Expr::Mul(left, right) => Box::new(Expr::Add(
                Box::new(Expr::Mul(left.clone(), right.derivative(with_respect_to))),
                Box::new(Expr::Mul(right.clone(), left.derivative(with_respect_to))),
            )),

            Expr::Div(left, right) => Box::new(Expr::Div(
                Box::new(Expr::Sub(
                    Box::new(Expr::Mul(right.clone(), left.derivative(with_respect_to))),
                    Box::new(Expr::Mul(left.clone(), right.derivative(with_respect_to))),
                )),
                Box::new(Expr::Pow(right.clone(), 2)),
            )),

            Expr::Abs(expr) => Box::new(Expr::Mul(
                Box::new(Expr::Div(expr.clone(), Box::new(Expr::Abs(expr.clone())))),
                expr.derivative(with_respect_to),
            )),

            Expr::Pow(base, exp) => Box::new(Expr::Mul(
                Box::new(Expr::Mul(
                    Box::new(Expr::Const(*exp as f64)),
                    Box::new(Expr::Pow(base.clone(), exp - 1)),
                )),
                base.derivative(with_respect_to),
            )),

            Expr::PowFloat(base, exp) => Box::new(Expr::Mul(
                Box::new(Expr::Mul(
                    Box::new(Expr::Const(*exp)),
                    Box::new(Expr::PowFloat(base.clone(), exp - 1.0)),
                )),
                base.derivative(with_respect_to),
            )),

            Expr::PowExpr(base, exponent) => Box::new(Expr::Mul(
                Box::new(Expr::PowExpr(base.clone(), exponent.clone())),
                Box::new(Expr::Add(
                    Box::new(Expr::Mul(
                        exponent.derivative(with_respect_to),
                        Box::new(Expr::Func(Function::Ln, base.clone())),
                    )),
                    Box::new(Expr::Mul(
                        exponent.clone(),
                        Box::new(Expr::Div(base.derivative(with_respect_to), base.clone())),
                    )),
                )),
            )),

            Expr::Func(function, arg) => Box::new(Expr::Mul(
                Box::new(function.outer_derivative(arg)),
                arg.derivative(with_respect_to),
            )),

            Expr::Neg(expr) => Box::new(Expr::Neg(expr.derivative(with_respect_to))),
        }
    }

    /// Simplifies the expression by folding constants and applying identity rules.
    ///
    /// - Constant folding: 2 + 3 → 5, sin(0) → 0
    /// - Identities: x + 0 → x, x * 1 → x, x * 0 → 0, x / 1 → x, x - x → 0
    /// - Exponents: x^0 → 1, x^1 → x, (x^a)^b → x^(a*b), integral float exponents → `Pow`
    /// - Negation: -(-x) → x, x * (-1) → -x
    pub fn simplify(&self) -> Box<Expr> {
        match self {
            Expr::Const(_) | Expr::Var(_) => Box::new(self.clone()),

            Expr::Add(left, right) => {
                let l = left.simplify();
                let r = right.simplify();
                match (&*l, &*r) {
                    (Expr::Const(a), Expr::Const(b)) => Box::new(Expr::Const(a + b)),
                    (expr, Expr::Const(c)) | (Expr::Const(c), expr) if *c == 0.0 => {
                        Box::new(expr.clone())
                    }
                    (expr, Expr::Neg(inner)) => {
                        Expr::Sub(Box::new(expr.clone()), inner.clone()).simplify()
                    }
                    _ => Box::new(Expr::Add(l, r)),
                }
            }

            Expr::Sub(left, right) => {
                let l = left.simplify();
                let r = right.simplify();
                match (&*l, &*r) {
                    (Expr::Const(a), Expr::Const(b)) => Box::new(Expr::Const(a - b)),
                    (expr, Expr::Const(c)) if *c == 0.0 => Box::new(expr.clone()),
                    (Expr::Const(c), expr) if *c == 0.0 => Box::new(Expr::Neg(Box::new(expr.clone()))),
                    (a, b) if a == b => Box::new(Expr::Const(0.0)),
                    _ => Box::new(Expr::Sub(l, r)),
                }
            }

            Expr::Mul(left, right) => {
                let l = left.simplify();
                let r = right.simplify();
                match (&*l, &*r) {
                    (Expr::Const(a), Expr::Const(b)) => Box::new(Expr::Const(a * b)),
                    (_, Expr::Const(c)) | (Expr::Const(c), _) if *c == 0.0 => {
                        Box::new(Expr::Const(0.0))
                    }
                    (expr, Expr::Const(c)) | (Expr::Const(c), expr) if *c == 1.0 => {
                        Box::new(expr.clone())
                    }
                    (expr, Expr::Const(c)) | (Expr::Const(c), expr) if *c == -1.0 => {
                        Expr::Neg(Box::new(expr.clone())).simplify()
                    }
                    // c1 * (c2 * x) -> (c1 * c2) * x
                    (Expr::Const(c1), Expr::Mul(inner, x)) => match &**inner {
                        Expr::Const(c2) => Box::new(Expr::Mul(Box::new(Expr::Const(c1 * c2)), x.clone())),
                        _ => Box::new(Expr::Mul(l.clone(), r.clone())),
                    },
                    (Expr::Pow(b1, e1), Expr::Pow(b2, e2)) if b1 == b2 => {
                        Expr::Pow(b1.clone(), e1 + e2).simplify()
                    }
                    (a, b) if a == b => Box::new(Expr::Pow(l.clone(), 2)),
                    // keep constants on the left
                    (expr, Expr::Const(c)) => {
                        Box::new(Expr::Mul(Box::new(Expr::Const(*c)), Box::new(expr.clone())))
                    }
                    _ => Box::new(Expr::Mul(l, r)),
                }
            }

            Expr::Div(left, right) => {
                let l = left.simplify();
                let r = right.simplify();
                match (&*l, &*r) {
                    (Expr::Const(a), Expr::Const(b)) if *b != 0.0 => Box::new(Expr::Const(a / b)),
                    (Expr::Const(c), _) if *c == 0.0 => Box::new(Expr::Const(0.0)),
                    (expr, Expr::Const(c)) if *c == 1.0 => Box::new(expr.clone()),
                    (expr, Expr::Const(c)) if *c == -1.0 => Box::new(Expr::Neg(Box::new(expr.clone()))),
                    (a, b) if a == b => Box::new(Expr::Const(1.0)),
                    _ => Box::new(Expr::Div(l, r)),
                }
            }

            Expr::Abs(expr) => {
                let e = expr.simplify();
                match &*e {
                    Expr::Const(a) => Box::new(Expr::Const(a.abs())),
                    Expr::Abs(_) => e,
                    Expr::Neg(inner) => Box::new(Expr::Abs(inner.clone())),
                    Expr::Pow(_, n) if n % 2 == 0 => e,
                    _ => Box::new(Expr::Abs(e)),
                }
            }

            Expr::Pow(base, exp) => {
                let b = base.simplify();
                match (&*b, *exp) {
                    (_, 0) => Box::new(Expr::Const(1.0)),
                    (Expr::Const(a), n) => Box::new(Expr::Const(powi(*a, n))),
                    (_, 1) => b,
                    (Expr::Pow(inner, m), n) => Expr::Pow(inner.clone(), m * n).simplify(),
                    _ => Box::new(Expr::Pow(b, *exp)),
                }
            }

            Expr::PowFloat(base, exp) => {
                let b = base.simplify();
                match &*b {
                    _ if exp.fract() == 0.0 && exp.abs() < i32::MAX as f64 => {
                        Expr::Pow(b, *exp as i64).simplify()
                    }
                    Expr::Const(a) => Box::new(Expr::Const(a.powf(*exp))),
                    _ => Box::new(Expr::PowFloat(b, *exp)),
                }
            }

            Expr::PowExpr(base, exponent) => {
                let b = base.simplify();
                let e = exponent.simplify();
                match (&*b, &*e) {
                    (Expr::Const(a), Expr::Const(p)) => Box::new(Expr::Const(a.powf(*p))),
                    (_, Expr::Const(p)) => Expr::PowFloat(b.clone(), *p).simplify(),
                    _ => Box::new(Expr::PowExpr(b, e)),
                }
            }

            Expr::Func(function, arg) => {
                let a = arg.simplify();
                match &*a {
                    Expr::Const(c) if function.folds(*c) => Box::new(Expr::Const(function.apply(*c))),
                    Expr::Func(Function::Ln, inner) if *function == Function::Exp => inner.clone(),
                    _ => Box::new(Expr::Func(*function, a)),
                }
            }

            Expr::Neg(expr) => {
                let e = expr.simplify();
                match &*e {
                    Expr::Const(a) => Box::new(Expr::Const(-a)),
                    Expr::Neg(inner) => inner.clone(),
                    Expr::Mul(c, x) if matches!(**c, Expr::Const(_)) => {
                        Expr::Mul(Box::new(Expr::Neg(c.clone())), x.clone()).simplify()
                    }
                    _ => Box::new(Expr::Neg(e)),
                }
            }
        }
    }

    /// Emits Cranelift IR computing this expression.
    ///
    /// `input_ptr` points to the block's `f64` inputs; variable `i` is loaded from offset `8 * i`.
    pub fn codegen(
        &self,
        builder: &mut FunctionBuilder,
        module: &mut dyn Module,
        input_ptr: Value,
    ) -> Result<Value, EquationError> {
        match self {
            Expr::Const(c) => Ok(builder.ins().f64const(*c)),
            Expr::Var(v) => {
                let offset = (v.index as i64 * 8) as i32;
                Ok(builder.ins().load(
                    types::F64,
                    MemFlags::trusted(),
                    input_ptr,
                    Offset32::new(offset),
                ))
            }
            Expr::Add(l, r) => {
                let (a, b) = codegen_pair(l, r, builder, module, input_ptr)?;
                Ok(builder.ins().fadd(a, b))
            }
            Expr::Sub(l, r) => {
                let (a, b) = codegen_pair(l, r, builder, module, input_ptr)?;
                Ok(builder.ins().fsub(a, b))
            }
            Expr::Mul(l, r) => {
                let (a, b) = codegen_pair(l, r, builder, module, input_ptr)?;
                Ok(builder.ins().fmul(a, b))
            }
            Expr::Div(l, r) => {
                let (a, b) = codegen_pair(l, r, builder, module, input_ptr)?;
                Ok(builder.ins().fdiv(a, b))
            }
            Expr::Abs(e) => {
                let v = e.codegen(builder, module, input_ptr)?;
                Ok(builder.ins().fabs(v))
            }
            Expr::Neg(e) => {
                let v = e.codegen(builder, module, input_ptr)?;
                Ok(builder.ins().fneg(v))
            }
            Expr::Pow(base, n) => {
                let v = base.codegen(builder, module, input_ptr)?;
                Ok(generate_integer_power(builder, v, *n))
            }
            Expr::PowFloat(base, p) => {
                let v = base.codegen(builder, module, input_ptr)?;
                let exponent = builder.ins().f64const(*p);
                operators::pow::call_powf(builder, module, v, exponent)
            }
            Expr::PowExpr(base, exponent) => {
                let (b, e) = codegen_pair(base, exponent, builder, module, input_ptr)?;
                operators::pow::call_powf(builder, module, b, e)
            }
            Expr::Func(Function::Sqrt, e) => {
                let v = e.codegen(builder, module, input_ptr)?;
                Ok(builder.ins().sqrt(v))
            }
            Expr::Func(function, e) => {
                let v = e.codegen(builder, module, input_ptr)?;
                operators::unary::call_function(builder, module, *function, v)
            }
        }
    }
}

fn codegen_pair(
    left: &Expr,
    right: &Expr,
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    input_ptr: Value,
) -> Result<(Value, Value), EquationError> {
    let a = left.codegen(builder, module, input_ptr)?;
    let b = right.codegen(builder, module, input_ptr)?;
    Ok((a, b))
}

fn powi(base: f64, exp: i64) -> f64 {
    match i32::try_from(exp) {
        Ok(n) => base.powi(n),
        Err(_) => base.powf(exp as f64),
    }
}

/// Square-and-multiply expansion of `base^exp`.
fn generate_integer_power(builder: &mut FunctionBuilder, base: Value, exp: i64) -> Value {
    match exp {
        0 => builder.ins().f64const(1.0),
        1 => base,
        2 => builder.ins().fmul(base, base),
        _ => {
            let mut result: Option<Value> = None;
            let mut current = base;
            let mut remaining = exp.unsigned_abs();
            while remaining > 0 {
                if remaining & 1 == 1 {
                    result = Some(match result {
                        Some(r) => builder.ins().fmul(r, current),
                        None => current,
                    });
                }
                remaining >>= 1;
                if remaining > 0 {
                    current = builder.ins().fmul(current, current);
                }
            }
            let result = result.unwrap_or_else(|| builder.ins().f64const(1.0));
            if exp < 0 {
                let one = builder.ins().f64const(1.0);
                builder.ins().fdiv(one, result)
            } else {
                result
            }
        }
    }
}

/// Formats expressions in the same syntax the translator emits, so output can be re-parsed.
impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Const(val) if *val < 0.0 => write!(f, "({val})"),
            Expr::Const(val) => write!(f, "{val}"),
            Expr::Var(var_ref) => write!(f, "{}", var_ref.name),
            Expr::Add(left, right) => write!(f, "({left} + {right})"),
            Expr::Mul(left, right) => write!(f, "({left} * {right})"),
            Expr::Sub(left, right) => write!(f, "({left} - {right})"),
            Expr::Div(left, right) => write!(f, "({left} / {right})"),
            Expr::Abs(expr) => write!(f, "Abs({expr})"),
            Expr::Pow(base, exp) if *exp < 0 => write!(f, "({base}^({exp}))"),
            Expr::Pow(base, exp) => write!(f, "({base}^{exp})"),
            Expr::PowFloat(base, exp) if *exp < 0.0 => write!(f, "({base}^({exp}))"),
            Expr::PowFloat(base, exp) => write!(f, "({base}^{exp})"),
            Expr::PowExpr(base, exponent) => write!(f, "({base}^{exponent})"),
            Expr::Func(function, arg) => write!(f, "{}({arg})", function.canonical_name()),
            Expr::Neg(expr) => write!(f, "-({expr})"),
        }
    }
}

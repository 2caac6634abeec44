//! Conversion from evalexpr operator trees into [`Expr`].
//!
//! Normalized residual strings are parsed by evalexpr and then lowered here. Identifiers are
//! resolved in three steps:
//!
//! 1. the canonical constants `Pi`, `E` and `Degree`
//! 2. variables of the block being solved, looked up in `var_map`
//! 3. previously solved variables, looked up in `bindings` and inlined as constants
//!
//! Anything else is a `VariableNotFound` error.

use std::collections::HashMap;

use crate::{
    errors::ConvertError,
    expr::{Expr, Function, VarRef},
};
use evalexpr::{DefaultNumericTypes, Node, Operator};

/// Value of the `Degree` constant: radians per degree.
pub const DEGREE: f64 = std::f64::consts::PI / 180.0;

/// Value of a canonical constant name, if `name` is one.
pub fn constant_value(name: &str) -> Option<f64> {
    match name {
        "Pi" => Some(std::f64::consts::PI),
        "E" => Some(std::f64::consts::E),
        "Degree" => Some(DEGREE),
        _ => None,
    }
}

/// Converts an evalexpr node into an expression.
///
/// * `var_map` - block variables and their input indices
/// * `bindings` - values of already-solved variables
///
/// Supported are `+ - * / ^`, unary minus, numeric constants, the canonical constants and the
/// functions `Abs` plus every [`Function`] by its canonical name.
pub fn build_ast(
    node: &Node<DefaultNumericTypes>,
    var_map: &HashMap<String, u32>,
    bindings: &HashMap<String, f64>,
) -> Result<Expr, ConvertError> {
    let rec = |child: &Node<DefaultNumericTypes>| build_ast(child, var_map, bindings);
    let children = node.children();

    match node.operator() {
        // n-ary nodes fold left into binary ones
        Operator::Add => fold(children, &rec, Expr::Add),
        Operator::Mul => fold(children, &rec, Expr::Mul),
        Operator::Div => {
            let (l, r) = binary(node, &rec)?;
            Ok(Expr::Div(l, r))
        }
        Operator::Sub => {
            let (l, r) = binary(node, &rec)?;
            Ok(Expr::Sub(l, r))
        }
        Operator::Neg => {
            let child = children
                .first()
                .ok_or_else(|| ConvertError::UnsupportedOperator("empty negation".to_string()))?;
            Ok(Expr::Neg(Box::new(rec(child)?)))
        }
        Operator::Const { value } => match value {
            evalexpr::Value::Float(f) => Ok(Expr::Const(*f)),
            evalexpr::Value::Int(i) => Ok(Expr::Const(*i as f64)),
            _ => Err(ConvertError::ConstOperator(format!("{value:?}"))),
        },
        Operator::VariableIdentifierRead { identifier } => {
            let name = identifier.as_str();
            if let Some(value) = constant_value(name) {
                return Ok(Expr::Const(value));
            }
            if let Some(index) = var_map.get(name) {
                return Ok(Expr::Var(VarRef {
                    name: name.to_string(),
                    index: *index,
                }));
            }
            bindings
                .get(name)
                .map(|value| Expr::Const(*value))
                .ok_or_else(|| ConvertError::VariableNotFound(name.to_string()))
        }
        Operator::FunctionIdentifier { identifier } => {
            // evalexpr passes the argument as a single child (a tuple when there are several)
            let args = match children.first().map(|c| c.operator()) {
                Some(Operator::Tuple) => children[0].children().len(),
                Some(_) => children.len(),
                None => 0,
            };
            if args != 1 {
                return Err(ConvertError::Arity {
                    name: identifier.to_string(),
                    got: args,
                });
            }
            let arg = Box::new(rec(&children[0])?);
            match identifier.as_str() {
                "Abs" => Ok(Expr::Abs(arg)),
                name => Function::from_canonical(name)
                    .map(|f| Expr::Func(f, arg))
                    .ok_or_else(|| ConvertError::UnsupportedFunction(name.to_string())),
            }
        }
        Operator::RootNode => {
            if children.len() == 1 {
                rec(&children[0])
            } else {
                Err(ConvertError::RootNode(format!("{} children", children.len())))
            }
        }
        // Integral constant exponents become Pow, other constants PowFloat, the rest PowExpr
        Operator::Exp => {
            let (base, exponent) = binary(node, &rec)?;
            let exponent = exponent.simplify();
            match exponent.constant_value() {
                Some(p) if !p.is_finite() => Err(ConvertError::ExpOperator(p.to_string())),
                Some(p) if p.fract() == 0.0 && p.abs() <= i32::MAX as f64 => {
                    Ok(Expr::Pow(base, p as i64))
                }
                Some(p) => Ok(Expr::PowFloat(base, p)),
                None => Ok(Expr::PowExpr(base, exponent)),
            }
        }
        other => Err(ConvertError::UnsupportedOperator(format!("{other:?}"))),
    }
}

fn fold<F, C>(children: &[Node<DefaultNumericTypes>], rec: &F, combine: C) -> Result<Expr, ConvertError>
where
    F: Fn(&Node<DefaultNumericTypes>) -> Result<Expr, ConvertError>,
    C: Fn(Box<Expr>, Box<Expr>) -> Expr,
{
    let (first, rest) = children
        .split_first()
        .ok_or_else(|| ConvertError::UnsupportedOperator("operator without operands".to_string()))?;
    rest.iter().try_fold(rec(first)?, |acc, child| {
        Ok(combine(Box::new(acc), Box::new(rec(child)?)))
    })
}

fn binary<F>(node: &Node<DefaultNumericTypes>, rec: &F) -> Result<(Box<Expr>, Box<Expr>), ConvertError>
where
    F: Fn(&Node<DefaultNumericTypes>) -> Result<Expr, ConvertError>,
{
    match node.children() {
        [left, right] => Ok((Box::new(rec(left)?), Box::new(rec(right)?))),
        other => Err(ConvertError::UnsupportedOperator(format!(
            "{:?} with {} operands",
            node.operator(),
            other.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalexpr::build_operator_tree;
    use float_cmp::approx_eq;

    fn convert(
        text: &str,
        vars: &[&str],
        bindings: &[(&str, f64)],
    ) -> Result<Expr, Box<dyn std::error::Error>> {
        let node = build_operator_tree::<DefaultNumericTypes>(text)?;
        let var_map = vars
            .iter()
            .enumerate()
            .map(|(i, v)| (v.to_string(), i as u32))
            .collect();
        let bindings = bindings.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        Ok(build_ast(&node, &var_map, &bindings)?)
    }

    #[test]
    fn test_canonical_functions_and_constants() -> Result<(), Box<dyn std::error::Error>> {
        let e = convert("Sin(x)+Log(E)-Sqrt(4)*Pi", &["x"], &[])?;
        let expected = 0.5f64.sin() + 1.0 - 2.0 * std::f64::consts::PI;
        assert!(approx_eq!(f64, e.evaluate(&[0.5]), expected, ulps = 4));
        Ok(())
    }

    #[test]
    fn test_degree_wrapping() -> Result<(), Box<dyn std::error::Error>> {
        let e = convert("Sin(Degree*(x))", &["x"], &[])?;
        assert!(approx_eq!(f64, e.evaluate(&[90.0]), 1.0, epsilon = 1e-12));
        Ok(())
    }

    #[test]
    fn test_solved_variables_become_constants() -> Result<(), Box<dyn std::error::Error>> {
        let e = convert("x-1*(y+2)", &["x"], &[("y", 3.0)])?;
        assert_eq!(e.variables(), vec!["x".to_string()]);
        assert_eq!(e.evaluate(&[5.0]), 0.0);
        Ok(())
    }

    #[test]
    fn test_exponent_kinds() -> Result<(), Box<dyn std::error::Error>> {
        assert!(matches!(convert("x^2", &["x"], &[])?, Expr::Pow(_, 2)));
        assert!(matches!(convert("x^-2", &["x"], &[])?, Expr::Pow(_, -2)));
        assert!(matches!(convert("x^0.5", &["x"], &[])?, Expr::PowFloat(_, _)));
        assert!(matches!(convert("2^x", &["x"], &[])?, Expr::PowExpr(_, _)));
        Ok(())
    }

    #[test]
    fn test_unknown_names_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let node = build_operator_tree::<DefaultNumericTypes>("x+z")?;
        let var_map = HashMap::from([("x".to_string(), 0)]);
        let err = build_ast(&node, &var_map, &HashMap::new());
        assert!(matches!(err, Err(ConvertError::VariableNotFound(name)) if name == "z"));

        let node = build_operator_tree::<DefaultNumericTypes>("Foo(x)")?;
        let err = build_ast(&node, &var_map, &HashMap::new());
        assert!(matches!(err, Err(ConvertError::UnsupportedFunction(_))));
        Ok(())
    }
}

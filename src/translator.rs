//! Grammar check and residual-form rewriting of equation lines.
//!
//! A line `A = B` is validated character by character, rewritten into `A-1*(B)` and then
//! re-scanned token by token. The scan canonicalizes function and constant names for
//! [`crate::convert`] and collects the referenced variables in first-occurrence order.
//!
//! ```
//! use eqsolve::translator::EquationTranslator;
//!
//! let translator = EquationTranslator::default();
//! let translation = translator.translate("x = 2 + sin(y)").unwrap().unwrap();
//! assert_eq!(translation.residual, "x-1*(2+Sin(y))");
//! assert_eq!(translation.variables, vec!["x", "y"]);
//! ```

use thiserror::Error;

use crate::brackets::{BracketKind, BracketStack};
use crate::config::AngleMode;

/// Result code of a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseErrorKind {
    Success,
    IllegalCharacter,
    UnexpectedOperator,
    DoubledOperator,
    InvalidDot,
    MissingEquality,
    BracketMismatch,
    EmptyBrackets,
    NumberNextToIdentifier,
    MissingOperand,
    InvalidIdentifier,
}

impl ParseErrorKind {
    /// Numeric code, 0 for success.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn message(self) -> &'static str {
        match self {
            ParseErrorKind::Success => "ok",
            ParseErrorKind::IllegalCharacter => "illegal character",
            ParseErrorKind::UnexpectedOperator => "unexpected operator",
            ParseErrorKind::DoubledOperator => "two consecutive operators",
            ParseErrorKind::InvalidDot => "misplaced decimal separator",
            ParseErrorKind::MissingEquality => "missing equality sign",
            ParseErrorKind::BracketMismatch => "brackets do not match",
            ParseErrorKind::EmptyBrackets => "empty brackets",
            ParseErrorKind::NumberNextToIdentifier => "number written next to an identifier",
            ParseErrorKind::MissingOperand => "operator without operand",
            ParseErrorKind::InvalidIdentifier => "invalid identifier",
        }
    }
}

/// Outcome of translating one line, with the text that caused a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{}", .kind.message(), quoted(.offending))]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offending: String,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, offending: impl Into<String>) -> Self {
        Self {
            kind,
            offending: offending.into(),
        }
    }

    pub fn success() -> Self {
        Self::new(ParseErrorKind::Success, "")
    }

    pub fn is_success(&self) -> bool {
        self.kind == ParseErrorKind::Success
    }

    fn at(kind: ParseErrorKind, c: char) -> Self {
        Self::new(kind, c.to_string())
    }
}

fn quoted(offending: &str) -> String {
    if offending.is_empty() {
        String::new()
    } else {
        format!(" '{offending}'")
    }
}

/// A line in residual form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    /// Residual in the syntax understood by [`crate::convert::build_ast`]
    pub residual: String,
    /// Internal names of the distinct variables, in first-occurrence order
    pub variables: Vec<String>,
}

/// User spelling and canonical spelling of every supported function.
const FUNCTIONS: [(&str, &str); 14] = [
    ("sin", "Sin"),
    ("cos", "Cos"),
    ("tan", "Tan"),
    ("exp", "Exp"),
    ("log", "Log"),
    ("ln", "Log"),
    ("sqrt", "Sqrt"),
    ("abs", "Abs"),
    ("sinh", "Sinh"),
    ("cosh", "Cosh"),
    ("tanh", "Tanh"),
    ("arcsin", "ArcSin"),
    ("arccos", "ArcCos"),
    ("arctan", "ArcTan"),
];

const TRIGONOMETRIC: [&str; 6] = ["sin", "cos", "tan", "arcsin", "arccos", "arctan"];

/// Canonical spelling of a lowercase function name.
pub fn canonical_function(name: &str) -> Option<&'static str> {
    FUNCTIONS
        .iter()
        .find(|(user, _)| *user == name)
        .map(|(_, canonical)| *canonical)
}

/// Canonical spelling of a lowercase constant name.
pub fn canonical_constant(name: &str) -> Option<&'static str> {
    match name {
        "pi" => Some("Pi"),
        "e" => Some("E"),
        _ => None,
    }
}

fn is_operator(c: char) -> bool {
    matches!(c, '*' | '/' | '=' | '+' | '-' | '!' | '.' | ',' | '^')
}

fn is_opener(c: char) -> bool {
    matches!(c, '(' | '[')
}

fn is_closer(c: char) -> bool {
    matches!(c, ')' | ']')
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || is_operator(c)
        || is_opener(c)
        || is_closer(c)
        || c == '_'
        || c == ' '
        || c == '\t'
}

/// Checks and rewrites equation lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct EquationTranslator {
    pub angle_mode: AngleMode,
}

impl EquationTranslator {
    pub fn new(angle_mode: AngleMode) -> Self {
        Self { angle_mode }
    }

    /// Translates one line. `Ok(None)` means the line is blank.
    pub fn translate(&self, line: &str) -> Result<Option<Translation>, ParseError> {
        let Some(normalized) = self.normalize(line)? else {
            return Ok(None);
        };
        scan(&normalized).map(Some)
    }

    /// Character pass: produces `A-1*(B)` or `None` for a blank line.
    fn normalize(&self, line: &str) -> Result<Option<String>, ParseError> {
        use ParseErrorKind::*;

        let mut out = String::with_capacity(line.len() + 8);
        let mut brackets = BracketStack::new();
        let mut equality = false;
        let mut prev: Option<char> = None;

        for raw in line.chars() {
            if !is_allowed(raw) {
                return Err(ParseError::at(IllegalCharacter, raw));
            }
            if raw == ' ' || raw == '\t' {
                continue;
            }
            let c = raw.to_ascii_lowercase();

            if let Some(p) = prev {
                if is_closer(c) && is_opener(p) {
                    return Err(ParseError::at(EmptyBrackets, c));
                }
                if is_opener(p) && matches!(c, '*' | '/' | '^' | '!') {
                    return Err(ParseError::at(UnexpectedOperator, c));
                }
                if is_operator(p) && is_closer(c) {
                    return Err(ParseError::at(MissingOperand, p));
                }
            }
            if matches!(c, '.' | ',') && !prev.is_some_and(|p| p.is_ascii_digit()) {
                return Err(ParseError::at(InvalidDot, c));
            }
            if c == '=' && equality {
                return Err(ParseError::at(UnexpectedOperator, c));
            }
            if let Some(p) = prev {
                let signed = matches!(c, '+' | '-')
                    && matches!(p, '^' | '*' | '/' | '(' | '[' | '=' | '-' | '+');
                if is_operator(c) && is_operator(p) && !signed {
                    return Err(ParseError::at(DoubledOperator, c));
                }
            }

            match c {
                '=' => {
                    equality = true;
                    out.push_str("-1*(");
                }
                '_' => out.push_str("Gg"),
                ',' => out.push('.'),
                '(' | '[' => {
                    // `2(x)` and `(a)(b)` multiply
                    if prev.is_some_and(is_closer) || ends_with_number(&out) {
                        out.push('*');
                    }
                    let kind = self.opener_kind(&out);
                    brackets.push(kind);
                    out.push_str(kind.opener());
                }
                ')' | ']' => {
                    let kind = brackets
                        .pop()
                        .map_err(|_| ParseError::at(BracketMismatch, c))?;
                    out.push_str(kind.closer());
                }
                c => out.push(c),
            }
            prev = Some(c);
        }

        if let Some(p) = prev.filter(|p| is_operator(*p)) {
            return Err(ParseError::at(MissingOperand, p));
        }
        if !brackets.is_balanced() {
            return Err(ParseError::new(BracketMismatch, "("));
        }
        if !equality {
            return match prev {
                None => Ok(None),
                Some(_) => Err(ParseError::new(MissingEquality, line.trim())),
            };
        }
        out.push(')');
        Ok(Some(out))
    }

    /// Kind of a bracket opened right after the text written so far.
    fn opener_kind(&self, out: &str) -> BracketKind {
        let start = out
            .rfind(|c: char| !c.is_ascii_alphanumeric())
            .map_or(0, |i| i + 1);
        let name = &out[start..];
        if canonical_function(name).is_none() {
            return BracketKind::Plain;
        }
        if self.angle_mode == AngleMode::Degrees && TRIGONOMETRIC.contains(&name) {
            BracketKind::DegreeWrap
        } else {
            BracketKind::Function
        }
    }
}

/// True if `out` ends with a numeric literal.
fn ends_with_number(out: &str) -> bool {
    let start = out
        .rfind(|c: char| !c.is_ascii_alphanumeric())
        .map_or(0, |i| i + 1);
    out[start..].starts_with(|c: char| c.is_ascii_digit())
}

/// Token pass over the normalized text.
fn scan(normalized: &str) -> Result<Translation, ParseError> {
    use ParseErrorKind::*;

    let chars: Vec<char> = normalized.chars().collect();
    let mut residual = String::with_capacity(normalized.len());
    let mut variables: Vec<String> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() {
            let (end, number) = scan_number(&chars, i);
            match chars.get(end) {
                Some(next) if next.is_ascii_alphabetic() => {
                    let word_end = run_end(&chars, end);
                    let token: String = chars[i..word_end].iter().collect();
                    return Err(ParseError::new(NumberNextToIdentifier, token));
                }
                Some('.') => return Err(ParseError::at(InvalidDot, '.')),
                _ => {}
            }
            residual.push_str(&number);
            i = end;
        } else if c.is_ascii_alphabetic() {
            let end = run_end(&chars, i);
            let word: String = chars[i..end].iter().collect();
            let followed_by_call = chars.get(end) == Some(&'(');
            if word == "Degree" {
                residual.push_str(&word);
            } else if word.starts_with('G') {
                return Err(ParseError::new(InvalidIdentifier, word.replace("Gg", "_")));
            } else if let Some(canonical) = canonical_function(&word) {
                if !followed_by_call {
                    return Err(ParseError::new(InvalidIdentifier, word));
                }
                residual.push_str(canonical);
            } else if let Some(canonical) = canonical_constant(&word) {
                if followed_by_call {
                    return Err(ParseError::new(InvalidIdentifier, word));
                }
                residual.push_str(canonical);
            } else if followed_by_call {
                return Err(ParseError::new(InvalidIdentifier, word));
            } else {
                if !variables.contains(&word) {
                    variables.push(word.clone());
                }
                residual.push_str(&word);
            }
            i = end;
        } else if c == '.' {
            return Err(ParseError::at(InvalidDot, c));
        } else {
            residual.push(c);
            i += 1;
        }
    }

    Ok(Translation {
        residual,
        variables,
    })
}

fn run_end(chars: &[char], start: usize) -> usize {
    chars[start..]
        .iter()
        .position(|c| !c.is_ascii_alphanumeric())
        .map_or(chars.len(), |p| start + p)
}

/// Reads `digits[.digits][e[+-]digits]` starting at `start`.
///
/// Returns the end index and the number as emitted. Exponents are written as `m*10^(k)`.
fn scan_number(chars: &[char], start: usize) -> (usize, String) {
    let digits = |from: usize| {
        chars[from..]
            .iter()
            .position(|c| !c.is_ascii_digit())
            .map_or(chars.len(), |p| from + p)
    };

    let mut end = digits(start);
    if chars.get(end) == Some(&'.') && chars.get(end + 1).is_some_and(|c| c.is_ascii_digit()) {
        end = digits(end + 1);
    }
    let mantissa: String = chars[start..end].iter().collect();

    if chars.get(end) == Some(&'e') {
        let sign = chars
            .get(end + 1)
            .copied()
            .filter(|s| matches!(s, '+' | '-'));
        let exp_start = end + 1 + usize::from(sign.is_some());
        if chars.get(exp_start).is_some_and(|c| c.is_ascii_digit()) {
            let exp_end = digits(exp_start);
            let exponent: String = chars[exp_start..exp_end].iter().collect();
            let sign = if sign == Some('-') { "-" } else { "" };
            return (exp_end, format!("({mantissa}*10^({sign}{exponent}))"));
        }
    }
    (end, mantissa)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translate(line: &str) -> Result<Option<Translation>, ParseError> {
        EquationTranslator::default().translate(line)
    }

    fn kind(line: &str) -> ParseErrorKind {
        match translate(line) {
            Ok(_) => ParseErrorKind::Success,
            Err(e) => e.kind,
        }
    }

    #[test]
    fn test_residual_form() -> Result<(), Box<dyn std::error::Error>> {
        let t = translate("x=2+3")?.ok_or("blank")?;
        assert_eq!(t.residual, "x-1*(2+3)");
        assert_eq!(t.variables, vec!["x"]);
        Ok(())
    }

    #[test]
    fn test_blank_lines() {
        assert_eq!(translate("   \t"), Ok(None));
        assert_eq!(translate(""), Ok(None));
    }

    #[test]
    fn test_canonical_names_and_case() -> Result<(), Box<dyn std::error::Error>> {
        let t = translate("Y = LN(X) + pi*e - sqrt[abs(X)]")?.ok_or("blank")?;
        assert_eq!(t.residual, "y-1*(Log(x)+Pi*E-Sqrt(Abs(x)))");
        assert_eq!(t.variables, vec!["y", "x"]);
        Ok(())
    }

    #[test]
    fn test_underscore_escape() -> Result<(), Box<dyn std::error::Error>> {
        let t = translate("flow_rate = 2*inlet_1")?.ok_or("blank")?;
        assert_eq!(t.residual, "flowGgrate-1*(2*inletGg1)");
        assert_eq!(t.variables, vec!["flowGgrate", "inletGg1"]);
        Ok(())
    }

    #[test]
    fn test_degree_mode_wraps_trigonometric_arguments() -> Result<(), Box<dyn std::error::Error>> {
        let translator = EquationTranslator::new(AngleMode::Degrees);
        let t = translator.translate("y = sin(x) + exp(x)")?.ok_or("blank")?;
        assert_eq!(t.residual, "y-1*(Sin(Degree*(x))+Exp(x))");
        Ok(())
    }

    #[test]
    fn test_decimal_comma_and_exponent() -> Result<(), Box<dyn std::error::Error>> {
        let t = translate("x = 2,5 + 1.5e-3")?.ok_or("blank")?;
        assert_eq!(t.residual, "x-1*(2.5+(1.5*10^(-3)))");
        Ok(())
    }

    #[test]
    fn test_signed_operands_are_allowed() {
        assert_eq!(kind("x = -2"), ParseErrorKind::Success);
        assert_eq!(kind("x = 2*-3"), ParseErrorKind::Success);
        assert_eq!(kind("x = 2^-1"), ParseErrorKind::Success);
        assert_eq!(kind("x = (+y)"), ParseErrorKind::Success);
    }

    #[test]
    fn test_error_kinds() {
        use ParseErrorKind::*;
        assert_eq!(kind("x = 2 $ 3"), IllegalCharacter);
        assert_eq!(kind("x = y = 2"), UnexpectedOperator);
        assert_eq!(kind("x==2"), UnexpectedOperator);
        assert_eq!(kind("x == 2"), UnexpectedOperator);
        assert_eq!(kind("x = (*2)"), UnexpectedOperator);
        assert_eq!(kind("x = 2 */ 3"), DoubledOperator);
        assert_eq!(kind("x = .5"), InvalidDot);
        assert_eq!(kind("x = y.5"), InvalidDot);
        assert_eq!(kind("x = (2).5"), InvalidDot);
        assert_eq!(kind("x + 2"), MissingEquality);
        assert_eq!(kind("x = (2"), BracketMismatch);
        assert_eq!(kind("x = 2)"), BracketMismatch);
        assert_eq!(kind("x = ()"), EmptyBrackets);
        assert_eq!(kind("1x = 2"), NumberNextToIdentifier);
        assert_eq!(kind("x = 2y"), NumberNextToIdentifier);
        assert_eq!(kind("x = 2 +"), MissingOperand);
        assert_eq!(kind("x = (2 +)"), MissingOperand);
        assert_eq!(kind("_x = 2"), InvalidIdentifier);
        assert_eq!(kind("x = foo(2)"), InvalidIdentifier);
        assert_eq!(kind("x = pi(2)"), InvalidIdentifier);
        assert_eq!(kind("x = 2*e(1)"), InvalidIdentifier);
        assert_eq!(kind("x = y2(3)"), InvalidIdentifier);
        assert_eq!(kind("x = sin + 2"), InvalidIdentifier);
    }

    #[test]
    fn test_offending_text() {
        assert_eq!(
            translate("x = 2y"),
            Err(ParseError::new(ParseErrorKind::NumberNextToIdentifier, "2y"))
        );
        let error = translate("x = 2 $ 3").unwrap_err();
        assert_eq!(error.to_string(), "illegal character '$'");
        assert_eq!(error.kind.code(), 1);

        let boxed: Box<dyn std::error::Error> = Box::new(error);
        assert_eq!(boxed.to_string(), "illegal character '$'");
    }

    #[test]
    fn test_adjacent_brackets_multiply() -> Result<(), Box<dyn std::error::Error>> {
        let t = translate("x = 2(3)")?.ok_or("blank")?;
        assert_eq!(t.residual, "x-1*(2*(3))");
        let t = translate("y = (a+1)(b) + 1.5[c]")?.ok_or("blank")?;
        assert_eq!(t.residual, "y-1*((a+1)*(b)+1.5*(c))");
        assert_eq!(kind("z = 2 sin(z)"), ParseErrorKind::NumberNextToIdentifier);
        Ok(())
    }

    #[test]
    fn test_identifiers_may_contain_digits() -> Result<(), Box<dyn std::error::Error>> {
        let t = translate("x1y = t2")?.ok_or("blank")?;
        assert_eq!(t.variables, vec!["x1y", "t2"]);
        Ok(())
    }
}

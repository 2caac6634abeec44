//! Recognition of `target = SolveODE(derivative, variable, start, end, initial)` statements.
//!
//! ODE statements are not integrated. They are extracted, their identifiers are registered and
//! they are listed in the report.

use std::fmt;

use crate::translator::{canonical_constant, canonical_function};

/// A parsed `SolveODE` statement. Texts keep the user's casing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OdeProblem {
    pub target: String,
    pub derivative: String,
    pub integration_variable: String,
    pub start: String,
    pub end: String,
    pub initial: String,
    pub line: String,
}

impl fmt::Display for OdeProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "d{}/d{} = {}, {} from {} to {}, {}({}) = {}",
            self.target,
            self.integration_variable,
            self.derivative,
            self.integration_variable,
            self.start,
            self.end,
            self.target,
            self.start,
            self.initial
        )
    }
}

impl OdeProblem {
    /// Identifiers used by the derivative and the three bound expressions, excluding functions
    /// and constants. First occurrence wins; comparison is case-insensitive.
    pub fn referenced_identifiers(&self) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for text in [&self.derivative, &self.start, &self.end, &self.initial] {
            for word in text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_')) {
                if !word.starts_with(|c: char| c.is_ascii_alphabetic()) || !check_variable(word) {
                    continue;
                }
                let lower = word.to_ascii_lowercase();
                if canonical_function(&lower).is_some() || canonical_constant(&lower).is_some() {
                    continue;
                }
                if !found.iter().any(|f| f.eq_ignore_ascii_case(word)) {
                    found.push(word.to_string());
                }
            }
        }
        found
    }
}

/// True for a user identifier: a letter, then letters, digits or `_`, not starting with `Gg`.
pub fn check_variable(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    starts_with_letter
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with("Gg")
}

fn is_number_or_variable(arg: &str) -> bool {
    arg.parse::<f64>().is_ok() || check_variable(arg)
}

/// Splits the argument list on top-level commas outside quotes.
///
/// Returns `None` on a closing bracket without opener or unbalanced brackets at the end.
fn split_arguments(args: &str) -> Option<Vec<String>> {
    let mut arguments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut depth: i32 = 0;

    for c in args.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes && depth == 0 => {
                arguments.push(current.trim().to_string());
                current.clear();
            }
            '(' | '[' if !in_quotes => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' if !in_quotes => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
                current.push(c);
            }
            c => current.push(c),
        }
    }
    arguments.push(current.trim().to_string());
    (depth == 0).then_some(arguments)
}

/// Parses `line` as an ODE statement. `None` means the line is not one.
pub fn extract(line: &str) -> Option<OdeProblem> {
    let equals = line.find('=')?;
    let lower = line.to_ascii_lowercase();
    let call = equals + lower[equals..].find("solveode")?;

    let target = line[..equals].trim();
    if !check_variable(target) || !line[equals + 1..call].trim().is_empty() {
        return None;
    }
    // Only whitespace may separate the call name from its bracket
    let after_name = call + "solveode".len();
    let open = after_name + line[after_name..].find('(')?;
    if !line[after_name..open].trim().is_empty() {
        return None;
    }
    let close = line.rfind(')')?;
    if close <= open || !line[close + 1..].trim().is_empty() {
        return None;
    }

    let arguments = split_arguments(&line[open + 1..close])?;
    let [derivative, variable, start, end, initial]: [String; 5] = arguments.try_into().ok()?;

    let derivative = match derivative.strip_prefix('"').and_then(|d| d.strip_suffix('"')) {
        Some(inner) if !inner.contains('"') => inner.trim().to_string(),
        Some(_) => return None,
        None if derivative.contains('"') => return None,
        None => derivative,
    };

    if !check_variable(&variable)
        || !is_number_or_variable(&start)
        || !is_number_or_variable(&end)
        || !is_number_or_variable(&initial)
    {
        return None;
    }

    Some(OdeProblem {
        target: target.to_string(),
        derivative,
        integration_variable: variable,
        start,
        end,
        initial,
        line: line.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_problem() -> Result<(), Box<dyn std::error::Error>> {
        let problem = extract(r#"y = SolveODE("-k*y", t, 0, 10, y0)"#).ok_or("not an ODE")?;
        assert_eq!(problem.target, "y");
        assert_eq!(problem.derivative, "-k*y");
        assert_eq!(problem.integration_variable, "t");
        assert_eq!(problem.start, "0");
        assert_eq!(problem.end, "10");
        assert_eq!(problem.initial, "y0");
        assert_eq!(problem.referenced_identifiers(), vec!["k", "y", "y0"]);
        Ok(())
    }

    #[test]
    fn test_unquoted_derivative_with_brackets() -> Result<(), Box<dyn std::error::Error>> {
        let problem = extract("Temp = solveode(-h*(Temp-T_Amb), Time, 0, t_End, 300)")
            .ok_or("not an ODE")?;
        assert_eq!(problem.derivative, "-h*(Temp-T_Amb)");
        assert_eq!(problem.end, "t_End");
        assert_eq!(
            problem.referenced_identifiers(),
            vec!["h", "Temp", "T_Amb", "t_End"]
        );
        Ok(())
    }

    #[test]
    fn test_functions_and_constants_are_not_identifiers() -> Result<(), Box<dyn std::error::Error>> {
        let problem = extract("x = SolveODE(sin(pi*t)+e, t, 0, 1, 0)").ok_or("not an ODE")?;
        assert_eq!(problem.referenced_identifiers(), vec!["t"]);
        Ok(())
    }

    #[test]
    fn test_rejections() {
        // not an ODE call
        assert!(extract("y = 2*x").is_none());
        // call before the equality
        assert!(extract("SolveODE(y, t, 0, 1, 0) = y").is_none());
        // call inside a larger right-hand side
        assert!(extract("y = 3*SolveODE(a, t, 0, 1, 0)").is_none());
        assert!(extract("y = SolveODE(a, t, 0, 1, 0) + 1").is_none());
        // wrong argument count
        assert!(extract("y = SolveODE(y, t, 0, 1)").is_none());
        // invalid target
        assert!(extract("2y = SolveODE(y, t, 0, 1, 0)").is_none());
        assert!(extract("Ggy = SolveODE(y, t, 0, 1, 0)").is_none());
        // stray quote
        assert!(extract(r#"y = SolveODE(-"k"*y, t, 0, 1, 0)"#).is_none());
        // bound that is an expression
        assert!(extract("y = SolveODE(y, t, 0, 2*a, 0)").is_none());
        // unbalanced brackets
        assert!(extract("y = SolveODE((y, t, 0, 1, 0)").is_none());
        assert!(extract("y = SolveODE(y), t, 0, 1, (0)").is_none());
    }
}

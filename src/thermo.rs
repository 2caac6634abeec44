//! Substitution of thermodynamic property calls.
//!
//! A line `Substance.Property(out, a, b)` is rewritten into `out=formula'` before translation.
//! `formula'` is the stored formula with its variables replaced, in order, by the call
//! arguments after the output. Property data comes from a [`PropertyLookup`]; [`PropertyTable`]
//! is an in-memory one that can be loaded from JSON:
//!
//! ```json
//! { "Water": { "Density": { "formula": "1000-0.2*T", "variables": ["T"] } } }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{DocumentError, ThermoError};

/// Formula of one property and the names of the variables it uses, in call order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyFormula {
    pub formula: String,
    #[serde(default)]
    pub variables: Vec<String>,
}

/// Source of property formulas.
pub trait PropertyLookup {
    fn lookup(&self, substance: &str, property: &str) -> Option<PropertyFormula>;
    fn is_substance(&self, name: &str) -> bool;
}

/// Case-insensitive in-memory property table.
#[derive(Debug, Clone, Default)]
pub struct PropertyTable {
    substances: HashMap<String, HashMap<String, PropertyFormula>>,
}

impl PropertyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, substance: &str, property: &str, formula: PropertyFormula) {
        self.substances
            .entry(substance.to_ascii_lowercase())
            .or_default()
            .insert(property.to_ascii_lowercase(), formula);
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let text = std::fs::read_to_string(path)?;
        let raw: HashMap<String, HashMap<String, PropertyFormula>> = serde_json::from_str(&text)?;
        let mut table = Self::new();
        for (substance, properties) in raw {
            for (property, formula) in properties {
                table.insert(&substance, &property, formula);
            }
        }
        Ok(table)
    }
}

impl PropertyLookup for PropertyTable {
    fn lookup(&self, substance: &str, property: &str) -> Option<PropertyFormula> {
        self.substances
            .get(&substance.to_ascii_lowercase())?
            .get(&property.to_ascii_lowercase())
            .cloned()
    }

    fn is_substance(&self, name: &str) -> bool {
        self.substances.contains_key(&name.to_ascii_lowercase())
    }
}

/// Rewrites a property call. `Ok(None)` means the line does not start with a known substance.
pub fn substitute_calls(
    line: &str,
    lookup: &dyn PropertyLookup,
) -> Result<Option<String>, ThermoError> {
    let line = line.trim();
    let Some((substance, rest)) = line.split_once('.') else {
        return Ok(None);
    };
    let substance = substance.trim();
    if substance.is_empty() || !lookup.is_substance(substance) {
        return Ok(None);
    }

    let malformed = || ThermoError::Malformed(line.to_string());
    let (property, args) = rest.split_once('(').ok_or_else(malformed)?;
    let args = args.strip_suffix(')').ok_or_else(malformed)?;
    let property = property.trim();
    if property.is_empty() {
        return Err(malformed());
    }

    let arguments: Vec<&str> = args.split(',').map(str::trim).collect();
    if arguments.iter().all(|a| a.is_empty()) {
        return Err(ThermoError::NoOutput(line.to_string()));
    }
    if arguments.iter().any(|a| a.is_empty()) {
        return Err(malformed());
    }

    let entry = lookup
        .lookup(substance, property)
        .ok_or_else(|| ThermoError::UnknownProperty {
            substance: substance.to_string(),
            property: property.to_string(),
        })?;
    let expected = entry.variables.len() + 1;
    if arguments.len() != expected {
        return Err(ThermoError::ArgumentCount {
            substance: substance.to_string(),
            property: property.to_string(),
            expected,
            got: arguments.len(),
            variables: entry.variables.join(","),
        });
    }

    let body = replace_variables(&entry.formula, &entry.variables, &arguments[1..]);
    Ok(Some(format!("{}={}", arguments[0], body)))
}

/// Replaces every identifier of `formula` matching `names[i]` with `(values[i])`.
fn replace_variables(formula: &str, names: &[String], values: &[&str]) -> String {
    let mut out = String::with_capacity(formula.len());
    let mut word = String::new();
    let flush = |word: &mut String, out: &mut String| {
        let position = word
            .starts_with(|c: char| c.is_ascii_alphabetic())
            .then(|| names.iter().position(|n| n.eq_ignore_ascii_case(word)))
            .flatten();
        match position {
            Some(i) => {
                out.push('(');
                out.push_str(values[i]);
                out.push(')');
            }
            None => out.push_str(word),
        }
        word.clear();
    };

    for c in formula.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
        } else {
            flush(&mut word, &mut out);
            out.push(c);
        }
    }
    flush(&mut word, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water() -> PropertyTable {
        let mut table = PropertyTable::new();
        table.insert(
            "Water",
            "Density",
            PropertyFormula {
                formula: "1000-0.2*T+p_ref*T2".to_string(),
                variables: vec!["T".to_string(), "P_Ref".to_string()],
            },
        );
        table
    }

    #[test]
    fn test_substitution() -> Result<(), Box<dyn std::error::Error>> {
        let line = substitute_calls("water.density(rho, t_in+1, 2)", &water())?;
        assert_eq!(line.as_deref(), Some("rho=1000-0.2*(t_in+1)+(2)*T2"));
        Ok(())
    }

    #[test]
    fn test_non_calls_pass_through() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(substitute_calls("x = 2.5", &water())?, None);
        assert_eq!(substitute_calls("steam.density(rho, t)", &water())?, None);
        Ok(())
    }

    #[test]
    fn test_structural_errors() {
        let table = water();
        assert!(matches!(
            substitute_calls("Water.Viscosity(mu, t, p)", &table),
            Err(ThermoError::UnknownProperty { .. })
        ));
        assert!(matches!(
            substitute_calls("Water.Density(rho, t)", &table),
            Err(ThermoError::ArgumentCount { expected: 3, got: 2, .. })
        ));
        assert!(matches!(
            substitute_calls("Water.Density()", &table),
            Err(ThermoError::NoOutput(_))
        ));
        assert!(matches!(
            substitute_calls("Water.Density(rho, t, p", &table),
            Err(ThermoError::Malformed(_))
        ));
    }

    #[test]
    fn test_table_from_json() -> Result<(), Box<dyn std::error::Error>> {
        let path = std::env::temp_dir().join(format!("eqsolve-props-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"Air": {"Cp": {"formula": "1000+0.1*T", "variables": ["T"]}}}"#,
        )?;
        let table = PropertyTable::from_json_file(&path)?;
        std::fs::remove_file(&path)?;
        assert!(table.is_substance("AIR"));
        assert_eq!(
            table.lookup("air", "cp").map(|p| p.variables),
            Some(vec!["T".to_string()])
        );
        Ok(())
    }
}

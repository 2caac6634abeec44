//! Solver configuration.
//!
//! `SolverConfig` is plain data with serde support. Missing JSON fields take their defaults,
//! so a config file only needs the settings it changes:
//!
//! ```
//! use eqsolve::config::{SolveMethod, SolverConfig};
//!
//! let config: SolverConfig = serde_json::from_str(r#"{ "multi_variable_method": "Dogleg" }"#).unwrap();
//! assert_eq!(config.multi_variable_method, SolveMethod::Dogleg);
//! assert_eq!(config.max_iterations, 200);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::DocumentError;

/// Kernel used to solve a block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SolveMethod {
    NewtonLineSearch,
    Dogleg,
    LevenbergMarquardt,
}

impl std::str::FromStr for SolveMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "newton" | "newtonlinesearch" => Ok(SolveMethod::NewtonLineSearch),
            "dogleg" => Ok(SolveMethod::Dogleg),
            "lm" | "levenbergmarquardt" => Ok(SolveMethod::LevenbergMarquardt),
            other => Err(format!("unknown method '{other}'")),
        }
    }
}

/// Unit of trigonometric arguments.
///
/// In degree mode the argument of `sin`, `cos`, `tan`, `arcsin`, `arccos` and `arctan` is
/// multiplied by `Degree`. Results of the inverse functions stay in radians.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AngleMode {
    #[default]
    Radians,
    Degrees,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverConfig {
    pub single_variable_method: SolveMethod,
    pub multi_variable_method: SolveMethod,
    /// Starting value for variables without an initial-value entry
    pub default_initial_value: f64,
    pub max_iterations: usize,
    pub trust_region_radius: f64,
    pub gradient_precision: f64,
    /// Longest step a kernel may take in one iteration
    pub max_jump: f64,
    pub precision: f64,
    /// Per-block deadline in seconds
    pub timeout: f64,
    pub poll_interval_ms: u64,
    pub angle_mode: AngleMode,
    /// Number of start variables the decomposition tries
    pub max_start_candidates: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            single_variable_method: SolveMethod::NewtonLineSearch,
            multi_variable_method: SolveMethod::NewtonLineSearch,
            default_initial_value: 1.0,
            max_iterations: 200,
            trust_region_radius: 1.0,
            gradient_precision: 1e-10,
            max_jump: 1e3,
            precision: 1e-9,
            timeout: 10.0,
            poll_interval_ms: 50,
            angle_mode: AngleMode::Radians,
            max_start_candidates: 5,
        }
    }
}

impl SolverConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout).unwrap_or(Duration::MAX)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Kernel for a block of `size` variables.
    pub fn method_for(&self, size: usize) -> SolveMethod {
        if size == 1 {
            self.single_variable_method
        } else {
            self.multi_variable_method
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SolverConfig::default();
        assert_eq!(config.default_initial_value, 1.0);
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.timeout_duration(), Duration::from_secs(10));
        assert_eq!(config.angle_mode, AngleMode::Radians);
        assert_eq!(config.method_for(1), SolveMethod::NewtonLineSearch);
    }

    #[test]
    fn test_partial_json() -> Result<(), Box<dyn std::error::Error>> {
        let config: SolverConfig =
            serde_json::from_str(r#"{"angle_mode": "Degrees", "timeout": 0.5}"#)?;
        assert_eq!(config.angle_mode, AngleMode::Degrees);
        assert_eq!(config.timeout_duration(), Duration::from_millis(500));
        assert_eq!(config.precision, 1e-9);
        Ok(())
    }

    #[test]
    fn test_json_file() -> Result<(), Box<dyn std::error::Error>> {
        let path = std::env::temp_dir().join(format!("eqsolve-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"single_variable_method": "LevenbergMarquardt"}"#)?;
        let config = SolverConfig::from_json_file(&path)?;
        std::fs::remove_file(&path)?;
        assert_eq!(config.method_for(1), SolveMethod::LevenbergMarquardt);
        assert_eq!(config.method_for(3), SolveMethod::NewtonLineSearch);
        Ok(())
    }

    #[test]
    fn test_negative_timeout_saturates() {
        let config = SolverConfig {
            timeout: -1.0,
            ..SolverConfig::default()
        };
        assert_eq!(config.timeout_duration(), Duration::MAX);
    }

    #[test]
    fn test_method_names() {
        assert_eq!("lm".parse(), Ok(SolveMethod::LevenbergMarquardt));
        assert_eq!("Newton-Line-Search".parse(), Ok(SolveMethod::NewtonLineSearch));
        assert!("bisection".parse::<SolveMethod>().is_err());
    }
}

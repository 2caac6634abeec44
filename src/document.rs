//! Equation documents and the run driver.
//!
//! A document holds equation lines, then optionally the equations marker followed by initial
//! values (`name=value` or `name value`), then optionally the initial-values marker. Block
//! comments `/* ... */` may appear anywhere.

use std::fmt::{self, Write as _};
use std::path::Path;

use colored::Colorize;
use itertools::Itertools;
use tracing::debug;

use crate::errors::DocumentError;
use crate::orchestrator::BlockOutcome;
use crate::session::{ResidualEntry, ResidualStatus, Session, SolveSummary};
use crate::thermo::{self, PropertyLookup};

pub const END_OF_EQUATIONS: &str = "@$@%@EndOfEquationData@$@%@";
pub const END_OF_INITIAL_VALUES: &str = "@$@%@EndOfInitialVariableValueData@$@%@";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    /// Equation lines with their 1-based line numbers
    pub equations: Vec<(usize, String)>,
    pub initial_values: Vec<(String, f64)>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Equations,
    InitialValues,
    Trailer,
}

impl Document {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let text = strip_comments(text)?;
        let mut document = Self::default();
        let mut section = Section::Equations;

        for (i, raw) in text.lines().enumerate() {
            let number = i + 1;
            let line = raw.trim();
            match line {
                END_OF_EQUATIONS if section == Section::Equations => {
                    section = Section::InitialValues;
                    continue;
                }
                END_OF_INITIAL_VALUES => {
                    section = Section::Trailer;
                    continue;
                }
                _ => {}
            }
            match section {
                Section::Equations => document.equations.push((number, line.to_string())),
                Section::InitialValues if !line.is_empty() => {
                    document.initial_values.push(parse_initial_value(number, line)?);
                }
                Section::InitialValues | Section::Trailer => {}
            }
        }
        Ok(document)
    }
}

fn parse_initial_value(number: usize, line: &str) -> Result<(String, f64), DocumentError> {
    let invalid = || DocumentError::InitialValue {
        line: number,
        text: line.to_string(),
    };
    let (name, value) = line
        .split_once('=')
        .or_else(|| line.split_once(char::is_whitespace))
        .ok_or_else(invalid)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid());
    }
    let value: f64 = value.trim().parse().map_err(|_| invalid())?;
    Ok((name.to_string(), value))
}

/// Removes `/* ... */` comments. Newlines inside comments are kept.
pub fn strip_comments(text: &str) -> Result<String, DocumentError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut line = 1;
    while let Some(start) = rest.find("/*") {
        let (before, comment) = rest.split_at(start);
        out.push_str(before);
        line += before.matches('\n').count();
        let end = comment[2..]
            .find("*/")
            .ok_or(DocumentError::UnterminatedComment(line))?;
        let body = &comment[..end + 4];
        let newlines = body.matches('\n').count();
        out.extend(std::iter::repeat('\n').take(newlines));
        line += newlines;
        rest = &comment[end + 4..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Formats a result: plain with up to 7 decimals for 1e-4 <= |v| < 1e7, scientific otherwise.
pub fn format_value(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if !value.is_finite() {
        return value.to_string();
    }
    let magnitude = value.abs();
    if (1e-4..1e7).contains(&magnitude) {
        let plain = format!("{value:.7}");
        plain.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        format!("{value:.5e}")
    }
}

/// A line that could not be translated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {}", self.line, self.message)
    }
}

/// Everything a run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    pub line_errors: Vec<LineError>,
    /// `None` when line errors prevented solving
    pub summary: Option<SolveSummary>,
    pub residuals: Vec<ResidualEntry>,
    /// Display name and value, sorted by name
    pub results: Vec<(String, f64)>,
    pub unsolved: Vec<String>,
    pub ode_problems: Vec<String>,
    pub failed: bool,
}

/// Translates every line of `document`, then solves if all lines were accepted.
pub fn run(
    session: &mut Session,
    document: &Document,
    lookup: Option<&dyn PropertyLookup>,
) -> RunReport {
    let mut report = RunReport::default();

    for (number, raw) in &document.equations {
        let line = raw.trim().replace('\t', " ");
        if line.is_empty() {
            continue;
        }
        let line = match lookup.map(|l| thermo::substitute_calls(&line, l)) {
            Some(Ok(Some(substituted))) => {
                debug!(line = number, %substituted, "property call substituted");
                substituted
            }
            Some(Ok(None)) | None => line,
            Some(Err(error)) => {
                report.line_errors.push(LineError {
                    line: *number,
                    message: error.to_string(),
                });
                continue;
            }
        };
        let result = session.translate_line_at(&line, *number);
        if !result.is_success() {
            report.line_errors.push(LineError {
                line: *number,
                message: result.to_string(),
            });
        }
    }

    for (name, value) in &document.initial_values {
        session.set_initial_value(name, *value);
    }

    if !report.line_errors.is_empty() {
        session.raise_error();
        report.failed = true;
        return report;
    }

    report.summary = Some(session.decompose_and_solve());
    report.residuals = session.residual_report();

    let registry = session.registry();
    report.results = registry
        .solved()
        .iter()
        .map(|(name, value)| (registry.display_name(name), *value))
        .sorted_by(|a, b| a.0.cmp(&b.0))
        .collect();
    report.unsolved = registry
        .unsolved()
        .map(|entry| registry.display_name(&entry.name))
        .sorted()
        .collect();
    report.ode_problems = session
        .ode_problems()
        .iter()
        .map(ToString::to_string)
        .collect();
    report.failed = session.error_flag();
    report
}

/// Renders a report for the terminal.
pub fn render_report(report: &RunReport, session: &Session) -> String {
    let mut out = String::new();
    let error = "error:".red().bold();
    let warning = "warning:".yellow().bold();

    for line_error in &report.line_errors {
        let _ = writeln!(out, "{error} {line_error}");
    }

    if let Some(summary) = &report.summary {
        for block in &summary.blocks {
            let names = block
                .result
                .variables
                .iter()
                .map(|v| session.registry().display_name(v))
                .join(", ");
            let lines = block
                .equations
                .iter()
                .filter_map(|id| session.equation(*id))
                .map(|e| e.line)
                .sorted()
                .join(", ");
            let plural = if block.equations.len() > 1 { "Lines" } else { "Line" };
            match &block.result.outcome {
                BlockOutcome::Converged { .. } => {}
                BlockOutcome::NonConverged { residual_norm } => {
                    let _ = writeln!(
                        out,
                        "{warning} {plural} {lines}: block [{names}] did not converge (residual norm {})",
                        format_value(*residual_norm)
                    );
                }
                BlockOutcome::TimedOut => {
                    let _ = writeln!(out, "{error} {plural} {lines}: block [{names}] timed out");
                }
                BlockOutcome::Failed(e) => {
                    let _ = writeln!(out, "{error} {plural} {lines}: block [{names}] failed: {e}");
                }
            }
        }
    }

    if !report.results.is_empty() {
        let _ = writeln!(out, "{}", "Results".cyan().bold());
        let width = report.results.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
        for (name, value) in &report.results {
            let _ = writeln!(out, "    {name:<width$} = {}", format_value(*value));
        }
    }

    if !report.ode_problems.is_empty() {
        let _ = writeln!(out, "{}", "ODE problems".cyan().bold());
        for problem in &report.ode_problems {
            let _ = writeln!(out, "    {problem}");
        }
    }

    let flagged: Vec<&ResidualEntry> = report
        .residuals
        .iter()
        .filter(|r| matches!(r.status, ResidualStatus::High | ResidualStatus::NonFinite))
        .collect();
    if !flagged.is_empty() {
        let _ = writeln!(out, "{}", "Residuals".cyan().bold());
        for entry in flagged {
            let (prefix, label) = match entry.status {
                ResidualStatus::NonFinite => (&error, "non-finite residual"),
                _ => (&warning, "high residual"),
            };
            let _ = writeln!(
                out,
                "    {prefix} line {}: {label} {}",
                entry.line,
                format_value(entry.value)
            );
        }
    }

    if !report.unsolved.is_empty() {
        let _ = writeln!(
            out,
            "{} {}",
            "Unsolved:".yellow().bold(),
            report.unsolved.join(", ")
        );
    }
    out
}

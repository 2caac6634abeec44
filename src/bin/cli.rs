use clap::Parser;
use colored::Colorize;
use eqsolve::thermo::{PropertyLookup, PropertyTable};
use eqsolve::{render_report, run, AngleMode, Document, Session, SolveMethod, SolverConfig};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "eqsolve")]
#[command(about = "Solve a document of engineering equations")]
#[command(version)]
struct Args {
    /// Equation document
    document: PathBuf,

    /// Interpret trigonometric arguments in degrees
    #[arg(long)]
    degrees: bool,

    /// Per-block timeout in seconds; negative disables it
    #[arg(long, allow_hyphen_values = true)]
    timeout: Option<f64>,

    /// Kernel for every block: newton, dogleg or lm
    #[arg(long)]
    method: Option<SolveMethod>,

    /// Solver configuration as JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Substance property table as JSON
    #[arg(long)]
    properties: Option<PathBuf>,

    /// Log block decisions
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    match solve(&args) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            process::exit(1);
        }
    }
}

/// Runs the document. Returns false when the run failed.
fn solve(args: &Args) -> Result<bool, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => SolverConfig::from_json_file(path)?,
        None => SolverConfig::default(),
    };
    if args.degrees {
        config.angle_mode = AngleMode::Degrees;
    }
    if let Some(timeout) = args.timeout {
        config.timeout = timeout;
    }
    if let Some(method) = args.method {
        config.single_variable_method = method;
        config.multi_variable_method = method;
    }

    let table = args
        .properties
        .as_ref()
        .map(PropertyTable::from_json_file)
        .transpose()?;
    let document = Document::from_file(&args.document)?;

    let mut session = Session::new(config);
    let report = run(
        &mut session,
        &document,
        table.as_ref().map(|t| t as &dyn PropertyLookup),
    );
    print!("{}", render_report(&report, &session));
    Ok(!report.failed)
}

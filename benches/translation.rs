//! Translation Benchmarks
//!
//! Measures how fast equation lines are checked and rewritten into residual form, with and
//! without the degree wrapping of trigonometric calls, and the cost of translating a whole
//! document into a session (including variable registration and derivative placeholders).
//!
//! Run with: `cargo bench --bench translation`

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use eqsolve::{AngleMode, EquationTranslator, Session, SolverConfig};

const LINES: [(&str, &str); 5] = [
    ("linear", "x = 2 + 3"),
    ("energy_balance", "Q = m_dot*cp*(T_out - T_in)"),
    ("trigonometric", "F_x = F*cos(alpha) + sin(2*beta)^2"),
    ("scientific", "k = 1.38e-23*T/(2.5E4 - p)"),
    (
        "nested",
        "h = sqrt(abs((a + b)*(c - d)/(e + 1))) + exp(-t/tau)*ln(1 + x^2)",
    ),
];

fn benchmark_translate(c: &mut Criterion) {
    let radians = EquationTranslator::new(AngleMode::Radians);
    let degrees = EquationTranslator::new(AngleMode::Degrees);

    let mut group = c.benchmark_group("Line Translation");
    for (name, line) in LINES {
        group.bench_with_input(BenchmarkId::new("Radians", name), &line, |b, line| {
            b.iter(|| black_box(radians.translate(black_box(line))))
        });
        group.bench_with_input(BenchmarkId::new("Degrees", name), &line, |b, line| {
            b.iter(|| black_box(degrees.translate(black_box(line))))
        });
    }
    group.finish();
}

fn benchmark_session(c: &mut Criterion) {
    let mut group = c.benchmark_group("Session Translation");
    for size in [10usize, 100] {
        let lines: Vec<String> = (0..size)
            .map(|i| format!("x{} = 2*x{} + sin(y{})", i + 1, i, i))
            .collect();
        group.bench_with_input(BenchmarkId::new("Chain", size), &lines, |b, lines| {
            b.iter(|| {
                let mut session = Session::new(SolverConfig::default());
                for line in lines {
                    black_box(session.translate_line(line));
                }
                black_box(session.equations().len())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_translate, benchmark_session);
criterion_main!(benches);

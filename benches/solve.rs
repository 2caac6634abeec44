//! Solve Benchmarks
//!
//! Measures block solves through the orchestrator for each kernel, and a full decomposition
//! run over a chain of dependent equations closed by a small coupled system.
//!
//! JIT compilation of the residuals happens inside every iteration, so the numbers include
//! the setup cost a real document pays per block.
//!
//! Run with: `cargo bench --bench solve`

use std::collections::HashMap;
use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use eqsolve::orchestrator::SolveOrchestrator;
use eqsolve::{Session, SolveMethod, SolverConfig};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn benchmark_kernels(c: &mut Criterion) {
    let residuals = strings(&["x^2 + y^2 - 1*(4)", "x*y - 1*(1)"]);
    let variables = strings(&["x", "y"]);
    let bindings = HashMap::new();
    let initial_values = HashMap::from([("x".to_string(), 2.0), ("y".to_string(), 0.5)]);

    let mut group = c.benchmark_group("Block Solve");
    for method in [
        SolveMethod::NewtonLineSearch,
        SolveMethod::Dogleg,
        SolveMethod::LevenbergMarquardt,
    ] {
        let orchestrator = SolveOrchestrator::new(SolverConfig {
            multi_variable_method: method,
            ..SolverConfig::default()
        });
        group.bench_function(BenchmarkId::new("Circle-Hyperbola", format!("{method:?}")), |b| {
            b.iter(|| {
                black_box(orchestrator.solve_block(
                    black_box(&residuals),
                    &variables,
                    &bindings,
                    &initial_values,
                ))
            })
        });
    }
    group.finish();
}

fn benchmark_document(c: &mut Criterion) {
    let mut lines = vec![
        "a + b = 10".to_string(),
        "a - b = 2".to_string(),
        "x0 = a*b".to_string(),
    ];
    lines.extend((1..20).map(|i| format!("x{i} = sqrt(x{} + 1)", i - 1)));

    c.bench_function("Decompose And Solve", |b| {
        b.iter(|| {
            let mut session = Session::new(SolverConfig::default());
            for line in &lines {
                session.translate_line(line);
            }
            black_box(session.decompose_and_solve().solved_count)
        })
    });
}

criterion_group!(benches, benchmark_kernels, benchmark_document);
criterion_main!(benches);

//! End-to-end benchmark: parse, preprocess, and enumerate a bounded
//! session over a small loop-and-contract program.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use kelpie::api::{prepare_source, run_session, SessionOptions};

const SUM_PROGRAM: &str = "procedure sum(n: int) returns (s: int)\n\
                             requires n >= 0;\n\
                             ensures s >= 0;\n\
                           {\n\
                             var i: int;\n\
                             s := 0; i := 0;\n\
                             while (i < n) invariant s >= 0; { s := s + i; i := i + 1; }\n\
                           }\n";

fn bench_prepare(c: &mut Criterion) {
    c.bench_function("prepare_source", |b| {
        b.iter(|| prepare_source(black_box(SUM_PROGRAM)).unwrap())
    });
}

fn bench_session(c: &mut Criterion) {
    let program = prepare_source(SUM_PROGRAM).unwrap();
    let options = SessionOptions {
        max_cases: 8,
        solver_bound: 4,
        integer_bound: 2,
        solve_passing: true,
    };
    c.bench_function("session_sum_8_cases", |b| {
        b.iter(|| run_session(black_box(&program), "sum", &options))
    });
}

criterion_group!(benches, bench_prepare, bench_session);
criterion_main!(benches);

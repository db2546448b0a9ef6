use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use swpc::*;

const LOAD_STORE: &str = r#"
buffer A: i32[64, 8];
buffer B: i32[64];

for i in 0..64 @software_pipeline_stage = [0, 1] @software_pipeline_order = [0, 1] {
  alloc S: i32[8];
  block load { for k in 0..8 { S[k] = A[i, k]; } }
  block store { B[i] = S[0] + S[7]; }
}
"#;

const REDUCTION: &str = r#"
buffer A: i32[64, 16];
buffer W: i32[16];
buffer C: i32[64];

for i in 0..64 @software_pipeline_stage = [0, 1, 1, 2] @software_pipeline_order = [0, 1, 2, 3] @software_pipeline_block_count = 4 {
  alloc S: i32[16];
  alloc R: i32[1];
  block load { for k in 0..16 { S[k] = A[i, k]; } }
  reduction dot {
    init { R[0] = 0; }
    update { for k in 0..16 { R[0] = R[0] + S[k] * W[k]; } }
  }
  block store { C[i] = R[0]; }
}
"#;

fn scenarios() -> Vec<(&'static str, &'static str)> {
    vec![("load_store", LOAD_STORE), ("reduction", REDUCTION)]
}

/// A program of `n_loops` independent two-stage loops.
fn generate_scaling_program(n_loops: usize) -> String {
    let mut src = String::new();
    for l in 0..n_loops {
        src.push_str(&format!("buffer X{l}: i32[32];\nbuffer Y{l}: i32[32];\n"));
    }
    for l in 0..n_loops {
        src.push_str(&format!(
            "for i{l} in 0..32 @software_pipeline_stage = [0, 1, 2] @software_pipeline_order = [0, 1, 2] {{\n"
        ));
        src.push_str(&format!("  alloc P{l}: i32[1];\n  alloc Q{l}: i32[1];\n"));
        src.push_str(&format!("  block a{l} {{ P{l}[0] = X{l}[i{l}] * 3; }}\n"));
        src.push_str(&format!("  block b{l} {{ Q{l}[0] = P{l}[0] + 1; }}\n"));
        src.push_str(&format!("  block c{l} {{ Y{l}[i{l}] = Q{l}[0]; }}\n"));
        src.push_str("}\n\n");
    }
    src
}

fn resolved(source: &str) -> ir::Program {
    resolve::program_from_source(source).expect("benchmark scenario must resolve")
}

// KPI: parse latency per scenario.
fn bench_kpi_parse_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/parse_latency");
    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &source, |b, source| {
            b.iter(|| {
                let r = parser::parse(black_box(source));
                black_box(&r.program);
            });
        });
    }
    group.finish();
}

// KPI: injection latency (setup: parse + resolve).
fn bench_kpi_inject_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/inject_latency");
    for (name, source) in scenarios() {
        let program = resolved(source);
        group.bench_with_input(BenchmarkId::from_parameter(name), &program, |b, program| {
            b.iter_batched(
                || program.clone(),
                |mut program| {
                    let r = inject::inject_software_pipeline(
                        black_box(&mut program),
                        inject::InjectOptions::default(),
                    );
                    assert_eq!(r.pipelined_count(), 1);
                    black_box(&r.schedules);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

// KPI: structural certificate overhead.
fn bench_kpi_verify_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/verify_overhead");
    let program = resolved(LOAD_STORE);
    for verify in [false, true] {
        let options = inject::InjectOptions {
            verify,
            ..inject::InjectOptions::default()
        };
        group.bench_with_input(
            BenchmarkId::from_parameter(if verify { "verify" } else { "no_verify" }),
            &options,
            |b, options| {
                b.iter_batched(
                    || program.clone(),
                    |mut program| {
                        let r = inject::inject_software_pipeline(&mut program, *options);
                        black_box(&r.schedules);
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

// KPI: injection scaling vs number of annotated loops.
fn bench_kpi_inject_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/inject_scaling");
    for n_loops in [1_usize, 5, 10, 20, 40] {
        let program = resolved(&generate_scaling_program(n_loops));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}loops", n_loops)),
            &program,
            |b, program| {
                b.iter_batched(
                    || program.clone(),
                    |mut program| {
                        let r = inject::inject_software_pipeline(
                            &mut program,
                            inject::InjectOptions::default(),
                        );
                        black_box(&r.schedules);
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_kpi_parse_latency,
    bench_kpi_inject_latency,
    bench_kpi_verify_overhead,
    bench_kpi_inject_scaling,
);
criterion_main!(benches);

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use dflow::*;

// Generated scenarios. Every region uses static shapes so both bypass
// policies succeed.

/// `n` computations in a straight line: no bypasses.
fn generate_chain(n: usize) -> String {
    let mut src = String::from("func @chain(%in: tensor<64xf32>) {\n");
    for i in 0..n {
        let arg = if i == 0 {
            "%in".to_string()
        } else {
            format!("%n{}", i - 1)
        };
        src.push_str(&format!(
            "  %n{i} = op \"f\"({arg}) : tensor<64xf32>\n"
        ));
    }
    src.push_str("}\n");
    src
}

/// A chain where every node also reads the first result: one bypass per
/// node past the second, each longer than the last.
fn generate_diamond(n: usize) -> String {
    let mut src = String::from("func @diamond(%in: memref<64xf32>) {\n");
    src.push_str("  %n0 = op \"head\"(%in) : memref<64xf32>\n");
    for i in 1..n {
        let operands = if i == 1 {
            "%n0".to_string()
        } else {
            format!("%n0, %n{}", i - 1)
        };
        src.push_str(&format!(
            "  %n{i} = op \"f\"({operands}) : memref<64xf32>\n"
        ));
    }
    src.push_str("}\n");
    src
}

/// `regions` independent diamonds in one module.
fn generate_module(regions: usize, n: usize) -> String {
    (0..regions)
        .map(|r| generate_diamond(n).replace("@diamond", &format!("@diamond_{r}")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn load(source: &str) -> pipeline::LoadedSource {
    pipeline::load_source(source).expect("benchmark scenario must resolve")
}

fn first_region(source: &str) -> ir::Region {
    let mut loaded = load(source);
    loaded.module.regions.remove(0)
}

// Front end: parse + resolve.
fn bench_load_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_latency");
    for n in [16, 64, 256] {
        let source = generate_chain(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &source, |b, source| {
            b.iter(|| black_box(load(black_box(source))));
        });
    }
    group.finish();
}

// Legalization alone, on a fresh copy of the region each iteration.
fn bench_legalize_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("legalize_latency");
    let policies = [
        ("copy", config::LegalizeOptions::default()),
        (
            "merge",
            config::LegalizeOptions {
                insert_copy: false,
                min_gran: 1,
            },
        ),
    ];
    for n in [16, 64] {
        for (shape, source) in [("chain", generate_chain(n)), ("diamond", generate_diamond(n))] {
            let region = first_region(&source);
            for (policy, opts) in &policies {
                let id = BenchmarkId::new(format!("{shape}/{policy}"), n);
                group.bench_with_input(id, &region, |b, region| {
                    b.iter_batched(
                        || region.clone(),
                        |mut r| {
                            let report = legalize::legalize_dataflow(&mut r, opts)
                                .expect("benchmark region must legalize");
                            black_box(report)
                        },
                        BatchSize::SmallInput,
                    );
                });
            }
        }
    }
    group.finish();
}

// Parallel module driver over many regions.
fn bench_module_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("module_scaling");
    let opts = config::LegalizeOptions::default();
    for regions in [1, 8, 32] {
        let loaded = load(&generate_module(regions, 32));
        group.bench_with_input(
            BenchmarkId::from_parameter(regions),
            &loaded.module,
            |b, module| {
                b.iter_batched(
                    || module.clone(),
                    |m| black_box(pipeline::run_module(m, pass::PassId::Compact, &opts)),
                    BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_load_latency,
    bench_legalize_latency,
    bench_module_scaling,
);
criterion_main!(benches);

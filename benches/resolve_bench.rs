//! Benchmarks for node resolution.
//!
//! Run with:
//! ```bash
//! cargo bench -p whence
//! ```
//!
//! # Benchmark Categories
//!
//! 1. **Cold**: first resolution of every instruction, recompiling marked variants
//! 2. **Memoized**: repeated resolution of one point, the common case for a
//!    frame that is inspected many times

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use whence::{all_codes, ExecutionPoint, Resolver, RuntimeVersion, SourceRegistry};

// =============================================================================
// Test Data Generation
// =============================================================================

/// Functions whose bodies mix calls, attributes and arithmetic.
fn generate_code(num_funcs: usize) -> String {
    let mut code = String::new();
    for i in 0..num_funcs {
        code.push_str(&format!(
            r#"def func_{i}(items, scale):
    total = 0
    for item in items:
        total = total + item.weight * scale[{i}]
    return str(total).rjust(8), -total

"#
        ));
    }
    code
}

/// Every resolvable point in `text`, compiled for `version`.
fn points(registry: &SourceRegistry, resolver: &Resolver, text: &str) -> Vec<ExecutionPoint> {
    let filename = registry.register_text("bench", text);
    let source = registry.for_filename(&filename).unwrap();
    let module = source.module_code(resolver.version()).unwrap();
    let mut points = Vec::new();
    for code in all_codes(&module) {
        for instruction in &code.instructions {
            if resolver.classifier().classify(instruction).is_some() {
                points.push(ExecutionPoint::at_offset(Arc::clone(&code), instruction.offset).unwrap());
            }
        }
    }
    points
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_cold_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_cold");
    for num_funcs in [1, 10] {
        let code = generate_code(num_funcs);
        group.throughput(Throughput::Bytes(code.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(num_funcs), &code, |b, code| {
            b.iter(|| {
                let registry = Arc::new(SourceRegistry::new());
                let resolver = Resolver::new(Arc::clone(&registry), RuntimeVersion::V3_8);
                for point in points(&registry, &resolver, code) {
                    black_box(resolver.resolve(point).unwrap());
                }
            })
        });
    }
    group.finish();
}

fn bench_memoized_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_memoized");
    for version in RuntimeVersion::ALL {
        let registry = Arc::new(SourceRegistry::new());
        let resolver = Resolver::new(Arc::clone(&registry), version);
        let all = points(&registry, &resolver, &generate_code(10));
        let point = all[all.len() / 2].clone();
        resolver.resolve(point.clone()).unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(version),
            &point,
            |b, point| b.iter(|| black_box(resolver.resolve(point.clone()).unwrap())),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_cold_resolution, bench_memoized_resolution);
criterion_main!(benches);

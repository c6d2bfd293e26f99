//! Template compile and render benchmarks
//!
//! Measures the two halves of the engine separately:
//! - Compilation of a row template (done once per template)
//! - Rendering with varying record counts (1, 10, 100, 1000)
//! - Fragment sorting, the dominant cost of large renders
//!
//! Run benchmarks: `cargo bench --bench render_throughput`

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::{Value, json};
use stencil::{CompileOptions, CompiledStencil, ExecutionConfig, FormatterRegistry};
use stencil_engine::assembler::sort_fragments;

/// Table template with one repeated row and a nested repeated cell
fn table_template() -> &'static str {
    "<table><tr><td>{d.title}</td></tr>\
     <tr><td>{d.rows[i].id}</td><td>{d.rows[i].name}</td><td><v>{d.rows[i].values[i].v}</v><v>{d.rows[i].values[i+1].v}</v></td></tr>\
     <tr><td>{d.rows[i+1].id}</td></tr></table>"
}

/// Generate test data records
fn generate_data(count: usize) -> Value {
    let rows: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "id": i,
                "name": format!("Record <{}>", i),
                "values": [{"v": i}, {"v": i * 2}, {"v": i * 3}]
            })
        })
        .collect();
    json!({"title": "Report", "rows": rows})
}

fn compile() -> CompiledStencil {
    CompiledStencil::compile(table_template(), &FormatterRegistry::new(), &CompileOptions::default())
        .expect("Failed to compile template")
}

/// Benchmark template compilation
fn benchmark_compile(c: &mut Criterion) {
    c.bench_function("compile_table", |b| b.iter(compile));
}

/// Benchmark render throughput with varying record counts
fn benchmark_render_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_throughput");
    let template = compile();
    let config = ExecutionConfig::default();

    for count in [1, 10, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        let data = generate_data(count);

        group.bench_with_input(BenchmarkId::new("records", count), &data, |b, data| {
            b.iter(|| template.render(data, None, &config));
        });
    }

    group.finish();
}

/// Benchmark fragment sorting alone
fn benchmark_fragment_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragment_sort");
    let template = compile();
    let depth = ExecutionConfig::default().compare_depth;

    for count in [100, 1000] {
        let fragments = template.render_fragments(&generate_data(count), None);
        group.throughput(Throughput::Elements(fragments.len() as u64));

        group.bench_with_input(BenchmarkId::new("records", count), &fragments, |b, fragments| {
            b.iter(|| {
                let mut fragments = fragments.clone();
                sort_fragments(&mut fragments, depth);
                fragments
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_compile,
    benchmark_render_throughput,
    benchmark_fragment_sort
);
criterion_main!(benches);

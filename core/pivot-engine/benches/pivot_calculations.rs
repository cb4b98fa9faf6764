//! FILENAME: core/pivot-engine/benches/pivot_calculations.rs
//! Benchmarks for header and row-tree construction over the in-memory source.

use std::sync::Arc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use futures::executor::block_on;
use pivot_engine::{DataRow, Dataset, PivotConfig, PivotTable, TableConfig};

const REGIONS: &[&str] = &["North", "South", "East", "West", "Central"];
const PRODUCTS: &[&str] = &["Bolt", "Nut", "Washer", "Screw", "Rivet", "Pin", "Clip", "Spring"];
const CHANNELS: &[&str] = &["web", "store", "partner"];

fn generate_rows(count: usize) -> Vec<DataRow> {
    (0..count)
        .map(|i| {
            DataRow::new()
                .with("region", REGIONS[i % REGIONS.len()])
                .with("product", PRODUCTS[(i / 3) % PRODUCTS.len()])
                .with("channel", CHANNELS[(i / 7) % CHANNELS.len()])
                .with("year", 2020 + (i % 4) as i64)
                .with("amount", format!("{},{:03}.50", i % 90 + 1, i % 1000))
                .with("units", (i % 17) as i64)
        })
        .collect()
}

fn config() -> PivotConfig {
    PivotConfig::new(
        vec!["region".to_string(), "product".to_string()],
        vec![
            TableConfig::new("sales", vec!["channel".to_string(), "year".to_string()], "amount"),
            TableConfig::new("units", vec!["year".to_string()], "units"),
        ],
    )
}

fn bench_dataset_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("dataset_build");
    for size in [1_000usize, 10_000] {
        let rows = generate_rows(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &rows, |b, rows| {
            b.iter(|| Dataset::new(black_box(rows.clone())))
        });
    }
    group.finish();
}

fn bench_row_hierarchy(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_hierarchy");
    for size in [1_000usize, 10_000] {
        let dataset = Arc::new(Dataset::new(generate_rows(size)));
        let pivot = PivotTable::from_dataset(dataset, config());
        group.bench_with_input(BenchmarkId::from_parameter(size), &pivot, |b, pivot| {
            b.iter(|| block_on(pivot.get_hierarchical_rows()))
        });
    }
    group.finish();
}

fn bench_headers(c: &mut Criterion) {
    let dataset = Arc::new(Dataset::new(generate_rows(10_000)));
    let pivot = PivotTable::from_dataset(dataset, config());
    c.bench_function("headers_10000", |b| b.iter(|| block_on(pivot.get_headers())));
}

criterion_group!(benches, bench_dataset_build, bench_row_hierarchy, bench_headers);
criterion_main!(benches);

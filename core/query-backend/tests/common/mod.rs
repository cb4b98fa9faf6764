//! FILENAME: tests/common/mod.rs
//! Fixtures and helpers for query-backend integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use pivot_engine::{DataRow, Dataset, PivotConfig, RowNode, TableConfig};
use query_backend::{BackendConfig, DelegatedSource, DocumentStore};

// ============================================================================
// TEST DATA FIXTURES
// ============================================================================

/// The three-row region/year dataset used throughout the engine tests.
pub struct ScenarioFixture;

impl ScenarioFixture {
    pub fn rows() -> Vec<DataRow> {
        vec![
            DataRow::new().with("region", "A").with("year", 2023).with("amt", 10).with("qty", 1),
            DataRow::new().with("region", "A").with("year", 2024).with("amt", 20).with("qty", 2),
            DataRow::new().with("region", "B").with("year", 2023).with("amt", 5).with("qty", 3),
        ]
    }

    pub fn config() -> PivotConfig {
        PivotConfig::new(strs(&["region"]), vec![TableConfig::new("t1", strs(&["year"]), "amt")])
    }
}

/// Sample financial data with text-formatted amounts.
pub struct SalesFixture;

impl SalesFixture {
    pub fn data() -> Vec<(&'static str, &'static str, &'static str, &'static str, f64)> {
        vec![
            ("North", "Widget", "Q1", "10,000", 100.0),
            ("North", "Widget", "Q2", "12,000", 120.0),
            ("North", "Gadget", "Q1", "$8,000.50", 80.0),
            ("North", "Gadget", "Q2", "9,000", 90.0),
            ("South", "Widget", "Q1", "15,000", 150.0),
            ("South", "Widget", "Q2", "14,000", 140.0),
            ("South", "Gadget", "Q1", "11,000", 110.0),
            ("south", "Gadget", "Q2", "13,000", 130.0),
            ("East", "Widget", "Q1", "9,000", 90.0),
            ("East", "Widget", "Q2", "n/a", 110.0),
            ("East", "Gadget", "Q1", "7,000", 70.0),
            ("East", "Gadget", "Q3", "8,500", 85.0),
        ]
    }

    pub fn rows() -> Vec<DataRow> {
        Self::data()
            .into_iter()
            .map(|(region, product, quarter, sales, quantity)| {
                DataRow::new()
                    .with("region", region)
                    .with("product", product)
                    .with("quarter", quarter)
                    .with("sales", sales)
                    .with("quantity", quantity)
            })
            .collect()
    }

    pub fn config() -> PivotConfig {
        PivotConfig::new(
            strs(&["region", "product"]),
            vec![
                TableConfig::new("sales", strs(&["quarter"]), "sales"),
                TableConfig::new("units", strs(&["product", "quarter"]), "quantity")
                    .with_column_total(false),
            ],
        )
    }
}

/// `count` rows spread over a few regions and years.
pub fn generated_rows(count: usize) -> Vec<DataRow> {
    let regions = ["North", "South", "East", "West"];
    (0..count)
        .map(|i| {
            DataRow::new()
                .with("region", regions[i % regions.len()])
                .with("year", 2020 + (i % 3) as i64)
                .with("amt", (i % 50) as i64)
        })
        .collect()
}

// ============================================================================
// HELPERS
// ============================================================================

pub fn strs(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

pub fn dataset(rows: Vec<DataRow>) -> Arc<Dataset> {
    Arc::new(Dataset::new(rows))
}

/// In-memory store already holding `rows`.
pub fn loaded_store(rows: Vec<DataRow>) -> DocumentStore {
    let mut store = DocumentStore::open_in_memory().expect("open store");
    store.load(rows).expect("load rows");
    store
}

/// Lazy delegated source over `rows` with an in-memory store.
pub fn delegated(rows: Vec<DataRow>) -> DelegatedSource {
    DelegatedSource::new(dataset(rows), BackendConfig::default())
}

/// Label and raw sums of each row, depth first.
pub fn flatten(rows: &[RowNode]) -> Vec<(String, usize, Vec<f64>)> {
    let mut out = Vec::new();
    for root in rows {
        root.walk(&mut |node| out.push((node.id.clone(), node.depth, node.numbers())));
    }
    out
}

// ============================================================================
// ASSERTION HELPERS
// ============================================================================

/// Assert a row's raw sums.
pub fn assert_row_numbers(row: &RowNode, expected: &[f64]) {
    let actual = row.numbers();
    assert_eq!(
        actual.len(),
        expected.len(),
        "Row '{}' expected {} cells but got {:?}",
        row.id,
        expected.len(),
        actual
    );
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() < 0.001,
            "Row '{}' cell {} expected {} but got {}",
            row.id, i, e, a
        );
    }
}

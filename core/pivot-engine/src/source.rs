//! FILENAME: core/pivot-engine/src/source.rs
//! Data access - the contract the engine queries through.
//!
//! Two strategies sit behind [`DataSource`]:
//! - [`DirectSource`] iterates the in-memory dataset and never suspends
//! - the delegated strategy in `query-backend` proxies every call to a
//!   background store
//!
//! Both see the same normalized dataset and must answer identically.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use crate::definition::{Filters, TableConfig};
use crate::error::Result;
use crate::record::{DataRow, Dataset, Schema};

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// Filters plus equality constraints (the prefix or path being drilled into).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    #[serde(default)]
    pub filters: Filters,

    #[serde(default)]
    pub constraints: Vec<(String, String)>,
}

impl Selection {
    /// Unrestricted selection, used for introspection.
    pub fn all() -> Self {
        Selection::default()
    }

    pub fn filtered(filters: &Filters) -> Self {
        Selection {
            filters: filters.clone(),
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, dimension: impl Into<String>, key: impl Into<String>) -> Self {
        self.constraints.push((dimension.into(), key.into()));
        self
    }

    pub fn matches(&self, row: &DataRow) -> bool {
        row.passes(&self.filters)
            && self
                .constraints
                .iter()
                .all(|(dim, key)| row.key_equals(dim, key))
    }
}

/// Everything needed to sum one table's cells for one row path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRequest {
    #[serde(default)]
    pub filters: Filters,

    /// Keys of the row being computed, aligned with `row_dimensions`.
    #[serde(default)]
    pub row_path: Vec<String>,

    #[serde(default)]
    pub row_dimensions: Vec<String>,

    #[serde(rename = "tableConfig")]
    pub table: TableConfig,
}

impl AggregateRequest {
    /// Selection restricting rows to the filters and the row path.
    pub fn selection(&self) -> Selection {
        let mut selection = Selection::filtered(&self.filters);
        selection.constraints = self
            .row_dimensions
            .iter()
            .zip(self.row_path.iter())
            .map(|(dim, key)| (dim.clone(), key.clone()))
            .collect();
        selection
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedValue {
    /// One key per column dimension.
    pub dimensions: Vec<String>,
    pub value: f64,
}

/// Grouped sums ordered by dimension keys, plus the ungrouped total of the
/// restricted subset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Aggregate {
    pub values: Vec<GroupedValue>,
    pub total: f64,
}

impl Aggregate {
    /// Lookup table from combination to sum.
    pub fn by_combination(&self) -> FxHashMap<&[String], f64> {
        self.values
            .iter()
            .map(|g| (g.dimensions.as_slice(), g.value))
            .collect()
    }
}

// ============================================================================
// DATA SOURCE CONTRACT
// ============================================================================

pub trait DataSource: Send + Sync {
    /// Schema resolved once when the dataset was built.
    fn schema(&self) -> Arc<Schema>;

    fn filter_rows(
        &self,
        filters: &Filters,
    ) -> impl Future<Output = Result<Vec<DataRow>>> + Send;

    /// Sorted, de-duplicated keys of `dimension` over the selected rows.
    /// Absent and empty keys are excluded.
    fn distinct_values(
        &self,
        dimension: &str,
        selection: &Selection,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn aggregate(
        &self,
        request: &AggregateRequest,
    ) -> impl Future<Output = Result<Aggregate>> + Send;
}

// ============================================================================
// DIRECT STRATEGY
// ============================================================================

/// In-memory strategy. Always available.
#[derive(Debug, Clone, Default)]
pub struct DirectSource {
    dataset: Arc<Dataset>,
}

impl DirectSource {
    pub fn new(dataset: Arc<Dataset>) -> Self {
        DirectSource { dataset }
    }

    pub fn from_rows(rows: Vec<DataRow>) -> Self {
        DirectSource::new(Arc::new(Dataset::new(rows)))
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    pub fn select_rows(&self, filters: &Filters) -> Vec<DataRow> {
        self.dataset.filtered(filters).cloned().collect()
    }

    pub fn select_distinct(&self, dimension: &str, selection: &Selection) -> Vec<String> {
        let keys: BTreeSet<String> = self
            .dataset
            .rows()
            .iter()
            .filter(|row| selection.matches(row))
            .filter_map(|row| row.key(dimension))
            .collect();
        keys.into_iter().collect()
    }

    pub fn compute_aggregate(&self, request: &AggregateRequest) -> Aggregate {
        let selection = request.selection();
        let table = &request.table;
        let value_dim = table.value_dimension.as_str();

        let mut groups: FxHashMap<Vec<String>, f64> = FxHashMap::default();
        let mut total = 0.0;

        for row in self.dataset.rows().iter().filter(|row| selection.matches(row)) {
            let value = row.number(value_dim);
            total += value;

            if table.col_dimensions.is_empty() || row.key(value_dim).is_none() {
                continue;
            }
            let keys: Option<Vec<String>> =
                table.col_dimensions.iter().map(|dim| row.key(dim)).collect();
            if let Some(keys) = keys {
                *groups.entry(keys).or_insert(0.0) += value;
            }
        }

        let mut values: Vec<GroupedValue> = groups
            .into_iter()
            .map(|(dimensions, value)| GroupedValue { dimensions, value })
            .collect();
        values.sort_by(|a, b| a.dimensions.cmp(&b.dimensions));

        Aggregate { values, total }
    }
}

impl DataSource for DirectSource {
    fn schema(&self) -> Arc<Schema> {
        Arc::clone(self.dataset.schema())
    }

    async fn filter_rows(&self, filters: &Filters) -> Result<Vec<DataRow>> {
        Ok(self.select_rows(filters))
    }

    async fn distinct_values(&self, dimension: &str, selection: &Selection) -> Result<Vec<String>> {
        Ok(self.select_distinct(dimension, selection))
    }

    async fn aggregate(&self, request: &AggregateRequest) -> Result<Aggregate> {
        Ok(self.compute_aggregate(request))
    }
}

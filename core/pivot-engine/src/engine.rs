//! FILENAME: core/pivot-engine/src/engine.rs
//! Pivot Engine - Turns a PivotConfig and a DataSource into headers and rows.
//!
//! Algorithm:
//! 1. Validate the config against the source schema (malformed -> empty output)
//! 2. Discover each active table's column combinations, level by level
//! 3. Build the header matrix from the combinations' shared prefixes
//! 4. Build the row hierarchy in an arena, one level at a time, summing every
//!    node's cells through `DataSource::aggregate`
//! 5. Append the grand-total row
//!
//! Every lookup of one level is issued concurrently, so a delegated source
//! suspends once per level rather than once per node.

use std::sync::Arc;
use futures::future::try_join_all;
use crate::definition::{Filters, FormatType, PivotConfig, TableConfig};
use crate::error::Result;
use crate::format::format_value;
use crate::logging::{log_enter, log_exit};
use crate::record::{DataRow, Dataset, DimensionKind, Schema};
use crate::source::{AggregateRequest, DataSource, DirectSource, Selection};
use crate::view::{HeaderCell, HeaderRow, Path, RowNode, ValueCell};

/// An ordered tuple of column keys, one per column dimension.
pub type ColumnCombination = Vec<String>;

// ============================================================================
// INTERNAL STRUCTURES
// ============================================================================

/// An active table with its discovered combinations. Computed once per call
/// and shared by every row of that call.
#[derive(Debug, Clone)]
struct TableLayout {
    table: TableConfig,
    combinations: Vec<ColumnCombination>,
}

/// Row hierarchy node before assembly. Children are arena indices, always
/// greater than the parent's own index.
#[derive(Debug)]
struct ArenaNode {
    path: Path,
    depth: usize,
    children: Vec<usize>,
    values: Vec<ValueCell>,
}

// ============================================================================
// PIVOT TABLE
// ============================================================================

pub struct PivotTable<S: DataSource = DirectSource> {
    source: S,
    config: PivotConfig,
}

impl PivotTable<DirectSource> {
    /// Direct strategy over raw rows.
    pub fn new(rows: Vec<DataRow>, config: PivotConfig) -> Self {
        PivotTable::with_source(DirectSource::from_rows(rows), config)
    }

    pub fn from_dataset(dataset: Arc<Dataset>, config: PivotConfig) -> Self {
        PivotTable::with_source(DirectSource::new(dataset), config)
    }
}

impl<S: DataSource> PivotTable<S> {
    pub fn with_source(source: S, config: PivotConfig) -> Self {
        PivotTable { source, config }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &PivotConfig {
        &self.config
    }

    pub fn into_parts(self) -> (S, PivotConfig) {
        (self.source, self.config)
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn get_dimensions(&self) -> Vec<String> {
        self.source.schema().names()
    }

    pub fn get_numeric_dimensions(&self) -> Vec<String> {
        self.source.schema().numeric_dimensions()
    }

    /// Rows passing the active filters.
    pub async fn filter_data(&self) -> Result<Vec<DataRow>> {
        self.source.filter_rows(&self.config.filters).await
    }

    /// Every key of `dimension` across the whole dataset, ignoring filters.
    pub async fn get_dimension_values(&self, dimension: &str) -> Result<Vec<String>> {
        self.source.distinct_values(dimension, &Selection::all()).await
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    pub fn set_config(&mut self, config: PivotConfig) {
        self.config = config;
    }

    pub fn set_row_dimensions(&mut self, row_dimensions: Vec<String>) {
        self.config.row_dimensions = row_dimensions;
    }

    pub fn set_filters(&mut self, filters: Filters) {
        self.config.filters = filters;
    }

    /// An empty value list clears the filter on `dimension`.
    pub fn set_filter(&mut self, dimension: impl Into<String>, values: Vec<String>) {
        let dimension = dimension.into();
        if values.is_empty() {
            self.config.filters.remove(&dimension);
        } else {
            self.config.filters.insert(dimension, values);
        }
    }

    pub fn set_show_row_total(&mut self, show: bool) {
        self.config.show_row_total = show;
    }

    /// Replaces the table with the same id. Returns false if there is none.
    pub fn set_table_config(&mut self, table: TableConfig) -> bool {
        match self.table_mut(&table.id) {
            Some(slot) => {
                *slot = table;
                true
            }
            None => false,
        }
    }

    pub fn set_table_columns(&mut self, table_id: &str, col_dimensions: Vec<String>) -> bool {
        self.update_table(table_id, |t| t.col_dimensions = col_dimensions)
    }

    pub fn set_table_value_dimension(&mut self, table_id: &str, value_dimension: impl Into<String>) -> bool {
        let value_dimension = value_dimension.into();
        self.update_table(table_id, |t| t.value_dimension = value_dimension)
    }

    pub fn set_table_format(&mut self, table_id: &str, format_type: FormatType) -> bool {
        self.update_table(table_id, |t| t.format_type = format_type)
    }

    pub fn set_table_column_total(&mut self, table_id: &str, show: bool) -> bool {
        self.update_table(table_id, |t| t.show_column_total = show)
    }

    pub fn add_table(&mut self, table: TableConfig) {
        self.config.table_configs.push(table);
    }

    pub fn remove_table(&mut self, table_id: &str) -> Option<TableConfig> {
        let pos = self.config.table_configs.iter().position(|t| t.id == table_id)?;
        Some(self.config.table_configs.remove(pos))
    }

    fn table_mut(&mut self, table_id: &str) -> Option<&mut TableConfig> {
        self.config.table_configs.iter_mut().find(|t| t.id == table_id)
    }

    fn update_table(&mut self, table_id: &str, update: impl FnOnce(&mut TableConfig)) -> bool {
        match self.table_mut(table_id) {
            Some(table) => {
                update(table);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    fn check_config(&self, schema: &Schema) -> bool {
        match self.config.validate(schema) {
            Ok(()) => true,
            Err(e) => {
                crate::log_warn!("PIVOT", "invalid pivot config, rendering nothing: {}", e);
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // Column combinations
    // ------------------------------------------------------------------------

    /// Data-supported combinations of `table`'s column dimensions in
    /// lexicographic depth-first order. Expands one level at a time over a
    /// frontier of prefixes.
    pub async fn discover_column_combinations(&self, table: &TableConfig) -> Result<Vec<ColumnCombination>> {
        let dims = &table.col_dimensions;
        if dims.is_empty() {
            return Ok(Vec::new());
        }

        let mut frontier: Vec<ColumnCombination> = vec![Vec::new()];
        for dim in dims {
            let lookups = frontier.iter().map(|prefix| {
                let selection = prefix_selection(&self.config.filters, dims, prefix);
                async move { self.source.distinct_values(dim, &selection).await }
            });
            let keys_per_prefix = try_join_all(lookups).await?;

            let mut next = Vec::new();
            for (prefix, mut keys) in frontier.iter().zip(keys_per_prefix) {
                keys.sort();
                keys.dedup();
                for key in keys {
                    let mut combination = Vec::with_capacity(dims.len());
                    combination.extend(prefix.iter().cloned());
                    combination.push(key);
                    next.push(combination);
                }
            }

            frontier = next;
            if frontier.is_empty() {
                break;
            }
        }

        Ok(frontier)
    }

    async fn table_layouts(&self) -> Result<Vec<TableLayout>> {
        let active: Vec<&TableConfig> = self.config.active_tables().collect();
        let discovered = try_join_all(
            active.iter().map(|table| self.discover_column_combinations(table)),
        )
        .await?;

        Ok(active
            .into_iter()
            .zip(discovered)
            .map(|(table, combinations)| TableLayout {
                table: table.clone(),
                combinations,
            })
            .collect())
    }

    // ------------------------------------------------------------------------
    // Headers
    // ------------------------------------------------------------------------

    /// Header matrix: one row per column-dimension depth.
    pub async fn get_headers(&self) -> Result<Vec<HeaderRow>> {
        log_enter!("PIVOT", "get_headers");
        let result = self.build_headers().await;
        match &result {
            Ok(rows) => log_exit!("PIVOT", "get_headers", "depth={}", rows.len()),
            Err(e) => log_exit!("PIVOT", "get_headers", "error: {}", e),
        }
        result
    }

    async fn build_headers(&self) -> Result<Vec<HeaderRow>> {
        let schema = self.source.schema();
        if !self.check_config(&schema) {
            return Ok(Vec::new());
        }

        let layouts = self.table_layouts().await?;
        let max_depth = layouts
            .iter()
            .map(|l| l.table.col_dimensions.len())
            .max()
            .unwrap_or(0);
        if max_depth == 0 {
            return Ok(Vec::new());
        }

        let mut rows: Vec<HeaderRow> = vec![Vec::new(); max_depth];
        let row_label = self.config.row_dimensions.first().cloned().unwrap_or_default();
        rows[0].push(HeaderCell::row_header(row_label, max_depth));

        for layout in &layouts {
            let table = &layout.table;
            let dims = table.col_dimensions.len();
            for (depth, row) in rows.iter_mut().enumerate().take(dims) {
                let row_span = if depth + 1 == dims { max_depth - depth } else { 1 };
                for (prefix, col_span) in prefix_groups(&layout.combinations, depth) {
                    row.push(HeaderCell::column(&table.id, prefix, col_span, row_span));
                }
            }
            if table.show_column_total {
                rows[0].push(HeaderCell::total(&table.id, max_depth));
            }
        }

        Ok(rows)
    }

    // ------------------------------------------------------------------------
    // Rows
    // ------------------------------------------------------------------------

    /// Full row tree followed by the grand-total row.
    pub async fn get_hierarchical_rows(&self) -> Result<Vec<RowNode>> {
        let levels = self.config.row_dimensions.len();
        self.build_rows(levels).await
    }

    /// Root level only, followed by the grand-total row.
    pub async fn get_rows(&self) -> Result<Vec<RowNode>> {
        self.build_rows(1).await
    }

    /// Cells of the row at `path`, for lazily expanded rows.
    pub async fn calculate_row_values(&self, path: &[String]) -> Result<Vec<ValueCell>> {
        let schema = self.source.schema();
        if !self.check_config(&schema) {
            return Ok(Vec::new());
        }
        let layouts = self.table_layouts().await?;
        self.compute_row_values(path, &layouts).await
    }

    pub async fn compute_grand_totals(&self) -> Result<Vec<ValueCell>> {
        self.calculate_row_values(&[]).await
    }

    async fn build_rows(&self, max_levels: usize) -> Result<Vec<RowNode>> {
        log_enter!("PIVOT", "build_rows", "max_levels={}", max_levels);
        let result = self.build_row_tree(max_levels).await;
        match &result {
            Ok(rows) => log_exit!("PIVOT", "build_rows", "roots={}", rows.len()),
            Err(e) => log_exit!("PIVOT", "build_rows", "error: {}", e),
        }
        result
    }

    async fn build_row_tree(&self, max_levels: usize) -> Result<Vec<RowNode>> {
        let schema = self.source.schema();
        if !self.check_config(&schema) {
            return Ok(Vec::new());
        }

        let layouts = self.table_layouts().await?;
        let row_dims = &self.config.row_dimensions;

        if row_dims.is_empty() {
            let totals = self.compute_row_values(&[], &layouts).await?;
            return Ok(vec![RowNode::grand_total(totals)]);
        }

        let levels = max_levels.min(row_dims.len());
        let mut arena: Vec<ArenaNode> = Vec::new();
        let mut roots: Vec<usize> = Vec::new();
        let mut frontier: Vec<Option<usize>> = vec![None];

        for (depth, dim) in row_dims.iter().enumerate().take(levels) {
            let kind = schema.kind(dim).unwrap_or(DimensionKind::String);

            let lookups = frontier.iter().map(|parent| {
                let path: &[String] = match parent {
                    Some(idx) => arena[*idx].path.as_slice(),
                    None => &[],
                };
                let selection = prefix_selection(&self.config.filters, row_dims, path);
                async move { self.source.distinct_values(dim, &selection).await }
            });
            let keys_per_parent = try_join_all(lookups).await?;

            let mut level: Vec<usize> = Vec::new();
            for (parent, mut keys) in frontier.iter().zip(keys_per_parent) {
                keys.sort_by(|a, b| kind.compare_keys(a, b));
                keys.dedup();
                for key in keys {
                    let mut path = match parent {
                        Some(idx) => arena[*idx].path.clone(),
                        None => Path::new(),
                    };
                    path.push(key);
                    let idx = arena.len();
                    arena.push(ArenaNode {
                        path,
                        depth,
                        children: Vec::new(),
                        values: Vec::new(),
                    });
                    match parent {
                        Some(p) => arena[*p].children.push(idx),
                        None => roots.push(idx),
                    }
                    level.push(idx);
                }
            }

            let values = try_join_all(
                level
                    .iter()
                    .map(|idx| self.compute_row_values(&arena[*idx].path, &layouts)),
            )
            .await?;
            for (idx, cells) in level.iter().zip(values) {
                arena[*idx].values = cells;
            }

            if level.is_empty() {
                break;
            }
            frontier = level.into_iter().map(Some).collect();
        }

        let mut rows = assemble(arena, &roots);

        if self.config.show_row_total {
            let totals = self.compute_row_values(&[], &layouts).await?;
            rows.push(RowNode::grand_total(totals));
        }

        Ok(rows)
    }

    /// One cell per combination of every active table, plus each table's
    /// total when enabled, concatenated in table order.
    async fn compute_row_values(&self, path: &[String], layouts: &[TableLayout]) -> Result<Vec<ValueCell>> {
        let requests: Vec<AggregateRequest> = layouts
            .iter()
            .map(|layout| AggregateRequest {
                filters: self.config.filters.clone(),
                row_path: path.to_vec(),
                row_dimensions: self.config.row_dimensions.iter().take(path.len()).cloned().collect(),
                table: layout.table.clone(),
            })
            .collect();

        let aggregates = try_join_all(requests.iter().map(|r| self.source.aggregate(r))).await?;

        let mut cells = Vec::new();
        for (layout, aggregate) in layouts.iter().zip(aggregates.iter()) {
            let format = layout.table.format_type;
            let sums = aggregate.by_combination();
            for combination in &layout.combinations {
                let value = sums.get(combination.as_slice()).copied().unwrap_or(0.0);
                cells.push(ValueCell::new(value, format_value(value, format), false));
            }
            if layout.table.show_column_total {
                let total = aggregate.total;
                cells.push(ValueCell::new(total, format_value(total, format), true));
            }
        }
        Ok(cells)
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Filters plus one equality constraint per prefix key.
fn prefix_selection(filters: &Filters, dims: &[String], prefix: &[String]) -> Selection {
    let mut selection = Selection::filtered(filters);
    selection.constraints = dims
        .iter()
        .zip(prefix.iter())
        .map(|(dim, key)| (dim.clone(), key.clone()))
        .collect();
    selection
}

/// Runs of combinations sharing the prefix `[..=depth]`, with run length.
fn prefix_groups(combinations: &[ColumnCombination], depth: usize) -> Vec<(Path, usize)> {
    let mut groups: Vec<(Path, usize)> = Vec::new();
    for combination in combinations {
        let prefix = &combination[..=depth];
        match groups.last_mut() {
            Some((last, span)) if last.as_slice() == prefix => *span += 1,
            _ => groups.push((prefix.iter().cloned().collect(), 1)),
        }
    }
    groups
}

/// Bottom-up assembly: children always sit at higher indices than their
/// parent, so a reverse sweep finishes every child before its parent.
fn assemble(arena: Vec<ArenaNode>, roots: &[usize]) -> Vec<RowNode> {
    let mut slots: Vec<Option<RowNode>> = (0..arena.len()).map(|_| None).collect();
    for (idx, node) in arena.into_iter().enumerate().rev() {
        let mut row = RowNode::new(node.path, node.depth, node.values);
        row.children = node
            .children
            .iter()
            .filter_map(|child| slots[*child].take())
            .collect();
        slots[idx] = Some(row);
    }
    roots.iter().filter_map(|root| slots[*root].take()).collect()
}

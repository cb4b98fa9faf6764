//! FILENAME: core/pivot-engine/src/definition.rs
//! Pivot Definition - The serializable configuration.
//!
//! This module contains all the types needed to DESCRIBE a pivot view.
//! These structures are designed to be:
//! - Serializable (field names match the host UI's camelCase JSON)
//! - Owned and mutated by the caller
//! - Cheap to validate against a resolved dataset schema

use std::collections::{BTreeMap, HashSet};
use serde::{Deserialize, Serialize};
use crate::error::ConfigurationError;
use crate::record::Schema;

/// Dimension name → allowed string keys. An empty list leaves the dimension
/// unrestricted.
pub type Filters = BTreeMap<String, Vec<String>>;

// ============================================================================
// FORMATTING
// ============================================================================

/// How summed values are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormatType {
    #[default]
    Number,
    Currency,
    Percent,
    Eur,
}

// ============================================================================
// TABLE DEFINITIONS
// ============================================================================

fn default_true() -> bool {
    true
}

/// One independent aggregation definition. Tables share the row axis of their
/// parent config but discover their own column combinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableConfig {
    pub id: String,

    /// Column dimensions, ordered outer to inner.
    #[serde(default)]
    pub col_dimensions: Vec<String>,

    /// The numeric field summed into every cell.
    #[serde(default)]
    pub value_dimension: String,

    #[serde(default)]
    pub format_type: FormatType,

    /// Emit a trailing per-row total cell (and a "Total" header).
    #[serde(default = "default_true")]
    pub show_column_total: bool,
}

impl TableConfig {
    pub fn new(
        id: impl Into<String>,
        col_dimensions: Vec<String>,
        value_dimension: impl Into<String>,
    ) -> Self {
        TableConfig {
            id: id.into(),
            col_dimensions,
            value_dimension: value_dimension.into(),
            format_type: FormatType::Number,
            show_column_total: true,
        }
    }

    pub fn with_format(mut self, format_type: FormatType) -> Self {
        self.format_type = format_type;
        self
    }

    pub fn with_column_total(mut self, show: bool) -> Self {
        self.show_column_total = show;
        self
    }

    /// A table takes part in rendering only with at least one column
    /// dimension and a value dimension.
    pub fn is_active(&self) -> bool {
        !self.col_dimensions.is_empty() && !self.value_dimension.is_empty()
    }
}

// ============================================================================
// MAIN DEFINITION STRUCT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotConfig {
    /// Row dimensions, ordered outer to inner.
    #[serde(default)]
    pub row_dimensions: Vec<String>,

    #[serde(default)]
    pub table_configs: Vec<TableConfig>,

    #[serde(default)]
    pub filters: Filters,

    /// Emit the trailing grand-total row.
    #[serde(default = "default_true")]
    pub show_row_total: bool,
}

impl Default for PivotConfig {
    fn default() -> Self {
        PivotConfig {
            row_dimensions: Vec::new(),
            table_configs: Vec::new(),
            filters: Filters::new(),
            show_row_total: true,
        }
    }
}

impl PivotConfig {
    pub fn new(row_dimensions: Vec<String>, table_configs: Vec<TableConfig>) -> Self {
        PivotConfig {
            row_dimensions,
            table_configs,
            ..PivotConfig::default()
        }
    }

    pub fn with_filter(mut self, dimension: impl Into<String>, values: Vec<String>) -> Self {
        self.filters.insert(dimension.into(), values);
        self
    }

    pub fn active_tables(&self) -> impl Iterator<Item = &TableConfig> {
        self.table_configs.iter().filter(|t| t.is_active())
    }

    /// Checks every referenced dimension against the schema and rejects
    /// duplicate table ids.
    pub fn validate(&self, schema: &Schema) -> Result<(), ConfigurationError> {
        let known = |dim: &str| -> Result<(), ConfigurationError> {
            if schema.contains(dim) {
                Ok(())
            } else {
                Err(ConfigurationError::UnknownDimension(dim.to_string()))
            }
        };

        for dim in &self.row_dimensions {
            known(dim)?;
        }

        let mut ids = HashSet::new();
        for table in &self.table_configs {
            if !ids.insert(table.id.as_str()) {
                return Err(ConfigurationError::DuplicateTableId(table.id.clone()));
            }
            for dim in &table.col_dimensions {
                known(dim)?;
            }
            if !table.value_dimension.is_empty() {
                known(&table.value_dimension)?;
            }
        }

        for (dim, values) in &self.filters {
            if !values.is_empty() {
                known(dim)?;
            }
        }

        Ok(())
    }
}

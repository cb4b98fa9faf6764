//! FILENAME: core/pivot-engine/src/view.rs
//! Pivot View - The renderable output.
//!
//! Header matrix and row tree handed to the caller. Both are recomputed in
//! full on every configuration or filter change.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Tuple of dimension keys, outer to inner. Most pivots nest only a few
/// dimensions deep.
pub type Path = SmallVec<[String; 4]>;

// ============================================================================
// HEADERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HeaderKind {
    /// Leading cell naming the row axis.
    RowHeader,
    Column,
    Total,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderCell {
    pub content: String,
    pub kind: HeaderKind,

    /// Owning table for column and total cells.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,

    /// Column-dimension prefix this cell stands for.
    pub path: Path,

    pub col_span: usize,
    pub row_span: usize,
}

impl HeaderCell {
    pub fn row_header(content: impl Into<String>, row_span: usize) -> Self {
        HeaderCell {
            content: content.into(),
            kind: HeaderKind::RowHeader,
            table_id: None,
            path: Path::new(),
            col_span: 1,
            row_span,
        }
    }

    pub fn column(table_id: &str, path: Path, col_span: usize, row_span: usize) -> Self {
        HeaderCell {
            content: path.last().cloned().unwrap_or_default(),
            kind: HeaderKind::Column,
            table_id: Some(table_id.to_string()),
            path,
            col_span,
            row_span,
        }
    }

    pub fn total(table_id: &str, row_span: usize) -> Self {
        HeaderCell {
            content: "Total".to_string(),
            kind: HeaderKind::Total,
            table_id: Some(table_id.to_string()),
            path: Path::new(),
            col_span: 1,
            row_span,
        }
    }
}

/// One header row per column-dimension depth.
pub type HeaderRow = Vec<HeaderCell>;

// ============================================================================
// ROWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueCell {
    /// Raw sum; formatting never feeds back into it.
    pub value: f64,
    pub content: String,
    pub is_total: bool,
    pub is_positive: bool,
    pub is_negative: bool,
}

impl ValueCell {
    pub fn new(value: f64, content: String, is_total: bool) -> Self {
        ValueCell {
            value,
            content,
            is_total,
            is_positive: value > 0.0,
            is_negative: value < 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowNode {
    /// Path keys joined with `|`.
    pub id: String,
    pub label: String,
    pub path: Path,
    pub depth: usize,
    pub children: Vec<RowNode>,
    pub values: Vec<ValueCell>,
    pub is_grand_total: bool,
}

pub const PATH_SEPARATOR: &str = "|";

pub const GRAND_TOTAL_LABEL: &str = "Total";

impl RowNode {
    pub fn new(path: Path, depth: usize, values: Vec<ValueCell>) -> Self {
        RowNode {
            id: path.join(PATH_SEPARATOR),
            label: path.last().cloned().unwrap_or_default(),
            path,
            depth,
            children: Vec::new(),
            values,
            is_grand_total: false,
        }
    }

    pub fn grand_total(values: Vec<ValueCell>) -> Self {
        RowNode {
            id: GRAND_TOTAL_LABEL.to_string(),
            label: GRAND_TOTAL_LABEL.to_string(),
            path: Path::new(),
            depth: 0,
            children: Vec::new(),
            values,
            is_grand_total: true,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Raw sums of this row's cells.
    pub fn numbers(&self) -> Vec<f64> {
        self.values.iter().map(|v| v.value).collect()
    }

    /// Depth-first visit of this node and its descendants.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a RowNode)) {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            visit(node);
            stack.extend(node.children.iter().rev());
        }
    }
}

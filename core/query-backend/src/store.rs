//! FILENAME: core/query-backend/src/store.rs
//! SQLite document store answering filter, distinct and grouped-sum queries.
//!
//! Rows are stored once as JSON documents. Every dimension lookup goes through
//! `CAST(json_extract(row_data, ?) AS TEXT)`, which renders the same key the
//! in-memory source uses because integral numbers are stored as JSON integers.
//! All user data is bound as parameters.

use std::sync::Arc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use thiserror::Error;
use pivot_engine::{
    Aggregate, AggregateRequest, DataRow, Dataset, DimensionInfo, DimensionKind, Filters,
    GroupedValue, Schema, Selection,
};
use crate::config::BackendConfig;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database not initialized")]
    NotInitialized,

    #[error("sqlite build lacks JSON support: {0}")]
    MissingCapability(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

const SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS pivot_data (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      row_data TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS pivot_schema (
      position INTEGER PRIMARY KEY,
      dimension TEXT NOT NULL,
      kind TEXT NOT NULL
    );
"#;

pub struct DocumentStore {
    conn: Connection,
    batch_size: usize,
    query_row_limit: Option<usize>,
    schema: Arc<Schema>,
}

impl DocumentStore {
    pub fn open(config: &BackendConfig) -> Result<Self> {
        let conn = match &config.database_path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(config.busy_timeout())?;
        check_json_support(&conn)?;
        conn.execute_batch(SCHEMA_SQL)?;

        let schema = Arc::new(read_schema(&conn)?);
        Ok(DocumentStore {
            conn,
            batch_size: config.effective_batch_size(),
            query_row_limit: config.query_row_limit,
            schema,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        DocumentStore::open(&BackendConfig::default())
    }

    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    pub fn row_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM pivot_data", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Truncates and reinserts the whole dataset in one transaction. A failed
    /// load leaves the previous contents in place.
    pub fn load(&mut self, rows: Vec<DataRow>) -> Result<usize> {
        let dataset = Dataset::new(rows);
        let schema = Arc::clone(dataset.schema());

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM pivot_data", [])?;
        tx.execute("DELETE FROM pivot_schema", [])?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO pivot_schema (position, dimension, kind) VALUES (?1, ?2, ?3)",
            )?;
            for (position, info) in schema.dimensions().iter().enumerate() {
                stmt.execute(params![position as i64, &info.name, info.kind.as_str()])?;
            }
        }

        for chunk in dataset.rows().chunks(self.batch_size) {
            let documents = chunk
                .iter()
                .map(serde_json::to_string)
                .collect::<std::result::Result<Vec<String>, _>>()?;
            let mut stmt = tx.prepare_cached(&insert_sql(chunk.len()))?;
            stmt.execute(params_from_iter(documents.iter()))?;
        }

        tx.commit()?;
        self.schema = schema;
        Ok(dataset.len())
    }

    /// Rows matching `filters` in insertion order, optionally projected.
    pub fn query_rows(&self, filters: &Filters, dimensions: Option<&[String]>) -> Result<Vec<DataRow>> {
        let mut clause = WhereClause::default();
        clause.filters(filters);

        let mut sql = format!("SELECT row_data FROM pivot_data{} ORDER BY id", clause.sql());
        let mut params = clause.params;
        if let Some(limit) = self.query_row_limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(limit as i64));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let documents = stmt
            .query_map(params_from_iter(params.iter()), |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        documents
            .iter()
            .map(|doc| {
                let row: DataRow = serde_json::from_str(doc)?;
                Ok(match dimensions {
                    Some(fields) => row.project(fields),
                    None => row,
                })
            })
            .collect()
    }

    /// Sorted distinct keys of `dimension` over the selected rows.
    pub fn distinct_values(&self, dimension: &str, selection: &Selection) -> Result<Vec<String>> {
        if !self.schema.contains(dimension) {
            return Ok(Vec::new());
        }

        let mut clause = WhereClause::default();
        clause.selection(selection);
        clause.present(dimension);

        let sql = format!(
            "SELECT DISTINCT {} AS v FROM pivot_data{} ORDER BY v",
            KEY_EXPR,
            clause.sql()
        );
        let mut params = vec![json_path(dimension)];
        params.extend(clause.params);

        let mut stmt = self.conn.prepare(&sql)?;
        let values = stmt
            .query_map(params_from_iter(params.iter()), |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(values)
    }

    /// Grouped sums over the table's column dimensions plus the ungrouped
    /// total of the rows selected by filters and row path.
    pub fn aggregate(&self, request: &AggregateRequest) -> Result<Aggregate> {
        let selection = request.selection();
        let table = &request.table;
        let value_dim = table.value_dimension.as_str();

        let mut values = Vec::new();
        if !table.col_dimensions.is_empty() {
            let columns: Vec<String> = (0..table.col_dimensions.len())
                .map(|i| format!("{} AS c{}", KEY_EXPR, i))
                .collect();
            let group_by: Vec<String> = (0..table.col_dimensions.len())
                .map(|i| format!("c{}", i))
                .collect();

            let mut clause = WhereClause::default();
            clause.selection(&selection);
            for dim in &table.col_dimensions {
                clause.present(dim);
            }
            clause.present(value_dim);

            let sql = format!(
                "SELECT {}, {} AS v FROM pivot_data{} GROUP BY {} ORDER BY {}",
                columns.join(", "),
                SUM_EXPR,
                clause.sql(),
                group_by.join(", "),
                group_by.join(", ")
            );

            let mut params: Vec<Value> = table.col_dimensions.iter().map(|d| json_path(d)).collect();
            params.push(json_path(value_dim));
            params.push(json_path(value_dim));
            params.extend(clause.params);

            let width = table.col_dimensions.len();
            let mut stmt = self.conn.prepare(&sql)?;
            values = stmt
                .query_map(params_from_iter(params.iter()), |r| {
                    let mut dimensions = Vec::with_capacity(width);
                    for i in 0..width {
                        dimensions.push(r.get::<_, String>(i)?);
                    }
                    Ok(GroupedValue {
                        dimensions,
                        value: r.get(width)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<GroupedValue>>>()?;
        }

        let mut clause = WhereClause::default();
        clause.selection(&selection);
        let sql = format!("SELECT {} FROM pivot_data{}", SUM_EXPR, clause.sql());
        let mut params = vec![json_path(value_dim), json_path(value_dim)];
        params.extend(clause.params);
        let total: f64 = self
            .conn
            .query_row(&sql, params_from_iter(params.iter()), |r| r.get(0))?;

        Ok(Aggregate { values, total })
    }
}

// ============================================================================
// SQL BUILDING
// ============================================================================

/// String key of the field at the bound JSON path.
const KEY_EXPR: &str = "CAST(json_extract(row_data, ?) AS TEXT)";

/// Numeric fields sum, anything else contributes 0. TOTAL keeps empty
/// groups at 0.0 instead of NULL.
const SUM_EXPR: &str = "TOTAL(CASE WHEN json_type(row_data, ?) IN ('integer', 'real') \
                        THEN json_extract(row_data, ?) ELSE 0 END)";

fn json_path(dimension: &str) -> Value {
    Value::Text(format!("$.\"{}\"", dimension))
}

fn insert_sql(rows: usize) -> String {
    let mut sql = String::with_capacity(40 + rows * 4);
    sql.push_str("INSERT INTO pivot_data (row_data) VALUES ");
    for i in 0..rows {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str("(?)");
    }
    sql
}

/// Conjunction of conditions with their positional parameters in textual
/// order.
#[derive(Default)]
struct WhereClause {
    conditions: Vec<String>,
    params: Vec<Value>,
}

impl WhereClause {
    fn filters(&mut self, filters: &Filters) {
        for (dim, allowed) in filters {
            if allowed.is_empty() {
                continue;
            }
            let placeholders = vec!["?"; allowed.len()].join(", ");
            self.conditions.push(format!("{} IN ({})", KEY_EXPR, placeholders));
            self.params.push(json_path(dim));
            self.params
                .extend(allowed.iter().map(|v| Value::Text(v.clone())));
        }
    }

    fn equals(&mut self, dim: &str, key: &str) {
        self.conditions.push(format!("{} = ?", KEY_EXPR));
        self.params.push(json_path(dim));
        self.params.push(Value::Text(key.to_string()));
    }

    fn present(&mut self, dim: &str) {
        self.conditions.push(format!("COALESCE({}, '') <> ''", KEY_EXPR));
        self.params.push(json_path(dim));
    }

    fn selection(&mut self, selection: &Selection) {
        self.filters(&selection.filters);
        for (dim, key) in &selection.constraints {
            self.equals(dim, key);
        }
    }

    fn sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }
}

fn check_json_support(conn: &Connection) -> Result<()> {
    let probe: rusqlite::Result<i64> =
        conn.query_row(r#"SELECT json_extract('{"probe":1}', '$.probe')"#, [], |r| r.get(0));
    match probe {
        Ok(1) => Ok(()),
        Ok(other) => Err(StoreError::MissingCapability(format!(
            "json_extract probe returned {}",
            other
        ))),
        Err(e) => Err(StoreError::MissingCapability(e.to_string())),
    }
}

fn read_schema(conn: &Connection) -> Result<Schema> {
    let mut stmt = conn.prepare("SELECT dimension, kind FROM pivot_schema ORDER BY position")?;
    let dimensions = stmt
        .query_map([], |r| {
            let name: String = r.get(0)?;
            let kind: String = r.get(1)?;
            Ok(DimensionInfo {
                name,
                kind: DimensionKind::parse(&kind).unwrap_or(DimensionKind::String),
            })
        })?
        .collect::<rusqlite::Result<Vec<DimensionInfo>>>()?;
    Ok(Schema::from_dimensions(dimensions))
}

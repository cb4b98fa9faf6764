//! FILENAME: core/pivot-engine/src/record.rs
//! Record model - schema-less rows and the metadata resolved from them.
//!
//! Rows arrive without a declared schema. When a [`Dataset`] is built:
//! - numeric-looking text (`"1,250,000"`, `"$1,200.50"`) is normalized to numbers
//! - the dimension list and each dimension's semantic kind are resolved once
//!   from the full column and cached in a [`Schema`]
//!
//! Every later query (direct or delegated) reuses that resolution.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use crate::definition::Filters;

// ============================================================================
// FIELD VALUES
// ============================================================================

/// A single field of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

/// Integral values below this magnitude fit in an i64 and render as integer
/// keys.
const MAX_INTEGRAL_KEY: f64 = 9.2e18;

fn is_integral(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() < MAX_INTEGRAL_KEY
}

impl FieldValue {
    /// String coercion used for grouping, filtering and header content.
    pub fn key(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(n) => number_key(*n),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    /// Numeric reading of the value. Dates and non-numeric text are `None`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) if n.is_finite() => Some(*n),
            FieldValue::Number(_) => None,
            FieldValue::Text(s) => parse_numeric_text(s),
            FieldValue::Date(_) => None,
        }
    }

    /// Replaces numeric-looking text by the number it denotes.
    pub fn normalize(self) -> Self {
        match self {
            FieldValue::Text(s) => match parse_numeric_text(&s) {
                Some(n) => FieldValue::Number(n),
                None => FieldValue::Text(s),
            },
            other => other,
        }
    }

    fn is_date_like(&self) -> bool {
        match self {
            FieldValue::Date(_) => true,
            FieldValue::Text(s) => parse_date_text(s).is_some(),
            FieldValue::Number(_) => false,
        }
    }
}

fn number_key(n: f64) -> String {
    if is_integral(n) {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Integral numbers serialize as integers so a SQL text cast of the stored
/// document renders the same key as [`FieldValue::key`].
impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Number(n) if is_integral(*n) => serializer.serialize_i64(*n as i64),
            FieldValue::Number(n) => serializer.serialize_f64(*n),
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::Date(d) => serializer.collect_str(&d.format("%Y-%m-%d")),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFieldValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawFieldValue::deserialize(deserializer)? {
            RawFieldValue::Number(n) => FieldValue::Number(n),
            RawFieldValue::Bool(b) => FieldValue::Text(b.to_string()),
            RawFieldValue::Text(s) => FieldValue::Text(s),
        })
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

// ============================================================================
// TEXT PARSING
// ============================================================================

/// Optional sign, optional `$`, comma-grouped digits, optional fraction and
/// exponent.
static NUMERIC_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?\$?[+-]?(?:\d[\d,]*(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?$")
        .unwrap_or_else(|e| panic!("invalid numeric pattern: {}", e))
});

/// Parses numeric-looking text such as `"1,250,000"` or `"-$12.50"`.
pub fn parse_numeric_text(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !NUMERIC_TEXT.is_match(trimmed) {
        return None;
    }
    let cleaned: String = trimmed.chars().filter(|c| *c != ',' && *c != '$').collect();
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Parses date-looking text.
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(trimmed).ok().map(|dt| dt.date_naive())
}

// ============================================================================
// ROWS
// ============================================================================

/// A schema-less row: field name → value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataRow(BTreeMap<String, FieldValue>);

impl DataRow {
    pub fn new() -> Self {
        DataRow(BTreeMap::new())
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Grouping key of `field`. Missing fields and empty keys are absent.
    pub fn key(&self, field: &str) -> Option<String> {
        self.0.get(field).map(FieldValue::key).filter(|k| !k.is_empty())
    }

    pub fn key_equals(&self, field: &str, expected: &str) -> bool {
        match self.0.get(field) {
            Some(FieldValue::Text(s)) => s == expected,
            Some(value) => value.key() == expected,
            None => false,
        }
    }

    /// Summable reading of `field`; missing or non-numeric values count as 0.
    pub fn number(&self, field: &str) -> f64 {
        self.0.get(field).and_then(FieldValue::as_number).unwrap_or(0.0)
    }

    /// Conjunction across dimensions, membership within one.
    pub fn passes(&self, filters: &Filters) -> bool {
        filters.iter().all(|(dim, allowed)| {
            allowed.is_empty() || allowed.iter().any(|v| self.key_equals(dim, v))
        })
    }

    /// Keeps only the listed fields.
    pub fn project(&self, fields: &[String]) -> DataRow {
        DataRow(
            self.0
                .iter()
                .filter(|(k, _)| fields.iter().any(|f| f == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    fn normalized(self) -> Self {
        DataRow(self.0.into_iter().map(|(k, v)| (k, v.normalize())).collect())
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for DataRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        DataRow(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Semantic kind of a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionKind {
    String,
    Number,
    Date,
}

impl DimensionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionKind::String => "string",
            DimensionKind::Number => "number",
            DimensionKind::Date => "date",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(DimensionKind::String),
            "number" => Some(DimensionKind::Number),
            "date" => Some(DimensionKind::Date),
            _ => None,
        }
    }

    /// Ordering of two grouping keys of this kind.
    pub fn compare_keys(&self, a: &str, b: &str) -> Ordering {
        match self {
            DimensionKind::Number => {
                compare_parsed(a.parse::<f64>().ok(), b.parse::<f64>().ok())
                    .then_with(|| a.cmp(b))
            }
            DimensionKind::Date => {
                compare_parsed(parse_date_text(a), parse_date_text(b)).then_with(|| a.cmp(b))
            }
            DimensionKind::String => a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)),
        }
    }
}

/// Unparseable keys sort after parseable ones.
fn compare_parsed<T: PartialOrd>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionInfo {
    pub name: String,
    pub kind: DimensionKind,
}

/// Resolved field list and kinds of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    dimensions: Vec<DimensionInfo>,
}

#[derive(Default)]
struct KindTally {
    present: bool,
    all_numeric: bool,
    all_dates: bool,
}

impl Schema {
    pub fn from_dimensions(dimensions: Vec<DimensionInfo>) -> Self {
        Schema { dimensions }
    }

    /// Resolves dimension names (first-seen order) and kinds from every row.
    pub fn resolve(rows: &[DataRow]) -> Self {
        let mut order: Vec<String> = Vec::new();
        let mut tallies: BTreeMap<String, KindTally> = BTreeMap::new();

        for row in rows {
            for (field, value) in row.fields() {
                let tally = tallies.entry(field.clone()).or_insert_with(|| {
                    order.push(field.clone());
                    KindTally {
                        present: false,
                        all_numeric: true,
                        all_dates: true,
                    }
                });
                if value.key().is_empty() {
                    continue;
                }
                tally.present = true;
                tally.all_numeric &= matches!(value, FieldValue::Number(_));
                tally.all_dates &= value.is_date_like();
            }
        }

        let dimensions = order
            .into_iter()
            .map(|name| {
                let kind = match tallies.get(&name) {
                    Some(t) if t.present && t.all_numeric => DimensionKind::Number,
                    Some(t) if t.present && t.all_dates => DimensionKind::Date,
                    _ => DimensionKind::String,
                };
                DimensionInfo { name, kind }
            })
            .collect();

        Schema { dimensions }
    }

    pub fn dimensions(&self) -> &[DimensionInfo] {
        &self.dimensions
    }

    pub fn names(&self) -> Vec<String> {
        self.dimensions.iter().map(|d| d.name.clone()).collect()
    }

    pub fn kind(&self, dimension: &str) -> Option<DimensionKind> {
        self.dimensions
            .iter()
            .find(|d| d.name == dimension)
            .map(|d| d.kind)
    }

    pub fn contains(&self, dimension: &str) -> bool {
        self.kind(dimension).is_some()
    }

    pub fn numeric_dimensions(&self) -> Vec<String> {
        self.dimensions
            .iter()
            .filter(|d| d.kind == DimensionKind::Number)
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }
}

// ============================================================================
// DATASET
// ============================================================================

/// Normalized rows plus their resolved schema.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    rows: Vec<DataRow>,
    schema: Arc<Schema>,
}

impl Dataset {
    pub fn new(rows: Vec<DataRow>) -> Self {
        let rows: Vec<DataRow> = rows.into_iter().map(DataRow::normalized).collect();
        let schema = Arc::new(Schema::resolve(&rows));
        Dataset { rows, schema }
    }

    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn filtered<'a>(&'a self, filters: &'a Filters) -> impl Iterator<Item = &'a DataRow> + 'a {
        self.rows.iter().filter(move |row| row.passes(filters))
    }
}

impl From<Vec<DataRow>> for Dataset {
    fn from(rows: Vec<DataRow>) -> Self {
        Dataset::new(rows)
    }
}

//! In-memory relations.
//!
//! The five e-commerce relations are loaded once per session and are
//! read-only to everything downstream. Query results use the same
//! [`Table`] type.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{DataError, PlanError};

/// Date-time columns of the orders relation, parsed at load time
pub const ORDER_TIMESTAMP_COLUMNS: &[&str] = &[
    "order_purchase_timestamp",
    "order_approved_at",
    "order_delivered_timestamp",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

// ============================================================================
// Cells
// ============================================================================

/// A single typed cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

impl Value {
    /// Infer the cell type from raw CSV text
    pub fn infer(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            if f.is_finite() {
                return Value::Float(f);
            }
        }
        Value::Text(raw.to_string())
    }

    /// Parse a date-time cell; unparseable text is kept as text
    pub fn parse_datetime(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Value::Null;
        }
        match parse_datetime(raw) {
            Some(dt) => Value::DateTime(dt),
            None => Value::Text(raw.to_string()),
        }
    }

    /// Convert a JSON literal from a model-produced plan
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Text(b.to_string()),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Total-enough ordering used by filters and sorting.
    ///
    /// Numbers compare numerically across Int/Float, a date-time compares
    /// against text by parsing the text, Null sorts first.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::Text(b)) => parse_datetime(b).map(|b| a.cmp(&b)),
            (Value::Text(a), Value::DateTime(b)) => parse_datetime(a).map(|a| a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => Some(self.to_string().cmp(&other.to_string())),
            },
        }
    }

    /// Loose equality used by `eq`/`ne` filters (text is case-insensitive)
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a.eq_ignore_ascii_case(b),
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    /// Hashable grouping key; numerically equal ints and floats share one
    pub fn group_key(&self) -> String {
        match self {
            Value::Null => "n".to_string(),
            Value::Int(i) => format!("num:{}", i),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                format!("num:{}", *f as i64)
            }
            Value::Float(f) => format!("num:{}", f),
            Value::Text(s) => format!("t:{}", s),
            Value::DateTime(dt) => format!("d:{}", dt),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{:.2}", v)
                }
            }
            Value::Text(s) => write!(f, "{}", s),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

// ============================================================================
// Table
// ============================================================================

/// A named two-dimensional relation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Build from string column names and rows, mostly for fixtures
    pub fn from_rows(name: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Exact match first, then case-insensitive
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
    }

    pub fn require_column(&self, name: &str) -> Result<usize, PlanError> {
        self.column_index(name).ok_or_else(|| PlanError::UnknownColumn {
            column: name.to_string(),
            context: self.name.clone(),
        })
    }

    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(move |row| row.get(idx).unwrap_or(&Value::Null))
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn add_column(&mut self, name: impl Into<String>, values: Vec<Value>) {
        self.columns.push(name.into());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
    }

    pub fn rename_columns(&mut self, names: &[&str]) {
        for (column, name) in self.columns.iter_mut().zip(names) {
            *column = name.to_string();
        }
    }

    /// Adds `<col>_year`, `<col>_month` and `<col>_date` for every column
    /// holding date-times, so charts can bucket by period
    pub fn with_datetime_parts(&self) -> Table {
        let mut out = self.clone();
        let datetime_columns: Vec<(usize, String)> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(idx, _)| self.column_values(*idx).any(|v| v.as_datetime().is_some()))
            .map(|(idx, name)| (idx, name.clone()))
            .collect();

        for (idx, name) in datetime_columns {
            let parts: Vec<Option<NaiveDateTime>> =
                self.column_values(idx).map(Value::as_datetime).collect();
            out.add_column(
                format!("{}_year", name),
                parts.iter().map(|d| d.map_or(Value::Null, |d| Value::Int(d.year() as i64))).collect(),
            );
            out.add_column(
                format!("{}_month", name),
                parts.iter().map(|d| d.map_or(Value::Null, |d| Value::Int(d.month() as i64))).collect(),
            );
            out.add_column(
                format!("{}_date", name),
                parts
                    .iter()
                    .map(|d| d.map_or(Value::Null, |d| Value::Text(d.date().to_string())))
                    .collect(),
            );
        }
        out
    }

    /// Aligned plain-text rendering of at most `max_rows` rows
    pub fn to_text(&self, max_rows: usize) -> String {
        let shown: Vec<Vec<String>> = self
            .rows
            .iter()
            .take(max_rows)
            .map(|row| {
                (0..self.columns.len())
                    .map(|i| row.get(i).map(|v| v.to_string()).unwrap_or_default())
                    .collect()
            })
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                shown
                    .iter()
                    .map(|r| r[i].chars().count())
                    .chain(std::iter::once(c.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let format_line = |cells: &[String]| -> String {
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{:<width$}", cell, width = *w))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };

        let mut lines = vec![format_line(&self.columns)];
        lines.extend(shown.iter().map(|r| format_line(r)));
        lines.join("\n")
    }
}

// ============================================================================
// Relation set
// ============================================================================

/// The five relations a session works with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Customers,
    Orders,
    OrderItems,
    Payments,
    Products,
}

impl TableKind {
    pub const ALL: [TableKind; 5] = [
        TableKind::Customers,
        TableKind::Orders,
        TableKind::OrderItems,
        TableKind::Payments,
        TableKind::Products,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Customers => "customers",
            TableKind::Orders => "orders",
            TableKind::OrderItems => "order_items",
            TableKind::Payments => "payments",
            TableKind::Products => "products",
        }
    }

    /// Case-insensitive lookup by relation name
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|k| k.as_str() == lower)
    }

    pub fn file_name(&self) -> String {
        format!("{}.csv", self.as_str())
    }

    fn datetime_columns(&self) -> &'static [&'static str] {
        match self {
            TableKind::Orders => ORDER_TIMESTAMP_COLUMNS,
            _ => &[],
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named relations available to a session
#[derive(Debug, Clone, Default)]
pub struct TableSet {
    tables: BTreeMap<TableKind, Table>,
}

impl TableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: TableKind, table: Table) -> Self {
        self.insert(kind, table);
        self
    }

    pub fn insert(&mut self, kind: TableKind, mut table: Table) {
        table.name = kind.as_str().to_string();
        self.tables.insert(kind, table);
    }

    pub fn get(&self, kind: TableKind) -> Option<&Table> {
        self.tables.get(&kind)
    }

    pub fn contains(&self, kind: TableKind) -> bool {
        self.tables.contains_key(&kind)
    }

    /// Resolve a model-supplied relation name
    pub fn get_by_name(&self, name: &str) -> Result<&Table, PlanError> {
        let kind = TableKind::from_name(name).ok_or_else(|| PlanError::UnknownTable(name.to_string()))?;
        self.get(kind)
            .ok_or_else(|| PlanError::TableNotLoaded(kind.as_str().to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Load `<relation>.csv` for every relation found in `dir`.
    /// Missing files leave the relation absent.
    pub fn load_dir(dir: &Path) -> Result<Self, DataError> {
        let mut set = TableSet::new();
        for kind in TableKind::ALL {
            let path = dir.join(kind.file_name());
            if !path.exists() {
                warn!("{} not found, relation '{}' unavailable", path.display(), kind);
                continue;
            }
            let table = load_csv(kind, &path)?;
            info!("Loaded {} ({} rows, {} columns)", kind, table.len(), table.num_columns());
            set.insert(kind, table);
        }
        Ok(set)
    }
}

/// Read one relation; headers are whitespace-trimmed and timestamp columns
/// parsed as date-times
pub fn load_csv(kind: TableKind, path: &Path) -> Result<Table, DataError> {
    let display = path.display().to_string();
    let file = std::fs::File::open(path).map_err(|source| DataError::Io {
        path: display.clone(),
        source,
    })?;
    read_csv(kind, file, &display)
}

pub fn read_csv<R: std::io::Read>(kind: TableKind, reader: R, origin: &str) -> Result<Table, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let csv_err = |source| DataError::Csv {
        path: origin.to_string(),
        source,
    };

    let columns: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let datetime_idx: Vec<bool> = columns
        .iter()
        .map(|c| kind.datetime_columns().contains(&c.as_str()))
        .collect();

    let mut table = Table::new(kind.as_str(), columns);
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let row: Vec<Value> = (0..table.columns.len())
            .map(|i| {
                let raw = record.get(i).unwrap_or("");
                if datetime_idx[i] {
                    Value::parse_datetime(raw)
                } else {
                    Value::infer(raw)
                }
            })
            .collect();
        table.push_row(row);
    }

    debug!("Parsed {} rows from {}", table.len(), origin);
    Ok(table)
}

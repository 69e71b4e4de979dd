use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Boolean,
    Numeric,
    Datetime,
    Text,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Boolean => "boolean",
            ColumnKind::Numeric => "numeric",
            ColumnKind::Datetime => "datetime",
            ColumnKind::Text => "text",
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Num(f64),
    Datetime(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{n:.0}")
                } else {
                    n.to_string()
                }
            }
            Value::Datetime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::Text(s) => s.clone(),
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

pub fn parse_naive_datetime(value: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| parse_naive_date(value).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub values: Vec<Option<Value>>,
}

impl Column {
    pub fn text(name: impl Into<String>, values: Vec<Option<Value>>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Text,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }

    pub fn is_all_null(&self) -> bool {
        self.values.iter().all(|v| v.is_none())
    }

    /// Non-null values as f64, in order. Meaningful for Numeric columns.
    pub fn numeric_values(&self) -> Vec<f64> {
        self.values
            .iter()
            .filter_map(|v| v.as_ref().and_then(Value::as_num))
            .collect()
    }
}

/// An ordered set of equally-long named columns. Chunks from the reader and
/// stage outputs are both `Table`s; stages consume their input by value so
/// no two stages ever alias the same column data.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        if let Some(first) = columns.first() {
            debug_assert!(
                columns.iter().all(|c| c.len() == first.len()),
                "all columns must have equal length"
            );
        }
        Self { columns }
    }

    /// A table with the given column names and no rows.
    pub fn with_names(names: &[String]) -> Self {
        Self {
            columns: names
                .iter()
                .map(|name| Column::text(name.clone(), Vec::new()))
                .collect(),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn push_row(&mut self, row: Vec<Option<Value>>) {
        debug_assert_eq!(row.len(), self.columns.len());
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.values.push(value);
        }
    }

    /// Appends all rows of `chunk`, which must share this table's column
    /// layout. Used to assemble the bounded working set from the stream.
    pub fn append(&mut self, chunk: Table) {
        debug_assert_eq!(chunk.n_columns(), self.n_columns());
        for (target, source) in self.columns.iter_mut().zip(chunk.columns) {
            target.values.extend(source.values);
        }
    }

    pub fn truncate_rows(&mut self, len: usize) {
        for column in &mut self.columns {
            column.values.truncate(len);
        }
    }

    /// Renders row `idx` as display strings, nulls as empty strings.
    pub fn render_row(&self, idx: usize) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| {
                column.values[idx]
                    .as_ref()
                    .map(Value::as_display)
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Stable hash of the final column names and order, used to detect
    /// whether two cleaning runs produced structurally identical output.
    pub fn schema_fingerprint(&self) -> String {
        schema_fingerprint(&self.column_names())
    }
}

pub fn schema_fingerprint(names: &[String]) -> String {
    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

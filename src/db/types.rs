//! Database type definitions
//!
//! Core data structures for representing query results, data types,
//! and values as they come back over a link.

use serde::Serialize;
use std::time::Duration;

/// Query execution results
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResults {
    /// Column definitions
    pub columns: Vec<ColumnDef>,
    /// Result rows
    pub rows: Vec<Row>,
    /// Query execution time, as measured by the session
    pub execution_time: Duration,
    /// Total row count
    pub row_count: usize,
}

/// Column definition in query results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Data type
    pub data_type: DataType,
}

/// Database data types
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DataType {
    // Integer types
    SmallInt,
    Integer,
    BigInt,

    // Floating point
    Real,
    Double,
    Numeric,

    // Text types
    Text,
    Varchar,
    Char,

    // Boolean
    Boolean,

    // Date/time types
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Interval,

    // JSON types
    Json,
    Jsonb,

    // Binary data
    Bytea,

    // UUID
    Uuid,

    // Array type
    Array(Box<DataType>),

    // Other/unknown types
    Unknown(String),
}

/// A single row of query results
#[derive(Debug, Clone, Serialize)]
pub struct Row {
    /// Cell values in column order
    pub values: Vec<CellValue>,
}

/// A cell value (single column value in a row)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Json(serde_json::Value),
    Binary(Vec<u8>),
    /// Date/time value (stored as its text form)
    DateTime(String),
    Uuid(String),
    Array(Vec<CellValue>),
}

impl QueryResults {
    /// Build results from columns and rows
    pub fn new(columns: Vec<ColumnDef>, rows: Vec<Row>, execution_time: Duration) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            execution_time,
            row_count,
        }
    }

    /// Results of a statement that returned no rows
    pub fn empty() -> Self {
        Self::default()
    }

    /// Position of the column with the given name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Text values of one column, in row order (NULLs skipped)
    pub fn column_text(&self, name: &str) -> Vec<String> {
        let Some(idx) = self.column_index(name) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter_map(|r| r.values.get(idx))
            .filter_map(CellValue::as_text)
            .map(str::to_string)
            .collect()
    }

    /// Text of the first cell of the first row
    pub fn first_text(&self) -> Option<&str> {
        self.rows.first()?.values.first()?.as_text()
    }
}

impl Row {
    /// Cell at `idx` as text
    pub fn text(&self, idx: usize) -> Option<&str> {
        self.values.get(idx)?.as_text()
    }
}

impl DataType {
    /// Get a human-readable display name for this type
    pub fn display_name(&self) -> String {
        match self {
            DataType::SmallInt => "smallint".to_string(),
            DataType::Integer => "integer".to_string(),
            DataType::BigInt => "bigint".to_string(),
            DataType::Real => "real".to_string(),
            DataType::Double => "double precision".to_string(),
            DataType::Numeric => "numeric".to_string(),
            DataType::Text => "text".to_string(),
            DataType::Varchar => "varchar".to_string(),
            DataType::Char => "char".to_string(),
            DataType::Boolean => "boolean".to_string(),
            DataType::Date => "date".to_string(),
            DataType::Time => "time".to_string(),
            DataType::Timestamp => "timestamp".to_string(),
            DataType::TimestampTz => "timestamptz".to_string(),
            DataType::Interval => "interval".to_string(),
            DataType::Json => "json".to_string(),
            DataType::Jsonb => "jsonb".to_string(),
            DataType::Bytea => "bytea".to_string(),
            DataType::Uuid => "uuid".to_string(),
            DataType::Array(inner) => format!("{}[]", inner.display_name()),
            DataType::Unknown(s) => s.clone(),
        }
    }
}

impl CellValue {
    /// Borrow text-like values (text, date/time, uuid)
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) | CellValue::DateTime(s) | CellValue::Uuid(s) => Some(s),
            _ => None,
        }
    }

    /// Get a display string for this cell value
    pub fn display_string(&self) -> String {
        match self {
            CellValue::Null => "NULL".to_string(),
            CellValue::Integer(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Boolean(b) => b.to_string(),
            CellValue::Json(v) => v.to_string(),
            CellValue::Binary(b) => format!("<binary {} bytes>", b.len()),
            CellValue::DateTime(s) => s.clone(),
            CellValue::Uuid(s) => s.clone(),
            CellValue::Array(arr) => {
                let items: Vec<String> = arr.iter().map(|v| v.display_string()).collect();
                format!("{{{}}}", items.join(","))
            }
        }
    }

    /// Check if this is a NULL value
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;

/// A single cell. Sheets are immutable once ingested, so cells are plain
/// owned values with no interior mutability.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Bool(bool),
    DateTime(NaiveDateTime),
    Null,
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            CellValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Number(n) => serde_json::json!(n),
            CellValue::Text(s) => Value::String(s.clone()),
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::DateTime(dt) => Value::String(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
            CellValue::Null => Value::Null,
        }
    }

    /// Display form used for group keys and observations.
    pub fn render(&self) -> String {
        match self {
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            CellValue::Text(s) => s.clone(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            CellValue::Null => "null".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    #[serde(rename = "numeric")]
    Numeric,
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "datetime")]
    DateTime,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Numeric => "numeric",
            ColumnType::Text => "text",
            ColumnType::Boolean => "boolean",
            ColumnType::DateTime => "datetime",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub description: Option<String>,
    pub sample_values: Vec<String>,
}

/// One tabular unit: ordered typed columns plus row-major storage.
/// The column set is fixed after ingestion.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<CellValue>>,
}

impl Sheet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Result<usize, AgentError> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| AgentError::ColumnNotFound {
                column: name.to_string(),
                available: self.column_names(),
            })
    }

    /// Values of one column for the given row indices.
    pub fn column_values<'a>(
        &'a self,
        column_idx: usize,
        row_indices: &'a [usize],
    ) -> impl Iterator<Item = &'a CellValue> + 'a {
        row_indices.iter().map(move |&r| &self.rows[r][column_idx])
    }

    /// A row rendered as a JSON object keyed by column name.
    pub fn record(&self, row_idx: usize) -> Value {
        let mut obj = serde_json::Map::new();
        for (col, cell) in self.columns.iter().zip(&self.rows[row_idx]) {
            obj.insert(col.name.clone(), cell.to_json());
        }
        Value::Object(obj)
    }

    pub fn records(&self, row_indices: &[usize]) -> Vec<Value> {
        row_indices.iter().map(|&r| self.record(r)).collect()
    }
}

/// One uploaded spreadsheet: immutable after insertion into the store.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub id: String,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    /// Ordered: the first sheet is the default for queries.
    pub sheets: Vec<(String, Sheet)>,
}

impl Dataset {
    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn sheet(&self, name: &str) -> Result<&Sheet, AgentError> {
        self.sheets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
            .ok_or_else(|| AgentError::SheetNotFound {
                sheet_name: name.to_string(),
                available: self.sheet_names(),
            })
    }

    /// The named sheet, or the first one when no name is given.
    pub fn resolve_sheet(&self, name: Option<&str>) -> Result<(&str, &Sheet), AgentError> {
        match name {
            Some(n) => Ok((
                self.sheets
                    .iter()
                    .find(|(sheet_name, _)| sheet_name == n)
                    .map(|(sheet_name, _)| sheet_name.as_str())
                    .ok_or_else(|| AgentError::SheetNotFound {
                        sheet_name: n.to_string(),
                        available: self.sheet_names(),
                    })?,
                self.sheet(n)?,
            )),
            None => self
                .sheets
                .first()
                .map(|(sheet_name, sheet)| (sheet_name.as_str(), sheet))
                .ok_or_else(|| AgentError::SheetNotFound {
                    sheet_name: "<default>".to_string(),
                    available: vec![],
                }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub dataset_id: String,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub sheets: Vec<String>,
}

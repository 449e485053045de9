use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AgentError;
use crate::filter::matching_rows;
use crate::ingest::parse_datetime;
use crate::table::{CellValue, ColumnType, Sheet};

const QUERY_PREVIEW_ROWS: usize = 10;
const SAMPLE_ROWS_CAP: usize = 50;
const TOP_VALUES: usize = 10;

/// The closed set of tools exposed to the reasoner. Dispatch is by this
/// enum only; there is no open plugin surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    QueryData,
    AggregateData,
    GroupByAggregate,
    Correlation,
    TrendAnalysis,
    ListColumns,
    DescribeColumn,
    SampleRows,
}

impl ToolName {
    pub const ALL: [ToolName; 8] = [
        ToolName::QueryData,
        ToolName::AggregateData,
        ToolName::GroupByAggregate,
        ToolName::Correlation,
        ToolName::TrendAnalysis,
        ToolName::ListColumns,
        ToolName::DescribeColumn,
        ToolName::SampleRows,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::QueryData => "query_data",
            ToolName::AggregateData => "aggregate_data",
            ToolName::GroupByAggregate => "group_by_aggregate",
            ToolName::Correlation => "correlation",
            ToolName::TrendAnalysis => "trend_analysis",
            ToolName::ListColumns => "list_columns",
            ToolName::DescribeColumn => "describe_column",
            ToolName::SampleRows => "sample_rows",
        }
    }

    pub fn from_name(name: &str) -> Option<ToolName> {
        let normalized = name.trim().to_ascii_lowercase();
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolName::QueryData => "Filter rows with a condition and report how many match, with a preview",
            ToolName::AggregateData => "Aggregate one column: sum, mean, count, min, max or std, with an optional filter",
            ToolName::GroupByAggregate => "Group rows by one or more columns and aggregate another column per group",
            ToolName::Correlation => "Pearson correlation between two numeric columns",
            ToolName::TrendAnalysis => "Aggregate a value column over time buckets (year, month or day)",
            ToolName::ListColumns => "List the sheet's columns and their types",
            ToolName::DescribeColumn => "Type-appropriate summary statistics for one column",
            ToolName::SampleRows => "Up to n sample rows, optionally filtered",
        }
    }

    /// Human-readable input schema, quoted back at the reasoner when its
    /// action input does not parse.
    pub fn input_schema(&self) -> &'static str {
        match self {
            ToolName::QueryData => r#"{"condition": "<filter expression>"}"#,
            ToolName::AggregateData => {
                r#"{"column": "<name>", "op": "sum|mean|count|min|max|std", "filter": "<optional filter expression>"}"#
            }
            ToolName::GroupByAggregate => {
                r#"{"group_columns": ["<name>", ...], "agg_column": "<name>", "op": "sum|mean|count|min|max|std", "filter": "<optional filter expression>"}"#
            }
            ToolName::Correlation => {
                r#"{"col_a": "<name>", "col_b": "<name>", "filter": "<optional filter expression>"}"#
            }
            ToolName::TrendAnalysis => {
                r#"{"time_column": "<name>", "value_column": "<name>", "granularity": "year|month|day"}"#
            }
            ToolName::ListColumns => r#"{}"#,
            ToolName::DescribeColumn => r#"{"column": "<name>"}"#,
            ToolName::SampleRows => {
                r#"{"n": <optional row count>, "filter": "<optional filter expression>"}"#
            }
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Sum,
    Mean,
    Count,
    Min,
    Max,
    Std,
}

impl AggregateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOp::Sum => "sum",
            AggregateOp::Mean => "mean",
            AggregateOp::Count => "count",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Std => "std",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Year,
    Month,
    Day,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Year => "year",
            Granularity::Month => "month",
            Granularity::Day => "day",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryDataInput {
    pub condition: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateDataInput {
    pub column: String,
    pub op: AggregateOp,
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupByAggregateInput {
    pub group_columns: Vec<String>,
    pub agg_column: String,
    pub op: AggregateOp,
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorrelationInput {
    pub col_a: String,
    pub col_b: String,
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrendAnalysisInput {
    pub time_column: String,
    pub value_column: String,
    pub granularity: Granularity,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DescribeColumnInput {
    pub column: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SampleRowsInput {
    #[serde(default)]
    pub n: Option<usize>,
    #[serde(default)]
    pub filter: Option<String>,
}

/// A validated tool invocation.
#[derive(Debug, Clone)]
pub enum ToolInvocation {
    QueryData(QueryDataInput),
    AggregateData(AggregateDataInput),
    GroupByAggregate(GroupByAggregateInput),
    Correlation(CorrelationInput),
    TrendAnalysis(TrendAnalysisInput),
    ListColumns,
    DescribeColumn(DescribeColumnInput),
    SampleRows(SampleRowsInput),
}

/// Validate a raw action input against a tool's schema.
pub fn parse_tool_input(tool: ToolName, input: &Value) -> Result<ToolInvocation, AgentError> {
    let schema_error = |e: serde_json::Error| AgentError::ParseError {
        message: format!(
            "invalid input for {}: {}. Expected schema: {}",
            tool,
            e,
            tool.input_schema()
        ),
    };
    match tool {
        ToolName::QueryData => serde_json::from_value(input.clone())
            .map(ToolInvocation::QueryData)
            .map_err(schema_error),
        ToolName::AggregateData => serde_json::from_value(input.clone())
            .map(ToolInvocation::AggregateData)
            .map_err(schema_error),
        ToolName::GroupByAggregate => serde_json::from_value(input.clone())
            .map(ToolInvocation::GroupByAggregate)
            .map_err(schema_error),
        ToolName::Correlation => serde_json::from_value(input.clone())
            .map(ToolInvocation::Correlation)
            .map_err(schema_error),
        ToolName::TrendAnalysis => serde_json::from_value(input.clone())
            .map(ToolInvocation::TrendAnalysis)
            .map_err(schema_error),
        ToolName::ListColumns => match input {
            Value::Object(map) if map.is_empty() => Ok(ToolInvocation::ListColumns),
            Value::Null => Ok(ToolInvocation::ListColumns),
            _ => Err(AgentError::ParseError {
                message: format!(
                    "list_columns takes no arguments. Expected schema: {}",
                    ToolName::ListColumns.input_schema()
                ),
            }),
        },
        ToolName::DescribeColumn => serde_json::from_value(input.clone())
            .map(ToolInvocation::DescribeColumn)
            .map_err(schema_error),
        ToolName::SampleRows => serde_json::from_value(input.clone())
            .map(ToolInvocation::SampleRows)
            .map_err(schema_error),
    }
}

/// The deterministic computation layer over one immutable sheet. Every
/// operation is read-only, idempotent and full precision.
pub struct ToolSet {
    sheet: Arc<Sheet>,
}

impl ToolSet {
    pub fn new(sheet: Arc<Sheet>) -> Self {
        Self { sheet }
    }

    /// Registry lookup plus execution. The name is re-validated here even
    /// though the parser already checked it.
    pub fn dispatch(&self, name: &str, input: &Value) -> Result<Value, AgentError> {
        let tool = ToolName::from_name(name).ok_or_else(|| AgentError::UnknownTool {
            name: name.to_string(),
        })?;
        let invocation = parse_tool_input(tool, input)?;
        self.execute(invocation)
    }

    pub fn execute(&self, invocation: ToolInvocation) -> Result<Value, AgentError> {
        match invocation {
            ToolInvocation::QueryData(input) => self.query_data(&input),
            ToolInvocation::AggregateData(input) => self.aggregate_data(&input),
            ToolInvocation::GroupByAggregate(input) => self.group_by_aggregate(&input),
            ToolInvocation::Correlation(input) => self.correlation(&input),
            ToolInvocation::TrendAnalysis(input) => self.trend_analysis(&input),
            ToolInvocation::ListColumns => self.list_columns(),
            ToolInvocation::DescribeColumn(input) => self.describe_column(&input),
            ToolInvocation::SampleRows(input) => self.sample_rows(&input),
        }
    }

    fn query_data(&self, input: &QueryDataInput) -> Result<Value, AgentError> {
        let rows = matching_rows(&self.sheet, Some(&input.condition))?;
        let total = self.sheet.row_count();
        let preview: Vec<usize> = rows.iter().copied().take(QUERY_PREVIEW_ROWS).collect();
        Ok(json!({
            "filter_condition": input.condition,
            "matched_rows": rows.len(),
            "total_rows": total,
            "percentage": if total > 0 { rows.len() as f64 / total as f64 * 100.0 } else { 0.0 },
            "preview": self.sheet.records(&preview),
        }))
    }

    fn aggregate_data(&self, input: &AggregateDataInput) -> Result<Value, AgentError> {
        let rows = matching_rows(&self.sheet, input.filter.as_deref())?;
        let result = self.aggregate_over(&input.column, input.op, &rows)?;
        Ok(json!({
            "column": input.column,
            "operation": input.op.as_str(),
            "result": result,
            "rows_analyzed": rows.len(),
            "filter_applied": input.filter.clone().unwrap_or_else(|| "None".to_string()),
        }))
    }

    /// One aggregate over the given rows. `count` counts non-null values
    /// of any type; the numeric ops require a numeric column.
    fn aggregate_over(
        &self,
        column: &str,
        op: AggregateOp,
        rows: &[usize],
    ) -> Result<f64, AgentError> {
        let idx = self.sheet.column_index(column)?;
        let column_type = self.sheet.columns[idx].column_type;

        if op == AggregateOp::Count {
            let count = self
                .sheet
                .column_values(idx, rows)
                .filter(|v| !v.is_null())
                .count();
            return Ok(count as f64);
        }

        if column_type != ColumnType::Numeric {
            return Err(AgentError::TypeMismatch {
                message: format!(
                    "operation '{}' requires a numeric column, but '{}' is {}",
                    op.as_str(),
                    column,
                    column_type
                ),
            });
        }

        let values: Vec<f64> = self
            .sheet
            .column_values(idx, rows)
            .filter_map(|v| v.as_number())
            .collect();

        match op {
            AggregateOp::Sum => Ok(values.iter().sum()),
            AggregateOp::Count => unreachable!(),
            AggregateOp::Mean => {
                if values.is_empty() {
                    Err(no_data(column, op))
                } else {
                    Ok(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            AggregateOp::Min => values
                .iter()
                .cloned()
                .reduce(f64::min)
                .ok_or_else(|| no_data(column, op)),
            AggregateOp::Max => values
                .iter()
                .cloned()
                .reduce(f64::max)
                .ok_or_else(|| no_data(column, op)),
            AggregateOp::Std => {
                if values.is_empty() {
                    Err(no_data(column, op))
                } else if values.len() < 2 {
                    Err(AgentError::InsufficientData {
                        message: format!(
                            "std of '{}' requires at least 2 non-null values, found 1",
                            column
                        ),
                    })
                } else {
                    let mean = values.iter().sum::<f64>() / values.len() as f64;
                    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                        / (values.len() - 1) as f64;
                    Ok(variance.sqrt())
                }
            }
        }
    }

    fn group_by_aggregate(&self, input: &GroupByAggregateInput) -> Result<Value, AgentError> {
        if input.group_columns.is_empty() {
            return Err(AgentError::InvalidFilter {
                message: "group_columns must name at least one column".to_string(),
            });
        }
        let group_indices: Vec<usize> = input
            .group_columns
            .iter()
            .map(|c| self.sheet.column_index(c))
            .collect::<Result<_, _>>()?;
        // Resolve the aggregation column up front so unknown names fail
        // before any grouping happens.
        self.sheet.column_index(&input.agg_column)?;

        let rows = matching_rows(&self.sheet, input.filter.as_deref())?;

        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for &row in &rows {
            let key = group_indices
                .iter()
                .map(|&idx| self.sheet.rows[row][idx].render())
                .collect::<Vec<_>>()
                .join(", ");
            groups.entry(key).or_default().push(row);
        }

        let mut results: Vec<(String, f64)> = Vec::with_capacity(groups.len());
        for (key, group_rows) in groups {
            match self.aggregate_over(&input.agg_column, input.op, &group_rows) {
                Ok(value) => results.push((key, value)),
                // Groups with no aggregable data are skipped, not nulled.
                Err(AgentError::NoData { .. }) | Err(AgentError::InsufficientData { .. }) => {}
                Err(other) => return Err(other),
            }
        }

        // Deterministic output: value descending, then key ascending.
        results.sort_by(|(key_a, val_a), (key_b, val_b)| {
            val_b
                .partial_cmp(val_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| key_a.cmp(key_b))
        });

        Ok(json!({
            "group_by": input.group_columns,
            "aggregated_column": input.agg_column,
            "operation": input.op.as_str(),
            "num_groups": results.len(),
            "results": results
                .iter()
                .map(|(group, value)| json!({"group": group, "value": value}))
                .collect::<Vec<_>>(),
        }))
    }

    fn correlation(&self, input: &CorrelationInput) -> Result<Value, AgentError> {
        let idx_a = self.sheet.column_index(&input.col_a)?;
        let idx_b = self.sheet.column_index(&input.col_b)?;
        for (name, idx) in [(&input.col_a, idx_a), (&input.col_b, idx_b)] {
            if self.sheet.columns[idx].column_type != ColumnType::Numeric {
                return Err(AgentError::TypeMismatch {
                    message: format!(
                        "correlation requires numeric columns, but '{}' is {}",
                        name, self.sheet.columns[idx].column_type
                    ),
                });
            }
        }

        let rows = matching_rows(&self.sheet, input.filter.as_deref())?;
        let pairs: Vec<(f64, f64)> = rows
            .iter()
            .filter_map(|&row| {
                let a = self.sheet.rows[row][idx_a].as_number()?;
                let b = self.sheet.rows[row][idx_b].as_number()?;
                Some((a, b))
            })
            .collect();

        if pairs.len() < 2 {
            return Err(AgentError::InsufficientData {
                message: format!(
                    "correlation requires at least 2 overlapping non-null rows, found {}",
                    pairs.len()
                ),
            });
        }

        let n = pairs.len() as f64;
        let mean_a = pairs.iter().map(|(a, _)| a).sum::<f64>() / n;
        let mean_b = pairs.iter().map(|(_, b)| b).sum::<f64>() / n;
        let mut cov = 0.0;
        let mut var_a = 0.0;
        let mut var_b = 0.0;
        for (a, b) in &pairs {
            cov += (a - mean_a) * (b - mean_b);
            var_a += (a - mean_a).powi(2);
            var_b += (b - mean_b).powi(2);
        }
        if var_a == 0.0 || var_b == 0.0 {
            return Err(AgentError::InsufficientData {
                message: "correlation is undefined for a zero-variance column".to_string(),
            });
        }

        let mut r = cov / (var_a.sqrt() * var_b.sqrt());
        // Snap rounding noise at the boundary and clamp into [-1, 1].
        if (r.abs() - 1.0).abs() < 1e-12 {
            r = r.signum();
        }
        r = r.clamp(-1.0, 1.0);

        let strength = if r.abs() < 0.3 {
            "weak"
        } else if r.abs() < 0.7 {
            "moderate"
        } else {
            "strong"
        };
        let direction = if r >= 0.0 { "positive" } else { "negative" };

        Ok(json!({
            "col_a": input.col_a,
            "col_b": input.col_b,
            "correlation_coefficient": r,
            "interpretation": format!("{} {} correlation", strength, direction),
            "rows_analyzed": pairs.len(),
        }))
    }

    fn trend_analysis(&self, input: &TrendAnalysisInput) -> Result<Value, AgentError> {
        let time_idx = self.sheet.column_index(&input.time_column)?;
        let value_idx = self.sheet.column_index(&input.value_column)?;

        if self.sheet.columns[value_idx].column_type != ColumnType::Numeric {
            return Err(AgentError::TypeMismatch {
                message: format!(
                    "value column '{}' must be numeric, but is {}",
                    input.value_column, self.sheet.columns[value_idx].column_type
                ),
            });
        }

        let time_type = self.sheet.columns[time_idx].column_type;
        if !matches!(time_type, ColumnType::DateTime | ColumnType::Text) {
            return Err(AgentError::TypeMismatch {
                message: format!(
                    "time column '{}' must be datetime or coercible text, but is {}",
                    input.time_column, time_type
                ),
            });
        }

        let mut buckets: HashMap<String, f64> = HashMap::new();
        for row in &self.sheet.rows {
            let timestamp = match &row[time_idx] {
                CellValue::DateTime(dt) => *dt,
                CellValue::Text(raw) => parse_datetime(raw).ok_or_else(|| {
                    AgentError::TypeMismatch {
                        message: format!(
                            "time column '{}' contains a value not coercible to a date: '{}'",
                            input.time_column, raw
                        ),
                    }
                })?,
                CellValue::Null => continue,
                other => {
                    return Err(AgentError::TypeMismatch {
                        message: format!(
                            "time column '{}' contains a non-temporal value: {}",
                            input.time_column,
                            other.render()
                        ),
                    })
                }
            };
            let Some(value) = row[value_idx].as_number() else {
                continue;
            };
            let period = match input.granularity {
                Granularity::Year => timestamp.format("%Y").to_string(),
                Granularity::Month => timestamp.format("%Y-%m").to_string(),
                Granularity::Day => timestamp.format("%Y-%m-%d").to_string(),
            };
            *buckets.entry(period).or_insert(0.0) += value;
        }

        if buckets.is_empty() {
            return Err(AgentError::NoData {
                message: format!(
                    "no rows with both '{}' and '{}' populated",
                    input.time_column, input.value_column
                ),
            });
        }

        // Period keys are zero-padded, so lexicographic order is
        // chronological order.
        let mut periods: Vec<(String, f64)> = buckets.into_iter().collect();
        periods.sort_by(|(a, _), (b, _)| a.cmp(b));

        Ok(json!({
            "time_column": input.time_column,
            "value_column": input.value_column,
            "granularity": input.granularity.as_str(),
            "periods": periods
                .iter()
                .map(|(period, value)| json!({"period": period, "value": value}))
                .collect::<Vec<_>>(),
        }))
    }

    fn list_columns(&self) -> Result<Value, AgentError> {
        Ok(json!({
            "columns": self
                .sheet
                .columns
                .iter()
                .map(|c| json!({"name": c.name, "type": c.column_type.as_str()}))
                .collect::<Vec<_>>(),
            "row_count": self.sheet.row_count(),
        }))
    }

    fn describe_column(&self, input: &DescribeColumnInput) -> Result<Value, AgentError> {
        let idx = self.sheet.column_index(&input.column)?;
        let column = &self.sheet.columns[idx];
        let all_rows: Vec<usize> = (0..self.sheet.row_count()).collect();
        let non_null: Vec<&CellValue> = self
            .sheet
            .column_values(idx, &all_rows)
            .filter(|v| !v.is_null())
            .collect();

        if non_null.is_empty() {
            return Err(AgentError::NoData {
                message: format!("column '{}' has no non-null values", input.column),
            });
        }

        match column.column_type {
            ColumnType::Numeric => {
                let values: Vec<f64> = non_null.iter().filter_map(|v| v.as_number()).collect();
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let std = if values.len() < 2 {
                    0.0
                } else {
                    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                        / (values.len() - 1) as f64)
                        .sqrt()
                };
                Ok(json!({
                    "column": input.column,
                    "type": column.column_type.as_str(),
                    "count": values.len(),
                    "min": values.iter().cloned().fold(f64::INFINITY, f64::min),
                    "max": values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                    "mean": mean,
                    "std": std,
                }))
            }
            ColumnType::DateTime => {
                let stamps: Vec<_> = non_null.iter().filter_map(|v| v.as_datetime()).collect();
                Ok(json!({
                    "column": input.column,
                    "type": column.column_type.as_str(),
                    "count": stamps.len(),
                    "min": stamps.iter().min().map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string()),
                    "max": stamps.iter().max().map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string()),
                }))
            }
            ColumnType::Text | ColumnType::Boolean => {
                let mut counts: HashMap<String, usize> = HashMap::new();
                for value in &non_null {
                    *counts.entry(value.render()).or_insert(0) += 1;
                }
                let unique = counts.len();
                let mut top: Vec<(String, usize)> = counts.into_iter().collect();
                top.sort_by(|(val_a, count_a), (val_b, count_b)| {
                    count_b.cmp(count_a).then_with(|| val_a.cmp(val_b))
                });
                top.truncate(TOP_VALUES);
                Ok(json!({
                    "column": input.column,
                    "type": column.column_type.as_str(),
                    "count": non_null.len(),
                    "unique_count": unique,
                    "top_values": top
                        .iter()
                        .map(|(value, count)| json!({"value": value, "count": count}))
                        .collect::<Vec<_>>(),
                }))
            }
        }
    }

    fn sample_rows(&self, input: &SampleRowsInput) -> Result<Value, AgentError> {
        let rows = matching_rows(&self.sheet, input.filter.as_deref())?;
        let requested = input.n.unwrap_or(5);
        let taken: Vec<usize> = rows
            .iter()
            .copied()
            .take(requested.min(SAMPLE_ROWS_CAP))
            .collect();
        Ok(json!({
            "sample_count": taken.len(),
            "total_rows": rows.len(),
            "columns": self.sheet.column_names(),
            "sample_data": self.sheet.records(&taken),
        }))
    }
}

fn no_data(column: &str, op: AggregateOp) -> AgentError {
    AgentError::NoData {
        message: format!(
            "no non-null values in column '{}' for operation '{}'",
            column,
            op.as_str()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{CsvParser, SpreadsheetParser};

    fn tool_set(csv: &[u8]) -> ToolSet {
        let sheet = CsvParser.parse("data.csv", csv).unwrap().remove(0).1;
        ToolSet::new(Arc::new(sheet))
    }

    fn sales() -> ToolSet {
        tool_set(b"region,sales\nNorth,100\nSouth,200\nNorth,50\n")
    }

    #[test]
    fn aggregate_sum_matches_arithmetic_sum() {
        let result = sales()
            .dispatch("aggregate_data", &json!({"column": "sales", "op": "sum"}))
            .unwrap();
        assert_eq!(result["result"], json!(350.0));
        assert_eq!(result["rows_analyzed"], json!(3));
    }

    #[test]
    fn aggregate_with_filter_scopes_the_rows() {
        let result = sales()
            .dispatch(
                "aggregate_data",
                &json!({"column": "sales", "op": "sum", "filter": "region == 'North'"}),
            )
            .unwrap();
        assert_eq!(result["result"], json!(150.0));
    }

    #[test]
    fn aggregate_on_text_column_is_type_mismatch() {
        let err = sales()
            .dispatch("aggregate_data", &json!({"column": "region", "op": "mean"}))
            .unwrap_err();
        assert!(matches!(err, AgentError::TypeMismatch { .. }));
    }

    #[test]
    fn empty_filtered_set_count_is_zero_sum_is_zero_mean_is_no_data() {
        let tools = sales();
        let count = tools
            .dispatch(
                "aggregate_data",
                &json!({"column": "sales", "op": "count", "filter": "region == 'West'"}),
            )
            .unwrap();
        assert_eq!(count["result"], json!(0.0));

        let sum = tools
            .dispatch(
                "aggregate_data",
                &json!({"column": "sales", "op": "sum", "filter": "region == 'West'"}),
            )
            .unwrap();
        assert_eq!(sum["result"], json!(0.0));

        let mean = tools.dispatch(
            "aggregate_data",
            &json!({"column": "sales", "op": "mean", "filter": "region == 'West'"}),
        );
        assert!(matches!(mean, Err(AgentError::NoData { .. })));
    }

    #[test]
    fn group_by_sorts_value_descending_then_key_ascending() {
        let result = sales()
            .dispatch(
                "group_by_aggregate",
                &json!({"group_columns": ["region"], "agg_column": "sales", "op": "sum"}),
            )
            .unwrap();
        let groups = result["results"].as_array().unwrap();
        assert_eq!(groups[0]["group"], json!("South"));
        assert_eq!(groups[0]["value"], json!(200.0));
        assert_eq!(groups[1]["group"], json!("North"));
        assert_eq!(groups[1]["value"], json!(150.0));
    }

    #[test]
    fn group_by_ties_break_by_ascending_key() {
        let tools = tool_set(b"region,sales\nB,10\nA,10\nC,5\n");
        let result = tools
            .dispatch(
                "group_by_aggregate",
                &json!({"group_columns": ["region"], "agg_column": "sales", "op": "sum"}),
            )
            .unwrap();
        let groups = result["results"].as_array().unwrap();
        assert_eq!(groups[0]["group"], json!("A"));
        assert_eq!(groups[1]["group"], json!("B"));
        assert_eq!(groups[2]["group"], json!("C"));
    }

    #[test]
    fn group_by_is_deterministic_across_runs() {
        let input = json!({"group_columns": ["region"], "agg_column": "sales", "op": "sum"});
        let first = sales().dispatch("group_by_aggregate", &input).unwrap();
        for _ in 0..5 {
            assert_eq!(sales().dispatch("group_by_aggregate", &input).unwrap(), first);
        }
    }

    #[test]
    fn correlation_of_column_with_itself_is_one() {
        let tools = tool_set(b"x\n1\n2\n3\n4\n");
        let result = tools
            .dispatch("correlation", &json!({"col_a": "x", "col_b": "x"}))
            .unwrap();
        assert_eq!(result["correlation_coefficient"], json!(1.0));
    }

    #[test]
    fn correlation_detects_perfect_negative_relationship() {
        let tools = tool_set(b"x,y\n1,4\n2,3\n3,2\n4,1\n");
        let result = tools
            .dispatch("correlation", &json!({"col_a": "x", "col_b": "y"}))
            .unwrap();
        assert_eq!(result["correlation_coefficient"], json!(-1.0));
        assert_eq!(result["interpretation"], json!("strong negative correlation"));
    }

    #[test]
    fn correlation_with_one_row_is_insufficient() {
        let tools = tool_set(b"x,y\n1,2\n");
        let err = tools
            .dispatch("correlation", &json!({"col_a": "x", "col_b": "y"}))
            .unwrap_err();
        assert!(matches!(err, AgentError::InsufficientData { .. }));
    }

    #[test]
    fn correlation_skips_rows_with_nulls_on_either_side() {
        let tools = tool_set(b"x,y\n1,1\n2,\n3,3\n,4\n");
        let result = tools
            .dispatch("correlation", &json!({"col_a": "x", "col_b": "y"}))
            .unwrap();
        assert_eq!(result["rows_analyzed"], json!(2));
    }

    #[test]
    fn trend_analysis_orders_periods_chronologically() {
        let tools = tool_set(
            b"date,sales\n2024-03-01,10\n2024-01-15,20\n2024-01-20,5\n2023-12-01,7\n",
        );
        let result = tools
            .dispatch(
                "trend_analysis",
                &json!({"time_column": "date", "value_column": "sales", "granularity": "month"}),
            )
            .unwrap();
        let periods = result["periods"].as_array().unwrap();
        assert_eq!(periods[0]["period"], json!("2023-12"));
        assert_eq!(periods[1]["period"], json!("2024-01"));
        assert_eq!(periods[1]["value"], json!(25.0));
        assert_eq!(periods[2]["period"], json!("2024-03"));
    }

    #[test]
    fn trend_analysis_on_non_temporal_column_is_type_mismatch() {
        let err = sales()
            .dispatch(
                "trend_analysis",
                &json!({"time_column": "sales", "value_column": "sales", "granularity": "year"}),
            )
            .unwrap_err();
        assert!(matches!(err, AgentError::TypeMismatch { .. }));
    }

    #[test]
    fn query_data_reports_match_counts_and_preview() {
        let result = sales()
            .dispatch("query_data", &json!({"condition": "sales > 75"}))
            .unwrap();
        assert_eq!(result["matched_rows"], json!(2));
        assert_eq!(result["total_rows"], json!(3));
        assert_eq!(result["preview"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn list_columns_preserves_order() {
        let result = sales().dispatch("list_columns", &json!({})).unwrap();
        let columns = result["columns"].as_array().unwrap();
        assert_eq!(columns[0]["name"], json!("region"));
        assert_eq!(columns[1]["name"], json!("sales"));
        assert_eq!(columns[1]["type"], json!("numeric"));
    }

    #[test]
    fn describe_numeric_column() {
        let result = sales()
            .dispatch("describe_column", &json!({"column": "sales"}))
            .unwrap();
        assert_eq!(result["count"], json!(3));
        assert_eq!(result["min"], json!(50.0));
        assert_eq!(result["max"], json!(200.0));
    }

    #[test]
    fn describe_categorical_column_ranks_top_values() {
        let result = sales()
            .dispatch("describe_column", &json!({"column": "region"}))
            .unwrap();
        assert_eq!(result["unique_count"], json!(2));
        let top = result["top_values"].as_array().unwrap();
        assert_eq!(top[0]["value"], json!("North"));
        assert_eq!(top[0]["count"], json!(2));
    }

    #[test]
    fn describe_all_null_column_is_no_data() {
        let tools = tool_set(b"a,b\n1,\n2,\n");
        let err = tools
            .dispatch("describe_column", &json!({"column": "b"}))
            .unwrap_err();
        assert!(matches!(err, AgentError::NoData { .. }));
    }

    #[test]
    fn sample_rows_is_hard_capped() {
        let mut csv = String::from("x\n");
        for i in 0..200 {
            csv.push_str(&format!("{}\n", i));
        }
        let tools = tool_set(csv.as_bytes());
        let result = tools
            .dispatch("sample_rows", &json!({"n": 1000}))
            .unwrap();
        assert_eq!(result["sample_count"], json!(SAMPLE_ROWS_CAP));
        assert_eq!(result["total_rows"], json!(200));
    }

    #[test]
    fn dispatch_rejects_unknown_tool() {
        let err = sales().dispatch("drop_table", &json!({})).unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool { .. }));
    }

    #[test]
    fn dispatch_rejects_malformed_input_naming_the_schema() {
        let err = sales()
            .dispatch("aggregate_data", &json!({"column": "sales"}))
            .unwrap_err();
        match err {
            AgentError::ParseError { message } => {
                assert!(message.contains("aggregate_data"));
                assert!(message.contains("op"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn tool_calls_are_idempotent() {
        let tools = sales();
        let input = json!({"column": "sales", "op": "mean"});
        let first = tools.dispatch("aggregate_data", &input).unwrap();
        let second = tools.dispatch("aggregate_data", &input).unwrap();
        assert_eq!(first, second);
    }
}

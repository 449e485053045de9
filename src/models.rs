use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::table::DatasetSummary;

/// Result of an upload: the assigned id plus per-sheet shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub dataset_id: String,
    pub filename: String,
    pub sheets: Vec<String>,
    /// Cleaned column names per sheet.
    pub columns: HashMap<String, Vec<String>>,
    pub rows_count: HashMap<String, usize>,
    pub indexed_columns: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub dataset_id: String,
    pub query: String,
    #[serde(default)]
    pub sheet_name: Option<String>,
}

/// One entry of the execution trace: what the agent thought, what it ran
/// and what came back. Observations are truncated before they land here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step: usize,
    pub thought: String,
    pub action: Option<String>,
    pub action_input: Option<Value>,
    pub observation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub dataset_id: String,
    pub query: String,
    pub answer: String,
    pub success: bool,
    pub iterations: usize,
    /// The retrieved column context that reached the prompt, truncated
    /// like an observation. None when the run went in degraded
    /// (empty-context) mode.
    pub rag_context_used: Option<String>,
    pub error: Option<String>,
    pub execution_steps: Vec<ExecutionStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetDetail {
    pub name: String,
    pub row_count: usize,
    pub columns: Vec<ColumnInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_data: Option<Vec<Value>>,
}

/// Full per-dataset metadata, as returned by the info operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub dataset_id: String,
    pub filename: String,
    pub uploaded_at: chrono::DateTime<chrono::Utc>,
    pub sheets: Vec<SheetDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetListResponse {
    pub datasets: Vec<DatasetSummary>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub dataset_id: String,
    pub deleted: bool,
    pub removed_documents: usize,
}

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::agent::AgentLoop;
use crate::error::AgentError;
use crate::index::{Embedder, MetadataIndex};
use crate::ingest::SpreadsheetParser;
use crate::models::{
    ColumnInfo, DatasetInfo, DatasetListResponse, DeleteResponse, QueryRequest, QueryResponse,
    SheetDetail, UploadResponse,
};
use crate::reasoner::Reasoner;
use crate::settings::Settings;
use crate::store::DatasetStore;
use crate::table::{Dataset, Sheet};
use crate::tools::ToolSet;

const INFO_SAMPLE_ROWS: usize = 5;

/// The service facade: upload, query, inspect, delete. Owns the dataset
/// store, the metadata index and the reasoner, and enforces the
/// per-dataset gates that keep uploads and deletes exclusive against
/// in-flight queries.
pub struct AgentService {
    settings: Settings,
    store: DatasetStore,
    index: MetadataIndex,
    parser: Box<dyn SpreadsheetParser>,
    reasoner: Arc<dyn Reasoner>,
}

impl AgentService {
    pub fn new(
        settings: Settings,
        parser: Box<dyn SpreadsheetParser>,
        reasoner: Arc<dyn Reasoner>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            settings,
            store: DatasetStore::new(),
            index: MetadataIndex::new(embedder),
            parser,
            reasoner,
        }
    }

    /// Parse an upload, register it under a fresh id and index its column
    /// metadata. Queries against the new id cannot start until indexing is
    /// finished.
    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<UploadResponse, AgentError> {
        let dataset_id = DatasetStore::generate_id();
        let _gate = self.store.lock_exclusive(&dataset_id).await;

        let sheets = self.parser.parse(filename, bytes)?;
        let mut columns = HashMap::new();
        let mut rows_count = HashMap::new();
        for (name, sheet) in &sheets {
            columns.insert(name.clone(), sheet.column_names());
            rows_count.insert(name.clone(), sheet.row_count());
        }
        let sheet_names: Vec<String> = sheets.iter().map(|(name, _)| name.clone()).collect();

        let dataset = Dataset {
            id: dataset_id.clone(),
            filename: filename.to_string(),
            uploaded_at: Utc::now(),
            sheets,
        };

        let mut indexed_columns = 0;
        for (sheet_name, sheet) in &dataset.sheets {
            match self.index.index(sheet, &dataset_id, sheet_name).await {
                Ok(count) => indexed_columns += count,
                // A dead embedder degrades retrieval later; it does not
                // block the upload itself.
                Err(AgentError::RetrievalUnavailable { message }) => {
                    warn!(
                        "Indexing skipped for dataset {} sheet '{}': {}",
                        dataset_id, sheet_name, message
                    );
                }
                Err(other) => return Err(other),
            }
        }

        self.store.insert(dataset).await;
        info!(
            "Upload complete: '{}' as {} ({} indexed columns)",
            filename, dataset_id, indexed_columns
        );

        Ok(UploadResponse {
            dataset_id,
            filename: filename.to_string(),
            sheets: sheet_names,
            columns,
            rows_count,
            indexed_columns,
        })
    }

    /// Answer one natural-language question against a dataset. Holds the
    /// dataset's gate shared for the whole run, so a concurrent delete
    /// waits rather than pulling the data out from under the loop.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse, AgentError> {
        let _gate = self.store.lock_shared(&request.dataset_id).await;
        let dataset = self.store.get(&request.dataset_id).await?;
        let (sheet_name, sheet) = dataset.resolve_sheet(request.sheet_name.as_deref())?;

        let tools = ToolSet::new(Arc::new(sheet.clone()));
        let agent = AgentLoop::new(
            self.reasoner.clone(),
            tools,
            &self.index,
            &request.dataset_id,
            sheet_name,
            self.settings.retrieval_k,
            self.settings.max_iterations,
        );
        let outcome = agent.run(&request.query).await?;

        info!(
            "Query on {} finished: success={} iterations={}",
            request.dataset_id, outcome.success, outcome.iterations
        );
        Ok(QueryResponse {
            dataset_id: request.dataset_id,
            query: request.query,
            answer: outcome.answer,
            success: outcome.success,
            iterations: outcome.iterations,
            rag_context_used: outcome.rag_context_used,
            error: outcome.error,
            execution_steps: outcome.steps,
        })
    }

    pub async fn dataset_info(
        &self,
        dataset_id: &str,
        include_sample: bool,
    ) -> Result<DatasetInfo, AgentError> {
        let dataset = self.store.get(dataset_id).await?;
        Ok(DatasetInfo {
            dataset_id: dataset.id.clone(),
            filename: dataset.filename.clone(),
            uploaded_at: dataset.uploaded_at,
            sheets: dataset
                .sheets
                .iter()
                .map(|(name, sheet)| sheet_detail(name, sheet, include_sample))
                .collect(),
        })
    }

    pub async fn list_datasets(&self) -> DatasetListResponse {
        let datasets = self.store.list().await;
        let count = datasets.len();
        DatasetListResponse { datasets, count }
    }

    /// Delete a dataset and evict its index documents. Waits for in-flight
    /// queries to drain before removing anything.
    pub async fn delete_dataset(&self, dataset_id: &str) -> Result<DeleteResponse, AgentError> {
        let _gate = self.store.lock_exclusive(dataset_id).await;
        if !self.store.delete(dataset_id).await {
            return Err(AgentError::DatasetNotFound {
                dataset_id: dataset_id.to_string(),
            });
        }
        let removed_documents = self.index.remove(dataset_id).await;
        Ok(DeleteResponse {
            dataset_id: dataset_id.to_string(),
            deleted: true,
            removed_documents,
        })
    }
}

fn sheet_detail(name: &str, sheet: &Sheet, include_sample: bool) -> SheetDetail {
    let sample_data = include_sample.then(|| {
        let rows: Vec<usize> = (0..sheet.row_count().min(INFO_SAMPLE_ROWS)).collect();
        sheet.records(&rows)
    });
    SheetDetail {
        name: name.to_string(),
        row_count: sheet.row_count(),
        columns: sheet
            .columns
            .iter()
            .map(|c| ColumnInfo {
                name: c.name.clone(),
                column_type: c.column_type.as_str().to_string(),
                description: c.description.clone(),
            })
            .collect(),
        sample_data,
    }
}

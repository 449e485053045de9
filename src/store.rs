use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::error::AgentError;
use crate::table::{Dataset, DatasetSummary};

/// Shared guard for a per-dataset critical section. Queries hold this
/// shared; upload and delete hold it exclusively, so a query can never
/// observe a half-indexed or half-deleted dataset.
pub type SharedGate = OwnedRwLockReadGuard<()>;
pub type ExclusiveGate = OwnedRwLockWriteGuard<()>;

/// In-memory dataset store. Datasets are immutable once inserted; the only
/// mutations are wholesale insertion and deletion.
pub struct DatasetStore {
    datasets: RwLock<HashMap<String, Arc<Dataset>>>,
    gates: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self {
            datasets: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn generate_id() -> String {
        format!("ds_{}", Uuid::new_v4().simple())
    }

    /// Insert a dataset under its pre-assigned id.
    pub async fn insert(&self, dataset: Dataset) -> String {
        let id = dataset.id.clone();
        let sheet_count = dataset.sheets.len();
        self.datasets
            .write()
            .await
            .insert(id.clone(), Arc::new(dataset));
        info!("Dataset {} added to store with {} sheets", id, sheet_count);
        id
    }

    pub async fn get(&self, dataset_id: &str) -> Result<Arc<Dataset>, AgentError> {
        self.datasets
            .read()
            .await
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| AgentError::DatasetNotFound {
                dataset_id: dataset_id.to_string(),
            })
    }

    /// Remove a dataset. Returns false when the id was unknown.
    pub async fn delete(&self, dataset_id: &str) -> bool {
        let removed = self.datasets.write().await.remove(dataset_id).is_some();
        if removed {
            self.gates.lock().await.remove(dataset_id);
            info!("Dataset {} deleted from store", dataset_id);
        }
        removed
    }

    pub async fn list(&self) -> Vec<DatasetSummary> {
        let mut summaries: Vec<DatasetSummary> = self
            .datasets
            .read()
            .await
            .values()
            .map(|ds| DatasetSummary {
                dataset_id: ds.id.clone(),
                filename: ds.filename.clone(),
                uploaded_at: ds.uploaded_at,
                sheets: ds.sheet_names(),
            })
            .collect();
        summaries.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        summaries
    }

    async fn gate(&self, dataset_id: &str) -> Arc<RwLock<()>> {
        self.gates
            .lock()
            .await
            .entry(dataset_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Shared access to a dataset id for the duration of a query.
    pub async fn lock_shared(&self, dataset_id: &str) -> SharedGate {
        self.gate(dataset_id).await.read_owned().await
    }

    /// Exclusive access to a dataset id for upload or deletion.
    pub async fn lock_exclusive(&self, dataset_id: &str) -> ExclusiveGate {
        self.gate(dataset_id).await.write_owned().await
    }
}

impl Default for DatasetStore {
    fn default() -> Self {
        Self::new()
    }
}

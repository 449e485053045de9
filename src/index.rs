use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::AgentError;
use crate::metadata::{build_column_documents, MetadataDocument};
use crate::table::Sheet;

/// Consumed capability: text to vector. The similarity model itself is
/// external; retrieval only assumes vectors of a consistent dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError>;
}

const EMBEDDING_DIM: usize = 256;

/// Deterministic local embedder: a hashed bag-of-words projected into a
/// fixed-dimension l2-normalized vector. Stands in for the external
/// similarity model without a network dependency.
pub struct HashingEmbedder;

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError> {
        let mut vector = vec![0.0f32; EMBEDDING_DIM];
        for token in tokenize(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let slot = (hasher.finish() % EMBEDDING_DIM as u64) as usize;
            vector[slot] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

struct IndexedDocument {
    document: MetadataDocument,
    embedding: Vec<f32>,
}

/// Semantic index over per-column metadata documents, partitioned by
/// dataset id. Documents are rebuilt wholesale, never edited in place.
pub struct MetadataIndex {
    embedder: Arc<dyn Embedder>,
    documents: RwLock<HashMap<String, Vec<IndexedDocument>>>,
}

impl MetadataIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            documents: RwLock::new(HashMap::new()),
        }
    }

    /// Index every column of a sheet. Re-indexing the same
    /// (dataset, sheet) replaces the prior documents for that sheet.
    pub async fn index(
        &self,
        sheet: &Sheet,
        dataset_id: &str,
        sheet_name: &str,
    ) -> Result<usize, AgentError> {
        let docs = build_column_documents(sheet, dataset_id, sheet_name);
        let mut indexed = Vec::with_capacity(docs.len());
        for document in docs {
            let embedding = self.embedder.embed(&document.text).await.map_err(|e| {
                AgentError::RetrievalUnavailable {
                    message: e.to_string(),
                }
            })?;
            indexed.push(IndexedDocument {
                document,
                embedding,
            });
        }

        let count = indexed.len();
        let mut documents = self.documents.write().await;
        let entry = documents.entry(dataset_id.to_string()).or_default();
        entry.retain(|d| d.document.sheet_name != sheet_name);
        entry.extend(indexed);
        info!(
            "Indexed {} metadata documents for dataset {} sheet '{}'",
            count, dataset_id, sheet_name
        );
        Ok(count)
    }

    /// The k most similar column documents for a query, restricted to one
    /// dataset and sheet. Descending similarity, ties broken by column
    /// order.
    pub async fn retrieve(
        &self,
        dataset_id: &str,
        sheet_name: &str,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<MetadataDocument>, AgentError> {
        let query_embedding =
            self.embedder
                .embed(query_text)
                .await
                .map_err(|e| AgentError::RetrievalUnavailable {
                    message: e.to_string(),
                })?;

        let documents = self.documents.read().await;
        let mut scored: Vec<(f32, &IndexedDocument)> = documents
            .get(dataset_id)
            .map(|docs| {
                docs.iter()
                    .filter(|d| d.document.sheet_name == sheet_name)
                    .map(|d| (cosine_similarity(&query_embedding, &d.embedding), d))
                    .collect()
            })
            .unwrap_or_default();

        scored.sort_by(|(sim_a, doc_a), (sim_b, doc_b)| {
            sim_b
                .partial_cmp(sim_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(doc_a.document.column_position.cmp(&doc_b.document.column_position))
        });

        debug!(
            "Retrieved {} of {} documents for dataset {}",
            k.min(scored.len()),
            scored.len(),
            dataset_id
        );
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, d)| d.document.clone())
            .collect())
    }

    /// Evict every document belonging to a dataset. Required on dataset
    /// deletion so a reused id can never see stale context.
    pub async fn remove(&self, dataset_id: &str) -> usize {
        let removed = self
            .documents
            .write()
            .await
            .remove(dataset_id)
            .map(|docs| docs.len())
            .unwrap_or(0);
        if removed > 0 {
            info!(
                "Evicted {} metadata documents for dataset {}",
                removed, dataset_id
            );
        }
        removed
    }

    pub async fn document_count(&self, dataset_id: &str) -> usize {
        self.documents
            .read()
            .await
            .get(dataset_id)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    // Embeddings are normalized by the embedder; guard anyway.
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
pub struct FailingEmbedder;

#[cfg(test)]
#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, AgentError> {
        Err(AgentError::RetrievalUnavailable {
            message: "embedding backend offline".to_string(),
        })
    }
}

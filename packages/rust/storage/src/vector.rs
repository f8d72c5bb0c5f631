//! Vector index boundary and the in-process implementation.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use intelgraph_shared::{EntityLabel, IntelError, Result};

use crate::graph::GraphNode;

/// Metadata stored next to each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPayload {
    pub text: String,
    pub label: EntityLabel,
    /// Normalized key, mirrors the graph node.
    pub key: String,
    #[serde(default)]
    pub source_urls: Vec<String>,
    #[serde(default)]
    pub job_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Same id as the graph node.
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

impl VectorRecord {
    /// Build a record whose payload mirrors the node's current attribution.
    pub fn from_node(node: &GraphNode, vector: Vec<f32>) -> Self {
        Self {
            id: node.id,
            vector,
            payload: VectorPayload {
                text: node.name.clone(),
                label: node.label,
                key: node.key.clone(),
                source_urls: node.sources.clone(),
                job_ids: node.job_ids.clone(),
            },
        }
    }
}

/// A similarity hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: Uuid,
    pub score: f32,
    pub payload: VectorPayload,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Insert or replace the record with `record.id`.
    async fn upsert(&self, record: VectorRecord) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<VectorRecord>>;

    /// Hits with cosine score `>= threshold`, best first, at most `top_k`.
    async fn query(&self, vector: &[f32], top_k: usize, threshold: f32) -> Result<Vec<ScoredPoint>>;

    async fn count(&self) -> Result<u64>;

    async fn ids(&self) -> Result<Vec<Uuid>>;
}

/// Cosine similarity; 0.0 when either side is zero or the widths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Brute-force index held in memory.
#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    dimensions: Option<usize>,
    records: RwLock<HashMap<Uuid, VectorRecord>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject vectors whose width differs from `dimensions`.
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: Some(dimensions),
            records: RwLock::default(),
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, record: VectorRecord) -> Result<()> {
        if let Some(dimensions) = self.dimensions {
            if record.vector.len() != dimensions {
                return Err(IntelError::validation(format!(
                    "vector has {} dimensions, index expects {dimensions}",
                    record.vector.len()
                )));
            }
        }
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<VectorRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned())
    }

    async fn query(&self, vector: &[f32], top_k: usize, threshold: f32) -> Result<Vec<ScoredPoint>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut hits: Vec<ScoredPoint> = records
            .values()
            .map(|r| (r, cosine_similarity(vector, &r.vector)))
            .filter(|(_, score)| *score >= threshold)
            .map(|(r, score)| ScoredPoint {
                id: r.id,
                score,
                payload: r.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.read().unwrap_or_else(PoisonError::into_inner).len() as u64)
    }

    async fn ids(&self) -> Result<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seed: u128, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: Uuid::from_u128(seed),
            vector,
            payload: VectorPayload {
                text: format!("entity {seed}"),
                label: EntityLabel::Generic,
                key: format!("entity {seed}"),
                source_urls: Vec::new(),
                job_ids: Vec::new(),
            },
        }
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn query_orders_and_filters() {
        let index = MemoryVectorIndex::new();
        index.upsert(record(1, vec![1.0, 0.0])).await.unwrap();
        index.upsert(record(2, vec![0.8, 0.6])).await.unwrap();
        index.upsert(record(3, vec![0.0, 1.0])).await.unwrap();

        let hits = index.query(&[1.0, 0.0], 10, 0.5).await.unwrap();
        let ids: Vec<u128> = hits.iter().map(|h| h.id.as_u128()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(hits[0].score >= hits[1].score);

        assert_eq!(index.query(&[1.0, 0.0], 1, 0.0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let index = MemoryVectorIndex::new();
        index.upsert(record(7, vec![1.0, 0.0])).await.unwrap();
        index.upsert(record(7, vec![0.0, 1.0])).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
        let stored = index.get(Uuid::from_u128(7)).await.unwrap().unwrap();
        assert_eq!(stored.vector, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn dimension_mismatch_rejected() {
        let index = MemoryVectorIndex::with_dimensions(3);
        assert!(index.upsert(record(1, vec![1.0, 0.0])).await.is_err());
        assert_eq!(index.count().await.unwrap(), 0);
    }
}

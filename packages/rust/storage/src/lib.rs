//! Knowledge storage: a libSQL entity graph, a vector index, and the
//! [`KnowledgeWriter`] that keeps the two in step.
//!
//! Both stores address an entity by the id derived from its
//! [`DerivedKey`] (normalized text + label), so repeated writes converge.

pub mod graph;
pub mod key;
mod migrations;
pub mod qdrant;
pub mod reconcile;
pub mod vector;
pub mod writer;

use std::sync::Arc;
use std::time::Duration;

use intelgraph_shared::{KnowledgeConfig, Result, VectorBackend, expand_home};

pub use graph::{GraphEdge, GraphNode, GraphStats, GraphStore, LibsqlGraphStore, Subgraph};
pub use key::{DerivedKey, normalize_entity_text};
pub use qdrant::QdrantIndex;
pub use reconcile::{ReconcilePolicy, ReconcileQueue, ReconcileReport, spawn_reconciler};
pub use vector::{
    MemoryVectorIndex, ScoredPoint, VectorIndex, VectorPayload, VectorRecord, cosine_similarity,
};
pub use writer::{KnowledgeWriter, ParityReport, WriteOutcome, WriterMetricsSnapshot};

const QDRANT_TIMEOUT: Duration = Duration::from_secs(30);

/// Open the configured graph and vector stores and wrap them in a writer.
pub async fn open_knowledge(config: &KnowledgeConfig, dimensions: usize) -> Result<KnowledgeWriter> {
    let db_path = expand_home(&config.db_path)?;
    let graph: Arc<dyn GraphStore> = Arc::new(LibsqlGraphStore::open(&db_path).await?);

    let vectors: Arc<dyn VectorIndex> = match config.vector_backend {
        VectorBackend::Memory => Arc::new(MemoryVectorIndex::with_dimensions(dimensions)),
        VectorBackend::Qdrant => {
            let index = QdrantIndex::new(
                &config.qdrant_url,
                &config.collection,
                dimensions,
                QDRANT_TIMEOUT,
            )?;
            index.ensure_collection().await?;
            Arc::new(index)
        }
    };

    tracing::info!(
        db = %db_path.display(),
        vectors = vectors.name(),
        dimensions,
        "knowledge stores open"
    );

    Ok(KnowledgeWriter::new(
        graph,
        vectors,
        ReconcilePolicy::from(&config.reconcile),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use intelgraph_shared::{Entity, EntityLabel};
    use uuid::Uuid;

    #[tokio::test]
    async fn opens_memory_backend() {
        let tmp = std::env::temp_dir().join(format!("ig_knowledge_{}.db", Uuid::now_v7()));
        let config = KnowledgeConfig {
            db_path: tmp.display().to_string(),
            ..KnowledgeConfig::default()
        };
        let writer = open_knowledge(&config, 2).await.unwrap();
        assert_eq!(writer.vectors().name(), "memory");

        let entity = Entity::new("NASA", EntityLabel::Organization).with_embedding(vec![1.0, 0.0]);
        assert!(writer.write(&entity).await.unwrap().is_success());
    }
}

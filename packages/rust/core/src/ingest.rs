//! Page records → entities, relationships and vectors.
//!
//! [`IngestionPipeline`] is the in-process [`ResultSink`]: for every counted
//! page it runs the extraction stage, embeds each entity's own text, writes
//! entities through the [`KnowledgeWriter`], then writes relationships.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use intelgraph_extract::{CandidateEntity, ExtractionStage};
use intelgraph_shared::{Entity, JobId, PageRecord, ProcessBatch, Relationship, Result};
use intelgraph_storage::{KnowledgeWriter, WriteOutcome};

use crate::handoff::ResultSink;

/// Counters for one ingested batch or text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub pages: usize,
    pub pages_skipped: usize,
    pub entities_written: usize,
    pub partial_failures: usize,
    pub entity_failures: usize,
    pub relationships_written: usize,
    pub relationship_failures: usize,
}

impl IngestReport {
    fn absorb(&mut self, other: IngestReport) {
        self.pages += other.pages;
        self.pages_skipped += other.pages_skipped;
        self.entities_written += other.entities_written;
        self.partial_failures += other.partial_failures;
        self.entity_failures += other.entity_failures;
        self.relationships_written += other.relationships_written;
        self.relationship_failures += other.relationship_failures;
    }
}

pub struct IngestionPipeline {
    pub(crate) stage: ExtractionStage,
    pub(crate) writer: Arc<KnowledgeWriter>,
}

impl IngestionPipeline {
    pub fn new(stage: ExtractionStage, writer: Arc<KnowledgeWriter>) -> Self {
        Self { stage, writer }
    }

    pub fn stage(&self) -> &ExtractionStage {
        &self.stage
    }

    pub fn writer(&self) -> &Arc<KnowledgeWriter> {
        &self.writer
    }

    /// Ingest every successful page of a batch.
    #[instrument(skip_all, fields(job_id = %batch.job_id, pages = batch.results.len()))]
    pub async fn process(&self, batch: &ProcessBatch) -> IngestReport {
        let mut report = IngestReport::default();
        for page in &batch.results {
            report.absorb(self.process_page(&batch.job_id, page).await);
        }
        info!(
            entities = report.entities_written,
            relationships = report.relationships_written,
            partial_failures = report.partial_failures,
            "batch ingested"
        );
        report
    }

    async fn process_page(&self, job_id: &JobId, page: &PageRecord) -> IngestReport {
        if !page.is_success() || page.content.trim().is_empty() {
            return IngestReport {
                pages_skipped: 1,
                ..Default::default()
            };
        }

        let mut report = self
            .ingest_text(&page.content, Some(&page.url), Some(job_id))
            .await;
        report.pages = 1;
        debug!(url = %page.url, entities = report.entities_written, "page ingested");
        report
    }

    /// Extract from `text` and write the results, attributed to `source_url`.
    pub async fn ingest_text(
        &self,
        text: &str,
        source_url: Option<&str>,
        job_id: Option<&JobId>,
    ) -> IngestReport {
        let extraction = self.stage.extract(text);
        let mut report = IngestReport::default();

        for candidate in &extraction.entities {
            match self.write_candidate(candidate, source_url, job_id).await {
                Ok(WriteOutcome::Success { .. }) => report.entities_written += 1,
                Ok(WriteOutcome::PartialFailure { .. }) => {
                    report.entities_written += 1;
                    report.partial_failures += 1;
                }
                Err(e) => {
                    warn!(entity = %candidate.text, error = %e, "entity write failed");
                    report.entity_failures += 1;
                }
            }
        }

        for relation in &extraction.relations {
            let relationship = Relationship {
                source_text: relation.subject.clone(),
                source_label: relation.subject_label,
                target_text: relation.object.clone(),
                target_label: relation.object_label,
                kind: relation.kind.clone(),
                source_url: source_url.map(str::to_string),
            };
            match self.writer.write_relationship(&relationship).await {
                Ok(_) => report.relationships_written += 1,
                Err(e) => {
                    debug!(kind = %relation.kind, error = %e, "relationship skipped");
                    report.relationship_failures += 1;
                }
            }
        }

        report
    }

    async fn write_candidate(
        &self,
        candidate: &CandidateEntity,
        source_url: Option<&str>,
        job_id: Option<&JobId>,
    ) -> Result<WriteOutcome> {
        let embedding = self.stage.embed(&candidate.text)?;
        let entity = Entity {
            text: candidate.text.clone(),
            label: candidate.label,
            confidence: Some(candidate.confidence),
            source_url: source_url.map(str::to_string),
            job_id: job_id.cloned(),
            embedding: Some(embedding),
        };
        self.writer.write(&entity).await
    }

    /// Re-embed graph nodes that have no vector (e.g. an in-memory index
    /// after a restart). Returns how many were restored.
    pub async fn restore_missing_vectors(&self) -> Result<usize> {
        let audit = self.writer.audit().await?;
        let mut restored = 0;
        for id in audit.missing_vectors {
            let Some(node) = self.writer.graph().get_entity(id).await? else {
                continue;
            };
            let entity = Entity::new(node.name.clone(), node.label)
                .with_embedding(self.stage.embed(&node.name)?);
            if self.writer.write(&entity).await?.is_success() {
                restored += 1;
            }
        }
        if restored > 0 {
            info!(restored, "restored missing vectors");
        }
        Ok(restored)
    }
}

#[async_trait]
impl ResultSink for IngestionPipeline {
    fn name(&self) -> &str {
        "ingest"
    }

    async fn deliver(&self, batch: &ProcessBatch) -> Result<()> {
        self.process(batch).await;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use intelgraph_shared::{EntityLabel, ExtractionConfig};
    use intelgraph_storage::{
        DerivedKey, GraphStore, LibsqlGraphStore, MemoryVectorIndex, ReconcilePolicy, VectorIndex,
    };

    pub(crate) async fn pipeline() -> IngestionPipeline {
        let tmp = std::env::temp_dir().join(format!("ig_ingest_{}.db", Uuid::now_v7()));
        let graph = Arc::new(LibsqlGraphStore::open(&tmp).await.expect("open graph"));
        let stage = ExtractionStage::from_config(&ExtractionConfig::default());
        let vectors = Arc::new(MemoryVectorIndex::with_dimensions(stage.dimensions()));
        let writer = KnowledgeWriter::new(graph, vectors, ReconcilePolicy::default());
        IngestionPipeline::new(stage, Arc::new(writer))
    }

    fn page(url: &str, content: &str) -> PageRecord {
        PageRecord {
            url: url.into(),
            depth: 0,
            status_code: Some(200),
            title: None,
            content: content.into(),
            links: Vec::new(),
            content_hash: None,
            fetched_at: Utc::now(),
            error: None,
        }
    }

    #[tokio::test]
    async fn same_entity_from_two_pages_merges() {
        let pipeline = pipeline().await;
        let batch = ProcessBatch {
            job_id: JobId::new(),
            results: vec![
                page("https://a.example/", "SpaceX launched another rocket on Tuesday."),
                page("https://b.example/", "Engineers at SpaceX tested the booster."),
            ],
        };

        let report = pipeline.process(&batch).await;
        assert_eq!(report.pages, 2);

        let key = DerivedKey::new("SpaceX", EntityLabel::Organization);
        let node = pipeline
            .writer()
            .graph()
            .get_entity(key.id())
            .await
            .unwrap()
            .expect("SpaceX node");
        assert_eq!(node.sources.len(), 2);
        assert_eq!(node.job_ids, vec![batch.job_id.to_string()]);

        let hits = pipeline.writer().graph().find_entities("spacex").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(pipeline.writer().vectors().get(key.id()).await.unwrap().is_some());
        assert!(pipeline.writer().audit().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn relationships_written_with_attribution() {
        let pipeline = pipeline().await;
        let report = pipeline
            .ingest_text(
                "SpaceX was founded by Elon Musk.",
                Some("https://a.example/"),
                None,
            )
            .await;
        assert_eq!(report.entities_written, 2);
        assert_eq!(report.relationships_written, 1);

        let stats = pipeline.writer().graph().stats().await.unwrap();
        assert_eq!(stats.relationships, 1);
    }

    #[tokio::test]
    async fn failed_and_empty_pages_skipped() {
        let pipeline = pipeline().await;
        let batch = ProcessBatch {
            job_id: JobId::new(),
            results: vec![
                PageRecord::failed("https://a.example/", 0, Some(500), "HTTP 500"),
                page("https://b.example/", "   "),
            ],
        };
        let report = pipeline.process(&batch).await;
        assert_eq!(report.pages, 0);
        assert_eq!(report.pages_skipped, 2);
        assert_eq!(pipeline.writer().graph().stats().await.unwrap().nodes, 0);
    }

    #[tokio::test]
    async fn restores_vectors_missing_after_restart() {
        let tmp = std::env::temp_dir().join(format!("ig_ingest_{}.db", Uuid::now_v7()));
        let stage = ExtractionStage::from_config(&ExtractionConfig::default());
        {
            let graph = Arc::new(LibsqlGraphStore::open(&tmp).await.unwrap());
            let writer = KnowledgeWriter::new(
                graph,
                Arc::new(MemoryVectorIndex::new()),
                ReconcilePolicy::default(),
            );
            let pipeline = IngestionPipeline::new(stage.clone(), Arc::new(writer));
            pipeline
                .ingest_text("NASA worked with Boeing.", Some("https://a.example/"), None)
                .await;
        }

        let graph = Arc::new(LibsqlGraphStore::open(&tmp).await.unwrap());
        let vectors = Arc::new(MemoryVectorIndex::new());
        let writer = KnowledgeWriter::new(graph, vectors.clone(), ReconcilePolicy::default());
        let pipeline = IngestionPipeline::new(stage, Arc::new(writer));

        assert_eq!(pipeline.restore_missing_vectors().await.unwrap(), 2);
        assert_eq!(vectors.count().await.unwrap(), 2);
        assert!(pipeline.writer().audit().await.unwrap().is_consistent());
    }
}

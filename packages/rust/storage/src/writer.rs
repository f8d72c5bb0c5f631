//! Graph + vector dual write.
//!
//! Order: graph upsert first, then the vector upsert under the same derived
//! id. A graph failure fails the write and leaves the vector index untouched.
//! A vector failure is reported as [`WriteOutcome::PartialFailure`] and
//! queued for reconciliation; the graph node is never rolled back.
//!
//! Concurrent writes of one key can land their vector upserts out of order,
//! so after each upsert the node is re-read and the payload rewritten until
//! it matches the node's attribution.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use intelgraph_shared::{Entity, IntelError, Relationship, Result};

use crate::graph::{GraphEdge, GraphNode, GraphStore};
use crate::key::DerivedKey;
use crate::reconcile::{ReconcilePolicy, ReconcileQueue, ReconcileReport, Requeue};
use crate::vector::{VectorIndex, VectorPayload, VectorRecord};

/// Vector upserts per write before a still-moving payload is left to the
/// reconciliation queue.
const PAYLOAD_SETTLE_ROUNDS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WriteOutcome {
    Success { id: Uuid },
    PartialFailure { id: Uuid, detail: String },
}

impl WriteOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Success { id } | Self::PartialFailure { id, .. } => *id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Graph/vector disagreement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParityReport {
    pub graph_nodes: usize,
    pub vector_records: usize,
    /// Graph nodes without a vector twin.
    pub missing_vectors: Vec<Uuid>,
    /// Vector records without a graph node.
    pub orphan_vectors: Vec<Uuid>,
    /// Twins whose payload attribution differs from the graph node.
    pub stale_payloads: Vec<Uuid>,
}

impl ParityReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_vectors.is_empty()
            && self.orphan_vectors.is_empty()
            && self.stale_payloads.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct WriterMetrics {
    writes_ok: AtomicU64,
    partial_failures: AtomicU64,
    graph_failures: AtomicU64,
    reconciled: AtomicU64,
    exhausted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterMetricsSnapshot {
    pub writes_ok: u64,
    pub partial_failures: u64,
    pub graph_failures: u64,
    pub reconciled: u64,
    pub exhausted: u64,
}

impl WriterMetrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WriterMetricsSnapshot {
        WriterMetricsSnapshot {
            writes_ok: self.writes_ok.load(Ordering::Relaxed),
            partial_failures: self.partial_failures.load(Ordering::Relaxed),
            graph_failures: self.graph_failures.load(Ordering::Relaxed),
            reconciled: self.reconciled.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

pub struct KnowledgeWriter {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorIndex>,
    queue: ReconcileQueue,
    metrics: WriterMetrics,
}

impl KnowledgeWriter {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorIndex>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            graph,
            vectors,
            queue: ReconcileQueue::new(policy),
            metrics: WriterMetrics::default(),
        }
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    pub fn vectors(&self) -> &Arc<dyn VectorIndex> {
        &self.vectors
    }

    pub fn metrics(&self) -> WriterMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reconcile_policy(&self) -> &ReconcilePolicy {
        self.queue.policy()
    }

    pub fn pending_reconciliations(&self) -> usize {
        self.queue.len()
    }

    pub fn queue(&self) -> &ReconcileQueue {
        &self.queue
    }

    /// Dual-write one entity. The entity must carry its embedding.
    pub async fn write(&self, entity: &Entity) -> Result<WriteOutcome> {
        let key = DerivedKey::new(&entity.text, entity.label);
        if key.is_empty() {
            return Err(IntelError::validation("entity text is empty"));
        }
        let Some(embedding) = entity.embedding.clone().filter(|v| !v.is_empty()) else {
            return Err(IntelError::validation(format!(
                "entity '{key}' has no embedding"
            )));
        };

        let node = match self.graph.upsert_entity(&key, entity).await {
            Ok(node) => node,
            Err(e) => {
                WriterMetrics::bump(&self.metrics.graph_failures);
                warn!(%key, error = %e, "graph upsert failed");
                return Err(e);
            }
        };

        let id = node.id;
        let mut record = VectorRecord::from_node(&node, embedding.clone());
        for _ in 0..PAYLOAD_SETTLE_ROUNDS {
            if let Err(e) = self.vectors.upsert(record.clone()).await {
                return Ok(self.partial_failure(key, id, embedding, e.to_string()));
            }
            let current = match self.graph.get_entity(id).await {
                Ok(Some(current)) => current,
                Ok(None) => {
                    return Err(IntelError::Storage(format!(
                        "graph node {id} for '{key}' vanished during write"
                    )));
                }
                Err(e) => return Ok(self.partial_failure(key, id, embedding, e.to_string())),
            };
            if payload_matches(&current, &record.payload) {
                WriterMetrics::bump(&self.metrics.writes_ok);
                debug!(%key, %id, sources = current.sources.len(), "entity written");
                return Ok(WriteOutcome::Success { id });
            }
            debug!(%key, %id, "attribution moved during write; rewriting vector payload");
            record = VectorRecord::from_node(&current, embedding.clone());
        }

        let detail = "vector payload kept changing under concurrent writes".to_string();
        Ok(self.partial_failure(key, id, embedding, detail))
    }

    fn partial_failure(
        &self,
        key: DerivedKey,
        id: Uuid,
        embedding: Vec<f32>,
        detail: String,
    ) -> WriteOutcome {
        WriterMetrics::bump(&self.metrics.partial_failures);
        warn!(%key, %id, error = %detail, "vector upsert incomplete; queued for reconciliation");
        self.queue.push(key, embedding, detail.clone());
        WriteOutcome::PartialFailure { id, detail }
    }

    /// Graph-only: edges have no vector twin.
    pub async fn write_relationship(&self, relationship: &Relationship) -> Result<GraphEdge> {
        self.graph.upsert_relationship(relationship).await
    }

    /// Retry every due queue entry once.
    pub async fn reconcile_pass(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for entry in self.queue.take_due(Instant::now()) {
            report.attempted += 1;

            let node: GraphNode = match self.graph.get_entity(entry.id).await {
                Ok(Some(node)) => node,
                Ok(None) => {
                    warn!(key = %entry.key, "graph node gone; dropping pending vector");
                    report.dropped += 1;
                    continue;
                }
                Err(e) => {
                    self.requeue(entry, e.to_string(), &mut report);
                    continue;
                }
            };

            let record = VectorRecord::from_node(&node, entry.embedding.clone());
            match self.vectors.upsert(record).await {
                Ok(()) => {
                    WriterMetrics::bump(&self.metrics.reconciled);
                    debug!(key = %entry.key, attempts = entry.attempts, "vector reconciled");
                    report.reconciled += 1;
                }
                Err(e) => self.requeue(entry, e.to_string(), &mut report),
            }
        }

        report.remaining = self.queue.len();
        report
    }

    fn requeue(
        &self,
        entry: crate::reconcile::PendingVector,
        error: String,
        report: &mut ReconcileReport,
    ) {
        let key = entry.key.clone();
        match self.queue.reschedule(entry, error) {
            Requeue::Scheduled => report.rescheduled += 1,
            Requeue::Superseded => {}
            Requeue::Exhausted => {
                WriterMetrics::bump(&self.metrics.exhausted);
                warn!(%key, "reconciliation retries exhausted");
                report.exhausted += 1;
            }
        }
    }

    /// Compare node ids with vector ids, then the attribution of each twin.
    pub async fn audit(&self) -> Result<ParityReport> {
        let nodes: BTreeSet<Uuid> = self.graph.entity_ids().await?.into_iter().collect();
        let vectors: BTreeSet<Uuid> = self.vectors.ids().await?.into_iter().collect();

        let mut stale_payloads = Vec::new();
        for &id in nodes.intersection(&vectors) {
            if let Some((node, record)) = self.twins(id).await? {
                if !payload_matches(&node, &record.payload) {
                    stale_payloads.push(id);
                }
            }
        }

        Ok(ParityReport {
            graph_nodes: nodes.len(),
            vector_records: vectors.len(),
            missing_vectors: nodes.difference(&vectors).copied().collect(),
            orphan_vectors: vectors.difference(&nodes).copied().collect(),
            stale_payloads,
        })
    }

    /// Rewrite the payloads of `ids` from their graph nodes, keeping the
    /// stored vectors. Returns how many were rewritten.
    pub async fn refresh_payloads(&self, ids: &[Uuid]) -> Result<usize> {
        let mut refreshed = 0;
        for &id in ids {
            let Some((node, record)) = self.twins(id).await? else {
                continue;
            };
            if payload_matches(&node, &record.payload) {
                continue;
            }
            self.vectors
                .upsert(VectorRecord::from_node(&node, record.vector))
                .await?;
            refreshed += 1;
        }
        Ok(refreshed)
    }

    async fn twins(&self, id: Uuid) -> Result<Option<(GraphNode, VectorRecord)>> {
        let Some(node) = self.graph.get_entity(id).await? else {
            return Ok(None);
        };
        Ok(self.vectors.get(id).await?.map(|record| (node, record)))
    }
}

fn payload_matches(node: &GraphNode, payload: &VectorPayload) -> bool {
    node.sources == payload.source_urls && node.job_ids == payload.job_ids
}

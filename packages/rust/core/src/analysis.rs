//! Read-side operations over the knowledge stores: text analysis, semantic
//! search, entity comparison, and graph exploration.

use serde::Serialize;

use intelgraph_extract::{CandidateEntity, CandidateRelation, summarize};
use intelgraph_shared::{IntelError, Result};
use intelgraph_storage::{
    GraphNode, GraphStats, ScoredPoint, Subgraph, WriterMetricsSnapshot, cosine_similarity,
    normalize_entity_text,
};

use crate::ingest::{IngestReport, IngestionPipeline};

pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_SEARCH_THRESHOLD: f32 = 0.5;
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.7;
/// Below `threshold` but at least this fraction of it: `possible_match`.
const POSSIBLE_MATCH_RATIO: f32 = 0.7;
const SUMMARY_MAX_CHARS: usize = 150;

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub entities: Vec<CandidateEntity>,
    pub relations: Vec<CandidateRelation>,
    pub summary: String,
    pub embedding_dimensions: Option<usize>,
    /// Present when the analysis was also written to the stores.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored: Option<IngestReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Match,
    PossibleMatch,
    NoMatch,
}

impl Verdict {
    pub fn from_score(similarity: f32, threshold: f32) -> Self {
        if similarity >= threshold {
            Self::Match
        } else if similarity >= threshold * POSSIBLE_MATCH_RATIO {
            Self::PossibleMatch
        } else {
            Self::NoMatch
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub similarity: f32,
    pub threshold: f32,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeStats {
    pub graph: GraphStats,
    pub vectors: u64,
    pub pending_reconciliation: usize,
    pub writer: WriterMetricsSnapshot,
}

impl IngestionPipeline {
    /// Extract from `text`; when `store_as` is given, also write the results
    /// attributed to that source.
    pub async fn analyze(&self, text: &str, store_as: Option<&str>) -> Result<AnalysisReport> {
        if text.trim().is_empty() {
            return Err(IntelError::validation("text must not be empty"));
        }
        let extraction = self.stage.extract(text);
        let stored = match store_as {
            Some(source) => Some(self.ingest_text(text, Some(source), None).await),
            None => None,
        };

        Ok(AnalysisReport {
            embedding_dimensions: extraction.embedding.as_ref().map(Vec::len),
            entities: extraction.entities,
            relations: extraction.relations,
            summary: summarize(text, SUMMARY_MAX_CHARS),
            stored,
        })
    }

    /// Entities whose vectors are closest to the query text.
    pub async fn semantic_search(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredPoint>> {
        if query.trim().is_empty() {
            return Err(IntelError::validation("query must not be empty"));
        }
        let vector = self.stage.embed(query)?;
        self.writer.vectors().query(&vector, top_k, threshold).await
    }

    /// Neighbors of a known entity in vector space, excluding itself.
    pub async fn similar_entities(
        &self,
        name: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredPoint>> {
        let key = normalize_entity_text(name);
        if key.is_empty() {
            return Err(IntelError::validation("entity name must not be empty"));
        }

        let nodes = self.writer.graph().find_entities(name).await?;
        let stored = match nodes.first() {
            Some(node) => self.writer.vectors().get(node.id).await?,
            None => None,
        };
        let vector = match stored {
            Some(record) => record.vector,
            None => self.stage.embed(name)?,
        };

        let mut hits = self
            .writer
            .vectors()
            .query(&vector, top_k + nodes.len().max(1), threshold)
            .await?;
        hits.retain(|hit| hit.payload.key != key && !nodes.iter().any(|n| n.id == hit.id));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Cosine similarity of two texts' embeddings, with a verdict.
    pub fn compare(&self, a: &str, b: &str, threshold: f32) -> Result<Comparison> {
        let similarity = cosine_similarity(&self.stage.embed(a)?, &self.stage.embed(b)?);
        Ok(Comparison {
            similarity,
            threshold,
            verdict: Verdict::from_score(similarity, threshold),
        })
    }

    /// Bounded neighborhood of the first node matching `name`.
    pub async fn entity_graph(&self, name: &str, depth: u32) -> Result<Option<Subgraph>> {
        let graph = self.writer.graph();
        match graph.find_entities(name).await?.first() {
            Some(node) => graph.neighborhood(node.id, depth).await,
            None => Ok(None),
        }
    }

    pub async fn graph_search(&self, text: &str, limit: usize) -> Result<Vec<GraphNode>> {
        self.writer.graph().search(text, limit).await
    }

    pub async fn graph_stats(&self) -> Result<KnowledgeStats> {
        Ok(KnowledgeStats {
            graph: self.writer.graph().stats().await?,
            vectors: self.writer.vectors().count().await?,
            pending_reconciliation: self.writer.pending_reconciliations(),
            writer: self.writer.metrics(),
        })
    }
}

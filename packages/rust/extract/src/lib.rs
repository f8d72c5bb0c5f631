//! Text → entities, relations, and embeddings.
//!
//! The [`Extractor`] trait is the swappable capability; [`ExtractionStage`]
//! wraps one with the input bounds and failure policy the ingestion pipeline
//! relies on:
//! - input is trimmed and truncated to a character budget;
//! - empty input or an extractor error yields an empty [`Extraction`].

pub mod embed;
pub mod heuristic;
pub mod text;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use intelgraph_shared::{EntityLabel, ExtractionConfig, Result};

pub use embed::HashingEmbedder;
pub use heuristic::HeuristicExtractor;
pub use text::{sentence_spans, split_sentences, summarize};

/// Embedding width used when nothing else is configured.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// An entity mention found in a piece of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEntity {
    pub text: String,
    pub label: EntityLabel,
    pub confidence: f32,
    /// Byte offsets into the extracted text.
    pub start: usize,
    pub end: usize,
}

/// A typed relation between two mentions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRelation {
    pub subject: String,
    pub subject_label: EntityLabel,
    pub object: String,
    pub object_label: EntityLabel,
    pub kind: String,
    pub confidence: f32,
}

/// Output of one extraction call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    /// Distinct candidates in order of first appearance.
    pub entities: Vec<CandidateEntity>,
    pub relations: Vec<CandidateRelation>,
    /// Embedding of the whole input, absent on failure.
    pub embedding: Option<Vec<f32>>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.embedding.is_none()
    }
}

/// Entity/embedding backend.
///
/// Implementations must be pure with respect to their input and return in
/// bounded time; the stage calls them synchronously.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    /// Width of every vector returned by [`Extractor::embed`].
    fn dimensions(&self) -> usize;

    fn extract(&self, text: &str) -> Result<Extraction>;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Bounded, failure-absorbing wrapper around an [`Extractor`].
#[derive(Clone)]
pub struct ExtractionStage {
    extractor: Arc<dyn Extractor>,
    max_chars: usize,
}

impl std::fmt::Debug for ExtractionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionStage")
            .field("extractor", &self.extractor.name())
            .field("max_chars", &self.max_chars)
            .finish()
    }
}

impl ExtractionStage {
    pub fn new(extractor: Arc<dyn Extractor>, max_chars: usize) -> Self {
        Self {
            extractor,
            max_chars,
        }
    }

    /// Heuristic extractor sized from config.
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(
            Arc::new(HeuristicExtractor::new(config.dimensions)),
            config.max_chars,
        )
    }

    pub fn extractor(&self) -> &Arc<dyn Extractor> {
        &self.extractor
    }

    pub fn dimensions(&self) -> usize {
        self.extractor.dimensions()
    }

    /// Run extraction. Never fails; see the module docs for the policy.
    pub fn extract(&self, text: &str) -> Extraction {
        let input = truncate_chars(text.trim(), self.max_chars);
        if input.is_empty() {
            return Extraction::default();
        }

        match self.extractor.extract(input) {
            Ok(extraction) => {
                debug!(
                    extractor = self.extractor.name(),
                    entities = extraction.entities.len(),
                    relations = extraction.relations.len(),
                    "extracted"
                );
                extraction
            }
            Err(e) => {
                warn!(extractor = self.extractor.name(), error = %e, "extraction failed");
                Extraction::default()
            }
        }
    }

    /// Embed a short string (entity text, search query).
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.extractor.embed(text.trim())
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

//! Crawl orchestration and knowledge ingestion for IntelGraph.
//!
//! This crate ties the crawler, extraction and storage crates together:
//! - [`JobRegistry`] owns crawl jobs and runs each one through a bounded
//!   worker pool gated by politeness and dedup;
//! - [`IngestionPipeline`] turns a completed job's pages into graph and
//!   vector records, and answers analysis/search queries over them.

pub mod analysis;
pub mod handoff;
pub mod ingest;
pub mod job;
mod orchestrator;
pub mod registry;
pub mod seeds;

pub use analysis::{
    AnalysisReport, Comparison, DEFAULT_MATCH_THRESHOLD, DEFAULT_SEARCH_THRESHOLD, DEFAULT_TOP_K,
    KnowledgeStats, Verdict,
};
pub use handoff::{HttpResultSink, ResultSink};
pub use ingest::{IngestReport, IngestionPipeline};
pub use job::{JobRequest, JobSnapshot};
pub use registry::{JobRegistry, JobRegistryBuilder};
pub use seeds::{SeedResolver, StaticSeedResolver, TemplateSeedResolver};

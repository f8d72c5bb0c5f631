//! Shared types, error model, and configuration for IntelGraph.
//!
//! This crate is the foundation depended on by all other IntelGraph crates.
//! It provides:
//! - [`IntelError`] — the unified error type
//! - Domain types ([`JobId`], [`JobStatus`], [`PageRecord`], [`Entity`], [`Relationship`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, CrawlSettings, DEFAULT_USER_AGENT, ExtractionConfig, HandoffConfig,
    KnowledgeConfig, PolitenessConfig, ReconcileConfig, SeedsConfig, VectorBackend, config_dir,
    config_file_path, expand_home, init_config, init_config_at, load_config, load_config_from,
};
pub use error::{IntelError, Result};
pub use types::{
    Entity, EntityLabel, JobId, JobStatus, PageRecord, ProcessBatch, Relationship,
};

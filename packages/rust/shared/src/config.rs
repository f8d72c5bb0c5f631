//! Application configuration for IntelGraph.
//!
//! User config lives at `~/.intelgraph/intelgraph.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IntelError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "intelgraph.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".intelgraph";

/// Default user agent sent with every fetch.
pub const DEFAULT_USER_AGENT: &str = concat!("IntelGraph/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Config structs (matching intelgraph.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Crawl budgets and worker pool.
    #[serde(default)]
    pub crawl: CrawlSettings,

    /// Per-domain politeness.
    #[serde(default)]
    pub politeness: PolitenessConfig,

    /// Entity extraction and embeddings.
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Graph store, vector index, and reconciliation.
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Query → seed URL templates.
    #[serde(default)]
    pub seeds: SeedsConfig,

    /// Optional remote handoff of completed crawl batches.
    #[serde(default)]
    pub handoff: HandoffConfig,
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSettings {
    /// Page budget used when a submission gives none (or a non-positive one).
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Depth budget used when a submission gives none (or a non-positive one).
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Concurrent fetch workers per job.
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Per-request deadline in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Safety ceiling on URLs admitted to one job's frontier.
    #[serde(default = "default_max_discovered")]
    pub max_discovered: u32,

    /// Outbound links kept per page.
    #[serde(default = "default_max_links_per_page")]
    pub max_links_per_page: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Permit loopback/private-network targets (local test servers).
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            workers: default_workers(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_discovered: default_max_discovered(),
            max_links_per_page: default_max_links_per_page(),
            user_agent: default_user_agent(),
            allow_private_hosts: false,
        }
    }
}

fn default_max_pages() -> u32 {
    50
}
fn default_max_depth() -> u32 {
    2
}
fn default_workers() -> u32 {
    4
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_max_discovered() -> u32 {
    10_000
}
fn default_max_links_per_page() -> u32 {
    200
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

/// `[politeness]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolitenessConfig {
    /// Maximum concurrent fetches against one domain.
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,

    /// Minimum gap between fetch starts (and after a completion) per domain.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Share one limiter across all jobs instead of one per job.
    #[serde(default = "default_true")]
    pub shared_across_jobs: bool,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            delay_ms: default_delay_ms(),
            shared_across_jobs: true,
        }
    }
}

fn default_parallelism() -> u32 {
    2
}
fn default_delay_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}

/// `[extraction]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Characters of page content handed to the extractor.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Embedding dimensionality.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            dimensions: default_dimensions(),
        }
    }
}

fn default_max_chars() -> usize {
    5000
}
fn default_dimensions() -> usize {
    384
}

/// Which vector index backs the knowledge writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// Process-local index, lost on exit.
    #[default]
    Memory,
    /// Qdrant over its REST API.
    Qdrant,
}

/// `[knowledge]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// libSQL database holding the entity graph.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub vector_backend: VectorBackend,

    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            vector_backend: VectorBackend::default(),
            qdrant_url: default_qdrant_url(),
            collection: default_collection(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

fn default_db_path() -> String {
    "~/.intelgraph/knowledge.db".into()
}
fn default_qdrant_url() -> String {
    "http://localhost:6333".into()
}
fn default_collection() -> String {
    "entities".into()
}

/// `[knowledge.reconcile]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Retries before a pending vector write is dead-lettered.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// How often the background loop drains due entries.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            interval_ms: default_interval_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_interval_ms() -> u64 {
    1000
}

/// `[seeds]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedsConfig {
    /// URL templates; `{query}` is replaced with the encoded query.
    #[serde(default = "default_seed_templates")]
    pub templates: Vec<String>,
}

impl Default for SeedsConfig {
    fn default() -> Self {
        Self {
            templates: default_seed_templates(),
        }
    }
}

fn default_seed_templates() -> Vec<String> {
    vec!["https://en.wikipedia.org/wiki/{query}".into()]
}

/// `[handoff]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandoffConfig {
    /// Base URL of a remote intel service. When unset, completed batches are
    /// ingested in-process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intel_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Crawl config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration — merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub default_max_pages: u32,
    pub default_max_depth: u32,
    pub workers: usize,
    pub fetch_timeout: Duration,
    pub max_discovered: usize,
    pub max_links_per_page: usize,
    pub user_agent: String,
    pub allow_private_hosts: bool,
    pub politeness_parallelism: usize,
    pub politeness_delay: Duration,
    pub shared_limiter: bool,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_max_pages: config.crawl.max_pages.max(1),
            default_max_depth: config.crawl.max_depth.max(1),
            workers: config.crawl.workers.max(1) as usize,
            fetch_timeout: Duration::from_secs(config.crawl.fetch_timeout_secs.max(1)),
            max_discovered: config.crawl.max_discovered.max(1) as usize,
            max_links_per_page: config.crawl.max_links_per_page as usize,
            user_agent: config.crawl.user_agent.clone(),
            allow_private_hosts: config.crawl.allow_private_hosts,
            politeness_parallelism: config.politeness.parallelism.max(1) as usize,
            politeness_delay: Duration::from_millis(config.politeness.delay_ms),
            shared_limiter: config.politeness.shared_across_jobs,
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.intelgraph/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| IntelError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.intelgraph/intelgraph.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| IntelError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| IntelError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_dir()?.join(CONFIG_FILE_NAME);
    init_config_at(&path)?;
    Ok(path)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| IntelError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| IntelError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| IntelError::io(path, e))?;
    tracing::info!(?path, "created default config file");
    Ok(())
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| IntelError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_pages"));
        assert!(toml_str.contains("[knowledge.reconcile]"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.crawl.max_depth, 2);
        assert_eq!(parsed.politeness.parallelism, 2);
        assert_eq!(parsed.knowledge.reconcile.max_retries, 3);
        assert_eq!(parsed.knowledge.vector_backend, VectorBackend::Memory);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[politeness]
delay_ms = 250

[knowledge]
vector_backend = "qdrant"

[handoff]
intel_url = "http://intel:8001"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.politeness.delay_ms, 250);
        assert_eq!(config.politeness.parallelism, 2);
        assert_eq!(config.knowledge.vector_backend, VectorBackend::Qdrant);
        assert_eq!(config.knowledge.collection, "entities");
        assert_eq!(config.handoff.intel_url.as_deref(), Some("http://intel:8001"));
        assert_eq!(config.crawl.max_pages, 50);
    }

    #[test]
    fn crawl_config_from_app_config() {
        let app = AppConfig::default();
        let crawl = CrawlConfig::from(&app);
        assert_eq!(crawl.default_max_pages, 50);
        assert_eq!(crawl.default_max_depth, 2);
        assert_eq!(crawl.workers, 4);
        assert_eq!(crawl.fetch_timeout, Duration::from_secs(30));
        assert_eq!(crawl.politeness_delay, Duration::from_secs(1));
        assert_eq!(crawl.max_discovered, 10_000);
        assert!(crawl.shared_limiter);
    }

    #[test]
    fn init_config_at_writes_loadable_defaults() {
        let dir = std::env::temp_dir().join(format!("ig_config_{}", uuid::Uuid::now_v7()));
        let path = dir.join("nested").join("intelgraph.toml");
        init_config_at(&path).expect("init config");

        let config = load_config_from(&path).expect("load config");
        assert_eq!(config.crawl.max_pages, 50);
        assert_eq!(config.knowledge.reconcile.max_retries, 3);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/var/lib/kg.db").unwrap(), PathBuf::from("/var/lib/kg.db"));
        let expanded = expand_home("~/kg.db").unwrap();
        assert!(expanded.ends_with("kg.db"));
        assert!(!expanded.to_string_lossy().contains('~'));
    }
}

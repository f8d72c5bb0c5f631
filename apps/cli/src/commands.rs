//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use intelgraph_core::{
    DEFAULT_MATCH_THRESHOLD, DEFAULT_SEARCH_THRESHOLD, DEFAULT_TOP_K, HttpResultSink,
    IngestionPipeline, JobRegistry, JobRequest, JobSnapshot, ResultSink,
};
use intelgraph_extract::ExtractionStage;
use intelgraph_shared::{
    AppConfig, CrawlConfig, JobStatus, VectorBackend, init_config, init_config_at, load_config,
    load_config_from,
};
use intelgraph_storage::{open_knowledge, spawn_reconciler};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// IntelGraph: crawl a topic, extract entities, query the knowledge graph.
#[derive(Parser)]
#[command(
    name = "intelgraph",
    version,
    about = "Crawl the web for a topic and build a searchable knowledge graph.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of the per-user default.
    #[arg(long, env = "INTELGRAPH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl the web for a query and ingest what was found.
    Crawl {
        /// Topic to crawl for.
        query: String,

        /// Explicit seed URL (repeatable). Skips seed resolution.
        #[arg(long = "seed")]
        seeds: Vec<String>,

        /// Page budget (non-positive values fall back to the configured default).
        #[arg(long, allow_negative_numbers = true)]
        max_pages: Option<i64>,

        /// Link depth budget.
        #[arg(long, allow_negative_numbers = true)]
        max_depth: Option<i64>,

        /// Restrict discovered links to this domain (repeatable).
        #[arg(long = "domain")]
        domains: Vec<String>,

        /// User-Agent header for this job.
        #[arg(long)]
        user_agent: Option<String>,

        /// Crawl only; do not hand results to the knowledge stores.
        #[arg(long)]
        no_ingest: bool,
    },

    /// Semantic search over stored entities.
    Search {
        query: String,

        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,

        #[arg(long, default_value_t = DEFAULT_SEARCH_THRESHOLD)]
        threshold: f32,
    },

    /// Entities close to a known entity in vector space.
    Similar {
        entity: String,

        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,

        #[arg(long, default_value_t = DEFAULT_SEARCH_THRESHOLD)]
        threshold: f32,
    },

    /// Compare two texts by embedding similarity.
    Compare {
        a: String,
        b: String,

        #[arg(long, default_value_t = DEFAULT_MATCH_THRESHOLD)]
        threshold: f32,
    },

    /// Show the neighborhood of an entity in the graph.
    Graph {
        entity: String,

        /// Traversal depth (clamped to 1..=3).
        #[arg(long, default_value_t = 1)]
        depth: u32,
    },

    /// Find graph entities whose name contains the given text.
    Find {
        text: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Extract entities and relations from a piece of text.
    Analyze {
        text: String,

        /// Also store the results, attributed to this source.
        #[arg(long)]
        store: Option<String>,
    },

    /// Graph and vector store statistics.
    Stats,

    /// Check that every graph node has a vector and vice versa.
    Audit {
        /// Re-embed graph nodes that are missing a vector.
        #[arg(long)]
        repair: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults (at `--config` when given).
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "intelgraph=info",
        1 => "intelgraph=debug",
        _ => "intelgraph=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(cli.config.as_deref()),
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()),
        };
    }

    let config = resolve_config(cli.config.as_deref())?;
    match cli.command {
        Command::Crawl {
            query,
            seeds,
            max_pages,
            max_depth,
            domains,
            user_agent,
            no_ingest,
        } => {
            let request = JobRequest {
                query,
                max_pages,
                max_depth,
                allowed_domains: domains,
                user_agent,
                seeds,
            };
            cmd_crawl(&config, request, no_ingest).await
        }
        Command::Search {
            query,
            top_k,
            threshold,
        } => {
            let pipeline = open_pipeline(&config).await?;
            print_json(&pipeline.semantic_search(&query, top_k, threshold).await?)
        }
        Command::Similar {
            entity,
            top_k,
            threshold,
        } => {
            let pipeline = open_pipeline(&config).await?;
            print_json(&pipeline.similar_entities(&entity, top_k, threshold).await?)
        }
        Command::Compare { a, b, threshold } => {
            let pipeline = open_stores(&config).await?;
            print_json(&pipeline.compare(&a, &b, threshold)?)
        }
        Command::Graph { entity, depth } => {
            let pipeline = open_pipeline(&config).await?;
            match pipeline.entity_graph(&entity, depth).await? {
                Some(subgraph) => print_json(&subgraph),
                None => Err(eyre!("no entity named '{entity}' in the graph")),
            }
        }
        Command::Find { text, limit } => {
            let pipeline = open_pipeline(&config).await?;
            print_json(&pipeline.graph_search(&text, limit).await?)
        }
        Command::Analyze { text, store } => {
            let pipeline = open_pipeline(&config).await?;
            print_json(&pipeline.analyze(&text, store.as_deref()).await?)
        }
        Command::Stats => {
            let pipeline = open_pipeline(&config).await?;
            print_json(&pipeline.graph_stats().await?)
        }
        Command::Audit { repair } => cmd_audit(&config, repair).await,
        Command::Config { .. } => Ok(()),
    }
}

fn resolve_config(path: Option<&std::path::Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_stores(config: &AppConfig) -> Result<IngestionPipeline> {
    let stage = ExtractionStage::from_config(&config.extraction);
    let writer = open_knowledge(&config.knowledge, stage.dimensions()).await?;
    Ok(IngestionPipeline::new(stage, Arc::new(writer)))
}

/// Like [`open_stores`], but with the in-memory vector backend the vectors
/// are first rebuilt from the graph.
async fn open_pipeline(config: &AppConfig) -> Result<IngestionPipeline> {
    let pipeline = open_stores(config).await?;

    if config.knowledge.vector_backend == VectorBackend::Memory {
        pipeline.restore_missing_vectors().await?;
    }
    Ok(pipeline)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_crawl(config: &AppConfig, request: JobRequest, no_ingest: bool) -> Result<()> {
    let crawl_config = CrawlConfig::from(config);

    let pipeline = if no_ingest || config.handoff.intel_url.is_some() {
        None
    } else {
        Some(Arc::new(open_pipeline(config).await?))
    };

    let sink: Option<Arc<dyn ResultSink>> = match (&pipeline, &config.handoff.intel_url) {
        _ if no_ingest => None,
        (Some(pipeline), _) => Some(pipeline.clone() as Arc<dyn ResultSink>),
        (None, Some(url)) => {
            let sink = HttpResultSink::new(url, crawl_config.fetch_timeout)?;
            Some(Arc::new(sink) as Arc<dyn ResultSink>)
        }
        (None, None) => None,
    };

    let stop_reconciler = CancellationToken::new();
    let reconciler = pipeline
        .as_ref()
        .map(|p| spawn_reconciler(p.writer().clone(), stop_reconciler.clone()));

    let mut builder = JobRegistry::builder(crawl_config);
    if let Some(sink) = sink {
        info!(sink = sink.name(), "completed jobs will be delivered downstream");
        builder = builder.sink(sink);
    }
    let registry = builder.build()?;

    let submitted = registry.submit(request)?;
    info!(job_id = %submitted.job_id, query = %submitted.query, "crawl submitted");

    let outcome = follow_job(&registry, &submitted).await;

    registry.shutdown().await;
    stop_reconciler.cancel();
    if let Some(handle) = reconciler {
        if let Err(e) = handle.await {
            warn!(error = %e, "reconciler task ended abnormally");
        }
    }
    if let Some(pipeline) = &pipeline {
        let report = pipeline.writer().reconcile_pass().await;
        if report.remaining > 0 {
            warn!(
                remaining = report.remaining,
                "vector writes still pending reconciliation at exit"
            );
        }
    }

    let snapshot = outcome?;
    print_json(&snapshot)?;
    match snapshot.status {
        JobStatus::Failed => Err(eyre!(
            "job {} failed: {}",
            snapshot.job_id,
            snapshot.error.as_deref().unwrap_or("unknown error")
        )),
        _ => Ok(()),
    }
}

/// Poll a job with a spinner until it is terminal, cancelling it on Ctrl-C.
async fn follow_job(registry: &JobRegistry, submitted: &JobSnapshot) -> Result<JobSnapshot> {
    let job_id = &submitted.job_id;
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                spinner.set_message("Cancelling...");
                if let Err(e) = registry.cancel(job_id) {
                    warn!(error = %e, "cancel ignored");
                }
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let snapshot = registry.status(job_id)?;
        spinner.set_message(format!(
            "[{}] {}% {} pages, {} failed, {} urls found",
            snapshot.status,
            snapshot.progress,
            snapshot.pages_crawled,
            snapshot.pages_failed,
            snapshot.urls_found
        ));
        if snapshot.status.is_terminal() {
            break;
        }
    }

    spinner.set_message("Delivering results...");
    let settled = registry.wait(job_id).await?;
    spinner.finish_and_clear();
    Ok(settled)
}

async fn cmd_audit(config: &AppConfig, repair: bool) -> Result<()> {
    let pipeline = open_stores(config).await?;

    if repair {
        let restored = pipeline.restore_missing_vectors().await?;
        let stale = pipeline.writer().audit().await?.stale_payloads;
        let refreshed = pipeline.writer().refresh_payloads(&stale).await?;
        println!("Restored {restored} missing vector(s), refreshed {refreshed} stale payload(s).");
    }
    print_json(&pipeline.writer().audit().await?)
}

fn cmd_config_init(path: Option<&std::path::Path>) -> Result<()> {
    let path = match path {
        Some(path) => {
            init_config_at(path)?;
            path.to_path_buf()
        }
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&std::path::Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_init_honours_config_flag() {
        let path = std::env::temp_dir().join(format!("ig_cli_{}.toml", uuid::Uuid::now_v7()));
        let cli = Cli::parse_from([
            "intelgraph",
            "--config",
            path.to_str().unwrap(),
            "config",
            "init",
        ]);
        assert_eq!(cli.config.as_deref(), Some(path.as_path()));

        cmd_config_init(cli.config.as_deref()).unwrap();
        let config = resolve_config(Some(path.as_path())).unwrap();
        assert_eq!(config.crawl.max_pages, 50);
        std::fs::remove_file(&path).ok();
    }
}

//! Crawl orchestration: seed the frontier, drive the worker pool, settle the
//! job, hand results downstream.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use url::Url;

use intelgraph_crawler::{Fetcher, PolitenessLimiter};
use intelgraph_shared::{CrawlConfig, IntelError, ProcessBatch, Result};

use crate::handoff::ResultSink;
use crate::job::{JobHandle, NextEntry};
use crate::seeds::SeedResolver;

/// Everything a job runner needs besides its own [`JobHandle`].
pub(crate) struct CrawlContext {
    pub config: CrawlConfig,
    pub fetcher: Fetcher,
    /// Registry-wide limiter; `None` gives each job its own.
    pub shared_limiter: Option<Arc<PolitenessLimiter>>,
    pub resolver: Arc<dyn SeedResolver>,
    pub sink: Option<Arc<dyn ResultSink>>,
}

impl CrawlContext {
    fn limiter_for_job(&self) -> Arc<PolitenessLimiter> {
        match &self.shared_limiter {
            Some(limiter) => limiter.clone(),
            None => Arc::new(PolitenessLimiter::new(
                self.config.politeness_parallelism,
                self.config.politeness_delay,
            )),
        }
    }
}

/// Run one job to a terminal state. Never returns an error: failures are
/// recorded on the job.
#[instrument(skip_all, fields(job_id = %job.id()))]
pub(crate) async fn run_job(
    job: Arc<JobHandle>,
    query: String,
    explicit_seeds: Vec<Url>,
    ctx: Arc<CrawlContext>,
) {
    let start = Instant::now();

    if let Err(e) = seed_frontier(&job, &query, &explicit_seeds, ctx.resolver.as_ref()).await {
        if job.fail(e.to_string()) {
            warn!(error = %e, "job failed before crawling");
        }
        job.settle();
        return;
    }

    let limiter = ctx.limiter_for_job();
    let worker_count = ctx.config.workers.max(1);
    info!(workers = worker_count, "starting crawl");

    let mut workers = JoinSet::new();
    for worker_id in 0..worker_count {
        workers.spawn(worker(worker_id, job.clone(), ctx.clone(), limiter.clone()));
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                job.fail(format!("crawl worker panicked: {e}"));
            }
        }
    }

    if job.finish() {
        let snapshot = job.snapshot();
        info!(
            pages_crawled = snapshot.pages_crawled,
            urls_found = snapshot.urls_found,
            pages_failed = snapshot.pages_failed,
            duration_ms = start.elapsed().as_millis(),
            "crawl completed"
        );
        if let Some(sink) = &ctx.sink {
            let batch = ProcessBatch {
                job_id: job.id().clone(),
                results: job.results(),
            };
            match sink.deliver(&batch).await {
                Ok(()) => debug!(sink = sink.name(), pages = batch.results.len(), "batch delivered"),
                Err(e) => warn!(sink = sink.name(), error = %e, "batch delivery failed"),
            }
        }
    } else {
        info!(
            status = %job.status(),
            duration_ms = start.elapsed().as_millis(),
            "crawl stopped"
        );
    }

    job.settle();
}

async fn seed_frontier(
    job: &JobHandle,
    query: &str,
    explicit: &[Url],
    resolver: &dyn SeedResolver,
) -> Result<usize> {
    let seeds = if explicit.is_empty() {
        tokio::select! {
            seeds = resolver.resolve(query) => seeds?,
            _ = job.cancel_token().cancelled() => return Ok(0),
        }
    } else {
        explicit.to_vec()
    };

    let admitted = seeds
        .iter()
        .filter(|url| job.admit(url, 0, true).is_ok())
        .count();
    debug!(resolved = seeds.len(), admitted, "frontier seeded");

    if admitted == 0 && !job.status().is_terminal() {
        return Err(IntelError::Seeds(format!(
            "no seed URLs resolved for query '{query}'"
        )));
    }
    Ok(admitted)
}

async fn worker(
    worker_id: usize,
    job: Arc<JobHandle>,
    ctx: Arc<CrawlContext>,
    limiter: Arc<PolitenessLimiter>,
) {
    let cancel = job.cancel_token().clone();

    loop {
        let changed = job.changed();
        tokio::pin!(changed);
        changed.as_mut().enable();

        let (entry, in_flight) = match job.next_entry() {
            NextEntry::Entry(entry, in_flight) => (entry, in_flight),
            NextEntry::Exhausted => break,
            NextEntry::Wait => {
                tokio::select! {
                    _ = &mut changed => continue,
                    _ = cancel.cancelled() => break,
                }
            }
        };

        let domain = entry.url.host_str().unwrap_or_default().to_ascii_lowercase();
        let Some(permit) = limiter.acquire(&domain, &cancel).await else {
            break;
        };

        let record = tokio::select! {
            record = ctx.fetcher.fetch(&entry.url, entry.depth, job.user_agent()) => record,
            _ = cancel.cancelled() => break,
        };
        permit.release();

        if let Some(error) = &record.error {
            debug!(worker_id, url = %entry.url, error = %error, "page failed");
        }

        let next_depth = entry.depth + 1;
        for link in job.complete(record) {
            if let Ok(url) = Url::parse(&link) {
                let _ = job.admit(&url, next_depth, false);
            }
        }
        drop(in_flight);
    }

    debug!(worker_id, "worker exiting");
}

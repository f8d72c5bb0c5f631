//! Process-wide job registry: submit, observe, cancel.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;
use url::Url;

use intelgraph_crawler::{Fetcher, PolitenessLimiter};
use intelgraph_shared::{CrawlConfig, IntelError, JobId, PageRecord, Result};

use crate::handoff::ResultSink;
use crate::job::{JobHandle, JobLimits, JobRequest, JobSnapshot};
use crate::orchestrator::{CrawlContext, run_job};
use crate::seeds::{SeedResolver, TemplateSeedResolver};

/// Owns every job for its lifetime. Create one per process (or test) and
/// call [`JobRegistry::shutdown`] before dropping it.
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobHandle>>>,
    ctx: Arc<CrawlContext>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

/// Configures a [`JobRegistry`] before any job exists.
pub struct JobRegistryBuilder {
    config: CrawlConfig,
    resolver: Arc<dyn SeedResolver>,
    sink: Option<Arc<dyn ResultSink>>,
}

impl JobRegistryBuilder {
    pub fn resolver(mut self, resolver: Arc<dyn SeedResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Where completed jobs' page records go.
    pub fn sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<JobRegistry> {
        let config = self.config;
        let fetcher = Fetcher::from_config(&config)?;
        let shared_limiter = config.shared_limiter.then(|| {
            Arc::new(PolitenessLimiter::new(
                config.politeness_parallelism,
                config.politeness_delay,
            ))
        });

        Ok(JobRegistry {
            jobs: RwLock::default(),
            ctx: Arc::new(CrawlContext {
                config,
                fetcher,
                shared_limiter,
                resolver: self.resolver,
                sink: self.sink,
            }),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }
}

impl JobRegistry {
    /// Starts from the default seed resolver and no downstream sink.
    pub fn builder(config: CrawlConfig) -> JobRegistryBuilder {
        JobRegistryBuilder {
            config,
            resolver: Arc::new(TemplateSeedResolver::default()),
            sink: None,
        }
    }

    pub fn new(config: CrawlConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.ctx.config
    }

    fn handle(&self, job_id: &JobId) -> Result<Arc<JobHandle>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
            .ok_or_else(|| IntelError::JobNotFound(job_id.clone()))
    }

    /// Validate, register, and start a job. Returns its `pending` snapshot.
    pub fn submit(&self, request: JobRequest) -> Result<JobSnapshot> {
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return Err(IntelError::validation("query must not be empty"));
        }
        if self.shutdown.is_cancelled() {
            return Err(IntelError::validation("registry is shut down"));
        }

        let seeds = request
            .seeds
            .iter()
            .map(|s| {
                Url::parse(s).map_err(|e| IntelError::validation(format!("invalid seed '{s}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let config = &self.ctx.config;
        let limits = JobLimits {
            max_pages: coerce_budget(request.max_pages, config.default_max_pages),
            max_depth: coerce_budget(request.max_depth, config.default_max_depth),
            max_discovered: config.max_discovered,
        };
        let user_agent = request
            .user_agent
            .map(|ua| ua.trim().to_string())
            .filter(|ua| !ua.is_empty());

        let job_id = JobId::new();
        let job = Arc::new(JobHandle::new(
            job_id.clone(),
            query.clone(),
            limits,
            request.allowed_domains,
            user_agent,
            self.shutdown.child_token(),
        ));
        let snapshot = job.snapshot();

        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.clone(), job.clone());

        info!(
            %job_id,
            query = %snapshot.query,
            max_pages = snapshot.max_pages,
            max_depth = snapshot.max_depth,
            "job submitted"
        );
        self.tracker
            .spawn(run_job(job, query, seeds, self.ctx.clone()));

        Ok(snapshot)
    }

    /// Current snapshot; errors only for an unknown id.
    pub fn status(&self, job_id: &JobId) -> Result<JobSnapshot> {
        Ok(self.handle(job_id)?.snapshot())
    }

    pub fn cancel(&self, job_id: &JobId) -> Result<JobSnapshot> {
        let snapshot = self.handle(job_id)?.cancel()?;
        info!(%job_id, "job cancelled");
        Ok(snapshot)
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|job| job.snapshot())
            .collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        jobs
    }

    /// Counted page records of a job.
    pub fn results(&self, job_id: &JobId) -> Result<Vec<PageRecord>> {
        Ok(self.handle(job_id)?.results())
    }

    /// Wait until the job is terminal and downstream delivery has finished.
    pub async fn wait(&self, job_id: &JobId) -> Result<JobSnapshot> {
        let job = self.handle(job_id)?;
        Ok(job.wait().await)
    }

    /// Cancel every live job and wait for all runners to finish.
    pub async fn shutdown(&self) {
        let live: Vec<Arc<JobHandle>> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|job| !job.status().is_terminal())
            .cloned()
            .collect();
        for job in live {
            let _ = job.cancel();
        }
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("job registry shut down");
    }
}

fn coerce_budget(requested: Option<i64>, default: u32) -> u32 {
    match requested {
        Some(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
        _ => default,
    }
}

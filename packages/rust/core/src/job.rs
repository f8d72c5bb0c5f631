//! Job-scoped crawl state.
//!
//! A [`JobHandle`] owns one job's record, frontier, dedup index and counters.
//! Every mutation goes through one of its atomic operations (`admit`,
//! `next_entry`, `complete`, `cancel`, `fail`, `finish`), each a single short
//! critical section on a `std::sync::Mutex`. Nothing awaits under the lock.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, futures::Notified, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use intelgraph_crawler::{DedupIndex, normalize_url};
use intelgraph_shared::{IntelError, JobId, JobStatus, PageRecord, Result};

/// Submission parameters. Non-positive budgets fall back to the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    pub query: String,
    #[serde(default)]
    pub max_pages: Option<i64>,
    #[serde(default)]
    pub max_depth: Option<i64>,
    /// Hosts discovered links must belong to (subdomains included).
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Explicit seed URLs; bypasses seed resolution when non-empty.
    #[serde(default)]
    pub seeds: Vec<String>,
}

impl JobRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Point-in-time view of a job, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub query: String,
    pub pages_crawled: u32,
    pub urls_found: u32,
    pub pages_failed: u32,
    /// `pages_crawled / max_pages`, as a percentage clamped to 0..=100.
    pub progress: u8,
    pub max_pages: u32,
    pub max_depth: u32,
    pub allowed_domains: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// A URL waiting to be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub url: Url,
    pub depth: u32,
    pub job_id: JobId,
}

/// Result of [`JobHandle::next_entry`].
pub enum NextEntry<'a> {
    Entry(FrontierEntry, InFlight<'a>),
    /// Frontier empty but fetches are in flight; more URLs may arrive.
    Wait,
    /// Nothing left to do: budget met, frontier drained, or job terminal.
    Exhausted,
}

/// Why a URL was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Terminal,
    BudgetMet,
    TooDeep,
    CeilingReached,
    OffDomain,
    Invalid,
    Duplicate,
}

/// Per-job limits that are not part of the public record.
#[derive(Debug, Clone)]
pub struct JobLimits {
    pub max_pages: u32,
    pub max_depth: u32,
    pub max_discovered: usize,
}

struct JobState {
    query: String,
    max_pages: u32,
    max_depth: u32,
    allowed_domains: Vec<String>,
    status: JobStatus,
    pages_crawled: u32,
    urls_found: u32,
    pages_failed: u32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    frontier: VecDeque<FrontierEntry>,
    /// Dropped on the terminal transition.
    dedup: Option<DedupIndex>,
    in_flight: usize,
    results: Vec<PageRecord>,
}

impl JobState {
    /// Terminal transition: release the crawl-time structures.
    fn terminate(&mut self, status: JobStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.frontier = VecDeque::new();
        self.dedup = None;
    }
}

pub struct JobHandle {
    id: JobId,
    user_agent: Option<String>,
    max_discovered: usize,
    state: Mutex<JobState>,
    cancel: CancellationToken,
    changed: Notify,
    status_tx: watch::Sender<JobStatus>,
    settled_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("status", &*self.status_tx.borrow())
            .finish()
    }
}

impl JobHandle {
    pub fn new(
        id: JobId,
        query: String,
        limits: JobLimits,
        allowed_domains: Vec<String>,
        user_agent: Option<String>,
        cancel: CancellationToken,
    ) -> Self {
        let allowed_domains = allowed_domains
            .into_iter()
            .map(|d| d.trim().trim_start_matches("*.").trim_end_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        Self {
            id,
            user_agent,
            max_discovered: limits.max_discovered,
            state: Mutex::new(JobState {
                query,
                max_pages: limits.max_pages,
                max_depth: limits.max_depth,
                allowed_domains,
                status: JobStatus::Pending,
                pages_crawled: 0,
                urls_found: 0,
                pages_failed: 0,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                error: None,
                frontier: VecDeque::new(),
                dedup: Some(DedupIndex::new()),
                in_flight: 0,
                results: Vec::new(),
            }),
            cancel,
            changed: Notify::new(),
            status_tx: watch::channel(JobStatus::Pending).0,
            settled_tx: watch::channel(false).0,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, status: JobStatus) {
        self.status_tx.send_replace(status);
        self.changed.notify_waiters();
    }

    /// Future resolving on the next frontier/in-flight change. Call
    /// `enable()` on it before checking [`JobHandle::next_entry`].
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }

    /// Admit a URL to the frontier. Checks, in order: job not terminal,
    /// budget not met, depth, discovery ceiling, allowed domains (not for
    /// seeds), then the dedup claim.
    pub fn admit(&self, url: &Url, depth: u32, is_seed: bool) -> std::result::Result<(), Rejection> {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return Err(Rejection::Terminal);
        }
        if state.pages_crawled >= state.max_pages {
            return Err(Rejection::BudgetMet);
        }
        if depth > state.max_depth {
            return Err(Rejection::TooDeep);
        }
        if state.urls_found as usize >= self.max_discovered {
            return Err(Rejection::CeilingReached);
        }
        if !is_seed && !host_allowed(&state.allowed_domains, url) {
            return Err(Rejection::OffDomain);
        }
        let Some(normalized) = normalize_url(url) else {
            return Err(Rejection::Invalid);
        };
        let Some(dedup) = state.dedup.as_ref() else {
            return Err(Rejection::Terminal);
        };
        if !dedup.try_claim(&normalized) {
            return Err(Rejection::Duplicate);
        }
        let url = Url::parse(&normalized).map_err(|_| Rejection::Invalid)?;

        state.frontier.push_back(FrontierEntry {
            url,
            depth,
            job_id: self.id.clone(),
        });
        state.urls_found += 1;
        drop(state);
        self.changed.notify_waiters();
        Ok(())
    }

    /// Pop the next entry. The first pop moves the job to `running`.
    pub fn next_entry(&self) -> NextEntry<'_> {
        let mut state = self.lock();
        if state.status.is_terminal() || state.pages_crawled >= state.max_pages {
            return NextEntry::Exhausted;
        }
        match state.frontier.pop_front() {
            Some(entry) => {
                state.in_flight += 1;
                let started = state.status == JobStatus::Pending;
                if started {
                    state.status = JobStatus::Running;
                    state.started_at = Some(Utc::now());
                }
                drop(state);
                if started {
                    self.status_tx.send_replace(JobStatus::Running);
                }
                NextEntry::Entry(entry, InFlight { job: self })
            }
            None if state.in_flight == 0 => NextEntry::Exhausted,
            None => NextEntry::Wait,
        }
    }

    /// Record a fetch outcome. Returns the links to follow; empty when the
    /// record was not counted or is already at the depth limit.
    pub fn complete(&self, record: PageRecord) -> Vec<String> {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return Vec::new();
        }
        if !record.is_success() {
            state.pages_failed += 1;
            return Vec::new();
        }
        if state.pages_crawled >= state.max_pages {
            return Vec::new();
        }

        state.pages_crawled += 1;
        let links = if record.depth < state.max_depth {
            record.links.clone()
        } else {
            Vec::new()
        };
        state.results.push(record);
        links
    }

    /// `pending`/`running` → `cancelled`.
    pub fn cancel(&self) -> Result<JobSnapshot> {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return Err(IntelError::AlreadyTerminal {
                job_id: self.id.clone(),
                status: state.status,
            });
        }
        state.terminate(JobStatus::Cancelled);
        let snapshot = self.snapshot_locked(&state);
        drop(state);

        self.cancel.cancel();
        self.publish(JobStatus::Cancelled);
        Ok(snapshot)
    }

    /// Move to `failed` unless already terminal.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return false;
        }
        state.error = Some(message.into());
        state.terminate(JobStatus::Failed);
        drop(state);

        self.cancel.cancel();
        self.publish(JobStatus::Failed);
        true
    }

    /// Move to `completed` unless already terminal.
    pub fn finish(&self) -> bool {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return false;
        }
        if state.started_at.is_none() {
            state.started_at = Some(Utc::now());
        }
        state.terminate(JobStatus::Completed);
        drop(state);

        self.publish(JobStatus::Completed);
        true
    }

    pub fn status(&self) -> JobStatus {
        *self.status_tx.borrow()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.lock();
        self.snapshot_locked(&state)
    }

    fn snapshot_locked(&self, state: &JobState) -> JobSnapshot {
        let progress = if state.max_pages == 0 {
            0
        } else {
            (u64::from(state.pages_crawled) * 100 / u64::from(state.max_pages)).min(100) as u8
        };
        JobSnapshot {
            job_id: self.id.clone(),
            status: state.status,
            query: state.query.clone(),
            pages_crawled: state.pages_crawled,
            urls_found: state.urls_found,
            pages_failed: state.pages_failed,
            progress,
            max_pages: state.max_pages,
            max_depth: state.max_depth,
            allowed_domains: state.allowed_domains.clone(),
            created_at: state.created_at,
            started_at: state.started_at,
            completed_at: state.completed_at,
            error: state.error.clone(),
        }
    }

    /// Frontier entries and claimed URLs still held; both zero once terminal.
    pub fn retained(&self) -> (usize, usize) {
        let state = self.lock();
        (
            state.frontier.len(),
            state.dedup.as_ref().map_or(0, DedupIndex::len),
        )
    }

    /// Counted page records so far (at most `max_pages`).
    pub fn results(&self) -> Vec<PageRecord> {
        self.lock().results.clone()
    }

    /// Mark the job's runner as done (handoff included).
    pub(crate) fn settle(&self) {
        self.settled_tx.send_replace(true);
    }

    /// Wait until the job is terminal and its runner has finished.
    pub async fn wait(&self) -> JobSnapshot {
        let mut settled = self.settled_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = settled.wait_for(|done| *done).await;
        self.snapshot()
    }

    /// Wait for a terminal status only.
    pub async fn wait_terminal(&self) -> JobStatus {
        let mut status = self.status_tx.subscribe();
        match status.wait_for(|s| s.is_terminal()).await {
            Ok(s) => *s,
            Err(_) => self.status(),
        }
    }
}

/// RAII in-flight marker; dropping it wakes waiting workers.
pub struct InFlight<'a> {
    job: &'a JobHandle,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.job.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.job.changed.notify_waiters();
    }
}

fn host_allowed(allowed: &[String], url: &Url) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    allowed
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(max_pages: u32, max_depth: u32, allowed: &[&str]) -> JobHandle {
        JobHandle::new(
            JobId::new(),
            "spacex".into(),
            JobLimits {
                max_pages,
                max_depth,
                max_discovered: 10_000,
            },
            allowed.iter().map(|d| d.to_string()).collect(),
            None,
            CancellationToken::new(),
        )
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn page(url: &str, depth: u32, links: &[&str]) -> PageRecord {
        PageRecord {
            url: url.into(),
            depth,
            status_code: Some(200),
            title: None,
            content: "text".into(),
            links: links.iter().map(|l| l.to_string()).collect(),
            content_hash: None,
            fetched_at: Utc::now(),
            error: None,
        }
    }

    #[test]
    fn admit_checks_depth_before_claim() {
        let job = job(10, 1, &[]);
        assert_eq!(job.admit(&url("https://a.example/x"), 2, false), Err(Rejection::TooDeep));
        assert!(job.admit(&url("https://a.example/x"), 1, false).is_ok());
        assert_eq!(
            job.admit(&url("https://a.example/x#frag"), 1, false),
            Err(Rejection::Duplicate)
        );
        assert_eq!(job.snapshot().urls_found, 1);
    }

    #[test]
    fn discovery_ceiling() {
        let job = JobHandle::new(
            JobId::new(),
            "q".into(),
            JobLimits {
                max_pages: 10,
                max_depth: 2,
                max_discovered: 2,
            },
            Vec::new(),
            None,
            CancellationToken::new(),
        );
        assert!(job.admit(&url("https://a.example/1"), 0, true).is_ok());
        assert!(job.admit(&url("https://a.example/2"), 0, true).is_ok());
        assert_eq!(
            job.admit(&url("https://a.example/3"), 0, true),
            Err(Rejection::CeilingReached)
        );
    }

    #[test]
    fn allowed_domains_apply_to_discovered_links_only() {
        let job = job(10, 2, &["example.org"]);
        assert!(job.admit(&url("https://seed.example.com/"), 0, true).is_ok());
        assert_eq!(
            job.admit(&url("https://other.example.com/"), 1, false),
            Err(Rejection::OffDomain)
        );
        assert!(job.admit(&url("https://docs.example.org/a"), 1, false).is_ok());
        assert!(job.admit(&url("https://example.org/b"), 1, false).is_ok());
    }

    #[test]
    fn first_pop_starts_job() {
        let job = job(10, 1, &[]);
        assert!(matches!(job.next_entry(), NextEntry::Exhausted));
        job.admit(&url("https://a.example/"), 0, true).unwrap();
        assert_eq!(job.status(), JobStatus::Pending);

        let NextEntry::Entry(entry, guard) = job.next_entry() else {
            panic!("expected an entry");
        };
        assert_eq!(entry.depth, 0);
        assert_eq!(job.status(), JobStatus::Running);
        assert!(job.snapshot().started_at.is_some());
        assert!(matches!(job.next_entry(), NextEntry::Wait));
        drop(guard);
        assert!(matches!(job.next_entry(), NextEntry::Exhausted));
    }

    #[test]
    fn pages_crawled_capped_and_links_gated() {
        let job = job(2, 1, &[]);
        for i in 0..4 {
            job.admit(&url(&format!("https://a.example/{i}")), 0, true).unwrap();
        }

        let links = job.complete(page("https://a.example/0", 0, &["https://a.example/child"]));
        assert_eq!(links, vec!["https://a.example/child".to_string()]);
        assert!(job.complete(page("https://a.example/1", 1, &["https://a.example/deep"])).is_empty());
        assert!(job.complete(page("https://a.example/2", 0, &[])).is_empty());

        let snap = job.snapshot();
        assert_eq!(snap.pages_crawled, 2);
        assert_eq!(snap.progress, 100);
        assert_eq!(job.results().len(), 2);
        assert!(matches!(job.next_entry(), NextEntry::Exhausted));
        assert_eq!(
            job.admit(&url("https://a.example/late"), 1, false),
            Err(Rejection::BudgetMet)
        );
    }

    #[test]
    fn failures_counted_separately() {
        let job = job(5, 1, &[]);
        job.complete(PageRecord::failed("https://a.example/", 0, Some(500), "HTTP 500"));
        let snap = job.snapshot();
        assert_eq!(snap.pages_failed, 1);
        assert_eq!(snap.pages_crawled, 0);
        assert_eq!(snap.progress, 0);
    }

    #[test]
    fn cancel_is_terminal() {
        let job = job(5, 1, &[]);
        let snap = job.cancel().unwrap();
        assert_eq!(snap.status, JobStatus::Cancelled);
        assert!(job.cancel_token().is_cancelled());

        let err = job.cancel().unwrap_err();
        assert!(matches!(err, IntelError::AlreadyTerminal { status: JobStatus::Cancelled, .. }));
        assert!(!job.finish());
        assert!(!job.fail("late"));
        assert!(job.complete(page("https://a.example/", 0, &[])).is_empty());
        assert_eq!(job.snapshot().pages_crawled, 0);
    }

    #[test]
    fn fail_keeps_message() {
        let job = job(5, 1, &[]);
        assert!(job.fail("no seed URLs"));
        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.error.as_deref(), Some("no seed URLs"));
        assert!(snap.completed_at.is_some());
    }

    fn crowded(max_pages: u32) -> JobHandle {
        let job = job(max_pages, 2, &[]);
        for i in 0..30 {
            job.admit(&url(&format!("https://a.example/p{i}")), 0, true).unwrap();
        }
        assert_eq!(job.retained(), (30, 30));
        job
    }

    #[test]
    fn terminal_transitions_release_crawl_state() {
        let completed = crowded(2);
        let NextEntry::Entry(_, guard) = completed.next_entry() else {
            panic!("expected an entry");
        };
        completed.complete(page("https://a.example/p0", 0, &[]));
        drop(guard);
        assert!(completed.finish());
        assert_eq!(completed.retained(), (0, 0));
        assert_eq!(
            completed.admit(&url("https://a.example/p0"), 0, true),
            Err(Rejection::Terminal)
        );
        assert_eq!(completed.snapshot().urls_found, 30);

        let failed = crowded(5);
        assert!(failed.fail("boom"));
        assert_eq!(failed.retained(), (0, 0));

        let cancelled = crowded(5);
        cancelled.cancel().unwrap();
        assert_eq!(cancelled.retained(), (0, 0));
    }

    #[tokio::test]
    async fn wait_terminal_observes_cancel() {
        let job = std::sync::Arc::new(job(5, 1, &[]));
        let waiter = {
            let job = job.clone();
            tokio::spawn(async move { job.wait_terminal().await })
        };
        tokio::task::yield_now().await;
        job.cancel().unwrap();
        assert_eq!(waiter.await.unwrap(), JobStatus::Cancelled);
    }
}

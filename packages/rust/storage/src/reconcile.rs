//! Reconciliation queue for vector writes that failed after the graph write
//! succeeded.
//!
//! Entries are keyed by entity id; a newer failure for the same id replaces
//! the pending entry (its embedding is fresher). Retries back off
//! exponentially and are dead-lettered after `max_retries` attempts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use intelgraph_shared::ReconcileConfig;

use crate::key::DerivedKey;
use crate::writer::KnowledgeWriter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Tick of the background loop.
    pub interval: Duration,
}

impl ReconcilePolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self::from(&ReconcileConfig::default())
    }
}

impl From<&ReconcileConfig> for ReconcilePolicy {
    fn from(config: &ReconcileConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            interval: Duration::from_millis(config.interval_ms.max(1)),
        }
    }
}

/// A vector record waiting to be re-upserted.
#[derive(Debug, Clone)]
pub struct PendingVector {
    pub id: Uuid,
    pub key: DerivedKey,
    pub embedding: Vec<f32>,
    /// Failed attempts so far, the original write included.
    pub attempts: u32,
    pub next_attempt_at: Instant,
    pub last_error: String,
    generation: u64,
}

/// What happened to an entry handed back after a failed retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    Scheduled,
    Exhausted,
    /// A newer entry for the same id arrived meanwhile.
    Superseded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub attempted: usize,
    pub reconciled: usize,
    pub rescheduled: usize,
    pub exhausted: usize,
    /// Graph node no longer exists; entry dropped.
    pub dropped: usize,
    pub remaining: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: HashMap<Uuid, PendingVector>,
    dead: Vec<PendingVector>,
    generation: u64,
}

#[derive(Debug)]
pub struct ReconcileQueue {
    policy: ReconcilePolicy,
    state: Mutex<QueueState>,
}

impl ReconcileQueue {
    pub fn new(policy: ReconcilePolicy) -> Self {
        Self {
            policy,
            state: Mutex::default(),
        }
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    /// Queue a fresh failure from the write path.
    pub fn push(&self, key: DerivedKey, embedding: Vec<f32>, error: impl Into<String>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.generation += 1;
        let entry = PendingVector {
            id: key.id(),
            key,
            embedding,
            attempts: 1,
            next_attempt_at: Instant::now() + self.policy.backoff(1),
            last_error: error.into(),
            generation: state.generation,
        };
        state.pending.insert(entry.id, entry);
    }

    /// Remove and return every entry due at `now`.
    pub fn take_due(&self, now: Instant) -> Vec<PendingVector> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let due: Vec<Uuid> = state
            .pending
            .values()
            .filter(|e| e.next_attempt_at <= now)
            .map(|e| e.id)
            .collect();
        due.iter()
            .filter_map(|id| state.pending.remove(id))
            .collect()
    }

    /// Hand back an entry whose retry failed.
    pub fn reschedule(&self, mut entry: PendingVector, error: impl Into<String>) -> Requeue {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state
            .pending
            .get(&entry.id)
            .is_some_and(|newer| newer.generation > entry.generation)
        {
            return Requeue::Superseded;
        }

        entry.attempts += 1;
        entry.last_error = error.into();
        if entry.attempts > self.policy.max_retries {
            state.dead.push(entry);
            return Requeue::Exhausted;
        }
        entry.next_attempt_at = Instant::now() + self.policy.backoff(entry.attempts);
        state.pending.insert(entry.id, entry);
        Requeue::Scheduled
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .contains_key(&id)
    }

    /// Entries that ran out of retries.
    pub fn dead_letters(&self) -> Vec<PendingVector> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dead
            .clone()
    }
}

/// Drive [`KnowledgeWriter::reconcile_pass`] every `policy.interval` until
/// `cancel` fires.
pub fn spawn_reconciler(writer: Arc<KnowledgeWriter>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(writer.reconcile_policy().interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if writer.pending_reconciliations() == 0 {
                        continue;
                    }
                    let report = writer.reconcile_pass().await;
                    if report.attempted > 0 {
                        tracing::debug!(
                            reconciled = report.reconciled,
                            rescheduled = report.rescheduled,
                            exhausted = report.exhausted,
                            remaining = report.remaining,
                            "reconcile pass"
                        );
                    }
                }
            }
        }
        tracing::debug!("reconciler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use intelgraph_shared::EntityLabel;

    fn policy(max_retries: u32) -> ReconcilePolicy {
        ReconcilePolicy {
            max_retries,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            interval: Duration::from_secs(1),
        }
    }

    fn key(text: &str) -> DerivedKey {
        DerivedKey::new(text, EntityLabel::Organization)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(3);
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(1000));
        assert_eq!(p.backoff(3), Duration::from_millis(2000));
        assert_eq!(p.backoff(20), Duration::from_secs(30));
    }

    #[test]
    fn policy_from_config() {
        let p = ReconcilePolicy::default();
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.base_backoff, Duration::from_millis(500));
        assert_eq!(p.max_backoff, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_wait_for_backoff() {
        let queue = ReconcileQueue::new(policy(3));
        queue.push(key("SpaceX"), vec![1.0], "down");

        assert!(queue.take_due(Instant::now()).is_empty());
        tokio::time::advance(Duration::from_millis(500)).await;
        let due = queue.take_due(Instant::now());
        assert_eq!(due.len(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_after_max_retries() {
        let queue = ReconcileQueue::new(policy(2));
        queue.push(key("SpaceX"), vec![1.0], "down");

        tokio::time::advance(Duration::from_secs(1)).await;
        let entry = queue.take_due(Instant::now()).remove(0);
        assert_eq!(queue.reschedule(entry, "still down"), Requeue::Exhausted);
        assert!(queue.is_empty());
        assert_eq!(queue.dead_letters().len(), 1);
        assert_eq!(queue.dead_letters()[0].last_error, "still down");
    }

    #[tokio::test(start_paused = true)]
    async fn newer_push_supersedes_retry() {
        let queue = ReconcileQueue::new(policy(3));
        queue.push(key("SpaceX"), vec![1.0], "down");
        tokio::time::advance(Duration::from_secs(1)).await;
        let stale = queue.take_due(Instant::now()).remove(0);

        queue.push(key("SpaceX"), vec![2.0], "down again");
        assert_eq!(queue.reschedule(stale, "retry failed"), Requeue::Superseded);
        assert_eq!(queue.len(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let fresh = queue.take_due(Instant::now()).remove(0);
        assert_eq!(fresh.embedding, vec![2.0]);
        assert_eq!(fresh.attempts, 1);
    }
}

//! Per-domain politeness gate.
//!
//! Each domain gets a lazily created gate holding a parallelism semaphore and
//! a small schedule. A fetch may start once both of these hold:
//! - at least `delay` has passed since the previous start on the domain;
//! - at least `delay` has passed since the domain's last completed fetch.
//!
//! Gates are never evicted for the lifetime of the limiter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Limits concurrency and pacing per domain.
#[derive(Debug)]
pub struct PolitenessLimiter {
    parallelism: usize,
    delay: Duration,
    gates: Mutex<HashMap<String, Arc<DomainGate>>>,
}

#[derive(Debug)]
struct DomainGate {
    slots: Arc<Semaphore>,
    schedule: Mutex<Schedule>,
}

#[derive(Debug, Default)]
struct Schedule {
    last_start: Option<Instant>,
    last_release: Option<Instant>,
}

impl Schedule {
    fn ready_at(&self, delay: Duration) -> Option<Instant> {
        let after_start = self.last_start.map(|t| t + delay);
        let after_release = self.last_release.map(|t| t + delay);
        after_start.max(after_release)
    }
}

impl PolitenessLimiter {
    pub fn new(parallelism: usize, delay: Duration) -> Self {
        Self {
            parallelism: parallelism.max(1),
            delay,
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of domains seen so far.
    pub fn domain_count(&self) -> usize {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn gate(&self, domain: &str) -> Arc<DomainGate> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates
            .entry(domain.to_ascii_lowercase())
            .or_insert_with(|| {
                Arc::new(DomainGate {
                    slots: Arc::new(Semaphore::new(self.parallelism)),
                    schedule: Mutex::new(Schedule::default()),
                })
            })
            .clone()
    }

    /// Wait until a fetch against `domain` may start.
    ///
    /// Returns `None` if `cancel` fires first; no slot is held in that case.
    pub async fn acquire(
        &self,
        domain: &str,
        cancel: &CancellationToken,
    ) -> Option<PolitenessPermit> {
        let gate = self.gate(domain);

        let slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            permit = gate.slots.clone().acquire_owned() => permit.ok()?,
        };

        loop {
            let wait = {
                let mut schedule = gate.schedule.lock().unwrap_or_else(PoisonError::into_inner);
                let now = Instant::now();
                match schedule.ready_at(self.delay) {
                    Some(ready) if ready > now => ready - now,
                    _ => {
                        schedule.last_start = Some(now);
                        break;
                    }
                }
            };

            trace!(domain, wait_ms = wait.as_millis() as u64, "politeness wait");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        Some(PolitenessPermit {
            gate,
            _slot: slot,
            released: false,
        })
    }
}

/// A held fetch slot. Releasing (explicitly or on drop) records the
/// completion time used for the post-fetch delay.
#[derive(Debug)]
pub struct PolitenessPermit {
    gate: Arc<DomainGate>,
    _slot: OwnedSemaphorePermit,
    released: bool,
}

impl PolitenessPermit {
    pub fn release(mut self) {
        self.mark_released();
    }

    fn mark_released(&mut self) {
        if !self.released {
            self.released = true;
            let mut schedule = self
                .gate
                .schedule
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            schedule.last_release = Some(Instant::now());
        }
    }
}

impl Drop for PolitenessPermit {
    fn drop(&mut self) {
        self.mark_released();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn successive_starts_are_spaced_by_delay() {
        let limiter = Arc::new(PolitenessLimiter::new(2, Duration::from_secs(1)));
        let cancel = CancellationToken::new();
        let starts = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            let starts = starts.clone();
            tasks.push(tokio::spawn(async move {
                let permit = limiter.acquire("example.com", &cancel).await.unwrap();
                starts.lock().unwrap().push(Instant::now());
                tokio::time::sleep(Duration::from_millis(100)).await;
                permit.release();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let mut starts = starts.lock().unwrap().clone();
        starts.sort();
        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn parallelism_caps_in_flight() {
        let limiter = Arc::new(PolitenessLimiter::new(2, Duration::from_millis(10)));
        let cancel = CancellationToken::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = limiter.acquire("example.com", &cancel).await.unwrap();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn domains_are_independent() {
        let limiter = PolitenessLimiter::new(1, Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let started = Instant::now();
        let a = limiter.acquire("a.example", &cancel).await.unwrap();
        let b = limiter.acquire("b.example", &cancel).await.unwrap();
        assert!(Instant::now() - started < Duration::from_secs(1));
        assert_eq!(limiter.domain_count(), 2);
        drop((a, b));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_after_completion() {
        let limiter = PolitenessLimiter::new(2, Duration::from_secs(1));
        let cancel = CancellationToken::new();

        let first = limiter.acquire("example.com", &cancel).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        first.release();
        let released_at = Instant::now();

        let _second = limiter.acquire("example.com", &cancel).await.unwrap();
        assert!(Instant::now() - released_at >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_returns_without_slot() {
        let limiter = Arc::new(PolitenessLimiter::new(1, Duration::from_secs(60)));
        let cancel = CancellationToken::new();

        let held = limiter.acquire("example.com", &cancel).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire("example.com", &cancel).await.is_none() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        assert!(waiter.await.unwrap());

        drop(held);
        let gate = limiter.gate("example.com");
        assert_eq!(gate.slots.available_permits(), 1);
    }
}

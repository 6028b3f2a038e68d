//! Delayed re-submission of failed fetch targets with exponential backoff.

use crate::config::ScraperConfig;
use crate::metrics::MetricsCollector;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Receives targets whose retry delay has elapsed. Called while the
/// scheduler's lock is held, so implementations must not block.
pub trait Requeue: Send + Sync + 'static {
    fn requeue(&self, target: &str);
}

impl Requeue for mpsc::UnboundedSender<String> {
    fn requeue(&self, target: &str) {
        if self.send(target.to_string()).is_err() {
            log::debug!("retry: frontier closed, dropping {}", target);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    /// Zero disables the cap.
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base: Duration::from_millis(200),
            max: Duration::from_secs(2),
        }
    }
}

impl From<&ScraperConfig> for RetryPolicy {
    fn from(config: &ScraperConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: config.retry_backoff(),
            max: config.retry_backoff_max(),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^(attempt-1)`, clamped to `max`. A zero base falls back to
    /// 100ms.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = if self.base.is_zero() {
            DEFAULT_BACKOFF_BASE
        } else {
            self.base
        };

        let exp = (attempt - 1).min(31);
        let delay = base.saturating_mul(1u32 << exp);
        if !self.max.is_zero() && delay > self.max {
            self.max
        } else {
            delay
        }
    }
}

struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct RetryState {
    attempts: HashMap<String, u32>,
    timers: HashMap<String, Timer>,
    next_generation: u64,
    total_retries: u64,
    stopped: bool,
}

struct Inner {
    policy: RetryPolicy,
    requeue: Box<dyn Requeue>,
    metrics: MetricsCollector,
    cancel: CancellationToken,
    state: Mutex<RetryState>,
}

/// Arms one timer per failed target and hands the target back to the
/// producer when it fires.
#[derive(Clone)]
pub struct RetryScheduler {
    inner: Arc<Inner>,
}

impl RetryScheduler {
    pub fn new(
        policy: RetryPolicy,
        requeue: impl Requeue,
        metrics: MetricsCollector,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                requeue: Box::new(requeue),
                metrics,
                cancel,
                state: Mutex::new(RetryState::default()),
            }),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// Arms a retry for `target` and returns whether one was armed.
    ///
    /// Denied when retries are disabled, the target has used up its
    /// attempts, the scheduler was stopped, or the cancel token fired. Any
    /// timer already armed for the target is replaced.
    pub fn schedule(&self, target: &str) -> bool {
        let policy = self.inner.policy;
        if policy.max_retries == 0 || self.inner.cancel.is_cancelled() {
            return false;
        }

        let mut state = self.inner.state();
        if state.stopped || self.inner.cancel.is_cancelled() {
            return false;
        }

        let attempt = state.attempts.get(target).copied().unwrap_or(0);
        if attempt >= policy.max_retries {
            return false;
        }

        let attempt = attempt + 1;
        state.attempts.insert(target.to_string(), attempt);
        state.total_retries += 1;
        self.inner.metrics.increment_retries();

        let delay = policy.backoff(attempt);
        let generation = state.next_generation;
        state.next_generation += 1;

        if let Some(previous) = state.timers.remove(target) {
            previous.handle.abort();
        }

        let inner = self.inner.clone();
        let key = target.to_string();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = inner.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => inner.fire(&key, generation),
            }
        });
        state
            .timers
            .insert(target.to_string(), Timer { generation, handle });

        log::debug!(
            "retry: scheduled {} attempt {} in {:?}",
            target,
            attempt,
            delay
        );
        true
    }

    /// Cancels every armed timer and refuses further scheduling. Once this
    /// returns no target is requeued.
    pub fn stop(&self) {
        let mut state = self.inner.state();
        if state.stopped {
            return;
        }
        state.stopped = true;
        for (_, timer) in state.timers.drain() {
            timer.handle.abort();
        }
    }

    pub fn total_retries(&self) -> u64 {
        self.inner.state().total_retries
    }

    /// Attempts used so far by `target`.
    pub fn attempts(&self, target: &str) -> u32 {
        self.inner
            .state()
            .attempts
            .get(target)
            .copied()
            .unwrap_or(0)
    }

    /// Number of retries armed but not yet fired.
    pub fn pending(&self) -> usize {
        self.inner.state().timers.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state().stopped
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, RetryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, target: &str, generation: u64) {
        let mut state = self.state();
        if state.stopped || self.cancel.is_cancelled() {
            return;
        }
        match state.timers.get(target) {
            Some(timer) if timer.generation == generation => {}
            // replaced by a newer timer
            _ => return,
        }
        state.timers.remove(target);
        // under the lock, so stop() cannot return while this is in progress
        self.requeue.requeue(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(policy: RetryPolicy) -> (RetryScheduler, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler =
            RetryScheduler::new(policy, tx, MetricsCollector::new(), CancellationToken::new());
        (scheduler, rx)
    }

    fn slow_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base: Duration::from_secs(3600),
            max: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn test_schedule_respects_limit() {
        let (scheduler, _rx) = scheduler(slow_policy(2));

        assert!(scheduler.schedule("http://example.com/page"));
        assert!(scheduler.schedule("http://example.com/page"));
        assert!(!scheduler.schedule("http://example.com/page"));

        scheduler.stop();
        assert_eq!(scheduler.total_retries(), 2);
        assert_eq!(scheduler.attempts("http://example.com/page"), 2);
    }

    #[tokio::test]
    async fn test_replacing_keeps_one_timer_per_target() {
        let (scheduler, _rx) = scheduler(slow_policy(3));

        assert!(scheduler.schedule("http://example.com/a"));
        assert!(scheduler.schedule("http://example.com/a"));
        assert!(scheduler.schedule("http://example.com/b"));
        assert_eq!(scheduler.pending(), 2);
        scheduler.stop();
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_zero_max_retries_never_schedules() {
        let (scheduler, _rx) = scheduler(slow_policy(0));
        assert!(!scheduler.schedule("http://example.com/page"));
        assert_eq!(scheduler.total_retries(), 0);
    }

    #[test]
    fn test_backoff_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            base: Duration::from_millis(200),
            max: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert!(policy.backoff(4) <= Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_defaults_and_monotonic() {
        let policy = RetryPolicy {
            max_retries: 5,
            base: Duration::ZERO,
            max: Duration::ZERO,
        };
        assert_eq!(policy.backoff(0), DEFAULT_BACKOFF_BASE);
        assert_eq!(policy.backoff(1), DEFAULT_BACKOFF_BASE);
        assert_eq!(policy.backoff(3), DEFAULT_BACKOFF_BASE * 4);

        let delays: Vec<_> = (1..=40).map(|a| policy.backoff(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_fired_timer_requeues_target() {
        let (scheduler, mut rx) = scheduler(RetryPolicy {
            max_retries: 1,
            base: Duration::from_millis(10),
            max: Duration::from_millis(10),
        });

        assert!(scheduler.schedule("http://example.com/retry"));
        let target = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("retry should fire")
            .expect("channel open");
        assert_eq!(target, "http://example.com/retry");
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_stop_prevents_requeue() {
        let (scheduler, mut rx) = scheduler(RetryPolicy {
            max_retries: 2,
            base: Duration::from_millis(20),
            max: Duration::from_millis(20),
        });

        assert!(scheduler.schedule("http://example.com/page"));
        scheduler.stop();
        scheduler.stop();
        assert!(scheduler.is_stopped());
        assert!(!scheduler.schedule("http://example.com/other"));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancellation_blocks_scheduling_and_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let scheduler = RetryScheduler::new(
            RetryPolicy {
                max_retries: 3,
                base: Duration::from_millis(20),
                max: Duration::from_millis(20),
            },
            tx,
            MetricsCollector::new(),
            cancel.clone(),
        );

        assert!(scheduler.schedule("http://example.com/armed"));
        cancel.cancel();
        assert!(!scheduler.schedule("http://example.com/late"));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.total_retries(), 1);
    }

    #[tokio::test]
    async fn test_retries_counted_in_metrics() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let metrics = MetricsCollector::new();
        let scheduler = RetryScheduler::new(
            slow_policy(2),
            tx,
            metrics.clone(),
            CancellationToken::new(),
        );
        scheduler.schedule("http://example.com/a");
        scheduler.schedule("http://example.com/b");
        scheduler.stop();
        assert_eq!(metrics.snapshot().retries, 2);
    }
}

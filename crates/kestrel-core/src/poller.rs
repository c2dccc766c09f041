//! Deadline-bounded condition polling.
//!
//! Every wait in the engine goes through [`Poller::poll`]: the probe is
//! evaluated, and if it does not hold the poller sleeps for the next backoff
//! interval (never past the deadline) and tries again. A wait always ends in
//! one of four ways: satisfied, timed out, cancelled, or fatal.

use crate::condition::Condition;
use crate::error::PageError;
use crate::page::{Page, PageResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

/// Used when `start + timeout` cannot be represented.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(25);
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;

/// An absolute point in time after which a wait gives up.
///
/// Fixed at construction; nothing extends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    /// Deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self::after_from(Instant::now(), timeout)
    }

    /// Deadline `timeout` after `start`, saturating instead of overflowing
    pub fn after_from(start: Instant, timeout: Duration) -> Self {
        let at = start
            .checked_add(timeout)
            .or_else(|| start.checked_add(FAR_FUTURE))
            .unwrap_or(start);
        Self(at)
    }

    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.0
    }
}

/// Exponential backoff settings for polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub factor: u32,
}

impl PollConfig {
    pub fn new(initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            max_interval,
            factor: DEFAULT_BACKOFF_FACTOR,
        }
    }

    /// Constant interval, no backoff
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            factor: 1,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_interval.min(self.max_interval),
            max: self.max_interval,
            factor: self.factor.max(1),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_INTERVAL, DEFAULT_MAX_INTERVAL)
    }
}

/// Sequence of poll intervals, growing by `factor` up to `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    factor: u32,
}

impl Backoff {
    pub fn next_interval(&mut self) -> Duration {
        let current = self.next;
        self.next = current.saturating_mul(self.factor).min(self.max);
        current
    }
}

/// One evaluation of a condition against the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub satisfied: bool,
    /// Human-readable rendering of what was seen
    pub observed: String,
}

impl Observation {
    pub fn met(observed: impl Into<String>) -> Self {
        Self {
            satisfied: true,
            observed: observed.into(),
        }
    }

    pub fn unmet(observed: impl Into<String>) -> Self {
        Self {
            satisfied: false,
            observed: observed.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Satisfied {
        observation: Observation,
        attempts: u32,
    },
    TimedOut {
        last: Option<Observation>,
        attempts: u32,
    },
    Cancelled {
        last: Option<Observation>,
    },
    Fatal(PageError),
}

impl PollOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PollOutcome::Satisfied { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Poller {
    config: PollConfig,
}

impl Poller {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Evaluate `probe` until it is satisfied or the wait ends.
    ///
    /// A probe error counts as "not yet satisfied" unless it is fatal, in
    /// which case polling stops immediately. The probe is always evaluated at
    /// least once, and once more at the deadline before giving up.
    pub async fn poll<F, Fut>(
        &self,
        mut probe: F,
        deadline: Deadline,
        cancel: &CancellationToken,
    ) -> PollOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PageResult<Observation>>,
    {
        let mut backoff = self.config.backoff();
        let mut last: Option<Observation> = None;
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return PollOutcome::Cancelled { last };
            }

            attempts = attempts.saturating_add(1);
            // A check that hangs must not outlive the deadline
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled { last },
                result = probe() => result,
                _ = sleep_until(deadline.instant()) => {
                    tracing::debug!(attempts, "check still pending at the deadline");
                    return PollOutcome::TimedOut { last, attempts };
                }
            };

            match result {
                Ok(observation) if observation.satisfied => {
                    tracing::debug!(attempts, "condition satisfied");
                    return PollOutcome::Satisfied {
                        observation,
                        attempts,
                    };
                }
                Ok(observation) => last = Some(observation),
                Err(err) if err.is_fatal() => {
                    tracing::warn!("fatal page error while polling: {}", err);
                    return PollOutcome::Fatal(err);
                }
                Err(err) => {
                    tracing::debug!("probe failed, retrying: {}", err);
                    last = Some(Observation::unmet(format!("error: {}", err)));
                }
            }

            let remaining = deadline.remaining();
            if remaining.is_zero() {
                return PollOutcome::TimedOut { last, attempts };
            }

            let pause = backoff.next_interval().min(remaining);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled { last },
                _ = sleep(pause) => {}
            }
        }
    }

    /// Poll a [`Condition`] against `page`
    pub async fn wait_for(
        &self,
        page: &dyn Page,
        condition: &Condition,
        deadline: Deadline,
        cancel: &CancellationToken,
    ) -> PollOutcome {
        tracing::debug!("waiting for {}", condition.description());
        self.poll(|| condition.observe(page), deadline, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> Poller {
        Poller::new(PollConfig::new(
            Duration::from_millis(5),
            Duration::from_millis(20),
        ))
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = PollConfig::new(Duration::from_millis(25), Duration::from_millis(150))
            .backoff();
        let intervals: Vec<u64> = (0..5)
            .map(|_| backoff.next_interval().as_millis() as u64)
            .collect();
        assert_eq!(intervals, vec![25, 50, 100, 150, 150]);
    }

    #[test]
    fn test_backoff_initial_above_max_is_clamped() {
        let mut backoff =
            PollConfig::new(Duration::from_secs(5), Duration::from_millis(100)).backoff();
        assert_eq!(backoff.next_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_deadline_saturates() {
        let start = Instant::now();
        let deadline = Deadline::after_from(start, Duration::MAX);
        assert!(deadline.instant() > start);
        assert!(!deadline.is_elapsed());
    }

    #[test]
    fn test_zero_deadline_is_elapsed() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_elapsed());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_satisfied_immediately() {
        let outcome = fast()
            .poll(
                || async { Ok(Observation::met("ready")) },
                Deadline::after(Duration::from_secs(1)),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(
            outcome,
            PollOutcome::Satisfied {
                observation: Observation::met("ready"),
                attempts: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_satisfied_shortly_after_becoming_true() {
        let poller = fast();
        let start = Instant::now();
        let becomes_true = start + Duration::from_millis(60);

        let outcome = poller
            .poll(
                || async move {
                    if Instant::now() >= becomes_true {
                        Ok(Observation::met("true"))
                    } else {
                        Ok(Observation::unmet("false"))
                    }
                },
                Deadline::after(Duration::from_secs(2)),
                &CancellationToken::new(),
            )
            .await;

        assert!(outcome.is_satisfied());
        let late_by = Instant::now().saturating_duration_since(becomes_true);
        // one max interval plus scheduling slack
        assert!(late_by <= Duration::from_millis(20) + Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_times_out_not_before_deadline() {
        let start = Instant::now();
        let timeout = Duration::from_millis(80);

        let outcome = fast()
            .poll(
                || async { Ok(Observation::unmet("still loading")) },
                Deadline::after_from(start, timeout),
                &CancellationToken::new(),
            )
            .await;

        assert!(start.elapsed() >= timeout);
        match outcome {
            PollOutcome::TimedOut { last, attempts } => {
                assert_eq!(last, Some(Observation::unmet("still loading")));
                assert!(attempts >= 2);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zero_timeout_evaluates_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome = fast()
            .poll(
                move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(Observation::unmet("no"))
                    }
                },
                Deadline::after(Duration::ZERO),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(outcome, PollOutcome::TimedOut { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_is_prompt() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let interval = Duration::from_millis(20);
        let poller = Poller::new(PollConfig::fixed(interval));

        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome = poller
            .poll(
                || async { Ok(Observation::unmet("pending")) },
                Deadline::after(Duration::from_secs(10)),
                &cancel,
            )
            .await;

        match outcome {
            PollOutcome::Cancelled { last } => {
                assert_eq!(last, Some(Observation::unmet("pending")));
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_millis(50) + interval + Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_slow_probe() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome = fast()
            .poll(
                || async {
                    sleep(Duration::from_secs(30)).await;
                    Ok(Observation::met("too late"))
                },
                Deadline::after(Duration::from_secs(60)),
                &cancel,
            )
            .await;

        assert_eq!(outcome, PollOutcome::Cancelled { last: None });
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_hanging_check_times_out_at_deadline() {
        let start = Instant::now();
        let timeout = Duration::from_millis(100);

        let outcome = tokio::time::timeout(
            Duration::from_secs(3),
            fast().poll(
                || async {
                    sleep(Duration::from_secs(60)).await;
                    Ok(Observation::met("too late"))
                },
                Deadline::after_from(start, timeout),
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("poll must end at its deadline");

        assert_eq!(outcome, PollOutcome::TimedOut { last: None, attempts: 1 });
        assert!(start.elapsed() >= timeout);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_hanging_check_keeps_last_observation() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome = fast()
            .poll(
                move || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            Ok(Observation::unmet("loading"))
                        } else {
                            sleep(Duration::from_secs(60)).await;
                            Ok(Observation::met("too late"))
                        }
                    }
                },
                Deadline::after(Duration::from_millis(80)),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(
            outcome,
            PollOutcome::TimedOut {
                last: Some(Observation::unmet("loading")),
                attempts: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = fast()
            .poll(
                || async { Ok(Observation::met("true")) },
                Deadline::after(Duration::from_secs(1)),
                &cancel,
            )
            .await;

        assert_eq!(outcome, PollOutcome::Cancelled { last: None });
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome = fast()
            .poll(
                move || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(PageError::NotReady("document loading".into()))
                        } else {
                            Ok(Observation::met("loaded"))
                        }
                    }
                },
                Deadline::after(Duration::from_secs(1)),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(outcome, PollOutcome::Satisfied { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_fatal_error_aborts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome = fast()
            .poll(
                move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(PageError::ContextDestroyed("navigated away".into()))
                    }
                },
                Deadline::after(Duration::from_secs(5)),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(outcome, PollOutcome::Fatal(PageError::ContextDestroyed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

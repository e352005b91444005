//! A failure-rate circuit breaker for asynchronous calls.
//!
//! The breaker counts successes, failures and timeouts in a rolling window that is split into
//! buckets. Once the window holds more than `volume_threshold` calls and the share of failed calls
//! exceeds `error_threshold` percent, the breaker opens and rejects calls without running them.
//! After one window has passed it turns half-open and lets calls through again: the first
//! outcome decides whether it closes or opens for another window.
//!
//! ```text
//! Closed   --(volume and error rate over threshold)--> Open
//! Open     --(window elapsed since opening)----------> HalfOpen
//! HalfOpen --(call succeeded)------------------------> Closed
//! HalfOpen --(call failed or timed out)--------------> Open
//! ```
use std::{
    collections::VecDeque,
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::Deserialize;
use tokio::time::Instant;

/// Configuration for [`CircuitBreaker`]. Durations are in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreakerConfig {
    /// Time a single call may take before it is cut short and counted as failed.
    pub timeout_duration: u64,
    /// Number of calls in the window that has to be exceeded before the breaker may open.
    pub volume_threshold: u32,
    /// Failure percentage that has to be exceeded for the breaker to open.
    pub error_threshold: u32,
    /// Length of the rolling window.
    pub window_duration: u64,
    /// Number of buckets the window is split into.
    pub num_buckets: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            timeout_duration: 1000,
            volume_threshold: 5,
            error_threshold: 50,
            window_duration: 10_000,
            num_buckets: 10,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_duration)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_duration)
    }

    fn bucket_duration(&self) -> Duration {
        self.window() / self.num_buckets.max(1)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_duration = timeout.as_millis() as u64;
        self
    }

    pub fn with_volume_threshold(mut self, volume_threshold: u32) -> Self {
        self.volume_threshold = volume_threshold;
        self
    }

    pub fn with_error_threshold(mut self, error_threshold: u32) -> Self {
        self.error_threshold = error_threshold;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window_duration = window.as_millis() as u64;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Failures produced by the breaker itself, as opposed to failures of the wrapped call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerError {
    #[error("circuit breaker open")]
    Open,
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    started_at: Instant,
    successes: u32,
    failures: u32,
    timeouts: u32,
    short_circuits: u32,
}

impl Bucket {
    fn new(started_at: Instant) -> Bucket {
        Bucket {
            started_at,
            successes: 0,
            failures: 0,
            timeouts: 0,
            short_circuits: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    Failure,
    Timeout,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    opened_at: Instant,
    buckets: VecDeque<Bucket>,
}

impl Inner {
    /// Drop buckets that left the window and start a new bucket if the current one is full.
    fn roll(&mut self, now: Instant, config: &CircuitBreakerConfig) {
        let window = config.window();
        while matches!(self.buckets.front(), Some(bucket) if bucket.started_at + window <= now) {
            self.buckets.pop_front();
        }
        let current_full = match self.buckets.back() {
            Some(bucket) => bucket.started_at + config.bucket_duration() <= now,
            None => true,
        };
        if current_full {
            self.buckets.push_back(Bucket::new(now));
        }
    }

    fn current(&mut self, now: Instant) -> &mut Bucket {
        if self.buckets.is_empty() {
            self.buckets.push_back(Bucket::new(now));
        }
        let last = self.buckets.len() - 1;
        &mut self.buckets[last]
    }

    /// Returns `(total, errors)` over the window. Short-circuited calls are not counted.
    fn totals(&self) -> (u64, u64) {
        self.buckets.iter().fold((0, 0), |(total, errors), bucket| {
            let failed = u64::from(bucket.failures) + u64::from(bucket.timeouts);
            (total + failed + u64::from(bucket.successes), errors + failed)
        })
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = now;
    }
}

/// A circuit breaker wrapping arbitrary fallible futures.
///
/// The breaker knows nothing about the calls it guards; any `Err` returned by the call counts as
/// a failure.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> CircuitBreaker {
        CircuitBreaker {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                opened_at: Instant::now(),
                buckets: VecDeque::new(),
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, taking elapsed time into account.
    pub fn state(&self) -> CircuitState {
        let now = Instant::now();
        let mut inner = self.lock();
        self.half_open_if_due(&mut inner, now);
        inner.state
    }

    /// Run `operation` unless the breaker is open.
    ///
    /// # Errors
    ///
    /// - [`CircuitBreakerError::Open`] without running `operation` while the breaker is open.
    /// - [`CircuitBreakerError::Timeout`] if `operation` does not settle within the configured
    ///   timeout. The future is dropped.
    /// - The error of `operation`, unchanged.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitBreakerError>,
    {
        if !self.try_acquire() {
            return Err(CircuitBreakerError::Open.into());
        }

        let timeout = self.config.timeout();
        match tokio::time::timeout(timeout, operation()).await {
            Ok(Ok(value)) => {
                self.record(Outcome::Success);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record(Outcome::Failure);
                Err(err)
            }
            Err(_elapsed) => {
                self.record(Outcome::Timeout);
                Err(CircuitBreakerError::Timeout(timeout).into())
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The lock is never held across user code, so a poisoned lock still holds consistent
        // counters.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn half_open_if_due(&self, inner: &mut Inner, now: Instant) {
        if inner.state == CircuitState::Open && inner.opened_at + self.config.window() <= now {
            log::info!(target: "abtest", "circuit breaker half-open, allowing trial call");
            inner.state = CircuitState::HalfOpen;
        }
    }

    fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.roll(now, &self.config);
        self.half_open_if_due(&mut inner, now);

        if inner.state == CircuitState::Open {
            inner.current(now).short_circuits += 1;
            log::debug!(target: "abtest", "circuit breaker open, short-circuiting call");
            return false;
        }
        true
    }

    fn record(&self, outcome: Outcome) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.roll(now, &self.config);

        let bucket = inner.current(now);
        match outcome {
            Outcome::Success => bucket.successes += 1,
            Outcome::Failure => bucket.failures += 1,
            Outcome::Timeout => bucket.timeouts += 1,
        }

        match inner.state {
            CircuitState::HalfOpen => {
                if matches!(outcome, Outcome::Success) {
                    log::info!(target: "abtest", "circuit breaker closed after successful trial call");
                    inner.state = CircuitState::Closed;
                } else {
                    log::warn!(target: "abtest", "circuit breaker re-opened after failed trial call");
                    inner.open(now);
                }
            }
            CircuitState::Closed => {
                let (total, errors) = inner.totals();
                let over_volume = total > u64::from(self.config.volume_threshold);
                let over_errors = errors * 100 > u64::from(self.config.error_threshold) * total;
                if over_volume && over_errors {
                    log::warn!(target: "abtest", total, errors; "circuit breaker opened");
                    inner.open(now);
                }
            }
            // A call admitted before the breaker opened has settled. Nothing to decide.
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Failed,
        Breaker(CircuitBreakerError),
    }

    impl From<CircuitBreakerError> for TestError {
        fn from(value: CircuitBreakerError) -> Self {
            TestError::Breaker(value)
        }
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, TestError> {
        breaker.call(|| async { Ok(42) }).await
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<u32, TestError> {
        breaker.call(|| async { Err(TestError::Failed) }).await
    }

    fn default_breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn passes_results_through_while_closed() {
        let breaker = default_breaker();

        assert_eq!(succeed(&breaker).await, Ok(42));
        assert_eq!(fail(&breaker).await, Err(TestError::Failed));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn needs_more_calls_than_volume_threshold_to_open() {
        let breaker = default_breaker();

        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn stays_closed_at_exactly_error_threshold() {
        let breaker = default_breaker();

        for _ in 0..3 {
            let _ = succeed(&breaker).await;
            let _ = fail(&breaker).await;
        }

        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_does_not_run_the_operation() {
        let breaker = default_breaker();
        for _ in 0..6 {
            let _ = fail(&breaker).await;
        }

        let invocations = AtomicUsize::new(0);
        let result: Result<u32, TestError> = breaker
            .call(|| async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await;

        assert_eq!(result, Err(TestError::Breaker(CircuitBreakerError::Open)));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn turns_half_open_after_window_and_closes_on_success() {
        let breaker = default_breaker();
        for _ in 0..6 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(10_000)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert_eq!(succeed(&breaker).await, Ok(42));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn reopens_when_trial_call_fails() {
        let breaker = default_breaker();
        for _ in 0..6 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_millis(10_000)).await;

        assert_eq!(fail(&breaker).await, Err(TestError::Failed));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(
            succeed(&breaker).await,
            Err(TestError::Breaker(CircuitBreakerError::Open))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failures_age_out_of_the_window() {
        let breaker = default_breaker();
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }

        tokio::time::advance(Duration::from_millis(11_000)).await;
        let _ = fail(&breaker).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out_and_count_as_failures() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_timeout(Duration::from_millis(100))
                .with_volume_threshold(0)
                .with_error_threshold(0),
        );

        let result: Result<u32, TestError> = breaker
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            })
            .await;

        assert_eq!(
            result,
            Err(TestError::Breaker(CircuitBreakerError::Timeout(
                Duration::from_millis(100)
            )))
        );
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}

// Bounded retry
//
// RetryPolicy is pure data: attempt budget and backoff curve. Retryable
// drives an async executor under a policy, checking the abort signal at
// every boundary (backoff sleep end, attempt start). RetryCounter is the
// shared budget for a whole higher-level operation; once overdrawn it
// freezes a terminal error and hands back that same frozen object on
// every later use, so concurrent call sites all observe one exhaustion.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::abort::AbortSignal;
use crate::error::{Result, RuntimeError};

/// Backoff configuration for retried operations.
///
/// # Example
///
/// ```
/// use runloom_runtime::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_retries(5)
///     .with_initial_interval(Duration::from_secs(1))
///     .with_max_interval(Duration::from_secs(60));
///
/// // First retry after ~1 second
/// // Second retry after ~2 seconds
/// // Third retry after ~4 seconds
/// // etc.
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Number of retries after the initial attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Cap on the delay between retries.
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential).
    pub backoff_factor: f64,

    /// Jitter factor (0.0-1.0) to add randomness.
    ///
    /// A value of 0.1 means ±10% randomness.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff with sensible defaults: 4 retries, 1 second
    /// initial interval, 60 second cap, 2x factor, no jitter.
    pub fn exponential() -> Self {
        Self {
            max_retries: 4,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: 0.0,
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_factor: 1.0,
            jitter: 0.0,
        }
    }

    /// Fixed interval between attempts, no backoff.
    pub fn fixed(interval: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_interval: interval,
            max_interval: interval,
            backoff_factor: 1.0,
            jitter: 0.0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the jitter factor (0.0-1.0).
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay to wait before the given attempt number (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry_num = attempt - 1; // First retry is after attempt 1
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_factor.powi(retry_num as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());

        // gen_range panics on an empty range, so only sample when the
        // jitter span is nonzero.
        let jitter_range = capped * self.jitter;
        let jittered = if jitter_range > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_offset = rng.gen_range(-jitter_range..jitter_range);
            (capped + jitter_offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Whether another retry is allowed after `attempt` failed.
    pub fn has_retries_remaining(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

/// Per-attempt view handed to the executor and hooks. The execution id
/// is stable across every attempt of one [`Retryable`].
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub execution_id: Uuid,
    pub attempt: u32,
    pub signal: Option<AbortSignal>,
    pub last_error: Option<RuntimeError>,
}

type Executor<T> = Box<dyn FnMut(RetryAttempt) -> BoxFuture<'static, Result<T>> + Send>;
type ErrorHook = Box<dyn FnMut(&RuntimeError, &RetryAttempt) + Send>;
type RetryHook = Box<dyn FnMut(&RetryAttempt) + Send>;
type ResetHook = Box<dyn FnMut() + Send>;

/// Drives an async executor under a [`RetryPolicy`].
///
/// Errors short-circuit when they are aborted, fatal, or not classified
/// retryable; otherwise the executor is re-run until the budget runs out
/// and the last error is returned. The `on_error` hook fires after every
/// failed attempt, `on_retry` and `on_reset` only when another attempt
/// follows.
pub struct Retryable<T> {
    policy: RetryPolicy,
    signal: Option<AbortSignal>,
    executor: Executor<T>,
    on_error: Option<ErrorHook>,
    on_retry: Option<RetryHook>,
    on_reset: Option<ResetHook>,
    execution_id: Uuid,
}

impl<T: Send> Retryable<T> {
    pub fn new<F, Fut>(policy: RetryPolicy, executor: F) -> Self
    where
        F: FnMut(RetryAttempt) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut executor = executor;
        Self {
            policy,
            signal: None,
            executor: Box::new(move |attempt| Box::pin(executor(attempt))),
            on_error: None,
            on_retry: None,
            on_reset: None,
            execution_id: Uuid::now_v7(),
        }
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Classification and bookkeeping; runs before the retry decision.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&RuntimeError, &RetryAttempt) + Send + 'static,
    {
        self.on_error = Some(Box::new(hook));
        self
    }

    /// Notification that another attempt is about to run.
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&RetryAttempt) + Send + 'static,
    {
        self.on_retry = Some(Box::new(hook));
        self
    }

    /// Discard partial progress so the next attempt starts clean.
    pub fn on_reset<F>(mut self, hook: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.on_reset = Some(Box::new(hook));
        self
    }

    pub async fn run(mut self) -> Result<T> {
        let mut attempt: u32 = 1;
        let mut last_error: Option<RuntimeError> = None;

        loop {
            if attempt > 1 {
                let delay = self.policy.delay_for_attempt(attempt);
                match &self.signal {
                    Some(signal) => {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = signal.aborted() => {}
                        }
                        signal.throw_if_aborted()?;
                    }
                    None => tokio::time::sleep(delay).await,
                }
            }
            if let Some(signal) = &self.signal {
                signal.throw_if_aborted()?;
            }

            let ctx = RetryAttempt {
                execution_id: self.execution_id,
                attempt,
                signal: self.signal.clone(),
                last_error: last_error.clone(),
            };
            match (self.executor)(ctx.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if let Some(hook) = &mut self.on_error {
                        hook(&err, &ctx);
                    }
                    if err.is_aborted() || err.is_fatal() || !err.is_retryable() {
                        return Err(err);
                    }
                    if !self.policy.has_retries_remaining(attempt) {
                        return Err(err);
                    }
                    debug!(
                        execution_id = %self.execution_id,
                        attempt,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    if let Some(hook) = &mut self.on_retry {
                        hook(&ctx);
                    }
                    if let Some(hook) = &mut self.on_reset {
                        hook();
                    }
                    last_error = Some(err);
                    attempt += 1;
                }
            }
        }
    }
}

struct CounterState {
    max_retries: u32,
    remaining: i64,
    last_error: Option<RuntimeError>,
    frozen: Option<Arc<RuntimeError>>,
}

/// Shared retry budget across one higher-level operation.
///
/// Every nested retry site records its failures here through
/// [`RetryCounter::use_error`]. Once the budget is overdrawn the counter
/// freezes a terminal error wrapping the last failure and returns that
/// identical object on every later use, so exhaustion is observed exactly
/// once no matter how many sites keep trying.
#[derive(Clone)]
pub struct RetryCounter {
    inner: Arc<Mutex<CounterState>>,
}

impl RetryCounter {
    pub fn new(max_retries: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CounterState {
                max_retries,
                remaining: i64::from(max_retries),
                last_error: None,
                frozen: None,
            })),
        }
    }

    pub fn remaining(&self) -> i64 {
        self.inner.lock().remaining
    }

    /// Record a failure against the budget. Returns the frozen terminal
    /// error once the budget is overdrawn; callers compare returned
    /// errors by pointer to detect repeated exhaustion.
    pub fn use_error(&self, error: RuntimeError) -> std::result::Result<(), Arc<RuntimeError>> {
        let mut state = self.inner.lock();
        if let Some(frozen) = &state.frozen {
            return Err(frozen.clone());
        }
        state.remaining -= 1;
        if state.remaining < 0 {
            let frozen = Arc::new(RuntimeError::RetryBudgetExhausted {
                limit: state.max_retries,
                cause: Some(Box::new(error)),
            });
            state.frozen = Some(frozen.clone());
            return Err(frozen);
        }
        state.last_error = Some(error);
        Ok(())
    }

    pub fn last_error(&self) -> Option<RuntimeError> {
        self.inner.lock().last_error.clone()
    }
}

impl std::fmt::Debug for RetryCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("RetryCounter")
            .field("max_retries", &state.max_retries)
            .field("remaining", &state.remaining)
            .field("frozen", &state.frozen.is_some())
            .finish()
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

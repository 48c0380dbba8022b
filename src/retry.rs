//! Retry and polling helpers.
//!
//! [`RetryPolicy`] drives the transport's retry loop: each failed attempt is
//! handed to a [`RetryCondition`] which decides whether another attempt is
//! worthwhile. [`poll_until`] is the shared loop behind every "wait for"
//! operation (GC, sync, fullness, drives, async handles).
//!
//! # Example
//!
//! ```rust,ignore
//! use sfctl::retry::{PredicateRetry, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::constant(4, Duration::from_secs(30));
//! let retry_all = PredicateRetry::new(|_: &Error, _| true);
//! let value = policy.execute(&retry_all, || async { do_call().await }).await;
//! ```

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Decides whether a failed attempt is worth another one.
pub trait RetryCondition<E>: Send + Sync {
    fn should_retry(&self, error: &E, attempt: u32) -> bool;
}

/// Retry while a predicate over the error and attempt number holds.
pub struct PredicateRetry<F> {
    predicate: F,
}

impl<F> PredicateRetry<F> {
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F, E> RetryCondition<E> for PredicateRetry<F>
where
    F: Fn(&E, u32) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &E, attempt: u32) -> bool {
        (self.predicate)(error, attempt)
    }
}

/// How many times to retry, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 means a single attempt
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::constant(4, Duration::from_secs(30))
    }
}

impl RetryPolicy {
    pub fn constant(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// A policy that never retries.
    pub fn once() -> Self {
        Self::constant(0, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Run `operation` until it succeeds, `condition` declines, or retries
    /// run out.
    pub async fn execute<F, Fut, T, E, C>(&self, condition: &C, mut operation: F) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
        C: RetryCondition<E> + ?Sized,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("Succeeded after {} retries", attempt);
                    }
                    return Ok(value);
                }
                Err(error) if !condition.should_retry(&error, attempt) => {
                    return Err(RetryError::GaveUp {
                        attempts: attempt + 1,
                        error,
                    });
                }
                Err(error) if attempt >= self.max_retries => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        error,
                    });
                }
                Err(error) => {
                    warn!("{}; retry {} of {} in {:?}", error, attempt + 1, self.max_retries, self.delay);
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Why [`RetryPolicy::execute`] stopped without a value.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error
    Exhausted { attempts: u32, error: E },
    /// The condition declined to retry
    GaveUp { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::GaveUp { attempts, .. } => *attempts,
        }
    }

    /// The last error seen.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { error, .. } | RetryError::GaveUp { error, .. } => error,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, error } => write!(f, "{} (after {} attempts)", error, attempts),
            RetryError::GaveUp { error, .. } => write!(f, "{}", error),
        }
    }
}

/// Interval and deadline for a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSpec {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Call `check` every `spec.interval` until it yields a value.
///
/// The check always runs at least once. When the deadline passes without a
/// value the result is [`Error::Timeout`] naming `what`. Errors from the check
/// end the loop immediately.
pub async fn poll_until<F, Fut, T>(what: &str, spec: PollSpec, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    loop {
        if let Some(value) = check().await? {
            return Ok(value);
        }

        let elapsed = start.elapsed();
        if elapsed >= spec.timeout {
            return Err(Error::timeout(what, spec.timeout.as_secs()));
        }

        let pause = spec.interval.min(spec.timeout - elapsed);
        debug!("Waiting {:?} for {}", pause, what);
        tokio::time::sleep(pause).await;
    }
}

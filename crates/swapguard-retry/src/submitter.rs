//! Retry loop and submission decorator

use crate::policy::RetryPolicy;
use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Fixed retryable / non-retryable classification for an error type
///
/// Only transient (network, timeout, connection-class) failures answer `true`.
/// Protocol and validation failures must answer `false` so they surface
/// immediately instead of burning fees or time.
pub trait Classify {
    /// Whether another attempt may succeed without any change of input
    fn is_retryable(&self) -> bool;
}

impl Classify for std::io::Error {
    fn is_retryable(&self) -> bool {
        use std::io::ErrorKind;
        matches!(
            self.kind(),
            ErrorKind::TimedOut
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::BrokenPipe
                | ErrorKind::Interrupted
                | ErrorKind::WouldBlock
        )
    }
}

/// Failure returned once the retry loop stops
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// A non-retryable error ended the loop early
    #[error("{label}: non-retryable failure on attempt {attempt}: {source}")]
    Fatal {
        /// Operation label
        label: &'static str,
        /// Attempt that failed (1-based)
        attempt: u32,
        /// Underlying error
        source: E,
    },

    /// Every attempt failed with a retryable error
    #[error("{label}: gave up after {attempts} attempts: {source}")]
    Exhausted {
        /// Operation label
        label: &'static str,
        /// Attempts made
        attempts: u32,
        /// Error from the last attempt
        source: E,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Fatal { attempt, .. } => *attempt,
            Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Whether the budget ran out (as opposed to a fatal error)
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Borrow the last underlying error
    #[inline]
    #[must_use]
    pub fn inner(&self) -> &E {
        match self {
            Self::Fatal { source, .. } | Self::Exhausted { source, .. } => source,
        }
    }

    /// Unwrap the last underlying error
    #[inline]
    pub fn into_inner(self) -> E {
        match self {
            Self::Fatal { source, .. } | Self::Exhausted { source, .. } => source,
        }
    }
}

/// Run `action` until it succeeds, fails fatally, or the budget runs out
///
/// The closure receives the 1-based attempt number. Callers that depend on
/// wall-clock preconditions must re-check them inside the closure: time
/// spent in backoff can invalidate an operation that was valid at attempt 1.
///
/// # Errors
/// - [`RetryError::Fatal`] on the first non-retryable error
/// - [`RetryError::Exhausted`] with the last error once attempts run out
pub async fn retry<T, E, F, Fut>(
    label: &'static str,
    policy: &RetryPolicy,
    mut action: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match action(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(label, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(source) if !source.is_retryable() => {
                debug!(label, attempt, error = %source, "non-retryable failure");
                return Err(RetryError::Fatal {
                    label,
                    attempt,
                    source,
                });
            }
            Err(source) if attempt >= attempts => {
                warn!(label, attempts, error = %source, "retry budget exhausted");
                return Err(RetryError::Exhausted {
                    label,
                    attempts,
                    source,
                });
            }
            Err(source) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    label,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %source,
                    "transient failure; backing off"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// A single fallible submission
#[async_trait]
pub trait Submit: Send + Sync {
    /// What gets submitted
    type Action: Send + Sync;
    /// Success value
    type Receipt: Send;
    /// Failure value
    type Error: Classify + Display + Send;

    /// Submit once
    async fn submit(&self, action: &Self::Action) -> Result<Self::Receipt, Self::Error>;
}

/// Bounded-retry decorator around any [`Submit`] implementation
#[derive(Debug, Clone)]
pub struct RetryableSubmitter<S> {
    inner: S,
    policy: RetryPolicy,
    label: &'static str,
}

impl<S: Submit> RetryableSubmitter<S> {
    /// Wrap a submitter
    #[inline]
    #[must_use]
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            label: "submit",
        }
    }

    /// Set the label used in logs and errors
    #[inline]
    #[must_use]
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Active policy
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Wrapped submitter
    #[inline]
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Submit with retries
    ///
    /// # Errors
    /// See [`retry`].
    pub async fn submit(
        &self,
        action: &S::Action,
    ) -> Result<S::Receipt, RetryError<S::Error>> {
        retry(self.label, &self.policy, |_| self.inner.submit(action)).await
    }
}

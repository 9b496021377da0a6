//! Swapguard Retry
//!
//! Generic bounded-retry decorator for fallible, possibly slow submissions.
//!
//! - [`RetryPolicy`]: attempt budget and capped exponential backoff
//! - [`Classify`]: the fixed retryable / non-retryable split for an error type
//! - [`RetryableSubmitter`]: wraps any [`Submit`] implementation
//! - [`retry`]: the same loop for ad hoc closures
//!
//! The crate has no ledger knowledge. Transient failures are retried locally
//! up to budget; everything else surfaces after the first attempt.
//!
//! # Example
//!
//! ```rust,ignore
//! use swapguard_retry::{RetryPolicy, RetryableSubmitter};
//!
//! let submitter = RetryableSubmitter::new(chain, RetryPolicy::default());
//! let receipt = submitter.submit(&signed_tx).await?;
//! ```

#![warn(unreachable_pub)]

mod policy;
mod submitter;

pub use policy::RetryPolicy;
pub use submitter::{retry, Classify, RetryError, RetryableSubmitter, Submit};

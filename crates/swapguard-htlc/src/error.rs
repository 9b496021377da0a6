//! Error types for escrow legs
//!
//! Two families:
//! - [`SwapError`]: the protocol taxonomy (datum, authorization, timing,
//!   funding, transport)
//! - [`ChainError`]: what a chain collaborator reports when fetching or
//!   submitting

use crate::deadline::PosixMs;
use swapguard_retry::Classify;

/// Protocol-level failure for a swap leg
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SwapError {
    /// Malformed or precondition-violating creation/update data
    #[error("invalid datum: {0}")]
    InvalidDatum(String),

    /// Secret does not hash to the committed value
    #[error("secret does not match the committed hash")]
    InvalidSecret,

    /// Caller may not perform this action
    #[error("caller is not authorized for this action")]
    Unauthorized,

    /// Claim attempted at or after the deadline
    #[error("claim window closed at {deadline} (now {now})")]
    Expired {
        /// Leg deadline
        deadline: PosixMs,
        /// Evaluation time
        now: PosixMs,
    },

    /// Refund attempted before deadline + grace
    #[error("refund not available until {available_at} (now {now})")]
    NotYetExpired {
        /// First instant a refund is legal
        available_at: PosixMs,
        /// Evaluation time
        now: PosixMs,
    },

    /// Cancel attempted at or after the deadline
    #[error("cancel window closed at {deadline} (now {now})")]
    DeadlinePassed {
        /// Leg deadline
        deadline: PosixMs,
        /// Evaluation time
        now: PosixMs,
    },

    /// Not enough value to fund the operation
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Amount needed
        required: u64,
        /// Amount present
        available: u64,
    },

    /// Transport failure talking to a ledger
    #[error("network error: {0}")]
    Network(String),

    /// Ledger did not answer in time
    #[error("operation timed out")]
    Timeout,
}

impl SwapError {
    /// Transient failures that a retry may fix
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }

    /// Timing-window violations; may become valid (or permanently invalid) later
    #[inline]
    #[must_use]
    pub fn is_timing(&self) -> bool {
        matches!(
            self,
            Self::Expired { .. } | Self::NotYetExpired { .. } | Self::DeadlinePassed { .. }
        )
    }

    /// Stable numeric code, used as the exit code of a crashed worker
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidDatum(_) => 10,
            Self::InvalidSecret => 20,
            Self::Unauthorized => 21,
            Self::Expired { .. } => 30,
            Self::NotYetExpired { .. } => 31,
            Self::DeadlinePassed { .. } => 32,
            Self::InsufficientFunds { .. } => 40,
            Self::Network(_) => 50,
            Self::Timeout => 51,
        }
    }
}

impl Classify for SwapError {
    fn is_retryable(&self) -> bool {
        SwapError::is_retryable(self)
    }
}

/// Failure reported by a chain collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// Connection-level failure
    #[error("network error: {0}")]
    Network(String),

    /// Request timed out
    #[error("request timed out")]
    Timeout,

    /// Ledger refused the transaction
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// Wallet cannot cover the transaction
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Amount needed
        required: u64,
        /// Amount present
        available: u64,
    },

    /// Referenced output does not exist (or is already spent)
    #[error("utxo not found: {0}")]
    UtxoNotFound(String),

    /// Anything else; classified by message
    #[error("{0}")]
    Other(String),
}

/// Message fragments that mark an otherwise unclassified failure as transient
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection",
    "econnreset",
    "econnrefused",
    "socket hang up",
    "503",
    "502",
    "504",
];

/// Fixed classification rule for free-form error messages
#[must_use]
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

impl Classify for ChainError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Other(message) => is_transient_message(message),
            Self::Rejected(_) | Self::InsufficientFunds { .. } | Self::UtxoNotFound(_) => false,
        }
    }
}

impl From<ChainError> for SwapError {
    fn from(value: ChainError) -> Self {
        match value {
            ChainError::Network(message) => Self::Network(message),
            ChainError::Timeout => Self::Timeout,
            ChainError::InsufficientFunds {
                required,
                available,
            } => Self::InsufficientFunds {
                required,
                available,
            },
            ChainError::Rejected(message) => {
                Self::InvalidDatum(format!("rejected by ledger: {message}"))
            }
            ChainError::UtxoNotFound(reference) => {
                Self::InvalidDatum(format!("escrow output {reference} not found"))
            }
            ChainError::Other(message) if is_transient_message(&message) => {
                Self::Network(message)
            }
            ChainError::Other(message) => Self::InvalidDatum(message),
        }
    }
}

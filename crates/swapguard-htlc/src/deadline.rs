//! Deadline / timeout policy
//!
//! Pure functions over POSIX-millisecond timestamps.
//!
//! ```text
//!   claim / cancel          dead zone            refund
//! ---------------------|--------------------|------------------>
//!                   deadline          deadline + grace
//! ```
//!
//! The dead zone `[deadline, deadline + grace)` keeps a claim that is slow
//! to confirm from racing a refund.

use crate::error::SwapError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Milliseconds since the Unix epoch
pub type PosixMs = u64;

/// Claiming (and cancelling) is legal iff `now < deadline`
#[inline]
#[must_use]
pub const fn is_before_deadline(now: PosixMs, deadline: PosixMs) -> bool {
    now < deadline
}

/// Refunding is legal iff `now >= deadline + grace`
#[inline]
#[must_use]
pub const fn is_after_grace(now: PosixMs, deadline: PosixMs, grace: PosixMs) -> bool {
    now >= deadline.saturating_add(grace)
}

/// Which action, if any, the clock currently allows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeWindow {
    /// `now < deadline`
    Claimable,
    /// `deadline <= now < deadline + grace`
    DeadZone,
    /// `now >= deadline + grace`
    Refundable,
}

/// Classify `now` against a deadline and grace period
#[must_use]
pub const fn classify(now: PosixMs, deadline: PosixMs, grace: PosixMs) -> TimeWindow {
    if is_before_deadline(now, deadline) {
        TimeWindow::Claimable
    } else if is_after_grace(now, deadline, grace) {
        TimeWindow::Refundable
    } else {
        TimeWindow::DeadZone
    }
}

/// Ledger validity interval carried by a transaction
///
/// `valid_from` is inclusive, `valid_until` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidityInterval {
    /// First instant the transaction may be included
    pub valid_from: Option<PosixMs>,
    /// Instant from which the transaction is invalid
    pub valid_until: Option<PosixMs>,
}

impl ValidityInterval {
    /// Interval ending (exclusively) at `until`
    #[inline]
    #[must_use]
    pub const fn until(until: PosixMs) -> Self {
        Self {
            valid_from: None,
            valid_until: Some(until),
        }
    }

    /// Interval starting (inclusively) at `from`
    #[inline]
    #[must_use]
    pub const fn from(from: PosixMs) -> Self {
        Self {
            valid_from: Some(from),
            valid_until: None,
        }
    }

    /// Whether `now` lies inside the interval
    #[must_use]
    pub fn contains(&self, now: PosixMs) -> bool {
        self.valid_from.map_or(true, |from| now >= from)
            && self.valid_until.map_or(true, |until| now < until)
    }
}

/// Source of the current POSIX time
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch
    fn now_ms(&self) -> PosixMs;
}

/// Wall clock (UTC)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> PosixMs {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Settable clock shared by handles; used by simulations and tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Clock frozen at `start`
    #[inline]
    #[must_use]
    pub fn new(start: PosixMs) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Jump to an absolute time
    #[inline]
    pub fn set(&self, now: PosixMs) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move forward by `delta` milliseconds, returning the new time
    #[inline]
    pub fn advance(&self, delta: PosixMs) -> PosixMs {
        self.now.fetch_add(delta, Ordering::SeqCst).saturating_add(delta)
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> PosixMs {
        self.now.load(Ordering::SeqCst)
    }
}

/// Deadlines for the two legs of one cross-chain swap
///
/// The initiator holds the secret and funds the long leg; the counterparty
/// funds the short leg, which the initiator claims first (revealing the
/// secret). `counterparty_deadline < initiator_deadline` always holds, so
/// once the secret is public the counterparty still has time to claim the
/// initiator's leg, and a stalled swap refunds the counterparty first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapPlan {
    /// Planning time
    pub created_at: PosixMs,
    /// Deadline of the leg funded (and refundable) by the initiator
    pub initiator_deadline: PosixMs,
    /// Deadline of the leg funded by the counterparty, claimable with the secret
    pub counterparty_deadline: PosixMs,
}

impl SwapPlan {
    /// Plan both deadlines relative to `now`
    ///
    /// # Errors
    /// `SwapError::InvalidDatum` unless
    /// `0 < counterparty_timeout_ms < initiator_timeout_ms` and both
    /// deadlines fit in a [`PosixMs`]
    pub fn new(
        now: PosixMs,
        initiator_timeout_ms: u64,
        counterparty_timeout_ms: u64,
    ) -> Result<Self, SwapError> {
        if counterparty_timeout_ms == 0 {
            return Err(SwapError::InvalidDatum(
                "counterparty timeout must be positive".to_string(),
            ));
        }
        if counterparty_timeout_ms >= initiator_timeout_ms {
            return Err(SwapError::InvalidDatum(format!(
                "counterparty timeout ({counterparty_timeout_ms}ms) must be strictly shorter \
                 than initiator timeout ({initiator_timeout_ms}ms)"
            )));
        }
        let initiator_deadline = now.checked_add(initiator_timeout_ms).ok_or_else(|| {
            SwapError::InvalidDatum(format!(
                "initiator deadline overflows: {now} + {initiator_timeout_ms}ms"
            ))
        })?;
        Ok(Self {
            created_at: now,
            initiator_deadline,
            counterparty_deadline: now + counterparty_timeout_ms,
        })
    }

    /// Time between the two deadlines
    #[inline]
    #[must_use]
    pub const fn margin_ms(&self) -> u64 {
        self.initiator_deadline.saturating_sub(self.counterparty_deadline)
    }

    /// Caller-side safety margin check
    ///
    /// # Errors
    /// `SwapError::InvalidDatum` if the gap is below `min_margin_ms`
    pub fn ensure_margin(&self, min_margin_ms: u64) -> Result<(), SwapError> {
        if self.margin_ms() < min_margin_ms {
            return Err(SwapError::InvalidDatum(format!(
                "deadline gap {}ms is below the required safety margin {min_margin_ms}ms",
                self.margin_ms()
            )));
        }
        Ok(())
    }
}

//! Process records and restart budgets

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use swapguard_htlc::PosixMs;

/// Name of a supervised process, unique within one supervisor
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    /// Create a process id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProcessId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ProcessId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle status of a supervised process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    /// Not running (never started, stopped, or retired)
    Stopped,
    /// Started successfully
    Running,
    /// Being stopped and started again
    Restarting,
    /// Failed; waiting for the crash handler
    Crashed {
        /// Worker exit code
        code: i32,
        /// Failure reason
        message: String,
    },
}

impl ProcessStatus {
    /// Whether the process is up
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl Display for ProcessStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Running => f.write_str("running"),
            Self::Restarting => f.write_str("restarting"),
            Self::Crashed { code, message } => write!(f, "crashed({code}: {message})"),
        }
    }
}

/// Restart allowance over a sliding window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartBudget {
    /// Restarts allowed inside one window
    pub max_restarts: u32,
    /// Window length
    pub window_ms: u64,
    /// Per-attempt backoff; attempt `n` waits `n * backoff_ms`
    pub backoff_ms: u64,
}

impl RestartBudget {
    /// Create a budget
    #[inline]
    #[must_use]
    pub const fn new(max_restarts: u32, window_ms: u64, backoff_ms: u64) -> Self {
        Self {
            max_restarts,
            window_ms,
            backoff_ms,
        }
    }
}

impl Default for RestartBudget {
    fn default() -> Self {
        Self::new(3, 60_000, 1_000)
    }
}

/// Restart counter for one budget
///
/// Once `window_ms` has elapsed since the window opened, the next restart
/// opens a fresh window with the count reset to zero. The window never
/// slides partially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestartWindow {
    count: u32,
    started_at: PosixMs,
}

impl RestartWindow {
    /// Window opened at `now`
    #[inline]
    #[must_use]
    pub const fn new(now: PosixMs) -> Self {
        Self {
            count: 0,
            started_at: now,
        }
    }

    /// Restarts counted in the current window
    #[inline]
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// When the current window opened
    #[inline]
    #[must_use]
    pub const fn started_at(&self) -> PosixMs {
        self.started_at
    }

    /// Count one more restart; `false` once the budget is exceeded
    pub fn record(&mut self, now: PosixMs, budget: &RestartBudget) -> bool {
        if now.saturating_sub(self.started_at) >= budget.window_ms {
            *self = Self::new(now);
        }
        self.count = self.count.saturating_add(1);
        self.count <= budget.max_restarts
    }

    /// Forget every counted restart
    #[inline]
    pub fn reset(&mut self, now: PosixMs) {
        *self = Self::new(now);
    }
}

/// Supervisor-owned bookkeeping for one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    /// Process name
    pub id: ProcessId,
    /// Current status
    pub status: ProcessStatus,
    /// Restart window
    pub window: RestartWindow,
    /// Retired after its restart deadline passed; never started again
    pub retired: bool,
}

impl ProcessRecord {
    /// Fresh record, `Stopped`
    #[must_use]
    pub fn new(id: ProcessId, now: PosixMs) -> Self {
        Self {
            id,
            status: ProcessStatus::Stopped,
            window: RestartWindow::new(now),
            retired: false,
        }
    }

    /// Restarts counted in the current window
    #[inline]
    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.window.count()
    }

    /// When the current window opened
    #[inline]
    #[must_use]
    pub fn window_start(&self) -> PosixMs {
        self.window.started_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_admits_up_to_max_then_refuses() {
        let budget = RestartBudget::new(2, 1_000, 0);
        let mut window = RestartWindow::new(0);
        assert!(window.record(10, &budget));
        assert!(window.record(20, &budget));
        assert!(!window.record(30, &budget));
        assert_eq!(window.count(), 3);
    }

    #[test]
    fn window_resets_fully_once_elapsed() {
        let budget = RestartBudget::new(1, 1_000, 0);
        let mut window = RestartWindow::new(0);
        assert!(window.record(999, &budget));
        assert!(!window.record(999, &budget));
        assert!(window.record(1_000, &budget));
        assert_eq!(window.count(), 1);
        assert_eq!(window.started_at(), 1_000);
    }

    #[test]
    fn record_starts_stopped() {
        let record = ProcessRecord::new(ProcessId::from("a"), 5);
        assert_eq!(record.status, ProcessStatus::Stopped);
        assert_eq!(record.restart_count(), 0);
        assert_eq!(record.window_start(), 5);
    }
}

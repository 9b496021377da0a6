//! Error types for supervision
//!
//! - [`WorkerError`]: what a worker reports when it fails to start or crashes
//! - [`SupervisorError`]: what a supervisor raises to its owner

use crate::process::ProcessId;

/// Failure reported by a supervised worker
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("worker failed with code {code}: {message}")]
pub struct WorkerError {
    /// Numeric exit code
    pub code: i32,
    /// Human-readable reason
    pub message: String,
}

impl WorkerError {
    /// Health probe answered `false`
    pub const UNHEALTHY: i32 = 70;
    /// A nested supervisor gave up
    pub const ESCALATED: i32 = 80;
    /// Worker task panicked or was aborted
    pub const ABORTED: i32 = 90;

    /// Create a worker error
    #[inline]
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Failed health probe
    #[inline]
    #[must_use]
    pub fn unhealthy() -> Self {
        Self::new(Self::UNHEALTHY, "health check failed")
    }
}

impl From<SupervisorError> for WorkerError {
    fn from(value: SupervisorError) -> Self {
        Self::new(Self::ESCALATED, value.to_string())
    }
}

/// Supervisor-level failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    /// A process with this id is already registered
    #[error("process {0} is already registered")]
    DuplicateProcess(ProcessId),

    /// No process with this id
    #[error("unknown process {0}")]
    UnknownProcess(ProcessId),

    /// Restart budget of the whole tree exhausted; every process is stopped
    #[error("supervisor {supervisor} gave up after {process} crashed: {source}")]
    Escalated {
        /// Name of the failing supervisor
        supervisor: String,
        /// Process whose crash exhausted the budget
        process: ProcessId,
        /// The crash itself
        source: WorkerError,
    },
}

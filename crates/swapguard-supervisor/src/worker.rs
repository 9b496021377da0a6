//! Worker capability trait and crash reporting

use crate::error::WorkerError;
use crate::process::{ProcessId, ProcessStatus};
use async_trait::async_trait;
use swapguard_htlc::PosixMs;
use tokio::sync::mpsc;
use tracing::warn;

/// Anything a [`Supervisor`](crate::Supervisor) can own
///
/// `start` must return once the worker is up; long-running work belongs in
/// a spawned task that reports failures through a [`CrashReporter`].
/// `stop` must be idempotent and must end that task, so no crash from an
/// old incarnation is reported after a restart.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Bring the worker up
    async fn start(&mut self) -> Result<(), WorkerError>;

    /// Bring the worker down
    async fn stop(&mut self) -> Result<(), WorkerError>;

    /// Worker's own view of its status
    fn status(&self) -> ProcessStatus;

    /// Liveness probe
    fn is_healthy(&self) -> bool;

    /// Instant after which restarting is pointless
    fn restart_deadline(&self) -> Option<PosixMs> {
        None
    }
}

/// A crash waiting for the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    /// Crashed process
    pub process: ProcessId,
    /// Reason
    pub error: WorkerError,
}

/// Handle a worker uses to report a runtime crash
#[derive(Debug, Clone)]
pub struct CrashReporter {
    process: ProcessId,
    tx: mpsc::UnboundedSender<CrashReport>,
}

impl CrashReporter {
    pub(crate) fn new(process: ProcessId, tx: mpsc::UnboundedSender<CrashReport>) -> Self {
        Self { process, tx }
    }

    /// Process this reporter speaks for
    #[inline]
    #[must_use]
    pub fn process(&self) -> &ProcessId {
        &self.process
    }

    /// Queue a crash; the supervisor handles crashes one at a time
    pub fn report(&self, error: WorkerError) {
        let report = CrashReport {
            process: self.process.clone(),
            error,
        };
        if self.tx.send(report).is_err() {
            warn!(process = %self.process, "supervisor gone; crash report dropped");
        }
    }
}

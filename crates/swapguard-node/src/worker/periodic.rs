//! Fixed-interval job runner

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swapguard_supervisor::{CrashReporter, ProcessStatus, Worker, WorkerError};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error};

/// Work done on every tick
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// One run; an error crashes the worker
    async fn run(&self) -> Result<(), WorkerError>;
}

/// Runs a [`Job`] every `period`, the first run immediately
///
/// A failing run ends the loop and is reported as a crash.
pub struct PeriodicWorker<J> {
    job: Arc<J>,
    period: Duration,
    reporter: CrashReporter,
    status: Arc<Mutex<ProcessStatus>>,
    runs: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl<J: Job> PeriodicWorker<J> {
    /// Worker running `job` every `period`
    #[must_use]
    pub fn new(job: J, period: Duration, reporter: CrashReporter) -> Self {
        Self {
            job: Arc::new(job),
            period,
            reporter,
            status: Arc::new(Mutex::new(ProcessStatus::Stopped)),
            runs: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    /// Successful runs across all incarnations
    #[must_use]
    pub fn runs(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.runs)
    }
}

#[async_trait]
impl<J: Job> Worker for PeriodicWorker<J> {
    async fn start(&mut self) -> Result<(), WorkerError> {
        if self.task.is_some() {
            return Ok(());
        }
        let job = Arc::clone(&self.job);
        let status = Arc::clone(&self.status);
        let runs = Arc::clone(&self.runs);
        let reporter = self.reporter.clone();
        let period = self.period;
        *status.lock() = ProcessStatus::Running;

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = job.run().await {
                    error!(process = %reporter.process(), error = %err, "periodic job failed");
                    *status.lock() = ProcessStatus::Crashed {
                        code: err.code,
                        message: err.message.clone(),
                    };
                    reporter.report(err);
                    return;
                }
                let total = runs.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(process = %reporter.process(), runs = total, "periodic job ran");
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), WorkerError> {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        *self.status.lock() = ProcessStatus::Stopped;
        Ok(())
    }

    fn status(&self) -> ProcessStatus {
        self.status.lock().clone()
    }

    fn is_healthy(&self) -> bool {
        !matches!(*self.status.lock(), ProcessStatus::Crashed { .. })
    }
}

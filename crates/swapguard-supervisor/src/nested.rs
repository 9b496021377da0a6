//! A supervisor supervised by another supervisor

use crate::error::WorkerError;
use crate::process::ProcessStatus;
use crate::supervisor::Supervisor;
use crate::worker::{CrashReporter, Worker};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Supervisor>,
}

/// Runs a child [`Supervisor`] as a worker of a parent
///
/// Starting starts the child's processes and spawns its crash loop.
/// When the child exhausts its tree budget the escalation is reported to
/// the parent as a crash of this worker.
pub struct NestedSupervisor {
    idle: Option<Supervisor>,
    running: Option<Running>,
    parent: CrashReporter,
    status: Arc<Mutex<ProcessStatus>>,
}

impl NestedSupervisor {
    /// Wrap `child`; `parent` reports on behalf of this worker
    #[must_use]
    pub fn new(child: Supervisor, parent: CrashReporter) -> Self {
        Self {
            idle: Some(child),
            running: None,
            parent,
            status: Arc::new(Mutex::new(ProcessStatus::Stopped)),
        }
    }

    /// The child, when it is not running
    #[must_use]
    pub fn child(&self) -> Option<&Supervisor> {
        self.idle.as_ref()
    }
}

#[async_trait]
impl Worker for NestedSupervisor {
    async fn start(&mut self) -> Result<(), WorkerError> {
        if self.running.is_some() {
            return Ok(());
        }
        let Some(mut child) = self.idle.take() else {
            return Err(WorkerError::new(
                WorkerError::ABORTED,
                "nested supervisor was lost",
            ));
        };
        if let Err(err) = child.start().await {
            self.idle = Some(child);
            *self.status.lock() = ProcessStatus::Crashed {
                code: WorkerError::ESCALATED,
                message: err.to_string(),
            };
            return Err(err.into());
        }

        let (shutdown, signal) = oneshot::channel();
        let parent = self.parent.clone();
        let status = Arc::clone(&self.status);
        *status.lock() = ProcessStatus::Running;
        let task = tokio::spawn(async move {
            let result = child
                .run_until(async {
                    let _ = signal.await;
                })
                .await;
            if let Err(err) = result {
                error!(
                    supervisor = child.name(),
                    error = %err,
                    "nested supervisor escalating to parent"
                );
                let err = WorkerError::from(err);
                *status.lock() = ProcessStatus::Crashed {
                    code: err.code,
                    message: err.message.clone(),
                };
                parent.report(err);
            }
            child
        });
        info!(process = %self.parent.process(), "nested supervisor running");
        self.running = Some(Running { shutdown, task });
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), WorkerError> {
        let Some(Running { shutdown, task }) = self.running.take() else {
            return Ok(());
        };
        let _ = shutdown.send(());
        let outcome = task.await;
        *self.status.lock() = ProcessStatus::Stopped;
        match outcome {
            Ok(child) => {
                self.idle = Some(child);
                Ok(())
            }
            Err(join) => Err(WorkerError::new(
                WorkerError::ABORTED,
                format!("nested supervisor task failed: {join}"),
            )),
        }
    }

    fn status(&self) -> ProcessStatus {
        self.status.lock().clone()
    }

    fn is_healthy(&self) -> bool {
        !matches!(*self.status.lock(), ProcessStatus::Crashed { .. })
    }
}

//! Restart-strategy supervisor
//!
//! A [`Supervisor`] owns an insertion-ordered registry of workers:
//! - `start` brings processes up in registration order; a start failure
//!   goes through the crash handler like any runtime crash
//! - `stop` brings them down in reverse order and never fails
//! - crashes are handled one at a time; each one is charged to the
//!   process's [`RestartBudget`], then the strategy picks which processes
//!   restart
//! - an exhausted process budget escalates to the tree budget: within it
//!   the whole tree restarts, beyond it everything stops and the error is
//!   raised to the owner

use crate::error::{SupervisorError, WorkerError};
use crate::event::SupervisorEvent;
use crate::process::{ProcessId, ProcessRecord, ProcessStatus, RestartBudget, RestartWindow};
use crate::strategy::SupervisionStrategy;
use crate::worker::{CrashReport, CrashReporter, Worker};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use swapguard_htlc::{Clock, PosixMs, SystemClock};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

type Pending = VecDeque<(ProcessId, WorkerError)>;

/// Supervisor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Name used in logs and errors
    pub name: String,
    /// Restart strategy, fixed for the supervisor's lifetime
    pub strategy: SupervisionStrategy,
    /// Aggregate budget for escalations
    pub tree_budget: RestartBudget,
    /// Capacity of the event channel
    pub event_capacity: usize,
    /// Health probe period inside [`Supervisor::run_until`]; `0` disables probing
    pub health_interval_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            name: "root".to_string(),
            strategy: SupervisionStrategy::OneForOne,
            tree_budget: RestartBudget::new(5, 300_000, 0),
            event_capacity: 256,
            health_interval_ms: 0,
        }
    }
}

impl SupervisorConfig {
    /// Default settings under a name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the strategy
    #[inline]
    #[must_use]
    pub fn with_strategy(mut self, strategy: SupervisionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the tree budget
    #[inline]
    #[must_use]
    pub fn with_tree_budget(mut self, budget: RestartBudget) -> Self {
        self.tree_budget = budget;
        self
    }

    /// Set the event channel capacity
    #[inline]
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Set the health probe period
    #[inline]
    #[must_use]
    pub fn with_health_interval(mut self, interval_ms: u64) -> Self {
        self.health_interval_ms = interval_ms;
        self
    }
}

struct Child {
    record: ProcessRecord,
    budget: RestartBudget,
    worker: Box<dyn Worker>,
}

/// Owner of a set of supervised workers
pub struct Supervisor {
    config: SupervisorConfig,
    children: IndexMap<ProcessId, Child>,
    tree_window: RestartWindow,
    crash_tx: mpsc::UnboundedSender<CrashReport>,
    crash_rx: mpsc::UnboundedReceiver<CrashReport>,
    events: Option<mpsc::Sender<SupervisorEvent>>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("name", &self.config.name)
            .field("strategy", &self.config.strategy)
            .field("processes", &self.children.keys().collect::<Vec<_>>())
            .field("tree_restarts", &self.tree_window.count())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Supervisor on the system clock
    #[must_use]
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Supervisor on a caller-provided clock
    #[must_use]
    pub fn with_clock(config: SupervisorConfig, clock: Arc<dyn Clock>) -> Self {
        let (crash_tx, crash_rx) = mpsc::unbounded_channel();
        let tree_window = RestartWindow::new(clock.now_ms());
        Self {
            config,
            children: IndexMap::new(),
            tree_window,
            crash_tx,
            crash_rx,
            events: None,
            clock,
        }
    }

    /// Supervisor name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Restart strategy
    #[inline]
    #[must_use]
    pub fn strategy(&self) -> SupervisionStrategy {
        self.config.strategy
    }

    /// Number of registered processes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether nothing is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Record of one process
    #[must_use]
    pub fn record(&self, id: &ProcessId) -> Option<&ProcessRecord> {
        self.children.get(id).map(|c| &c.record)
    }

    /// Records in registration order
    pub fn records(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.children.values().map(|c| &c.record)
    }

    /// Worker's own status report
    #[must_use]
    pub fn worker_status(&self, id: &ProcessId) -> Option<ProcessStatus> {
        self.children.get(id).map(|c| c.worker.status())
    }

    /// Escalations counted in the current tree window
    #[inline]
    #[must_use]
    pub fn tree_restarts(&self) -> u32 {
        self.tree_window.count()
    }

    /// Crash handle for a process; may be created before registration
    #[must_use]
    pub fn reporter(&self, id: impl Into<ProcessId>) -> CrashReporter {
        CrashReporter::new(id.into(), self.crash_tx.clone())
    }

    /// Receive lifecycle events; replaces any previous subscription
    pub fn subscribe(&mut self) -> mpsc::Receiver<SupervisorEvent> {
        let (tx, rx) = mpsc::channel(self.config.event_capacity.max(1));
        self.events = Some(tx);
        rx
    }

    /// Add a process at the end of the start order
    ///
    /// # Errors
    /// `SupervisorError::DuplicateProcess` if the id is taken
    pub fn register<W>(
        &mut self,
        id: impl Into<ProcessId>,
        budget: RestartBudget,
        worker: W,
    ) -> Result<(), SupervisorError>
    where
        W: Worker + 'static,
    {
        let id = id.into();
        if self.children.contains_key(&id) {
            return Err(SupervisorError::DuplicateProcess(id));
        }
        debug!(supervisor = %self.config.name, process = %id, "registered");
        let record = ProcessRecord::new(id.clone(), self.clock.now_ms());
        self.children.insert(
            id,
            Child {
                record,
                budget,
                worker: Box::new(worker),
            },
        );
        Ok(())
    }

    /// Start every process in registration order
    ///
    /// # Errors
    /// `SupervisorError::Escalated` if a start failure exhausts the tree budget
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        info!(
            supervisor = %self.config.name,
            processes = self.children.len(),
            strategy = ?self.config.strategy,
            "starting"
        );
        for idx in 0..self.children.len() {
            let child = &mut self.children[idx];
            if child.record.retired || child.record.status.is_running() {
                continue;
            }
            let id = child.record.id.clone();
            let result = child.worker.start().await;
            match result {
                Ok(()) => {
                    child.record.status = ProcessStatus::Running;
                    info!(supervisor = %self.config.name, process = %id, "process started");
                    self.emit(SupervisorEvent::ProcessStarted { process: id })
                        .await;
                }
                Err(err) => {
                    warn!(
                        supervisor = %self.config.name,
                        process = %id,
                        error = %err,
                        "start failed"
                    );
                    child.record.status = crashed(&err);
                    self.on_crash(id, err).await?;
                }
            }
        }
        Ok(())
    }

    /// Stop every process in reverse registration order
    ///
    /// Individual stop failures are logged and skipped.
    pub async fn stop(&mut self) {
        info!(supervisor = %self.config.name, "stopping");
        for idx in (0..self.children.len()).rev() {
            self.stop_child(idx, ProcessStatus::Stopped).await;
        }
        let discarded = self.drain_reports().len();
        if discarded > 0 {
            debug!(supervisor = %self.config.name, discarded, "dropped crash reports at shutdown");
        }
    }

    /// Handle a crash of `id`, plus any crash it causes, one at a time
    ///
    /// # Errors
    /// - `SupervisorError::UnknownProcess` for an unregistered id
    /// - `SupervisorError::Escalated` once the tree budget is exhausted
    pub async fn on_crash(
        &mut self,
        id: ProcessId,
        error: WorkerError,
    ) -> Result<(), SupervisorError> {
        let mut pending = Pending::from([(id, error)]);
        while let Some((id, error)) = pending.pop_front() {
            self.handle_crash(id, error, &mut pending).await?;
        }
        Ok(())
    }

    /// Treat every running, unhealthy process as crashed
    ///
    /// # Errors
    /// See [`Supervisor::on_crash`].
    pub async fn check_health(&mut self) -> Result<(), SupervisorError> {
        let suspects: Vec<ProcessId> = self
            .children
            .values()
            .filter(|c| c.record.status.is_running() && !c.worker.is_healthy())
            .map(|c| c.record.id.clone())
            .collect();
        for id in suspects {
            let still_failing = self
                .children
                .get(&id)
                .is_some_and(|c| c.record.status.is_running() && !c.worker.is_healthy());
            if still_failing {
                warn!(supervisor = %self.config.name, process = %id, "health check failed");
                self.on_crash(id, WorkerError::unhealthy()).await?;
            }
        }
        Ok(())
    }

    /// Process crash reports (and health probes) until `shutdown` resolves,
    /// then stop every process
    ///
    /// # Errors
    /// `SupervisorError::Escalated` if the tree budget runs out; every
    /// process is already stopped when this is returned
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), SupervisorError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut health = (self.config.health_interval_ms > 0).then(|| {
            let period = Duration::from_millis(self.config.health_interval_ms);
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                report = self.crash_rx.recv() => {
                    let Some(report) = report else { break };
                    self.on_crash(report.process, report.error).await?;
                }
                () = next_tick(health.as_mut()) => self.check_health().await?,
            }
        }

        info!(supervisor = %self.config.name, "shutdown requested");
        self.stop().await;
        Ok(())
    }

    async fn handle_crash(
        &mut self,
        id: ProcessId,
        error: WorkerError,
        pending: &mut Pending,
    ) -> Result<(), SupervisorError> {
        let Some(idx) = self.children.get_index_of(&id) else {
            return Err(SupervisorError::UnknownProcess(id));
        };
        let now = self.clock.now_ms();

        let child = &mut self.children[idx];
        if child.record.retired || child.record.status == ProcessStatus::Stopped {
            debug!(
                supervisor = %self.config.name,
                process = %id,
                "ignoring crash of stopped process"
            );
            return Ok(());
        }
        child.record.status = crashed(&error);
        let deadline = child.worker.restart_deadline();
        error!(
            supervisor = %self.config.name,
            process = %id,
            code = error.code,
            error = %error.message,
            "process crashed"
        );
        self.emit(SupervisorEvent::ProcessCrashed {
            process: id.clone(),
            code: error.code,
            message: error.message.clone(),
        })
        .await;

        if let Some(deadline) = deadline.filter(|deadline| now >= *deadline) {
            self.retire(idx, deadline).await;
            if let Some(stalled) = self.stalled_span() {
                self.restart_range(stalled, pending).await;
            }
            return Ok(());
        }

        let child = &mut self.children[idx];
        let budget = child.budget;
        if !child.record.window.record(now, &budget) {
            warn!(
                supervisor = %self.config.name,
                process = %id,
                restarts = child.record.restart_count(),
                max_restarts = budget.max_restarts,
                "restart budget exhausted; escalating"
            );
            return self.escalate(id, error, pending).await;
        }

        let mut range = self.config.strategy.affected(idx, self.children.len());
        if let Some(stalled) = self.stalled_span() {
            range = range.start.min(stalled.start)..range.end.max(stalled.end);
        }
        info!(
            supervisor = %self.config.name,
            process = %id,
            strategy = ?self.config.strategy,
            attempt = self.children[idx].record.restart_count(),
            "restarting"
        );
        self.restart_range(range, pending).await;
        Ok(())
    }

    async fn escalate(
        &mut self,
        id: ProcessId,
        error: WorkerError,
        pending: &mut Pending,
    ) -> Result<(), SupervisorError> {
        let now = self.clock.now_ms();
        let tree_budget = self.config.tree_budget;
        if self.tree_window.record(now, &tree_budget) {
            let tree_restarts = self.tree_window.count();
            warn!(
                supervisor = %self.config.name,
                process = %id,
                tree_restarts,
                "escalated; restarting every process"
            );
            self.emit(SupervisorEvent::Escalated {
                process: id,
                tree_restarts,
            })
            .await;
            for child in self.children.values_mut() {
                child.record.window.reset(now);
            }
            self.restart_range(0..self.children.len(), pending).await;
            return Ok(());
        }

        error!(
            supervisor = %self.config.name,
            process = %id,
            error = %error,
            "tree restart budget exhausted; stopping every process"
        );
        for idx in (0..self.children.len()).rev() {
            self.stop_child(idx, ProcessStatus::Stopped).await;
        }
        pending.clear();
        self.drain_reports();
        self.emit(SupervisorEvent::SupervisorFailed {
            process: id.clone(),
            message: error.to_string(),
        })
        .await;
        Err(SupervisorError::Escalated {
            supervisor: self.config.name.clone(),
            process: id,
            source: error,
        })
    }

    /// Stop `range` in reverse, then start it forward with per-process backoff
    ///
    /// A start failure is queued and ends the pass; processes left down are
    /// picked up by the handling of that crash.
    async fn restart_range(&mut self, range: Range<usize>, pending: &mut Pending) {
        for idx in range.clone().rev() {
            if !self.children[idx].record.retired {
                self.stop_child(idx, ProcessStatus::Restarting).await;
            }
        }

        for report in self.drain_reports() {
            match self.children.get_index_of(&report.process) {
                Some(idx) if range.contains(&idx) => {
                    debug!(
                        process = %report.process,
                        "dropping crash report from stopped incarnation"
                    );
                }
                _ => pending.push_back((report.process, report.error)),
            }
        }

        for idx in range {
            let child = &mut self.children[idx];
            if child.record.retired {
                continue;
            }
            let id = child.record.id.clone();
            let attempt = child.record.restart_count();
            let delay = child.budget.backoff_ms.saturating_mul(u64::from(attempt));
            child.record.status = ProcessStatus::Restarting;
            if delay > 0 {
                debug!(
                    supervisor = %self.config.name,
                    process = %id,
                    delay_ms = delay,
                    "backing off"
                );
                sleep(Duration::from_millis(delay)).await;
            }

            let child = &mut self.children[idx];
            let result = child.worker.start().await;
            match result {
                Ok(()) => {
                    child.record.status = ProcessStatus::Running;
                    info!(
                        supervisor = %self.config.name,
                        process = %id,
                        attempt,
                        "process restarted"
                    );
                    self.emit(SupervisorEvent::ProcessRestarted {
                        process: id,
                        attempt,
                    })
                    .await;
                }
                Err(err) => {
                    warn!(
                        supervisor = %self.config.name,
                        process = %id,
                        error = %err,
                        "restart failed"
                    );
                    child.record.status = crashed(&err);
                    pending.push_back((id, err));
                    break;
                }
            }
        }
    }

    async fn stop_child(&mut self, idx: usize, next: ProcessStatus) {
        let child = &mut self.children[idx];
        if child.record.status == ProcessStatus::Stopped {
            return;
        }
        let id = child.record.id.clone();
        let result = child.worker.stop().await;
        child.record.status = next;
        match result {
            Ok(()) => debug!(supervisor = %self.config.name, process = %id, "process stopped"),
            Err(err) => warn!(
                supervisor = %self.config.name,
                process = %id,
                error = %err,
                "stop failed; continuing"
            ),
        }
        self.emit(SupervisorEvent::ProcessStopped { process: id }).await;
    }

    async fn retire(&mut self, idx: usize, deadline: PosixMs) {
        self.stop_child(idx, ProcessStatus::Stopped).await;
        let child = &mut self.children[idx];
        child.record.status = ProcessStatus::Stopped;
        child.record.retired = true;
        let id = child.record.id.clone();
        warn!(
            supervisor = %self.config.name,
            process = %id,
            deadline,
            "restart deadline passed; retiring process"
        );
        self.emit(SupervisorEvent::RestartAbandoned {
            process: id,
            deadline,
        })
        .await;
    }

    /// Span of processes left in `Restarting` by an interrupted restart pass
    fn stalled_span(&self) -> Option<Range<usize>> {
        let stalled = |c: &Child| !c.record.retired && c.record.status == ProcessStatus::Restarting;
        let first = self.children.values().position(stalled)?;
        let last = self.children.values().rposition(stalled)?;
        Some(first..last + 1)
    }

    fn drain_reports(&mut self) -> Vec<CrashReport> {
        let mut reports = Vec::new();
        while let Ok(report) = self.crash_rx.try_recv() {
            reports.push(report);
        }
        reports
    }

    async fn emit(&self, event: SupervisorEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).await.is_err() {
                debug!(supervisor = %self.config.name, "event subscriber gone");
            }
        }
    }
}

fn crashed(err: &WorkerError) -> ProcessStatus {
    ProcessStatus::Crashed {
        code: err.code,
        message: err.message.clone(),
    }
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

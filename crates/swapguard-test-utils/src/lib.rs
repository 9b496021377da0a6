//! Testing utilities for the swapguard workspace
//!
//! Scripted workers, a shared call journal, and escrow fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use swapguard_htlc::{Beneficiary, EscrowRules, PartyId, PosixMs, Secret, SwapLeg, SwapTerms};
use swapguard_supervisor::{ProcessStatus, Worker, WorkerError};

pub use swapguard_htlc::ManualClock;

/// Ordered log of worker calls shared by every worker in a test
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Entries recorded so far, clearing the journal
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.entries.lock())
    }

    /// Entries mentioning `process`
    pub fn entries_for(&self, process: &str) -> Vec<String> {
        let suffix = format!(" {process}");
        self.entries
            .lock()
            .iter()
            .filter(|e| e.ends_with(&suffix))
            .cloned()
            .collect()
    }
}

/// Worker whose behaviour is scripted by the test
///
/// Journal entries are `"start NAME"`, `"start-failed NAME"`, `"stop NAME"`.
#[derive(Debug, Clone)]
pub struct ScriptedWorker {
    name: String,
    journal: Journal,
    running: Arc<AtomicBool>,
    healthy: Arc<AtomicBool>,
    start_failures: Arc<AtomicU32>,
    fail_stop: bool,
    restart_deadline: Option<PosixMs>,
}

impl ScriptedWorker {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            journal: journal.clone(),
            running: Arc::new(AtomicBool::new(false)),
            healthy: Arc::new(AtomicBool::new(true)),
            start_failures: Arc::new(AtomicU32::new(0)),
            fail_stop: false,
            restart_deadline: None,
        }
    }

    /// Fail the next `count` starts
    #[must_use]
    pub fn failing_starts(self, count: u32) -> Self {
        self.start_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Every stop reports an error (the worker still goes down)
    #[must_use]
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    #[must_use]
    pub fn with_restart_deadline(mut self, deadline: PosixMs) -> Self {
        self.restart_deadline = Some(deadline);
        self
    }

    /// Shared handle; clone before registering to flip health later
    pub fn health(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.healthy)
    }

    /// Shared handle to the failure counter
    pub fn start_failures(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.start_failures)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn start(&mut self) -> Result<(), WorkerError> {
        let failing = self
            .start_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.journal.record(format!("start-failed {}", self.name));
            return Err(WorkerError::new(1, format!("{} refused to start", self.name)));
        }
        self.journal.record(format!("start {}", self.name));
        self.running.store(true, Ordering::SeqCst);
        self.healthy.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), WorkerError> {
        self.journal.record(format!("stop {}", self.name));
        self.running.store(false, Ordering::SeqCst);
        if self.fail_stop {
            return Err(WorkerError::new(2, format!("{} stopped uncleanly", self.name)));
        }
        Ok(())
    }

    fn status(&self) -> ProcessStatus {
        if self.is_running() {
            ProcessStatus::Running
        } else {
            ProcessStatus::Stopped
        }
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn restart_deadline(&self) -> Option<PosixMs> {
        self.restart_deadline
    }
}

/// Crash used throughout the supervisor tests
pub fn crash(message: &str) -> WorkerError {
    WorkerError::new(50, message)
}

/// Ten-minute grace, minimum escrow of 2_000_000 units
pub fn rules() -> EscrowRules {
    EscrowRules {
        grace_period_ms: 600_000,
        minimum_escrow_amount: 2_000_000,
    }
}

/// Fixed secret for deterministic fixtures
pub fn secret() -> Secret {
    Secret::from_bytes(b"swapguard-fixture-secret-0000001".to_vec())
}

/// Creation terms locking `amount` from alice to bob under [`secret`]
pub fn terms(amount: u64, deadline: PosixMs) -> SwapTerms {
    SwapTerms {
        depositor: PartyId::from("alice"),
        beneficiary: Beneficiary::Single(PartyId::from("bob")),
        secret_hash: secret().commitment().as_bytes().to_vec(),
        amount,
        deadline,
    }
}

/// Locked leg created at time zero
pub fn locked_leg(deadline: PosixMs) -> SwapLeg {
    SwapLeg::create(terms(5_000_000, deadline), 0, &rules()).unwrap()
}

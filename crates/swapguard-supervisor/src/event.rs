//! Lifecycle notifications
//!
//! Delivered as typed messages on a bounded channel obtained from
//! [`Supervisor::subscribe`](crate::Supervisor::subscribe). A full channel
//! suspends the supervisor until the consumer catches up.

use crate::process::ProcessId;
use serde::{Deserialize, Serialize};
use swapguard_htlc::PosixMs;

/// Something the supervisor did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorEvent {
    /// Process started by [`Supervisor::start`](crate::Supervisor::start)
    ProcessStarted {
        /// Process
        process: ProcessId,
    },
    /// Process stopped
    ProcessStopped {
        /// Process
        process: ProcessId,
    },
    /// Crash received
    ProcessCrashed {
        /// Process
        process: ProcessId,
        /// Worker exit code
        code: i32,
        /// Failure reason
        message: String,
    },
    /// Process running again after a restart
    ProcessRestarted {
        /// Process
        process: ProcessId,
        /// Restarts counted in the process's current window
        attempt: u32,
    },
    /// Restart skipped because the worker's deadline passed; process retired
    RestartAbandoned {
        /// Process
        process: ProcessId,
        /// Deadline that passed
        deadline: PosixMs,
    },
    /// Per-process budget exhausted; tree restarted within the tree budget
    Escalated {
        /// Process whose crash escalated
        process: ProcessId,
        /// Tree restarts counted in the current window
        tree_restarts: u32,
    },
    /// Tree budget exhausted; every process stopped and the error re-raised
    SupervisorFailed {
        /// Process whose crash escalated
        process: ProcessId,
        /// Failure reason
        message: String,
    },
}

impl SupervisorEvent {
    /// Process the event is about
    #[must_use]
    pub fn process(&self) -> &ProcessId {
        match self {
            Self::ProcessStarted { process }
            | Self::ProcessStopped { process }
            | Self::ProcessCrashed { process, .. }
            | Self::ProcessRestarted { process, .. }
            | Self::RestartAbandoned { process, .. }
            | Self::Escalated { process, .. }
            | Self::SupervisorFailed { process, .. } => process,
        }
    }
}

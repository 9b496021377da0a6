//! Swapguard Supervisor
//!
//! Keeps long-running workers alive under a restart strategy and escalates
//! when restarts stop helping.
//!
//! - [`Worker`]: the capability any supervised component implements
//! - [`Supervisor`]: registry, start/stop ordering, crash handling
//! - [`SupervisionStrategy`]: `OneForOne`, `OneForAll`, `RestForOne`
//! - [`RestartBudget`]: per-process and per-tree sliding-window budgets
//! - [`SupervisorEvent`]: typed lifecycle notifications
//! - [`NestedSupervisor`]: a child supervisor running as a parent's worker
//!
//! # Example
//!
//! ```rust,ignore
//! use swapguard_supervisor::{RestartBudget, Supervisor, SupervisorConfig, SupervisionStrategy};
//!
//! let mut sup = Supervisor::new(
//!     SupervisorConfig::new("swap").with_strategy(SupervisionStrategy::RestForOne),
//! );
//! let reporter = sup.reporter("claim");
//! sup.register("claim", RestartBudget::default(), ClaimWorker::new(reporter))?;
//! let mut events = sup.subscribe();
//! sup.start().await?;
//! sup.run_until(shutdown_signal()).await?;
//! ```

#![warn(unreachable_pub)]

mod error;
mod event;
mod nested;
mod process;
mod strategy;
mod supervisor;
mod worker;

pub use error::{SupervisorError, WorkerError};
pub use event::SupervisorEvent;
pub use nested::NestedSupervisor;
pub use process::{ProcessId, ProcessRecord, ProcessStatus, RestartBudget, RestartWindow};
pub use strategy::SupervisionStrategy;
pub use supervisor::{Supervisor, SupervisorConfig};
pub use worker::{CrashReport, CrashReporter, Worker};

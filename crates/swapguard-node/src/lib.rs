//! Swapguard Node
//!
//! Everything needed to run supervised swap legs against a ledger:
//!
//! - [`config`]: `swapguard.toml` loading and validation
//! - [`telemetry`]: tracing subscriber setup
//! - [`chain`]: [`ChainClient`]/[`Wallet`] collaborators and the in-memory ledger
//! - [`tx`]: spend assembly with local predicate checks
//! - [`worker`]: [`LegWorker`] and [`PeriodicWorker`]
//! - [`runner`]: a full two-leg swap under one supervisor
//!
//! # Example
//!
//! ```rust,ignore
//! use swapguard_node::{simulate, NodeConfig, Scenario, SimulationOptions};
//!
//! let config = NodeConfig::load("swapguard.toml")?;
//! let options = SimulationOptions { scenario: Scenario::Stall, ..Default::default() };
//! let report = simulate(&config, &options).await?;
//! assert!(report.is_settled());
//! ```

#![warn(unreachable_pub)]

pub mod chain;
pub mod config;
pub mod runner;
pub mod telemetry;
pub mod tx;
pub mod worker;

pub use chain::{
    ChainClient, MemoryChain, MemoryWallet, SignedTx, TxHash, UnsignedTx, Utxo, UtxoRef, Wallet,
};
pub use config::{ConfigError, LoggingSection, NodeConfig, SupervisorSection, SwapSection};
pub use runner::{simulate, RunnerError, Scenario, SimulationOptions, SimulationReport};
pub use telemetry::{init_tracing, TelemetryError};
pub use tx::build_spend;
pub use worker::{
    Job, LegContext, LegProgress, LegRole, LegWatch, LegWorker, PeriodicWorker, SecretSource,
};

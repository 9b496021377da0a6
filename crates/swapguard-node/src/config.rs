//! Node configuration loaded from `swapguard.toml`
//!
//! Every section has a default so a partial (or missing) file still
//! produces a usable configuration. [`NodeConfig::validate`] runs after
//! loading and rejects settings that would make a swap unsafe.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use swapguard_htlc::{EscrowRules, PosixMs, SwapError, SwapPlan};
use swapguard_retry::RetryPolicy;
use swapguard_supervisor::{RestartBudget, SupervisionStrategy, SupervisorConfig};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "swapguard.toml";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parse but are unsafe or inconsistent
    #[error("{0}")]
    Invalid(String),
}

/// Escrow and timing parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapSection {
    /// Dead zone between a leg's deadline and its refund window
    pub grace_period_ms: u64,
    /// Smallest amount a leg may lock
    pub minimum_escrow_amount: u64,
    /// Initiator leg lifetime
    pub initiator_timeout_ms: u64,
    /// Counterparty leg lifetime; must be shorter
    pub counterparty_timeout_ms: u64,
    /// Minimum gap between the two deadlines
    pub safety_margin_ms: u64,
    /// Generated secret length in bytes
    pub secret_length: usize,
    /// How often workers poll the chain
    pub poll_interval_ms: u64,
}

impl Default for SwapSection {
    fn default() -> Self {
        let rules = EscrowRules::default();
        Self {
            grace_period_ms: rules.grace_period_ms,
            minimum_escrow_amount: rules.minimum_escrow_amount,
            initiator_timeout_ms: 86_400_000,
            counterparty_timeout_ms: 43_200_000,
            safety_margin_ms: 3_600_000,
            secret_length: 32,
            poll_interval_ms: 1_000,
        }
    }
}

/// Restart strategy and budgets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    /// Which siblings restart with a crashed process
    pub strategy: SupervisionStrategy,
    /// Per-process restarts allowed inside `window_ms`
    pub max_restarts: u32,
    /// Per-process window
    pub window_ms: u64,
    /// Delay before a restart, scaled by the restart count
    pub backoff_ms: u64,
    /// Whole-tree restarts allowed inside `tree_window_ms`
    pub tree_max_restarts: u32,
    /// Tree window
    pub tree_window_ms: u64,
    /// Lifecycle event buffer
    pub event_capacity: usize,
    /// Health probe period; zero disables probing
    pub health_interval_ms: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        let process = RestartBudget::default();
        let tree = SupervisorConfig::default();
        Self {
            strategy: SupervisionStrategy::default(),
            max_restarts: process.max_restarts,
            window_ms: process.window_ms,
            backoff_ms: process.backoff_ms,
            tree_max_restarts: tree.tree_budget.max_restarts,
            tree_window_ms: tree.tree_budget.window_ms,
            event_capacity: tree.event_capacity,
            health_interval_ms: tree.health_interval_ms,
        }
    }
}

/// Log output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of compact text
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Full node configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// `[swap]`
    pub swap: SwapSection,
    /// `[retry]`
    pub retry: RetryPolicy,
    /// `[supervisor]`
    pub supervisor: SupervisorSection,
    /// `[logging]`
    pub logging: LoggingSection,
}

impl NodeConfig {
    /// Read and validate a config file
    ///
    /// # Errors
    /// I/O, parse, or validation failure.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load `path` if given, else `swapguard.toml` if present, else defaults
    ///
    /// # Errors
    /// See [`NodeConfig::load`].
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::load(DEFAULT_CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// Parse or validation failure.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject unsafe or inconsistent settings
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_nonzero("retry.max_attempts", u64::from(self.retry.max_attempts))?;
        validate_nonzero("supervisor.window_ms", self.supervisor.window_ms)?;
        validate_nonzero("supervisor.tree_window_ms", self.supervisor.tree_window_ms)?;
        validate_nonzero("supervisor.event_capacity", self.supervisor.event_capacity as u64)?;
        validate_nonzero("swap.counterparty_timeout_ms", self.swap.counterparty_timeout_ms)?;
        validate_nonzero("swap.secret_length", self.swap.secret_length as u64)?;
        validate_nonzero("swap.poll_interval_ms", self.swap.poll_interval_ms)?;

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }
        if self.swap.counterparty_timeout_ms >= self.swap.initiator_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "swap.counterparty_timeout_ms ({}) must be below swap.initiator_timeout_ms ({})",
                self.swap.counterparty_timeout_ms, self.swap.initiator_timeout_ms
            )));
        }
        let gap = self.swap.initiator_timeout_ms - self.swap.counterparty_timeout_ms;
        if gap < self.swap.safety_margin_ms {
            return Err(ConfigError::Invalid(format!(
                "timeout gap {gap}ms is below swap.safety_margin_ms ({})",
                self.swap.safety_margin_ms
            )));
        }
        Ok(())
    }

    /// Escrow rules shared by the predicate and the off-chain checks
    #[must_use]
    pub fn escrow_rules(&self) -> EscrowRules {
        EscrowRules {
            grace_period_ms: self.swap.grace_period_ms,
            minimum_escrow_amount: self.swap.minimum_escrow_amount,
        }
    }

    /// Budget applied to every supervised process
    #[must_use]
    pub fn restart_budget(&self) -> RestartBudget {
        RestartBudget::new(
            self.supervisor.max_restarts,
            self.supervisor.window_ms,
            self.supervisor.backoff_ms,
        )
    }

    /// Supervisor settings under `name`
    #[must_use]
    pub fn supervisor_config(&self, name: &str) -> SupervisorConfig {
        SupervisorConfig::new(name)
            .with_strategy(self.supervisor.strategy)
            .with_tree_budget(RestartBudget::new(
                self.supervisor.tree_max_restarts,
                self.supervisor.tree_window_ms,
                0,
            ))
            .with_event_capacity(self.supervisor.event_capacity)
            .with_health_interval(self.supervisor.health_interval_ms)
    }

    /// Deadlines for a swap opened at `now`, margin enforced
    ///
    /// # Errors
    /// [`SwapError::InvalidDatum`] when the timeouts are misordered or too close.
    pub fn plan(&self, now: PosixMs) -> Result<SwapPlan, SwapError> {
        let plan = SwapPlan::new(
            now,
            self.swap.initiator_timeout_ms,
            self.swap.counterparty_timeout_ms,
        )?;
        plan.ensure_margin(self.swap.safety_margin_ms)?;
        Ok(plan)
    }
}

fn validate_nonzero(label: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Invalid(format!("{label} must be greater than zero")))
    } else {
        Ok(())
    }
}

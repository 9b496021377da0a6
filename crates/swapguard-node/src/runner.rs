//! Supervised two-leg swap against in-memory ledgers
//!
//! Alice (initiator) locks on `chain-a` for Bob; Bob (counterparty) locks
//! on `chain-b` for Alice with the shorter deadline. A [`PeriodicWorker`]
//! drives the shared ledger clock, and one [`LegWorker`] per role runs
//! under a single supervisor:
//!
//! | process        | role                                             |
//! |----------------|--------------------------------------------------|
//! | `clock`        | advances simulated time every tick               |
//! | `alice-claim`  | claims Bob's leg with the secret (not in stall)  |
//! | `bob-claim`    | waits for the secret on `chain-b`, claims leg A  |
//! | `alice-refund` | refunds leg A after its grace period             |
//! | `bob-refund`   | refunds leg B after its grace period             |

use crate::chain::{ChainClient, MemoryChain, MemoryWallet, UtxoRef};
use crate::config::NodeConfig;
use crate::worker::{Job, LegContext, LegRole, LegWorker, PeriodicWorker, SecretSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use swapguard_htlc::{
    Beneficiary, ChainError, Clock, ManualClock, PartyId, PosixMs, Secret, SwapError, SwapLeg,
    SwapPlan, SwapState, SwapTerms,
};
use swapguard_supervisor::{ProcessId, Supervisor, SupervisorError, SupervisorEvent, WorkerError};
use tokio::time::sleep;
use tracing::{info, warn};

/// Simulation failures
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Setup was rejected by the escrow rules
    #[error("swap setup failed: {0}")]
    Swap(#[from] SwapError),

    /// The supervision tree gave up
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// Which failure the simulation injects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Both parties behave
    #[default]
    Happy,
    /// Alice never claims; both legs refund
    Stall,
    /// `chain-b` drops the first two submissions
    Flaky,
}

impl Display for Scenario {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Happy => "happy",
            Self::Stall => "stall",
            Self::Flaky => "flaky",
        })
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "happy" => Ok(Self::Happy),
            "stall" => Ok(Self::Stall),
            "flaky" => Ok(Self::Flaky),
            other => Err(format!("unknown scenario `{other}` (happy, stall, flaky)")),
        }
    }
}

/// Knobs for one run
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Injected failure
    pub scenario: Scenario,
    /// Simulated start time
    pub start_ms: PosixMs,
    /// Simulated time added per tick
    pub step_ms: u64,
    /// Real time between ticks; also the workers' polling period
    pub tick: Duration,
    /// Amount locked on each leg
    pub amount: u64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            scenario: Scenario::Happy,
            start_ms: 1_700_000_000_000,
            step_ms: 60_000,
            tick: Duration::from_millis(10),
            amount: 5_000_000,
        }
    }
}

/// How one leg ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegOutcome {
    /// Ledger
    pub chain: String,
    /// Escrow output
    pub utxo: UtxoRef,
    /// Funding party
    pub depositor: PartyId,
    /// Claim deadline
    pub deadline: PosixMs,
    /// Final ledger state
    pub state: SwapState,
}

/// Balance of one party on one ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Balance {
    /// Ledger
    pub chain: String,
    /// Party
    pub party: PartyId,
    /// Spendable amount
    pub amount: u64,
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Injected failure
    pub scenario: Scenario,
    /// Leg deadlines
    pub plan: SwapPlan,
    /// Commitment both legs share
    pub secret_hash: String,
    /// Alice's leg on `chain-a`
    pub initiator_leg: LegOutcome,
    /// Bob's leg on `chain-b`
    pub counterparty_leg: LegOutcome,
    /// Final balances
    pub balances: Vec<Balance>,
    /// Supervisor lifecycle events in order
    pub events: Vec<SupervisorEvent>,
    /// Simulated time at shutdown
    pub finished_at: PosixMs,
}

impl SimulationReport {
    /// Whether both legs left `Locked`
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.initiator_leg.state != SwapState::Locked
            && self.counterparty_leg.state != SwapState::Locked
    }

    /// Restarts performed by the supervisor
    #[must_use]
    pub fn restarts(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, SupervisorEvent::ProcessRestarted { .. }))
            .count()
    }

    /// Processes retired because their deadline passed
    #[must_use]
    pub fn abandoned(&self) -> Vec<ProcessId> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SupervisorEvent::RestartAbandoned { process, .. } => Some(process.clone()),
                _ => None,
            })
            .collect()
    }

    /// Balance of `party` on `chain`
    #[must_use]
    pub fn balance(&self, chain: &str, party: &str) -> u64 {
        self.balances
            .iter()
            .find(|b| b.chain == chain && b.party.as_str() == party)
            .map_or(0, |b| b.amount)
    }
}

struct ClockTicker {
    clock: ManualClock,
    step_ms: u64,
}

#[async_trait]
impl Job for ClockTicker {
    async fn run(&self) -> Result<(), WorkerError> {
        self.clock.advance(self.step_ms);
        Ok(())
    }
}

struct Swap {
    chain: Arc<MemoryChain>,
    utxo: UtxoRef,
    leg: SwapLeg,
}

impl Swap {
    fn outcome(&self) -> LegOutcome {
        LegOutcome {
            chain: self.chain.name().to_string(),
            utxo: self.utxo.clone(),
            depositor: self.leg.depositor.clone(),
            deadline: self.leg.deadline,
            state: self.chain.leg_state(&self.utxo).unwrap_or(self.leg.state),
        }
    }

    fn is_open(&self) -> bool {
        self.chain.leg_state(&self.utxo) == Some(SwapState::Locked)
    }
}

fn lock(
    chain: &Arc<MemoryChain>,
    depositor: &str,
    beneficiary: &str,
    secret: &Secret,
    amount: u64,
    deadline: PosixMs,
) -> Result<Swap, SwapError> {
    chain.fund(depositor, amount);
    let utxo = chain.lock(SwapTerms {
        depositor: PartyId::from(depositor),
        beneficiary: Beneficiary::Single(PartyId::from(beneficiary)),
        secret_hash: secret.commitment().as_bytes().to_vec(),
        amount,
        deadline,
    })?;
    Ok(Swap {
        chain: Arc::clone(chain),
        utxo: utxo.reference,
        leg: utxo.leg,
    })
}

/// Run one supervised swap to completion
///
/// Returns once both legs have settled, or once simulated time is past the
/// initiator's refund window.
///
/// # Errors
/// [`RunnerError::Swap`] if the legs cannot be set up,
/// [`RunnerError::Supervisor`] if the supervision tree escalates.
pub async fn simulate(
    config: &NodeConfig,
    options: &SimulationOptions,
) -> Result<SimulationReport, RunnerError> {
    let clock = ManualClock::new(options.start_ms);
    let rules = config.escrow_rules();
    let chain_a = Arc::new(MemoryChain::new("chain-a", clock.clone(), rules));
    let chain_b = Arc::new(MemoryChain::new("chain-b", clock.clone(), rules));

    let secret = Secret::generate(config.swap.secret_length)?;
    let plan = config.plan(clock.now_ms())?;
    let leg_a = lock(&chain_a, "alice", "bob", &secret, options.amount, plan.initiator_deadline)?;
    let leg_b = lock(
        &chain_b,
        "bob",
        "alice",
        &secret,
        options.amount,
        plan.counterparty_deadline,
    )?;
    info!(
        scenario = %options.scenario,
        secret_hash = %secret.commitment().short(),
        initiator_deadline = plan.initiator_deadline,
        counterparty_deadline = plan.counterparty_deadline,
        "swap locked"
    );

    if options.scenario == Scenario::Flaky {
        chain_b.fail_next(2, ChainError::Network("connection reset by peer".to_string()));
    }

    let context = |chain: &Arc<MemoryChain>, party: &str| LegContext {
        chain: Arc::clone(chain) as Arc<dyn ChainClient>,
        wallet: Arc::new(MemoryWallet::new(party)),
        rules,
        retry: config.retry,
        poll_interval: options.tick,
    };

    let mut sup = Supervisor::with_clock(config.supervisor_config("swap"), Arc::new(clock.clone()));
    let mut events = sup.subscribe();
    let collector = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            info!(?event, "supervisor event");
            seen.push(event);
        }
        seen
    });

    let budget = config.restart_budget();
    let ticker = ClockTicker {
        clock: clock.clone(),
        step_ms: options.step_ms,
    };
    let reporter = sup.reporter("clock");
    sup.register("clock", budget, PeriodicWorker::new(ticker, options.tick, reporter))?;

    let mut legs = Vec::new();
    if options.scenario != Scenario::Stall {
        let role = LegRole::Claim(SecretSource::Known(secret.clone()));
        legs.push(("alice-claim", role, &leg_b, context(&chain_b, "alice")));
    }
    let watched = Arc::clone(&chain_b) as Arc<dyn ChainClient>;
    legs.push((
        "bob-claim",
        LegRole::Claim(SecretSource::Watch(watched)),
        &leg_a,
        context(&chain_a, "bob"),
    ));
    legs.push(("alice-refund", LegRole::Refund, &leg_a, context(&chain_a, "alice")));
    legs.push(("bob-refund", LegRole::Refund, &leg_b, context(&chain_b, "bob")));
    for (name, role, swap, context) in legs {
        let reporter = sup.reporter(name);
        let worker = LegWorker::new(role, swap.utxo.clone(), swap.leg.clone(), context, reporter);
        sup.register(name, budget, worker)?;
    }

    let horizon = leg_a
        .leg
        .refund_available_at(&rules)
        .saturating_add(options.step_ms.saturating_mul(10));
    let settled = async {
        loop {
            if !leg_a.is_open() && !leg_b.is_open() {
                info!("both legs settled");
                break;
            }
            if clock.now_ms() > horizon {
                warn!(horizon, "simulation horizon reached with an open leg");
                break;
            }
            sleep(options.tick).await;
        }
    };

    sup.start().await?;
    let outcome = sup.run_until(settled).await;
    drop(sup);
    let events = collector.await.unwrap_or_default();
    outcome?;

    let mut balances = Vec::new();
    for chain in [&chain_a, &chain_b] {
        for party in ["alice", "bob"] {
            let party = PartyId::from(party);
            balances.push(Balance {
                chain: chain.name().to_string(),
                amount: chain.balance(&party),
                party,
            });
        }
    }

    Ok(SimulationReport {
        scenario: options.scenario,
        plan,
        secret_hash: secret.commitment().to_string(),
        initiator_leg: leg_a.outcome(),
        counterparty_leg: leg_b.outcome(),
        balances,
        events,
        finished_at: clock.now_ms(),
    })
}

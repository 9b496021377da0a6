//! Supervised driver for one swap leg
//!
//! A [`LegWorker`] owns one role on one escrow output: claiming it with
//! the secret, refunding it after the grace period, or cancelling it
//! before the deadline. Every submission attempt re-reads the ledger time
//! and re-runs the transition check, so backoff can never carry a claim
//! past its deadline.

use crate::chain::{ChainClient, TxHash, UtxoRef, Wallet};
use crate::tx::build_spend;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use swapguard_htlc::{
    is_before_deadline, validate_transition, Action, ChainError, EscrowRules, PartyId, PosixMs,
    Secret, SecretHash, SwapError, SwapLeg, SwapState,
};
use swapguard_retry::{RetryPolicy, RetryableSubmitter, Submit};
use swapguard_supervisor::{CrashReporter, ProcessStatus, Worker, WorkerError};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Where a claiming worker gets the secret
#[derive(Clone)]
pub enum SecretSource {
    /// Held locally (the initiator)
    Known(Secret),
    /// Revealed by a claim on another ledger (the counterparty)
    Watch(Arc<dyn ChainClient>),
}

impl fmt::Debug for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(_) => f.write_str("Known(..)"),
            Self::Watch(chain) => f.debug_tuple("Watch").field(&chain.name()).finish(),
        }
    }
}

/// What a [`LegWorker`] does with its leg
#[derive(Debug, Clone)]
pub enum LegRole {
    /// Beneficiary claims with the secret; stands down if the leg is
    /// refunded or cancelled first
    Claim(SecretSource),
    /// Depositor refunds once the grace period is over; stands down if
    /// the leg is spent first
    Refund,
    /// Depositor withdraws before the deadline
    Cancel,
}

impl LegRole {
    fn label(&self) -> &'static str {
        match self {
            Self::Claim(_) => "claim",
            Self::Refund => "refund",
            Self::Cancel => "cancel",
        }
    }
}

/// Collaborators and settings shared by the workers of one ledger
#[derive(Clone)]
pub struct LegContext {
    /// Ledger holding the leg
    pub chain: Arc<dyn ChainClient>,
    /// Signer for this worker's party
    pub wallet: Arc<dyn Wallet>,
    /// Rules of that ledger
    pub rules: EscrowRules,
    /// Submission retry budget
    pub retry: RetryPolicy,
    /// Ledger polling period
    pub poll_interval: Duration,
}

impl fmt::Debug for LegContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegContext")
            .field("chain", &self.chain.name())
            .field("party", self.wallet.party())
            .field("rules", &self.rules)
            .field("retry", &self.retry)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// Local view of a leg as seen by its worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegProgress {
    /// Leg datum with the local `Claiming`/`Completed`/`Refunded` marker
    pub leg: SwapLeg,
    /// Last transaction this worker got accepted
    pub last_tx: Option<TxHash>,
    /// Failure of the current incarnation
    pub failure: Option<SwapError>,
    /// The role is done; restarting is a no-op
    pub finished: bool,
}

/// Read handle on a worker's [`LegProgress`]
#[derive(Debug, Clone)]
pub struct LegWatch(Arc<Mutex<LegProgress>>);

impl LegWatch {
    /// Current local state of the leg
    #[must_use]
    pub fn state(&self) -> SwapState {
        self.0.lock().leg.state
    }

    /// Whether the role completed
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.0.lock().finished
    }

    /// Copy of the full progress record
    #[must_use]
    pub fn snapshot(&self) -> LegProgress {
        self.0.lock().clone()
    }
}

/// One spend attempt: fresh ledger read, fresh time check, sign, submit
struct LegSubmitter {
    chain: Arc<dyn ChainClient>,
    wallet: Arc<dyn Wallet>,
    utxo: UtxoRef,
    rules: EscrowRules,
}

#[async_trait]
impl Submit for LegSubmitter {
    type Action = Action;
    type Receipt = TxHash;
    type Error = SwapError;

    async fn submit(&self, action: &Action) -> Result<TxHash, SwapError> {
        let utxo = self
            .chain
            .fetch_utxo(&self.utxo)
            .await?
            .ok_or_else(|| ChainError::UtxoNotFound(self.utxo.to_string()))?;
        let now = self.chain.now_ms().await?;
        let change = self.wallet.change_address().await?;
        let unsigned = build_spend(&utxo, action, now, &self.rules, change)?;
        let signed = self.wallet.sign(unsigned).await?;
        Ok(self.chain.submit(&signed).await?)
    }
}

/// How a submission ended
enum Submission {
    /// Our transaction was accepted
    Accepted(TxHash),
    /// The output was gone; whatever spent it may have been ours
    Spent,
}

struct Driver {
    role: LegRole,
    utxo: UtxoRef,
    deadline: PosixMs,
    refund_at: PosixMs,
    secret_hash: SecretHash,
    chain: Arc<dyn ChainClient>,
    party: PartyId,
    submitter: RetryableSubmitter<LegSubmitter>,
    poll: Duration,
    progress: Arc<Mutex<LegProgress>>,
}

impl Driver {
    async fn run(self: Arc<Self>, reporter: CrashReporter) {
        match self.drive().await {
            Ok(()) => {
                let mut progress = self.progress.lock();
                progress.finished = true;
                info!(
                    process = %reporter.process(),
                    utxo = %self.utxo,
                    state = %progress.leg.state,
                    "leg role finished"
                );
            }
            Err(err) => {
                error!(
                    process = %reporter.process(),
                    utxo = %self.utxo,
                    error = %err,
                    "leg worker failed"
                );
                self.progress.lock().failure = Some(err.clone());
                reporter.report(WorkerError::new(err.code(), err.to_string()));
            }
        }
    }

    async fn drive(&self) -> Result<(), SwapError> {
        match &self.role {
            LegRole::Claim(source) => {
                if self.state() == SwapState::Locked {
                    let secret = self.obtain_secret(source).await?;
                    let submitted = match secret {
                        Some(secret) => self.submit(Action::Claim { secret }).await?,
                        None => Submission::Spent,
                    };
                    if let Submission::Accepted(tx) = submitted {
                        self.settle(SwapState::Claiming, Some(tx))?;
                    }
                }
                self.await_spent().await?;
                let state = self.final_state().await?;
                if state != SwapState::Completed {
                    info!(
                        utxo = %self.utxo,
                        %state,
                        "leg settled without our claim; standing down"
                    );
                }
                self.settle(state, None)
            }
            LegRole::Refund => {
                let submitted = if self.await_refund_window().await? {
                    self.submit(Action::Refund).await?
                } else {
                    Submission::Spent
                };
                self.conclude(submitted, SwapState::Refunded).await
            }
            LegRole::Cancel => {
                let caller = self.party.clone();
                let submitted = self.submit(Action::Cancel { caller }).await?;
                self.conclude(submitted, SwapState::Refunded).await
            }
        }
    }

    fn state(&self) -> SwapState {
        self.progress.lock().leg.state
    }

    fn settle(&self, next: SwapState, tx: Option<TxHash>) -> Result<(), SwapError> {
        let mut progress = self.progress.lock();
        validate_transition(progress.leg.state, next)?;
        progress.leg.state = next;
        if tx.is_some() {
            progress.last_tx = tx;
        }
        Ok(())
    }

    /// Record a one-shot spend, or however the output ended without it
    async fn conclude(&self, submitted: Submission, ours: SwapState) -> Result<(), SwapError> {
        match submitted {
            Submission::Accepted(tx) => self.settle(ours, Some(tx)),
            Submission::Spent => {
                let state = self.final_state().await?;
                info!(utxo = %self.utxo, %state, "leg already spent; standing down");
                self.settle(state, None)
            }
        }
    }

    /// Terminal state of a spent output
    ///
    /// Falls back to the secret reveal log when the ledger keeps no record
    /// of how the output was spent.
    async fn final_state(&self) -> Result<SwapState, SwapError> {
        if let Some(state) = self.chain.settled_state(&self.utxo).await? {
            return Ok(state);
        }
        let revealed = self.chain.revealed_secret(&self.secret_hash).await?;
        Ok(if revealed.is_some() {
            SwapState::Completed
        } else {
            SwapState::Refunded
        })
    }

    async fn submit(&self, action: Action) -> Result<Submission, SwapError> {
        let kind = action.kind();
        match self.submitter.submit(&action).await {
            Ok(tx) => {
                info!(utxo = %self.utxo, action = %kind, tx = %tx, "transaction accepted");
                Ok(Submission::Accepted(tx))
            }
            Err(err) => {
                // a spend can land while its reply is lost
                if self.chain.fetch_utxo(&self.utxo).await?.is_none() {
                    info!(
                        utxo = %self.utxo,
                        action = %kind,
                        error = %err,
                        "escrow output already spent"
                    );
                    return Ok(Submission::Spent);
                }
                warn!(
                    utxo = %self.utxo,
                    action = %kind,
                    attempts = err.attempts(),
                    "submission abandoned"
                );
                Err(err.into_inner())
            }
        }
    }

    /// `None` if the output was spent before the secret turned up
    async fn obtain_secret(&self, source: &SecretSource) -> Result<Option<Secret>, SwapError> {
        let watched = match source {
            SecretSource::Known(secret) => return Ok(Some(secret.clone())),
            SecretSource::Watch(chain) => chain,
        };
        loop {
            if let Some(secret) = watched.revealed_secret(&self.secret_hash).await? {
                info!(utxo = %self.utxo, chain = watched.name(), "secret revealed");
                return Ok(Some(secret));
            }
            if self.chain.fetch_utxo(&self.utxo).await?.is_none() {
                return Ok(None);
            }
            let now = self.chain.now_ms().await?;
            if !is_before_deadline(now, self.deadline) {
                return Err(SwapError::Expired {
                    deadline: self.deadline,
                    now,
                });
            }
            debug!(utxo = %self.utxo, chain = watched.name(), "waiting for secret");
            sleep(self.poll).await;
        }
    }

    async fn await_spent(&self) -> Result<(), SwapError> {
        while self.chain.fetch_utxo(&self.utxo).await?.is_some() {
            sleep(self.poll).await;
        }
        Ok(())
    }

    /// `false` if the output was spent by someone else first
    async fn await_refund_window(&self) -> Result<bool, SwapError> {
        loop {
            if self.chain.fetch_utxo(&self.utxo).await?.is_none() {
                return Ok(false);
            }
            if self.chain.now_ms().await? >= self.refund_at {
                return Ok(true);
            }
            sleep(self.poll).await;
        }
    }
}

/// Supervised worker driving one role on one escrow output
pub struct LegWorker {
    driver: Arc<Driver>,
    reporter: CrashReporter,
    task: Option<JoinHandle<()>>,
}

impl LegWorker {
    /// Worker for `role` on the leg locked at `utxo`
    #[must_use]
    pub fn new(
        role: LegRole,
        utxo: UtxoRef,
        leg: SwapLeg,
        context: LegContext,
        reporter: CrashReporter,
    ) -> Self {
        let label = role.label();
        let submitter = RetryableSubmitter::new(
            LegSubmitter {
                chain: Arc::clone(&context.chain),
                wallet: Arc::clone(&context.wallet),
                utxo: utxo.clone(),
                rules: context.rules,
            },
            context.retry,
        )
        .with_label(label);
        let driver = Driver {
            role,
            deadline: leg.deadline,
            refund_at: leg.refund_available_at(&context.rules),
            secret_hash: leg.secret_hash,
            utxo,
            chain: context.chain,
            party: context.wallet.party().clone(),
            submitter,
            poll: context.poll_interval,
            progress: Arc::new(Mutex::new(LegProgress {
                leg,
                last_tx: None,
                failure: None,
                finished: false,
            })),
        };
        Self {
            driver: Arc::new(driver),
            reporter,
            task: None,
        }
    }

    /// Read handle on the local view of the leg
    #[must_use]
    pub fn watch(&self) -> LegWatch {
        LegWatch(Arc::clone(&self.driver.progress))
    }

    fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

#[async_trait]
impl Worker for LegWorker {
    async fn start(&mut self) -> Result<(), WorkerError> {
        {
            let mut progress = self.driver.progress.lock();
            if progress.finished || self.is_active() {
                return Ok(());
            }
            progress.failure = None;
        }
        debug!(
            process = %self.reporter.process(),
            role = self.driver.role.label(),
            "leg worker starting"
        );
        let driver = Arc::clone(&self.driver);
        self.task = Some(tokio::spawn(driver.run(self.reporter.clone())));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), WorkerError> {
        if let Some(task) = self.task.take() {
            task.abort();
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    return Err(WorkerError::new(
                        WorkerError::ABORTED,
                        format!("leg task failed: {err}"),
                    ));
                }
            }
        }
        Ok(())
    }

    fn status(&self) -> ProcessStatus {
        let progress = self.driver.progress.lock();
        if let Some(err) = &progress.failure {
            return ProcessStatus::Crashed {
                code: err.code(),
                message: err.to_string(),
            };
        }
        if !progress.finished && self.is_active() {
            ProcessStatus::Running
        } else {
            ProcessStatus::Stopped
        }
    }

    fn is_healthy(&self) -> bool {
        self.driver.progress.lock().failure.is_none()
    }

    fn restart_deadline(&self) -> Option<PosixMs> {
        match self.driver.role {
            LegRole::Claim(_) | LegRole::Cancel => Some(self.driver.deadline),
            LegRole::Refund => None,
        }
    }
}

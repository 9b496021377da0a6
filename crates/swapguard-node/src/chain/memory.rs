//! In-memory ledger used by `swapguard simulate` and the tests
//!
//! Spends are checked with [`SwapLeg::apply`], the same table the on-chain
//! predicate implements, plus the validity interval and signer checks a
//! real ledger performs.

use super::{ChainClient, SignedTx, TxHash, UnsignedTx, Utxo, UtxoRef, Wallet};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use swapguard_htlc::{
    Action, ChainError, Clock, EscrowRules, ManualClock, PartyId, PosixMs, Secret, SecretHash,
    SwapError, SwapLeg, SwapState, SwapTerms,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Ledger {
    unspent: HashMap<UtxoRef, SwapLeg>,
    settled: HashMap<UtxoRef, SwapState>,
    balances: HashMap<PartyId, u64>,
    revealed: HashMap<SecretHash, Secret>,
    faults: Option<(u32, ChainError)>,
    accepted: Vec<TxHash>,
}

/// Single-process ledger holding escrow outputs and party balances
#[derive(Debug)]
pub struct MemoryChain {
    name: String,
    clock: ManualClock,
    rules: EscrowRules,
    ledger: Mutex<Ledger>,
}

impl MemoryChain {
    /// Empty ledger reading time from `clock`
    #[must_use]
    pub fn new(name: impl Into<String>, clock: ManualClock, rules: EscrowRules) -> Self {
        Self {
            name: name.into(),
            clock,
            rules,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Ledger clock
    #[inline]
    #[must_use]
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Rules the predicate enforces
    #[inline]
    #[must_use]
    pub fn rules(&self) -> &EscrowRules {
        &self.rules
    }

    /// Credit `party` with `amount`
    pub fn fund(&self, party: impl Into<PartyId>, amount: u64) {
        let mut ledger = self.ledger.lock();
        let balance = ledger.balances.entry(party.into()).or_default();
        *balance = balance.saturating_add(amount);
    }

    /// Spendable balance of `party`
    #[must_use]
    pub fn balance(&self, party: &PartyId) -> u64 {
        self.ledger.lock().balances.get(party).copied().unwrap_or(0)
    }

    /// Lock the depositor's funds under `terms`
    ///
    /// # Errors
    /// Creation rules from [`SwapLeg::create`], or
    /// [`SwapError::InsufficientFunds`] if the depositor cannot cover the amount.
    pub fn lock(&self, terms: SwapTerms) -> Result<Utxo, SwapError> {
        let leg = SwapLeg::create(terms, self.clock.now_ms(), &self.rules)?;
        let mut ledger = self.ledger.lock();
        let available = ledger.balances.get(&leg.depositor).copied().unwrap_or(0);
        if available < leg.amount {
            return Err(SwapError::InsufficientFunds {
                required: leg.amount,
                available,
            });
        }
        ledger.balances.insert(leg.depositor.clone(), available - leg.amount);

        let tx = TxHash::new(Uuid::new_v4().simple().to_string());
        let reference = UtxoRef::output(&tx, 0);
        info!(
            chain = %self.name,
            utxo = %reference,
            depositor = %leg.depositor,
            amount = leg.amount,
            deadline = leg.deadline,
            "escrow locked"
        );
        ledger.unspent.insert(reference.clone(), leg.clone());
        ledger.accepted.push(tx);
        Ok(Utxo { reference, leg })
    }

    /// Fail the next `count` submissions with `error`
    pub fn fail_next(&self, count: u32, error: ChainError) {
        self.ledger.lock().faults = (count > 0).then_some((count, error));
    }

    /// State of an escrow output: `Locked` while unspent, else how it ended
    #[must_use]
    pub fn leg_state(&self, reference: &UtxoRef) -> Option<SwapState> {
        let ledger = self.ledger.lock();
        if let Some(leg) = ledger.unspent.get(reference) {
            return Some(leg.state);
        }
        ledger.settled.get(reference).copied()
    }

    /// Transactions accepted so far, locks included
    #[must_use]
    pub fn accepted(&self) -> Vec<TxHash> {
        self.ledger.lock().accepted.clone()
    }

    fn take_fault(ledger: &mut Ledger) -> Option<ChainError> {
        let (remaining, error) = ledger.faults.take()?;
        if remaining > 1 {
            ledger.faults = Some((remaining - 1, error.clone()));
        }
        Some(error)
    }

    fn check_spend(
        &self,
        leg: &SwapLeg,
        tx: &SignedTx,
        now: PosixMs,
    ) -> Result<SwapLeg, ChainError> {
        let body = &tx.body;
        if !body.validity.contains(now) {
            return Err(ChainError::Rejected(format!(
                "time {now} outside validity interval"
            )));
        }
        if let Action::Cancel { caller } = &body.redeemer {
            if caller != &tx.signer {
                return Err(ChainError::Rejected(
                    "cancel caller did not sign the transaction".to_string(),
                ));
            }
        }
        let transition = leg
            .apply(&body.redeemer, now, &self.rules)
            .map_err(|err| ChainError::Rejected(format!("predicate failed: {err}")))?;
        if transition.payouts != body.outputs {
            return Err(ChainError::Rejected(
                "outputs do not match the escrow payouts".to_string(),
            ));
        }
        if transition.continuing_output() != body.continuing.as_ref() {
            return Err(ChainError::Rejected(
                "continuing output does not match the escrow datum".to_string(),
            ));
        }
        Ok(transition.leg)
    }
}

#[async_trait]
impl ChainClient for MemoryChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_utxo(&self, reference: &UtxoRef) -> Result<Option<Utxo>, ChainError> {
        let ledger = self.ledger.lock();
        Ok(ledger.unspent.get(reference).map(|leg| Utxo {
            reference: reference.clone(),
            leg: leg.clone(),
        }))
    }

    async fn settled_state(&self, reference: &UtxoRef) -> Result<Option<SwapState>, ChainError> {
        Ok(self.ledger.lock().settled.get(reference).copied())
    }

    async fn submit(&self, tx: &SignedTx) -> Result<TxHash, ChainError> {
        let now = self.clock.now_ms();
        let mut ledger = self.ledger.lock();
        if let Some(error) = Self::take_fault(&mut ledger) {
            warn!(chain = %self.name, error = %error, "injected submission failure");
            return Err(error);
        }

        let input = &tx.body.input;
        let leg = ledger
            .unspent
            .get(input)
            .cloned()
            .ok_or_else(|| ChainError::UtxoNotFound(input.to_string()))?;
        let next = self.check_spend(&leg, tx, now)?;

        ledger.unspent.remove(input);
        let hash = TxHash::new(Uuid::new_v4().simple().to_string());
        if next.state.is_terminal() {
            ledger.settled.insert(input.clone(), next.state);
        } else {
            ledger.unspent.insert(UtxoRef::output(&hash, 0), next);
        }
        for payout in &tx.body.outputs {
            let balance = ledger.balances.entry(payout.party.clone()).or_default();
            *balance = balance.saturating_add(payout.amount);
        }
        if let Action::Claim { secret } = &tx.body.redeemer {
            ledger.revealed.insert(leg.secret_hash, secret.clone());
        }
        ledger.accepted.push(hash.clone());
        debug!(
            chain = %self.name,
            tx = %hash,
            action = %tx.body.redeemer.kind(),
            signer = %tx.signer,
            "transaction accepted"
        );
        Ok(hash)
    }

    async fn now_ms(&self) -> Result<PosixMs, ChainError> {
        Ok(self.clock.now_ms())
    }

    async fn revealed_secret(&self, hash: &SecretHash) -> Result<Option<Secret>, ChainError> {
        Ok(self.ledger.lock().revealed.get(hash).cloned())
    }
}

/// Wallet signing for one party against a [`MemoryChain`]
#[derive(Debug, Clone)]
pub struct MemoryWallet {
    party: PartyId,
}

impl MemoryWallet {
    /// Wallet for `party`
    #[must_use]
    pub fn new(party: impl Into<PartyId>) -> Self {
        Self {
            party: party.into(),
        }
    }
}

#[async_trait]
impl Wallet for MemoryWallet {
    fn party(&self) -> &PartyId {
        &self.party
    }

    async fn change_address(&self) -> Result<PartyId, ChainError> {
        Ok(self.party.clone())
    }

    async fn sign(&self, tx: UnsignedTx) -> Result<SignedTx, ChainError> {
        Ok(SignedTx {
            body: tx,
            signer: self.party.clone(),
        })
    }
}

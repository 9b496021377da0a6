//! Per-leg HTLC state machine
//!
//! Each transition is a pure predicate over `(leg, action, now)`: it either
//! returns the resulting leg plus the payouts the spending transaction must
//! carry, or a typed [`SwapError`]. The same table is enforced by the
//! on-chain validator; this side only pre-checks so that a transaction the
//! ledger would reject is never paid for.
//!
//! | Action | Preconditions | Effect |
//! |---|---|---|
//! | `Claim(s)` | `Locked`, `verify(s)`, `now < deadline` | pay beneficiary, `Completed` |
//! | `Refund` | `Locked`, `now >= deadline + grace` | pay depositor, `Refunded` |
//! | `Cancel` | `Locked`, `caller == depositor`, `now < deadline` | pay depositor, `Refunded` |

use crate::commitment::{verify, Secret, SecretHash};
use crate::deadline::{
    classify, is_after_grace, is_before_deadline, PosixMs, TimeWindow, ValidityInterval,
};
use crate::error::SwapError;
use crate::payout::{Payout, PayoutSplit};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Ledger party (address or key hash)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(String);

impl PartyId {
    /// Create a party id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PartyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartyId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PartyId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle of a leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapState {
    /// Funded; the only state accepting actions
    Locked,
    /// Claim submitted (secret revealed), not yet observed on-chain
    Claiming,
    /// Paid to the beneficiary
    Completed,
    /// Paid back to the depositor
    Refunded,
}

impl SwapState {
    /// Whether the leg has been spent for good
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Refunded)
    }
}

impl Display for SwapState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Locked => "locked",
            Self::Claiming => "claiming",
            Self::Completed => "completed",
            Self::Refunded => "refunded",
        };
        f.write_str(name)
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: SwapState) -> Vec<SwapState> {
    use SwapState::{Claiming, Completed, Locked, Refunded};
    match from {
        Locked => vec![Claiming, Completed, Refunded],
        Claiming => vec![Completed],
        Completed | Refunded => vec![],
    }
}

/// Check a single state change against the graph
///
/// # Errors
/// `SwapError::InvalidDatum` for an edge not in [`allowed_transitions`]
pub fn validate_transition(from: SwapState, to: SwapState) -> Result<(), SwapError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(SwapError::InvalidDatum(format!(
            "illegal transition {from} -> {to}"
        )))
    }
}

/// Who receives the escrowed amount on a successful claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Beneficiary {
    /// Single recipient of the full amount
    Single(PartyId),
    /// Basis-point split across several recipients
    Split(PayoutSplit),
}

impl Beneficiary {
    /// Payouts for a claim of `amount`
    #[must_use]
    pub fn payouts(&self, amount: u64, depositor: &PartyId) -> Vec<Payout> {
        match self {
            Self::Single(party) => vec![Payout::new(party.clone(), amount)],
            Self::Split(split) => split.distribute(amount, depositor).payouts,
        }
    }

    /// Whether `party` is paid by this beneficiary
    #[must_use]
    pub fn includes(&self, party: &PartyId) -> bool {
        match self {
            Self::Single(single) => single == party,
            Self::Split(split) => split.recipients().iter().any(|r| &r.party == party),
        }
    }
}

impl From<PartyId> for Beneficiary {
    fn from(value: PartyId) -> Self {
        Self::Single(value)
    }
}

/// Protocol parameters shared by every leg on one ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowRules {
    /// Dead zone after the deadline
    pub grace_period_ms: u64,
    /// Smallest amount a leg may lock
    pub minimum_escrow_amount: u64,
}

impl Default for EscrowRules {
    fn default() -> Self {
        Self {
            grace_period_ms: 10 * 60 * 1_000,
            minimum_escrow_amount: 2_000_000,
        }
    }
}

/// Unvalidated creation input, as it arrives from a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapTerms {
    /// Funding party, refunded on timeout or cancel
    pub depositor: PartyId,
    /// Paid on claim
    pub beneficiary: Beneficiary,
    /// Raw commitment bytes
    pub secret_hash: Vec<u8>,
    /// Locked amount
    pub amount: u64,
    /// Claim deadline
    pub deadline: PosixMs,
}

/// The datum of one funded leg
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapLeg {
    /// Funding party
    pub depositor: PartyId,
    /// Paid on claim
    pub beneficiary: Beneficiary,
    /// Commitment; immutable for the life of the leg
    pub secret_hash: SecretHash,
    /// Locked amount
    pub amount: u64,
    /// Claim deadline
    pub deadline: PosixMs,
    /// Current state
    pub state: SwapState,
}

/// What a spender attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Reveal the secret and pay the beneficiary
    Claim {
        /// Preimage of the leg's commitment
        secret: Secret,
    },
    /// Return funds to the depositor after deadline + grace
    Refund,
    /// Depositor withdraws before the deadline
    Cancel {
        /// Party signing the cancel
        caller: PartyId,
    },
}

/// Discriminant of [`Action`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// [`Action::Claim`]
    Claim,
    /// [`Action::Refund`]
    Refund,
    /// [`Action::Cancel`]
    Cancel,
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Claim => "claim",
            Self::Refund => "refund",
            Self::Cancel => "cancel",
        })
    }
}

impl Action {
    /// Discriminant
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Claim { .. } => ActionKind::Claim,
            Self::Refund => ActionKind::Refund,
            Self::Cancel { .. } => ActionKind::Cancel,
        }
    }
}

/// Outcome of a valid action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Leg after the action
    pub leg: SwapLeg,
    /// Outputs the spending transaction must pay
    pub payouts: Vec<Payout>,
    /// Validity interval the transaction must carry
    pub validity: ValidityInterval,
}

impl Transition {
    /// Replacement datum, or `None` when the leg is consumed
    #[must_use]
    pub fn continuing_output(&self) -> Option<&SwapLeg> {
        (!self.leg.state.is_terminal()).then_some(&self.leg)
    }
}

impl SwapLeg {
    /// Validate creation terms and build a `Locked` leg
    ///
    /// # Errors
    /// `SwapError::InvalidDatum` if the hash has the wrong length, the
    /// deadline is not in the future, or the amount is below the minimum
    pub fn create(terms: SwapTerms, now: PosixMs, rules: &EscrowRules) -> Result<Self, SwapError> {
        let secret_hash = SecretHash::from_slice(&terms.secret_hash)?;
        if terms.deadline <= now {
            return Err(SwapError::InvalidDatum(format!(
                "deadline {} is not after creation time {now}",
                terms.deadline
            )));
        }
        if terms.amount < rules.minimum_escrow_amount {
            return Err(SwapError::InvalidDatum(format!(
                "amount {} is below the minimum escrow of {}",
                terms.amount, rules.minimum_escrow_amount
            )));
        }
        Ok(Self {
            depositor: terms.depositor,
            beneficiary: terms.beneficiary,
            secret_hash,
            amount: terms.amount,
            deadline: terms.deadline,
            state: SwapState::Locked,
        })
    }

    /// Where `now` falls relative to this leg's deadline
    #[inline]
    #[must_use]
    pub fn window(&self, now: PosixMs, rules: &EscrowRules) -> TimeWindow {
        classify(now, self.deadline, rules.grace_period_ms)
    }

    /// First instant a refund is legal
    #[inline]
    #[must_use]
    pub fn refund_available_at(&self, rules: &EscrowRules) -> PosixMs {
        self.deadline.saturating_add(rules.grace_period_ms)
    }

    /// Ledger validity interval for an action of this kind
    #[must_use]
    pub fn validity_for(&self, kind: ActionKind, rules: &EscrowRules) -> ValidityInterval {
        match kind {
            ActionKind::Claim | ActionKind::Cancel => ValidityInterval::until(self.deadline),
            ActionKind::Refund => ValidityInterval::from(self.refund_available_at(rules)),
        }
    }

    /// Evaluate `action` at `now`
    ///
    /// # Errors
    /// - `InvalidDatum` unless the leg is `Locked`
    /// - Claim: `InvalidSecret`, then `Expired`
    /// - Refund: `NotYetExpired`
    /// - Cancel: `Unauthorized`, then `DeadlinePassed`
    pub fn apply(
        &self,
        action: &Action,
        now: PosixMs,
        rules: &EscrowRules,
    ) -> Result<Transition, SwapError> {
        if self.state != SwapState::Locked {
            return Err(SwapError::InvalidDatum(format!(
                "leg is {}, only a locked leg accepts a {}",
                self.state,
                action.kind()
            )));
        }

        let (next, payouts) = match action {
            Action::Claim { secret } => {
                if !verify(secret, &self.secret_hash) {
                    return Err(SwapError::InvalidSecret);
                }
                if !is_before_deadline(now, self.deadline) {
                    return Err(SwapError::Expired {
                        deadline: self.deadline,
                        now,
                    });
                }
                (
                    SwapState::Completed,
                    self.beneficiary.payouts(self.amount, &self.depositor),
                )
            }
            Action::Refund => {
                if !is_after_grace(now, self.deadline, rules.grace_period_ms) {
                    return Err(SwapError::NotYetExpired {
                        available_at: self.refund_available_at(rules),
                        now,
                    });
                }
                (SwapState::Refunded, self.refund_payout())
            }
            Action::Cancel { caller } => {
                if caller != &self.depositor {
                    return Err(SwapError::Unauthorized);
                }
                if !is_before_deadline(now, self.deadline) {
                    return Err(SwapError::DeadlinePassed {
                        deadline: self.deadline,
                        now,
                    });
                }
                (SwapState::Refunded, self.refund_payout())
            }
        };

        validate_transition(self.state, next)?;
        Ok(Transition {
            leg: Self {
                state: next,
                ..self.clone()
            },
            payouts,
            validity: self.validity_for(action.kind(), rules),
        })
    }

    /// Local marker: claim submitted, secret now public
    ///
    /// # Errors
    /// `SwapError::InvalidDatum` unless the leg is `Locked`
    pub fn mark_claiming(&mut self) -> Result<(), SwapError> {
        validate_transition(self.state, SwapState::Claiming)?;
        self.state = SwapState::Claiming;
        Ok(())
    }

    /// Local marker: claim observed on-chain
    ///
    /// # Errors
    /// `SwapError::InvalidDatum` unless the leg is `Locked` or `Claiming`
    pub fn mark_completed(&mut self) -> Result<(), SwapError> {
        validate_transition(self.state, SwapState::Completed)?;
        self.state = SwapState::Completed;
        Ok(())
    }

    fn refund_payout(&self) -> Vec<Payout> {
        vec![Payout::new(self.depositor.clone(), self.amount)]
    }
}

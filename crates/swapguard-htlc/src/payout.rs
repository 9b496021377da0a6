//! Basis-point payout splits
//!
//! A split is validated once, at construction, so a malformed split never
//! reaches transaction assembly. Shares are floored; recipients whose share
//! falls below `min_payout` are dropped. Dropped amounts and rounding dust
//! go back to the depositor as an explicit payout.

use crate::error::SwapError;
use crate::swap::PartyId;
use serde::{Deserialize, Serialize};

/// 100%
pub const BASIS_POINTS_TOTAL: u32 = 10_000;

/// One recipient of a split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Paid party
    pub party: PartyId,
    /// Share in 1/100 of a percent
    pub basis_points: u32,
}

impl Recipient {
    /// Create a recipient
    #[inline]
    #[must_use]
    pub fn new(party: impl Into<PartyId>, basis_points: u32) -> Self {
        Self {
            party: party.into(),
            basis_points,
        }
    }
}

/// A single output paid by a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// Receiving party
    pub party: PartyId,
    /// Amount in base units
    pub amount: u64,
}

impl Payout {
    /// Create a payout
    #[inline]
    #[must_use]
    pub fn new(party: impl Into<PartyId>, amount: u64) -> Self {
        Self {
            party: party.into(),
            amount,
        }
    }
}

/// Result of distributing an amount over a split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    /// Recipient payouts, in split order, followed by the depositor return if any
    pub payouts: Vec<Payout>,
    /// Amount returned to the depositor (dropped shares plus rounding dust)
    pub returned: u64,
}

impl Distribution {
    /// Sum of all payouts; always equals the distributed amount
    #[must_use]
    pub fn total(&self) -> u64 {
        self.payouts.iter().map(|p| p.amount).sum()
    }
}

/// Validated basis-point split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSplit {
    recipients: Vec<Recipient>,
    min_payout: u64,
}

impl PayoutSplit {
    /// Validate and build a split
    ///
    /// # Errors
    /// `SwapError::InvalidDatum` if there are no recipients, any share is
    /// zero, or the shares do not sum to exactly [`BASIS_POINTS_TOTAL`]
    pub fn new(recipients: Vec<Recipient>, min_payout: u64) -> Result<Self, SwapError> {
        if recipients.is_empty() {
            return Err(SwapError::InvalidDatum(
                "payout split has no recipients".to_string(),
            ));
        }
        if let Some(zero) = recipients.iter().find(|r| r.basis_points == 0) {
            return Err(SwapError::InvalidDatum(format!(
                "recipient {} has a zero share",
                zero.party
            )));
        }
        let total: u64 = recipients.iter().map(|r| u64::from(r.basis_points)).sum();
        if total != u64::from(BASIS_POINTS_TOTAL) {
            return Err(SwapError::InvalidDatum(format!(
                "basis points sum to {total}, expected {BASIS_POINTS_TOTAL}"
            )));
        }
        Ok(Self {
            recipients,
            min_payout,
        })
    }

    /// Recipients in split order
    #[inline]
    #[must_use]
    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    /// Floor below which a share is dropped
    #[inline]
    #[must_use]
    pub fn min_payout(&self) -> u64 {
        self.min_payout
    }

    /// Split `amount`, returning leftovers to `depositor`
    #[must_use]
    pub fn distribute(&self, amount: u64, depositor: &PartyId) -> Distribution {
        let mut payouts = Vec::with_capacity(self.recipients.len() + 1);
        let mut paid: u64 = 0;

        for recipient in &self.recipients {
            let share = u128::from(amount) * u128::from(recipient.basis_points)
                / u128::from(BASIS_POINTS_TOTAL);
            // share <= amount, so this never saturates
            let share = u64::try_from(share).unwrap_or(amount);
            if share == 0 || share < self.min_payout {
                continue;
            }
            paid += share;
            payouts.push(Payout::new(recipient.party.clone(), share));
        }

        let returned = amount - paid;
        if returned > 0 {
            payouts.push(Payout::new(depositor.clone(), returned));
        }
        Distribution { payouts, returned }
    }
}

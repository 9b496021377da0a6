//! Transaction assembly with predicate pre-validation
//!
//! A spend is only assembled if the local transition check accepts it at
//! the given time, so a doomed transaction never costs a fee.

use crate::chain::{UnsignedTx, Utxo};
use swapguard_htlc::{Action, EscrowRules, PartyId, PosixMs, SwapError};
use tracing::debug;

/// Assemble the spend of `utxo` by `action` at `now`
///
/// Outputs, continuing datum and validity interval come from the
/// transition the predicate would compute.
///
/// # Errors
/// Whatever [`SwapLeg::apply`](swapguard_htlc::SwapLeg::apply) rejects.
pub fn build_spend(
    utxo: &Utxo,
    action: &Action,
    now: PosixMs,
    rules: &EscrowRules,
    change_address: PartyId,
) -> Result<UnsignedTx, SwapError> {
    let transition = utxo.leg.apply(action, now, rules)?;
    debug!(
        utxo = %utxo.reference,
        action = %action.kind(),
        outputs = transition.payouts.len(),
        "spend assembled"
    );
    Ok(UnsignedTx {
        input: utxo.reference.clone(),
        redeemer: action.clone(),
        continuing: transition.continuing_output().cloned(),
        outputs: transition.payouts,
        validity: transition.validity,
        change_address,
    })
}

//! Swapguard HTLC
//!
//! Hash-time-locked escrow legs for cross-chain atomic swaps.
//!
//! ## Modules
//!
//! - [`commitment`]: secret generation, SHA-256 commitments, constant-time verification
//! - [`deadline`]: claim / dead-zone / refund windows, clocks, cross-chain deadline planning
//! - [`swap`]: the per-leg state machine (`Claim`, `Refund`, `Cancel`)
//! - [`payout`]: basis-point payout splits
//! - [`error`]: [`SwapError`] and [`ChainError`] with retry classification
//!
//! ## Example
//!
//! ```rust
//! use swapguard_htlc::{Action, Beneficiary, EscrowRules, PartyId, Secret, SwapLeg, SwapTerms};
//!
//! let secret = Secret::generate(32).unwrap();
//! let rules = EscrowRules::default();
//! let leg = SwapLeg::create(
//!     SwapTerms {
//!         depositor: PartyId::from("alice"),
//!         beneficiary: Beneficiary::Single(PartyId::from("bob")),
//!         secret_hash: secret.commitment().as_bytes().to_vec(),
//!         amount: 5_000_000,
//!         deadline: 60_000,
//!     },
//!     0,
//!     &rules,
//! )
//! .unwrap();
//!
//! let transition = leg.apply(&Action::Claim { secret }, 1_000, &rules).unwrap();
//! assert!(transition.leg.state.is_terminal());
//! ```

#![warn(unreachable_pub)]

pub mod commitment;
pub mod deadline;
pub mod error;
pub mod payout;
pub mod swap;

pub use commitment::{generate, hash, verify, Secret, SecretHash, DIGEST_LENGTH};
pub use deadline::{
    classify, is_after_grace, is_before_deadline, Clock, ManualClock, PosixMs, SwapPlan,
    SystemClock, TimeWindow, ValidityInterval,
};
pub use error::{is_transient_message, ChainError, SwapError};
pub use payout::{Distribution, Payout, PayoutSplit, Recipient, BASIS_POINTS_TOTAL};
pub use swap::{
    allowed_transitions, validate_transition, Action, ActionKind, Beneficiary, EscrowRules,
    PartyId, SwapLeg, SwapState, SwapTerms, Transition,
};

//! Chain and wallet collaborators
//!
//! The node never talks to a ledger directly; everything goes through
//! [`ChainClient`] and [`Wallet`]. Both are fallible and possibly slow, and
//! only their network-class failures are worth retrying.

mod memory;

pub use memory::{MemoryChain, MemoryWallet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use swapguard_htlc::{
    Action, ChainError, PartyId, Payout, PosixMs, Secret, SecretHash, SwapLeg, SwapState,
    ValidityInterval,
};

/// Reference to an output on a ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtxoRef(String);

impl UtxoRef {
    /// Wrap a raw reference
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Output `index` of transaction `tx`
    #[must_use]
    pub fn output(tx: &TxHash, index: u32) -> Self {
        Self(format!("{tx}#{index}"))
    }

    /// Raw reference
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UtxoRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an accepted transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    /// Wrap a raw hash
    #[must_use]
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Raw hash
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TxHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An escrow output and its datum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Where it lives
    pub reference: UtxoRef,
    /// The locked leg
    pub leg: SwapLeg,
}

/// A spend of one escrow output, not yet signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTx {
    /// Escrow output being spent
    pub input: UtxoRef,
    /// Redeemer presented to the predicate
    pub redeemer: Action,
    /// Outputs paid by the spend
    pub outputs: Vec<Payout>,
    /// Replacement escrow output, if the leg continues
    pub continuing: Option<SwapLeg>,
    /// Ledger validity interval
    pub validity: ValidityInterval,
    /// Where fee change goes
    pub change_address: PartyId,
}

/// A spend carrying its signer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    /// Assembled body
    pub body: UnsignedTx,
    /// Party whose key signed the body
    pub signer: PartyId,
}

/// Read and submit access to one ledger
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Human-readable ledger name
    fn name(&self) -> &str;

    /// Look up an output; `None` once it is spent or if it never existed
    async fn fetch_utxo(&self, reference: &UtxoRef) -> Result<Option<Utxo>, ChainError>;

    /// How a spent output ended; `None` while unspent or if the ledger
    /// cannot tell
    async fn settled_state(&self, reference: &UtxoRef) -> Result<Option<SwapState>, ChainError>;

    /// Submit a signed transaction
    async fn submit(&self, tx: &SignedTx) -> Result<TxHash, ChainError>;

    /// Ledger time
    async fn now_ms(&self) -> Result<PosixMs, ChainError>;

    /// Secret revealed by a claim against `hash`, if any has been seen
    async fn revealed_secret(&self, hash: &SecretHash) -> Result<Option<Secret>, ChainError>;
}

/// Key holder for one party
///
/// Private key material never leaves the implementation.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Party this wallet signs for
    fn party(&self) -> &PartyId;

    /// Address receiving change
    async fn change_address(&self) -> Result<PartyId, ChainError>;

    /// Sign an assembled transaction
    async fn sign(&self, tx: UnsignedTx) -> Result<SignedTx, ChainError>;
}

//! Transaction construction for the shroud wallet engine.
//!
//! Provides typed transaction structures, the gamma decoy sampler, fee and
//! weight estimation, amount splitting, a builder that turns selected inputs
//! into a [`PendingSpend`], and the signing strategies (local and cold) that
//! complete it. Low-level cryptography is consumed through [`TxCrypto`].

pub mod types;
pub mod builder;
pub mod crypto;
pub mod decoy;
pub mod fee;
pub mod pending;
pub mod sign;
pub mod split;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use builder::{verify_inputs, TransactionBuilder};
pub use crypto::{DerivedOutput, TxCrypto};
pub use decoy::{GammaPicker, BAD_PICK};
pub use fee::{FeePolicy, FeePriority};
pub use pending::{ConstructionData, PendingSpend};
pub use sign::{check_outputs, check_pending, ColdSigner, LocalSigner, SignatureStatus, SigningStrategy};
pub use split::{DustPolicy, SplitStrategy};
pub use types::{
    AccountAddress, Destination, ProofType, RingMember, SourceEntry, Transaction, TxInput,
    TxOutput, TxPrefix,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TxError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("invalid transaction: {0}")]
    Invalid(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("insufficient inputs: need {need}, have {have}")]
    InsufficientInputs { need: u64, have: u64 },

    #[error("not enough decoys: requested {requested}, available {available}")]
    InsufficientDecoys { requested: usize, available: u64 },

    #[error("no destinations specified")]
    NoDestinations,

    #[error("destination {index} has a zero amount")]
    ZeroAmount { index: usize },

    #[error("ring size mismatch: expected {expected}, got {got}")]
    RingSizeMismatch { expected: usize, got: usize },

    #[error("amount overflow in {0}")]
    Overflow(&'static str),

    #[error("transaction too big: weight {weight} exceeds limit {limit}")]
    TooBig { weight: u64, limit: u64 },

    #[error("too many outputs: {count} exceeds {max}")]
    TooManyOutputs { count: usize, max: usize },

    #[error("decoy selection failed: {0}")]
    DecoySelection(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for TxError {
    fn from(e: serde_json::Error) -> Self {
        TxError::Serialize(e.to_string())
    }
}

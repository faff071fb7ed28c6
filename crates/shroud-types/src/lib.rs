//! Core types and constants for the shroud wallet engine.
//!
//! This crate provides the foundational types used across all shroud crates:
//! 32-byte hashes with hex serde, Keccak-256, network identifiers, the
//! hard-fork schedule and the consensus rules a wallet has to follow.

pub mod consensus;
pub mod constants;
pub mod hash;
pub mod serde_hex;

pub use consensus::{fork_rules, ForkRules};
pub use constants::{HfVersion, Network};
pub use hash::{keccak256, keccak256_parts, BlockHash, Hash32, KeyImage, PublicKey, TxHash};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

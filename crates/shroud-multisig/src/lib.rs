//! Multisig signing for shroud pending spends.
//!
//! A coordinator builds the transactions, adds its own partial signatures and
//! exports a [`MultisigTxSet`]. Each cosigner checks the set, adds partials
//! for every input and passes it on. Once `threshold` distinct signers have
//! contributed, the coordinator combines the partials into ring signatures.

pub mod crypto;
pub mod signer;
pub mod tx_set;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use crypto::MultisigCrypto;
pub use signer::{cosign, MultisigSigner};
pub use tx_set::{MultisigTxSet, PartialSignature, TxPartials, MULTISIG_SET_VERSION};

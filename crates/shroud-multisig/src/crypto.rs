use std::collections::BTreeMap;

use shroud_tx::types::InputSignature;
use shroud_tx::{ProofType, SourceEntry, TxError};
use shroud_types::{Hash32, KeyImage};

use crate::tx_set::PartialSignature;

/// One participant's share of the group spend key.
pub trait MultisigCrypto: Send + Sync {
    /// Index of this participant within the group.
    fn signer_index(&self) -> u32;

    /// Partial signature for one input over `message`.
    fn partial_sign(
        &self,
        proof: ProofType,
        message: &Hash32,
        source: &SourceEntry,
        key_image: &KeyImage,
    ) -> Result<PartialSignature, TxError>;

    /// Check a partial produced by participant `signer`.
    fn verify_partial(
        &self,
        signer: u32,
        proof: ProofType,
        message: &Hash32,
        source: &SourceEntry,
        key_image: &KeyImage,
        partial: &PartialSignature,
    ) -> bool;

    /// Aggregate at least `threshold` partials into the input's ring signature.
    fn combine(
        &self,
        proof: ProofType,
        message: &Hash32,
        source: &SourceEntry,
        key_image: &KeyImage,
        pseudo_mask: &Hash32,
        partials: &BTreeMap<u32, PartialSignature>,
    ) -> Result<InputSignature, TxError>;
}

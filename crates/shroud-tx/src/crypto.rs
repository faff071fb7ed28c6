//! Cryptographic seams.
//!
//! The engine never touches curve arithmetic directly. Transaction-level
//! operations go through [`TxCrypto`]; account-level operations (output
//! recognition, key images, address derivation) go through [`AccountCrypto`].

use rand::RngCore;
use shroud_types::{Hash32, KeyImage, PublicKey};

use crate::types::{AccountAddress, InputSignature, ProofType, RingMember, SourceEntry};
use crate::TxError;

/// Per-output data produced when paying an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedOutput {
    /// One-time output key.
    pub key: PublicKey,
    pub view_tag: u8,
    pub encrypted_amount: u64,
    /// Commitment blinding mask.
    pub mask: Hash32,
}

/// Amount field of a scanned output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanAmount {
    /// Pre-RingCT output with a cleartext amount.
    Clear(u64),
    /// RingCT output with an amount encrypted to the receiver.
    Encrypted(u64),
}

/// An output recognised as ours while scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedOutput {
    pub amount: u64,
    pub mask: Hash32,
    /// `(major, minor)` subaddress index that received it.
    pub subaddress: (u32, u32),
}

/// Transaction-side cryptography.
pub trait TxCrypto: Send + Sync {
    /// Draw a fresh transaction secret key.
    fn generate_tx_key(&self, rng: &mut dyn RngCore) -> Hash32;

    fn tx_public_key(&self, tx_key: &Hash32) -> PublicKey;

    /// Derive the one-time key, view tag and encrypted amount paying
    /// `address` at output position `index`.
    fn derive_output(
        &self,
        tx_key: &Hash32,
        address: &AccountAddress,
        index: u32,
        amount: u64,
    ) -> DerivedOutput;

    /// Pedersen-style commitment to `amount` under `mask`.
    fn commit(&self, amount: u64, mask: &Hash32) -> Hash32;

    /// Aggregated range proof over the output commitments.
    fn prove_range(
        &self,
        proof: ProofType,
        amounts: &[u64],
        masks: &[Hash32],
    ) -> Result<Vec<u8>, TxError>;

    /// Pseudo-output masks for `input_amounts` that balance `output_masks`.
    fn pseudo_masks(
        &self,
        rng: &mut dyn RngCore,
        input_amounts: &[u64],
        output_masks: &[Hash32],
    ) -> Vec<Hash32>;

    /// Produce the ring signature for one input.
    fn sign_input(
        &self,
        proof: ProofType,
        message: &Hash32,
        source: &SourceEntry,
        key_image: &KeyImage,
        pseudo_mask: &Hash32,
    ) -> Result<InputSignature, TxError>;

    /// Check one ring signature against its ring and key image.
    fn verify_input(
        &self,
        proof: ProofType,
        message: &Hash32,
        ring: &[RingMember],
        key_image: &KeyImage,
        pseudo_out: Option<&Hash32>,
        signature: &InputSignature,
    ) -> bool;
}

/// Account-side cryptography used by the scanner and key image transfer.
pub trait AccountCrypto: Send + Sync {
    /// Address of `(major, minor)`; `(0, 0)` is the primary address.
    fn address(&self, major: u32, minor: u32) -> AccountAddress;

    /// Try to recognise output `index` of a transaction as ours.
    fn scan_output(
        &self,
        tx_pub_key: &PublicKey,
        index: u32,
        output_key: &PublicKey,
        view_tag: Option<u8>,
        amount: ScanAmount,
    ) -> Option<ReceivedOutput>;

    /// Key image of an owned output. `None` without the spend secret.
    fn key_image(&self, output_key: &PublicKey, tx_pub_key: &PublicKey, index: u32)
        -> Option<KeyImage>;

    /// Proof that `key_image` belongs to `output_key`.
    fn key_image_proof(
        &self,
        key_image: &KeyImage,
        output_key: &PublicKey,
    ) -> Result<Vec<u8>, TxError>;

    fn verify_key_image_proof(
        &self,
        key_image: &KeyImage,
        output_key: &PublicKey,
        proof: &[u8],
    ) -> bool;
}

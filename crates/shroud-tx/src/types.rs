//! Typed transaction structures.
//!
//! The wallet builds and hashes transactions in this shape. The byte
//! encoding produced by [`Transaction::to_bytes`] is canonical for hashing and
//! submission; it is not meant to be parsed back.

use serde::{Deserialize, Serialize};
use shroud_types::consensus::BULLETPROOF_MAX_OUTPUTS;
use shroud_types::{keccak256, keccak256_parts, ForkRules, Hash32, KeyImage, PublicKey, TxHash};

use crate::TxError;

// ─── Transaction Constants ──────────────────────────────────────────────────

pub mod rct_type {
    pub const NULL: u8 = 0;
    pub const FULL: u8 = 1;
    pub const SIMPLE: u8 = 2;
    pub const BULLETPROOF: u8 = 3;
    pub const BULLETPROOF2: u8 = 4;
    pub const CLSAG: u8 = 5;
    pub const BULLETPROOF_PLUS: u8 = 6;
}

pub mod output_type {
    pub const KEY: u8 = 0x02;
    pub const TAGGED_KEY: u8 = 0x03;
}

/// Tag of the tx public key field in `extra`.
pub const TX_EXTRA_TAG_PUBKEY: u8 = 0x01;

/// Transaction version for RingCT transactions.
pub const TX_VERSION_RCT: u8 = 2;
/// Transaction version for pre-RingCT transactions.
pub const TX_VERSION_LEGACY: u8 = 1;

// ─── Addresses and Destinations ─────────────────────────────────────────────

/// The public half of a receiving address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountAddress {
    pub spend_public: PublicKey,
    pub view_public: PublicKey,
    #[serde(default)]
    pub is_subaddress: bool,
}

/// A payment to one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub address: AccountAddress,
    pub amount: u64,
}

impl Destination {
    pub fn new(address: AccountAddress, amount: u64) -> Self {
        Self { address, amount }
    }
}

// ─── Rings and Sources ──────────────────────────────────────────────────────

/// One member of a ring: a chain output referenced by its global index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingMember {
    pub global_index: u64,
    pub key: PublicKey,
    /// Amount commitment (RingCT) or zero for legacy outputs.
    pub commitment: Hash32,
}

/// A ring-signature source: one real owned output hidden among decoys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Ring members sorted by ascending global index.
    pub ring: Vec<RingMember>,
    /// Position of the real output inside `ring`.
    pub real_position: usize,
    pub real_output_key: PublicKey,
    pub real_tx_pub_key: PublicKey,
    pub real_output_in_tx_index: u32,
    pub amount: u64,
    /// Blinding mask of the real output's commitment.
    pub mask: Hash32,
    pub rct: bool,
    pub key_image: Option<KeyImage>,
    /// Ledger arena index of the real output.
    pub transfer_index: usize,
}

impl SourceEntry {
    pub fn real_member(&self) -> Option<&RingMember> {
        self.ring.get(self.real_position)
    }

    pub fn global_indices(&self) -> Vec<u64> {
        self.ring.iter().map(|m| m.global_index).collect()
    }

    /// Check ring ordering, real position and real key.
    pub fn validate(&self) -> Result<(), TxError> {
        if self.ring.is_empty() {
            return Err(TxError::Invalid("empty ring".into()));
        }
        if self.ring.windows(2).any(|w| w[0].global_index >= w[1].global_index) {
            return Err(TxError::Invalid(
                "ring members must be unique and sorted by global index".into(),
            ));
        }
        let real = self.real_member().ok_or_else(|| {
            TxError::Invalid(format!(
                "real position {} outside ring of {}",
                self.real_position,
                self.ring.len()
            ))
        })?;
        if real.key != self.real_output_key {
            return Err(TxError::Invalid(format!(
                "ring member {} does not carry the real output key",
                real.global_index
            )));
        }
        Ok(())
    }
}

// ─── Proof Types ────────────────────────────────────────────────────────────

/// Signature/range-proof generation used for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofType {
    /// Pre-RingCT ring signatures with cleartext amounts.
    Legacy,
    /// RingCT with Borromean range proofs and MLSAG.
    RctBorromean,
    /// RingCT with aggregated Bulletproofs and MLSAG.
    RctBulletproof,
    /// CLSAG with Bulletproofs.
    Clsag,
    /// CLSAG with Bulletproofs+ (view tags go with this era).
    ClsagBulletproofPlus,
}

impl ProofType {
    /// Proof type mandated by the active fork.
    pub fn for_fork(rules: &ForkRules) -> Self {
        if rules.bulletproof_plus {
            ProofType::ClsagBulletproofPlus
        } else if rules.clsag {
            ProofType::Clsag
        } else if rules.bulletproof {
            ProofType::RctBulletproof
        } else if rules.rct {
            ProofType::RctBorromean
        } else {
            ProofType::Legacy
        }
    }

    pub fn is_rct(&self) -> bool {
        !matches!(self, ProofType::Legacy)
    }

    pub fn uses_clsag(&self) -> bool {
        matches!(self, ProofType::Clsag | ProofType::ClsagBulletproofPlus)
    }

    /// Aggregated range proofs (Bulletproof or Bulletproof+).
    pub fn uses_bulletproof(&self) -> bool {
        matches!(
            self,
            ProofType::RctBulletproof | ProofType::Clsag | ProofType::ClsagBulletproofPlus
        )
    }

    pub fn uses_bulletproof_plus(&self) -> bool {
        matches!(self, ProofType::ClsagBulletproofPlus)
    }

    /// RingCT type byte written into the signature section.
    pub fn rct_type(&self) -> u8 {
        match self {
            ProofType::Legacy => rct_type::NULL,
            ProofType::RctBorromean => rct_type::SIMPLE,
            ProofType::RctBulletproof => rct_type::BULLETPROOF2,
            ProofType::Clsag => rct_type::CLSAG,
            ProofType::ClsagBulletproofPlus => rct_type::BULLETPROOF_PLUS,
        }
    }

    /// Most outputs one transaction may carry under this proof type.
    pub fn max_outputs(&self) -> usize {
        if self.uses_bulletproof() {
            BULLETPROOF_MAX_OUTPUTS
        } else {
            usize::MAX
        }
    }
}

// ─── Core Transaction Types ─────────────────────────────────────────────────

/// Key input (spending a previous output).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Zero for RingCT inputs.
    pub amount: u64,
    /// Ring members as offsets relative to the previous member.
    pub key_offsets: Vec<u64>,
    pub key_image: KeyImage,
}

/// Transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Zero for RingCT outputs.
    pub amount: u64,
    pub key: PublicKey,
    #[serde(default)]
    pub view_tag: Option<u8>,
}

/// Transaction prefix (everything the signatures commit to).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPrefix {
    pub version: u8,
    pub unlock_time: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    #[serde(with = "shroud_types::serde_hex")]
    pub extra: Vec<u8>,
}

/// RingCT base: fee, encrypted amounts and commitments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RctBase {
    pub rct_type: u8,
    pub fee: u64,
    pub encrypted_amounts: Vec<u64>,
    pub out_commitments: Vec<Hash32>,
    pub pseudo_outs: Vec<Hash32>,
}

/// One opaque input signature (ring signature, MLSAG or CLSAG).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSignature(#[serde(with = "shroud_types::serde_hex")] pub Vec<u8>);

/// Proofs that are not committed to by the prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prunable {
    #[serde(with = "shroud_types::serde_hex")]
    pub range_proof: Vec<u8>,
    pub signatures: Vec<InputSignature>,
}

/// Complete transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub prefix: TxPrefix,
    #[serde(default)]
    pub rct: Option<RctBase>,
    #[serde(default)]
    pub prunable: Prunable,
}

impl Transaction {
    pub fn prefix_hash(&self) -> Hash32 {
        let mut buf = Vec::new();
        encode_prefix(&self.prefix, &mut buf);
        keccak256(&buf)
    }

    fn base_hash(&self) -> Hash32 {
        let mut buf = Vec::new();
        encode_rct_base(self.rct.as_ref(), &mut buf);
        keccak256(&buf)
    }

    /// Message that input signatures sign: prefix, RingCT base and range proof.
    pub fn signing_hash(&self) -> Hash32 {
        let proof_hash = keccak256(&self.prunable.range_proof);
        keccak256_parts(&[
            self.prefix_hash().as_bytes(),
            self.base_hash().as_bytes(),
            proof_hash.as_bytes(),
        ])
    }

    /// Transaction id: hash over prefix, base and prunable hashes.
    pub fn hash(&self) -> TxHash {
        let mut prunable = Vec::new();
        encode_prunable(&self.prunable, &mut prunable);
        keccak256_parts(&[
            self.prefix_hash().as_bytes(),
            self.base_hash().as_bytes(),
            keccak256(&prunable).as_bytes(),
        ])
    }

    /// Canonical byte encoding, used for submission and weight.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_prefix(&self.prefix, &mut buf);
        encode_rct_base(self.rct.as_ref(), &mut buf);
        encode_prunable(&self.prunable, &mut buf);
        buf
    }

    pub fn key_images(&self) -> Vec<KeyImage> {
        self.prefix.inputs.iter().map(|i| i.key_image).collect()
    }

    pub fn fee(&self) -> u64 {
        match &self.rct {
            Some(base) => base.fee,
            None => 0,
        }
    }

    /// Whether every input carries a signature.
    pub fn is_signed(&self) -> bool {
        !self.prefix.inputs.is_empty()
            && self.prunable.signatures.len() == self.prefix.inputs.len()
            && self.prunable.signatures.iter().all(|s| !s.0.is_empty())
    }

    /// Tx public key stored in `extra`, if present.
    pub fn tx_pub_key(&self) -> Option<PublicKey> {
        let extra = &self.prefix.extra;
        if extra.len() >= 33 && extra[0] == TX_EXTRA_TAG_PUBKEY {
            let mut key = [0u8; 32];
            key.copy_from_slice(&extra[1..33]);
            Some(Hash32(key))
        } else {
            None
        }
    }
}

// ─── Encoding ───────────────────────────────────────────────────────────────

/// Append `value` as a LEB128 varint.
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn encode_prefix(prefix: &TxPrefix, buf: &mut Vec<u8>) {
    write_varint(buf, prefix.version as u64);
    write_varint(buf, prefix.unlock_time);
    write_varint(buf, prefix.inputs.len() as u64);
    for input in &prefix.inputs {
        buf.push(0x02);
        write_varint(buf, input.amount);
        write_varint(buf, input.key_offsets.len() as u64);
        for &offset in &input.key_offsets {
            write_varint(buf, offset);
        }
        buf.extend_from_slice(input.key_image.as_bytes());
    }
    write_varint(buf, prefix.outputs.len() as u64);
    for output in &prefix.outputs {
        write_varint(buf, output.amount);
        match output.view_tag {
            Some(tag) => {
                buf.push(output_type::TAGGED_KEY);
                buf.extend_from_slice(output.key.as_bytes());
                buf.push(tag);
            }
            None => {
                buf.push(output_type::KEY);
                buf.extend_from_slice(output.key.as_bytes());
            }
        }
    }
    write_bytes(buf, &prefix.extra);
}

fn encode_rct_base(rct: Option<&RctBase>, buf: &mut Vec<u8>) {
    let Some(base) = rct else {
        buf.push(rct_type::NULL);
        return;
    };
    buf.push(base.rct_type);
    write_varint(buf, base.fee);
    for amount in &base.encrypted_amounts {
        buf.extend_from_slice(&amount.to_le_bytes());
    }
    for commitment in &base.out_commitments {
        buf.extend_from_slice(commitment.as_bytes());
    }
    write_varint(buf, base.pseudo_outs.len() as u64);
    for pseudo in &base.pseudo_outs {
        buf.extend_from_slice(pseudo.as_bytes());
    }
}

fn encode_prunable(prunable: &Prunable, buf: &mut Vec<u8>) {
    write_bytes(buf, &prunable.range_proof);
    write_varint(buf, prunable.signatures.len() as u64);
    for sig in &prunable.signatures {
        write_bytes(buf, &sig.0);
    }
}

// ─── Ring Offsets ───────────────────────────────────────────────────────────

/// Convert absolute ring indices to relative offsets.
///
/// Input: [10, 50, 80, 100] (sorted ascending)
/// Output: [10, 40, 30, 20] (each relative to previous)
pub fn absolute_to_relative(indices: &[u64]) -> Vec<u64> {
    let mut result = Vec::with_capacity(indices.len());
    let mut prev = 0u64;
    for &idx in indices {
        result.push(idx.saturating_sub(prev));
        prev = idx;
    }
    result
}

/// Convert relative offsets back to absolute indices.
///
/// Returns `None` if the offsets overflow.
pub fn relative_to_absolute(offsets: &[u64]) -> Option<Vec<u64>> {
    let mut result = Vec::with_capacity(offsets.len());
    let mut sum = 0u64;
    for &off in offsets {
        sum = sum.checked_add(off)?;
        result.push(sum);
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_types::fork_rules;

    fn sample_tx() -> Transaction {
        let mut extra = vec![TX_EXTRA_TAG_PUBKEY];
        extra.extend_from_slice(&[7u8; 32]);
        Transaction {
            prefix: TxPrefix {
                version: TX_VERSION_RCT,
                unlock_time: 0,
                inputs: vec![TxInput {
                    amount: 0,
                    key_offsets: vec![5, 3, 9],
                    key_image: Hash32([1; 32]),
                }],
                outputs: vec![
                    TxOutput { amount: 0, key: Hash32([2; 32]), view_tag: Some(0xaa) },
                    TxOutput { amount: 0, key: Hash32([3; 32]), view_tag: Some(0xbb) },
                ],
                extra,
            },
            rct: Some(RctBase {
                rct_type: rct_type::BULLETPROOF_PLUS,
                fee: 30_000_000,
                encrypted_amounts: vec![11, 12],
                out_commitments: vec![Hash32([4; 32]), Hash32([5; 32])],
                pseudo_outs: vec![Hash32([6; 32])],
            }),
            prunable: Prunable::default(),
        }
    }

    #[test]
    fn test_absolute_to_relative() {
        assert_eq!(absolute_to_relative(&[10, 50, 80, 100]), vec![10, 40, 30, 20]);
        assert_eq!(absolute_to_relative(&[5]), vec![5]);
        assert_eq!(absolute_to_relative(&[]), Vec::<u64>::new());
    }

    #[test]
    fn test_relative_to_absolute() {
        assert_eq!(relative_to_absolute(&[10, 40, 30, 20]), Some(vec![10, 50, 80, 100]));
        assert_eq!(relative_to_absolute(&[5]), Some(vec![5]));
        assert_eq!(relative_to_absolute(&[u64::MAX, 1]), None);
    }

    #[test]
    fn test_varint_encoding() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 0);
        write_varint(&mut buf, 127);
        write_varint(&mut buf, 128);
        write_varint(&mut buf, 300);
        assert_eq!(buf, vec![0x00, 0x7f, 0x80, 0x01, 0xac, 0x02]);
    }

    #[test]
    fn test_hash_changes_with_signatures() {
        let mut tx = sample_tx();
        let unsigned_hash = tx.hash();
        let signing_hash = tx.signing_hash();
        tx.prunable.signatures.push(InputSignature(vec![9; 64]));
        assert_ne!(tx.hash(), unsigned_hash);
        // Signatures are not part of the signed message.
        assert_eq!(tx.signing_hash(), signing_hash);
        assert!(tx.is_signed());
    }

    #[test]
    fn test_hash_survives_serde() {
        let tx = sample_tx();
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back.hash(), tx.hash());
        assert_eq!(back.to_bytes(), tx.to_bytes());
    }

    #[test]
    fn test_tx_pub_key_from_extra() {
        let tx = sample_tx();
        assert_eq!(tx.tx_pub_key(), Some(Hash32([7; 32])));
        assert_eq!(tx.fee(), 30_000_000);
        assert_eq!(tx.key_images(), vec![Hash32([1; 32])]);
    }

    #[test]
    fn test_proof_type_for_fork() {
        assert_eq!(ProofType::for_fork(&fork_rules(3)), ProofType::Legacy);
        assert_eq!(ProofType::for_fork(&fork_rules(4)), ProofType::RctBorromean);
        assert_eq!(ProofType::for_fork(&fork_rules(9)), ProofType::RctBulletproof);
        assert_eq!(ProofType::for_fork(&fork_rules(13)), ProofType::Clsag);
        assert_eq!(ProofType::for_fork(&fork_rules(16)), ProofType::ClsagBulletproofPlus);
        assert_eq!(ProofType::ClsagBulletproofPlus.rct_type(), rct_type::BULLETPROOF_PLUS);
        assert_eq!(ProofType::RctBorromean.max_outputs(), usize::MAX);
    }

    #[test]
    fn test_source_validation() {
        let member = |gi: u64, k: u8| RingMember {
            global_index: gi,
            key: Hash32([k; 32]),
            commitment: Hash32::ZERO,
        };
        let mut src = SourceEntry {
            ring: vec![member(3, 1), member(8, 2), member(20, 3)],
            real_position: 1,
            real_output_key: Hash32([2; 32]),
            real_tx_pub_key: Hash32::ZERO,
            real_output_in_tx_index: 0,
            amount: 5,
            mask: Hash32::ZERO,
            rct: true,
            key_image: None,
            transfer_index: 0,
        };
        assert!(src.validate().is_ok());
        assert_eq!(src.global_indices(), vec![3, 8, 20]);

        src.real_position = 0;
        assert!(src.validate().is_err());

        src.real_position = 1;
        src.ring.swap(0, 2);
        assert!(src.validate().is_err());
    }
}

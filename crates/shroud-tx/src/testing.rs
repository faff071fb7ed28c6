//! Deterministic test doubles.
//!
//! [`TestCrypto`] stands in for the curve arithmetic with Keccak. It keeps
//! the properties the engine relies on (outputs are recognisable by their
//! receiver, key images are stable per output, signatures bind the message
//! and the ring) without providing any actual privacy or soundness.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use shroud_types::{fork_rules, keccak256_parts, Hash32, KeyImage, PublicKey};

use crate::builder::TransactionBuilder;
use crate::crypto::{AccountCrypto, DerivedOutput, ReceivedOutput, ScanAmount, TxCrypto};
use crate::pending::PendingSpend;
use crate::types::{AccountAddress, Destination, InputSignature, ProofType, RingMember, SourceEntry};
use crate::TxError;

/// Subaddress majors and minors recognised while scanning.
const SUBADDRESS_LOOKAHEAD: (u32, u32) = (2, 10);

/// Keccak-based stand-in for the wallet's cryptography.
#[derive(Debug, Clone)]
pub struct TestCrypto {
    spend_secret: Option<Hash32>,
    spend_public: PublicKey,
    view_public: PublicKey,
}

impl TestCrypto {
    pub fn new(seed: u64) -> Self {
        let spend_secret = keccak256_parts(&[b"spend-secret", &seed.to_le_bytes()]);
        let view_secret = keccak256_parts(&[b"view-secret", &seed.to_le_bytes()]);
        Self {
            spend_secret: Some(spend_secret),
            spend_public: keccak256_parts(&[b"public", spend_secret.as_bytes()]),
            view_public: keccak256_parts(&[b"public", view_secret.as_bytes()]),
        }
    }

    /// Same account without the spend secret.
    pub fn view_only(mut self) -> Self {
        self.spend_secret = None;
        self
    }

    pub fn primary(&self) -> AccountAddress {
        self.address(0, 0)
    }

    fn shared(tx_pub: &PublicKey, view_public: &PublicKey) -> Hash32 {
        keccak256_parts(&[b"shared", tx_pub.as_bytes(), view_public.as_bytes()])
    }

    fn derive(shared: &Hash32, index: u32, spend_public: &PublicKey) -> (PublicKey, u8, u64, Hash32) {
        let idx = index.to_le_bytes();
        let key = keccak256_parts(&[b"onetime", shared.as_bytes(), &idx, spend_public.as_bytes()]);
        let tag = keccak256_parts(&[b"view-tag", shared.as_bytes(), &idx]).0[0];
        let pad = keccak256_parts(&[b"amount", shared.as_bytes(), &idx]);
        let mut pad_bytes = [0u8; 8];
        pad_bytes.copy_from_slice(&pad.0[..8]);
        let mask = keccak256_parts(&[b"mask", shared.as_bytes(), &idx]);
        (key, tag, u64::from_le_bytes(pad_bytes), mask)
    }

    fn ring_signature(message: &Hash32, ring: &[RingMember], key_image: &KeyImage) -> InputSignature {
        let mut parts: Vec<&[u8]> = vec![&b"ring-sig"[..], message.as_bytes(), key_image.as_bytes()];
        for member in ring {
            parts.push(member.key.as_bytes());
            parts.push(member.commitment.as_bytes());
        }
        let first = keccak256_parts(&parts);
        let second = keccak256_parts(&[b"ring-sig-2", first.as_bytes()]);
        let mut sig = first.0.to_vec();
        sig.extend_from_slice(second.as_bytes());
        InputSignature(sig)
    }

    fn key_image_for(&self, output_key: &PublicKey) -> Option<KeyImage> {
        self.spend_secret
            .map(|secret| keccak256_parts(&[b"key-image", output_key.as_bytes(), secret.as_bytes()]))
    }
}

impl TxCrypto for TestCrypto {
    fn generate_tx_key(&self, rng: &mut dyn RngCore) -> Hash32 {
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);
        Hash32(key)
    }

    fn tx_public_key(&self, tx_key: &Hash32) -> PublicKey {
        keccak256_parts(&[b"tx-public", tx_key.as_bytes()])
    }

    fn derive_output(
        &self,
        tx_key: &Hash32,
        address: &AccountAddress,
        index: u32,
        amount: u64,
    ) -> DerivedOutput {
        let shared = Self::shared(&self.tx_public_key(tx_key), &address.view_public);
        let (key, view_tag, pad, mask) = Self::derive(&shared, index, &address.spend_public);
        DerivedOutput {
            key,
            view_tag,
            encrypted_amount: amount ^ pad,
            mask,
        }
    }

    fn commit(&self, amount: u64, mask: &Hash32) -> Hash32 {
        keccak256_parts(&[b"commit", &amount.to_le_bytes(), mask.as_bytes()])
    }

    fn prove_range(
        &self,
        proof: ProofType,
        amounts: &[u64],
        masks: &[Hash32],
    ) -> Result<Vec<u8>, TxError> {
        if amounts.len() != masks.len() {
            return Err(TxError::Invalid("range proof inputs differ in length".into()));
        }
        let commitments: Vec<Hash32> = amounts
            .iter()
            .zip(masks)
            .map(|(&a, m)| self.commit(a, m))
            .collect();
        let mut parts: Vec<&[u8]> = vec![&b"range-proof"[..]];
        let rct_type = [proof.rct_type()];
        parts.push(&rct_type);
        for c in &commitments {
            parts.push(c.as_bytes());
        }
        Ok(keccak256_parts(&parts).0.to_vec())
    }

    fn pseudo_masks(
        &self,
        rng: &mut dyn RngCore,
        input_amounts: &[u64],
        _output_masks: &[Hash32],
    ) -> Vec<Hash32> {
        input_amounts
            .iter()
            .map(|_| {
                let mut mask = [0u8; 32];
                rng.fill_bytes(&mut mask);
                Hash32(mask)
            })
            .collect()
    }

    fn sign_input(
        &self,
        _proof: ProofType,
        message: &Hash32,
        source: &SourceEntry,
        key_image: &KeyImage,
        _pseudo_mask: &Hash32,
    ) -> Result<InputSignature, TxError> {
        let expected = self
            .key_image_for(&source.real_output_key)
            .ok_or_else(|| TxError::Signing("no spend key available".into()))?;
        if &expected != key_image {
            return Err(TxError::Signing("key image does not belong to this account".into()));
        }
        Ok(Self::ring_signature(message, &source.ring, key_image))
    }

    fn verify_input(
        &self,
        _proof: ProofType,
        message: &Hash32,
        ring: &[RingMember],
        key_image: &KeyImage,
        _pseudo_out: Option<&Hash32>,
        signature: &InputSignature,
    ) -> bool {
        Self::ring_signature(message, ring, key_image) == *signature
    }
}

impl AccountCrypto for TestCrypto {
    fn address(&self, major: u32, minor: u32) -> AccountAddress {
        if (major, minor) == (0, 0) {
            return AccountAddress {
                spend_public: self.spend_public,
                view_public: self.view_public,
                is_subaddress: false,
            };
        }
        let index = [major.to_le_bytes(), minor.to_le_bytes()].concat();
        AccountAddress {
            spend_public: keccak256_parts(&[b"sub-spend", self.spend_public.as_bytes(), &index]),
            view_public: keccak256_parts(&[b"sub-view", self.view_public.as_bytes(), &index]),
            is_subaddress: true,
        }
    }

    fn scan_output(
        &self,
        tx_pub_key: &PublicKey,
        index: u32,
        output_key: &PublicKey,
        view_tag: Option<u8>,
        amount: ScanAmount,
    ) -> Option<ReceivedOutput> {
        let (majors, minors) = SUBADDRESS_LOOKAHEAD;
        for major in 0..majors {
            for minor in 0..minors {
                let address = self.address(major, minor);
                let shared = Self::shared(tx_pub_key, &address.view_public);
                let (key, tag, pad, mask) = Self::derive(&shared, index, &address.spend_public);
                if view_tag.is_some_and(|t| t != tag) || key != *output_key {
                    continue;
                }
                let (amount, mask) = match amount {
                    ScanAmount::Clear(a) => (a, Hash32::ZERO),
                    ScanAmount::Encrypted(e) => (e ^ pad, mask),
                };
                return Some(ReceivedOutput {
                    amount,
                    mask,
                    subaddress: (major, minor),
                });
            }
        }
        None
    }

    fn key_image(&self, output_key: &PublicKey, _tx_pub_key: &PublicKey, _index: u32) -> Option<KeyImage> {
        self.key_image_for(output_key)
    }

    fn key_image_proof(&self, key_image: &KeyImage, output_key: &PublicKey) -> Result<Vec<u8>, TxError> {
        if self.key_image_for(output_key) != Some(*key_image) {
            return Err(TxError::Signing("cannot prove a foreign key image".into()));
        }
        Ok(keccak256_parts(&[b"ki-proof", key_image.as_bytes(), output_key.as_bytes()])
            .0
            .to_vec())
    }

    fn verify_key_image_proof(&self, key_image: &KeyImage, output_key: &PublicKey, proof: &[u8]) -> bool {
        keccak256_parts(&[b"ki-proof", key_image.as_bytes(), output_key.as_bytes()]).as_bytes()[..] == *proof
    }
}

/// Decoy ring member at `global_index`.
pub fn decoy_member(global_index: u64) -> RingMember {
    RingMember {
        global_index,
        key: keccak256_parts(&[b"decoy", &global_index.to_le_bytes()]),
        commitment: keccak256_parts(&[b"decoy-commit", &global_index.to_le_bytes()]),
    }
}

/// A source spending a fresh output of `amount` owned by `crypto`.
///
/// The ring spans `ring_size` members spaced five apart from `base_index`;
/// `seed` picks the real position and the funding transaction.
pub fn make_source(
    crypto: &TestCrypto,
    amount: u64,
    base_index: u64,
    ring_size: usize,
    seed: usize,
) -> SourceEntry {
    let funding_key = keccak256_parts(&[b"funding", &(seed as u64).to_le_bytes()]);
    let derived = crypto.derive_output(&funding_key, &crypto.primary(), 0, amount);
    let tx_pub = crypto.tx_public_key(&funding_key);
    let real_position = seed % ring_size.max(1);

    let ring: Vec<RingMember> = (0..ring_size)
        .map(|k| {
            let global_index = base_index + k as u64 * 5;
            if k == real_position {
                RingMember {
                    global_index,
                    key: derived.key,
                    commitment: crypto.commit(amount, &derived.mask),
                }
            } else {
                decoy_member(global_index)
            }
        })
        .collect();

    SourceEntry {
        ring,
        real_position,
        real_output_key: derived.key,
        real_tx_pub_key: tx_pub,
        real_output_in_tx_index: 0,
        amount,
        mask: derived.mask,
        rct: true,
        key_image: crypto.key_image_for(&derived.key),
        transfer_index: seed,
    }
}

/// An unsigned fork-16 pending spend of `send` from outputs of `amounts`.
pub fn sample_pending(crypto: &TestCrypto, amounts: &[u64], send: u64) -> PendingSpend {
    let sources = amounts
        .iter()
        .enumerate()
        .map(|(i, &a)| make_source(crypto, a, 500 + i as u64 * 200, 16, i))
        .collect();
    TransactionBuilder::new(crypto, fork_rules(16))
        .add_sources(sources)
        .add_destination(Destination::new(TestCrypto::new(0xdead).primary(), send))
        .set_change_address(crypto.primary())
        .build(&mut StdRng::seed_from_u64(amounts.len() as u64))
        .expect("sample pending spend builds")
}

//! Transaction builder.
//!
//! Turns selected sources (each a real output hidden in a sorted ring) and
//! destinations into an unsigned [`PendingSpend`]. The builder computes the
//! fee from the estimated weight under the active fork, splits amounts, adds
//! change, derives outputs through [`TxCrypto`] and picks the proof type the
//! fork mandates. Signing happens afterwards through a signing strategy.

use std::collections::BTreeSet;

use log::debug;
use rand::seq::SliceRandom;
use rand::RngCore;
use shroud_types::consensus::DEFAULT_DUST_THRESHOLD;
use shroud_types::{ForkRules, Hash32};

use crate::crypto::TxCrypto;
use crate::fee::{FeePolicy, TxShape, DEFAULT_EXTRA_SIZE};
use crate::pending::{ConstructionData, PendingSpend};
use crate::split::{DustPolicy, SplitStrategy};
use crate::types::*;
use crate::TxError;

/// Builder for one transaction.
pub struct TransactionBuilder<'a> {
    crypto: &'a dyn TxCrypto,
    rules: ForkRules,
    sources: Vec<SourceEntry>,
    destinations: Vec<Destination>,
    change_address: Option<AccountAddress>,
    fee_policy: FeePolicy,
    fee: Option<u64>,
    unlock_time: u64,
    dust_threshold: u64,
    dust_policy: DustPolicy,
    subaddr_account: u32,
    subaddr_indices: BTreeSet<u32>,
}

impl<'a> TransactionBuilder<'a> {
    /// Create a builder for the fork described by `rules`.
    pub fn new(crypto: &'a dyn TxCrypto, rules: ForkRules) -> Self {
        Self {
            crypto,
            rules,
            sources: Vec::new(),
            destinations: Vec::new(),
            change_address: None,
            fee_policy: FeePolicy::default_for_fork(&rules),
            fee: None,
            unlock_time: 0,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            dust_policy: DustPolicy::AddToFee,
            subaddr_account: 0,
            subaddr_indices: BTreeSet::new(),
        }
    }

    pub fn add_source(mut self, source: SourceEntry) -> Self {
        self.sources.push(source);
        self
    }

    pub fn add_sources(mut self, sources: Vec<SourceEntry>) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn add_destination(mut self, dest: Destination) -> Self {
        self.destinations.push(dest);
        self
    }

    pub fn add_destinations(mut self, dests: &[Destination]) -> Self {
        self.destinations.extend_from_slice(dests);
        self
    }

    pub fn set_change_address(mut self, address: AccountAddress) -> Self {
        self.change_address = Some(address);
        self
    }

    pub fn set_fee_policy(mut self, policy: FeePolicy) -> Self {
        self.fee_policy = policy;
        self
    }

    /// Set an explicit fee (overrides automatic estimation).
    pub fn set_fee(mut self, fee: u64) -> Self {
        self.fee = Some(fee);
        self
    }

    pub fn set_unlock_time(mut self, unlock_time: u64) -> Self {
        self.unlock_time = unlock_time;
        self
    }

    /// Dust handling for cleartext-amount transactions.
    pub fn set_dust(mut self, threshold: u64, policy: DustPolicy) -> Self {
        self.dust_threshold = threshold;
        self.dust_policy = policy;
        self
    }

    /// Record which subaddresses the inputs came from.
    pub fn set_subaddr(mut self, account: u32, indices: BTreeSet<u32>) -> Self {
        self.subaddr_account = account;
        self.subaddr_indices = indices;
        self
    }

    fn proof(&self) -> ProofType {
        ProofType::for_fork(&self.rules)
    }

    fn strategy(&self) -> SplitStrategy {
        SplitStrategy::for_rct(self.proof().is_rct(), self.dust_threshold, self.dust_policy)
    }

    fn ring_size(&self) -> usize {
        self.sources
            .first()
            .map(|s| s.ring.len())
            .unwrap_or_else(|| self.rules.effective_ring_size(0))
    }

    fn shape(&self, outputs: usize) -> TxShape {
        TxShape {
            inputs: self.sources.len().max(1),
            outputs,
            ring_size: self.ring_size(),
            extra_size: DEFAULT_EXTRA_SIZE,
            proof: self.proof(),
            view_tags: self.rules.view_tags,
        }
    }

    /// Number of outputs the transaction will carry given `change`.
    fn output_count(&self, change: u64) -> Result<usize, TxError> {
        let change_dest = self
            .change_address
            .map(|address| Destination::new(address, change));
        let split = self.strategy().split(&self.destinations, change_dest.as_ref())?;
        let mut count = split.outputs.len();
        if self.proof().is_rct() {
            // Room for change even when none is needed yet.
            count = count.max(self.destinations.len() + 1).max(2);
        }
        Ok(count)
    }

    fn total_destinations(&self) -> Result<u64, TxError> {
        self.destinations
            .iter()
            .try_fold(0u64, |acc, d| acc.checked_add(d.amount))
            .ok_or(TxError::Overflow("destination total"))
    }

    fn total_sources(&self) -> Result<u64, TxError> {
        self.sources
            .iter()
            .try_fold(0u64, |acc, s| acc.checked_add(s.amount))
            .ok_or(TxError::Overflow("input total"))
    }

    /// Fee the built transaction would pay, before any dust.
    pub fn estimate_fee(&self) -> Result<u64, TxError> {
        if let Some(fee) = self.fee {
            return Ok(fee);
        }
        let provisional_change = self
            .total_sources()?
            .saturating_sub(self.total_destinations()?);
        let outputs = self.output_count(provisional_change)?;
        self.fee_policy.estimate(&self.shape(outputs))
    }

    fn validate(&self) -> Result<(), TxError> {
        if self.destinations.is_empty() {
            return Err(TxError::NoDestinations);
        }
        if let Some(index) = self.destinations.iter().position(|d| d.amount == 0) {
            return Err(TxError::ZeroAmount { index });
        }
        if self.sources.is_empty() {
            return Err(TxError::InsufficientInputs {
                need: self.total_destinations()?,
                have: 0,
            });
        }

        let ring_size = self.sources[0].ring.len();
        let expected = self.rules.fixed_ring_size.unwrap_or(ring_size);
        if ring_size < self.rules.min_ring_size || ring_size != expected {
            return Err(TxError::RingSizeMismatch {
                expected: self.rules.effective_ring_size(ring_size),
                got: ring_size,
            });
        }
        for (i, source) in self.sources.iter().enumerate() {
            if source.ring.len() != ring_size {
                return Err(TxError::RingSizeMismatch {
                    expected: ring_size,
                    got: source.ring.len(),
                });
            }
            source
                .validate()
                .map_err(|e| TxError::Invalid(format!("source {}: {}", i, e)))?;
            if source.key_image.is_none() {
                return Err(TxError::Signing(format!(
                    "no key image for transfer {}",
                    source.transfer_index
                )));
            }
        }
        Ok(())
    }

    /// Build the unsigned transaction.
    pub fn build<R: RngCore>(self, rng: &mut R) -> Result<PendingSpend, TxError> {
        self.validate()?;

        let proof = self.proof();
        let total_in = self.total_sources()?;
        let total_dest = self.total_destinations()?;
        let fee = self.estimate_fee()?;

        let needed = total_dest
            .checked_add(fee)
            .ok_or(TxError::Overflow("destinations plus fee"))?;
        if total_in < needed {
            return Err(TxError::InsufficientInputs { need: needed, have: total_in });
        }
        let change = total_in - needed;

        let change_dest = match self.change_address {
            Some(address) => Some(Destination::new(address, change)),
            None if change > 0 => {
                return Err(TxError::Invalid("change address required".into()))
            }
            None => None,
        };

        let strategy = self.strategy();
        let split = strategy.split(&self.destinations, change_dest.as_ref())?;
        let mut outputs = split.outputs;
        if proof.is_rct() && outputs.len() == 1 {
            if let Some(change_dest) = change_dest {
                // RingCT needs two outputs; pay zero change.
                outputs.push(change_dest);
            }
        }
        if outputs.len() > proof.max_outputs() {
            return Err(TxError::TooManyOutputs {
                count: outputs.len(),
                max: proof.max_outputs(),
            });
        }
        let tx_fee = if split.dust_added_to_fee {
            fee.checked_add(split.dust).ok_or(TxError::Overflow("fee plus dust"))?
        } else {
            fee
        };

        let weight = self.shape(outputs.len()).estimate_weight();
        if weight > self.rules.max_tx_weight {
            return Err(TxError::TooBig {
                weight,
                limit: self.rules.max_tx_weight,
            });
        }

        outputs.shuffle(rng);

        let tx_key = self.crypto.generate_tx_key(rng);
        let tx_pub = self.crypto.tx_public_key(&tx_key);
        let mut extra = Vec::with_capacity(DEFAULT_EXTRA_SIZE);
        extra.push(TX_EXTRA_TAG_PUBKEY);
        extra.extend_from_slice(tx_pub.as_bytes());

        // Outputs.
        let mut tx_outputs = Vec::with_capacity(outputs.len());
        let mut output_masks = Vec::with_capacity(outputs.len());
        let mut encrypted_amounts = Vec::with_capacity(outputs.len());
        let mut out_commitments = Vec::with_capacity(outputs.len());
        for (i, dest) in outputs.iter().enumerate() {
            let derived = self
                .crypto
                .derive_output(&tx_key, &dest.address, i as u32, dest.amount);
            tx_outputs.push(TxOutput {
                amount: if proof.is_rct() { 0 } else { dest.amount },
                key: derived.key,
                view_tag: self.rules.view_tags.then_some(derived.view_tag),
            });
            out_commitments.push(self.crypto.commit(dest.amount, &derived.mask));
            output_masks.push(derived.mask);
            encrypted_amounts.push(derived.encrypted_amount);
        }

        // Inputs, sorted by key image descending.
        let mut sources = self.sources;
        sources.sort_by(|a, b| b.key_image.cmp(&a.key_image));
        let mut tx_inputs = Vec::with_capacity(sources.len());
        for source in &sources {
            let key_image = source
                .key_image
                .ok_or_else(|| TxError::Signing("missing key image".into()))?;
            tx_inputs.push(TxInput {
                amount: if source.rct { 0 } else { source.amount },
                key_offsets: absolute_to_relative(&source.global_indices()),
                key_image,
            });
        }

        let input_amounts: Vec<u64> = sources.iter().map(|s| s.amount).collect();
        let output_amounts: Vec<u64> = outputs.iter().map(|d| d.amount).collect();
        let (rct, pseudo_masks, range_proof) = if proof.is_rct() {
            let pseudo_masks = self.crypto.pseudo_masks(rng, &input_amounts, &output_masks);
            let pseudo_outs = input_amounts
                .iter()
                .zip(&pseudo_masks)
                .map(|(&amount, mask)| self.crypto.commit(amount, mask))
                .collect();
            let range_proof = self.crypto.prove_range(proof, &output_amounts, &output_masks)?;
            let base = RctBase {
                rct_type: proof.rct_type(),
                fee: tx_fee,
                encrypted_amounts,
                out_commitments,
                pseudo_outs,
            };
            (Some(base), pseudo_masks, range_proof)
        } else {
            (None, Vec::new(), Vec::new())
        };

        let tx = Transaction {
            prefix: TxPrefix {
                version: if proof.is_rct() { TX_VERSION_RCT } else { TX_VERSION_LEGACY },
                unlock_time: self.unlock_time,
                inputs: tx_inputs,
                outputs: tx_outputs,
                extra: extra.clone(),
            },
            rct,
            prunable: Prunable {
                range_proof,
                signatures: Vec::new(),
            },
        };

        debug!(
            "built tx {}: {} inputs, {} outputs, fee {}, change {}",
            tx.prefix_hash().short(),
            sources.len(),
            outputs.len(),
            tx_fee,
            change
        );

        Ok(PendingSpend {
            key_images: tx.key_images(),
            selected_transfers: sources.iter().map(|s| s.transfer_index).collect(),
            tx_key,
            fee: tx_fee,
            dust: split.dust,
            dust_added_to_fee: split.dust_added_to_fee,
            construction: ConstructionData {
                sources,
                outputs,
                output_masks,
                pseudo_masks,
                destinations: self.destinations,
                change: change_dest,
                split: strategy,
                unlock_time: self.unlock_time,
                extra,
                proof,
                fork_version: self.rules.version,
                subaddr_account: self.subaddr_account,
                subaddr_indices: self.subaddr_indices,
            },
            tx,
        })
    }
}

/// Sign every input of `pending` with `crypto`.
pub(crate) fn sign_inputs(crypto: &dyn TxCrypto, pending: &mut PendingSpend) -> Result<(), TxError> {
    let message = pending.tx.signing_hash();
    let proof = pending.construction.proof;
    let mut signatures = Vec::with_capacity(pending.tx.prefix.inputs.len());
    for (i, input) in pending.tx.prefix.inputs.iter().enumerate() {
        let source = pending
            .construction
            .sources
            .get(i)
            .ok_or_else(|| TxError::Signing(format!("no source for input {}", i)))?;
        let pseudo_mask = pending
            .construction
            .pseudo_masks
            .get(i)
            .copied()
            .unwrap_or(Hash32::ZERO);
        signatures.push(crypto.sign_input(proof, &message, source, &input.key_image, &pseudo_mask)?);
    }
    pending.tx.prunable.signatures = signatures;
    Ok(())
}

/// Check every input signature of `pending`.
pub fn verify_inputs(crypto: &dyn TxCrypto, pending: &PendingSpend) -> Result<(), TxError> {
    let message = pending.tx.signing_hash();
    let proof = pending.construction.proof;
    let inputs = &pending.tx.prefix.inputs;
    if pending.tx.prunable.signatures.len() != inputs.len() {
        return Err(TxError::Signing(format!(
            "{} signatures for {} inputs",
            pending.tx.prunable.signatures.len(),
            inputs.len()
        )));
    }
    for (i, (input, signature)) in inputs.iter().zip(&pending.tx.prunable.signatures).enumerate() {
        let source = pending
            .construction
            .sources
            .get(i)
            .ok_or_else(|| TxError::Signing(format!("no source for input {}", i)))?;
        let pseudo_out = pending.tx.rct.as_ref().and_then(|r| r.pseudo_outs.get(i));
        if !crypto.verify_input(proof, &message, &source.ring, &input.key_image, pseudo_out, signature) {
            return Err(TxError::Signing(format!("signature for input {} does not verify", i)));
        }
    }
    Ok(())
}

//! Fee estimation and transaction weight calculation.
//!
//! Estimates transaction size/weight from structural parameters (input count,
//! output count, ring size, proof type) and turns it into a fee under the
//! active fork's fee rules: per-kB before per-byte fees, per-byte with
//! quantization afterwards.

use serde::{Deserialize, Serialize};
use shroud_types::consensus::{FEE_PER_BYTE, FEE_PER_KB, FEE_QUANTIZATION_MASK};
use shroud_types::ForkRules;

use crate::types::ProofType;
use crate::TxError;

/// Rough per-ring-member cost of a pre-RingCT input.
const APPROXIMATE_INPUT_BYTES: u64 = 80;

/// Size of a tx extra holding just the tx public key.
pub const DEFAULT_EXTRA_SIZE: usize = 33;

/// Fee priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeePriority {
    Low,
    #[default]
    Normal,
    High,
    Highest,
}

impl FeePriority {
    /// Priority multiplier applied to the base fee.
    pub fn multiplier(&self) -> u64 {
        match self {
            FeePriority::Low => 1,
            FeePriority::Normal => 5,
            FeePriority::High => 25,
            FeePriority::Highest => 1000,
        }
    }

    fn tier(&self) -> usize {
        match self {
            FeePriority::Low => 0,
            FeePriority::Normal => 1,
            FeePriority::High => 2,
            FeePriority::Highest => 3,
        }
    }
}

/// Structural description of a transaction for size estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxShape {
    pub inputs: usize,
    pub outputs: usize,
    pub ring_size: usize,
    pub extra_size: usize,
    pub proof: ProofType,
    pub view_tags: bool,
}

impl TxShape {
    pub fn new(inputs: usize, outputs: usize, ring_size: usize, proof: ProofType) -> Self {
        Self {
            inputs,
            outputs,
            ring_size,
            extra_size: DEFAULT_EXTRA_SIZE,
            proof,
            view_tags: proof.uses_bulletproof_plus(),
        }
    }

    /// Estimated serialized size in bytes.
    pub fn estimate_size(&self) -> u64 {
        if !self.proof.is_rct() {
            return (self.inputs * self.ring_size) as u64 * APPROXIMATE_INPUT_BYTES
                + self.extra_size as u64;
        }

        let n_in = self.inputs as u64;
        let n_out = self.outputs as u64;
        let ring = self.ring_size as u64;

        // version + unlock time
        let mut size = 1 + 6;
        // vin: tag, amount, offsets, key image
        size += n_in * (1 + 6 + ring * 2 + 32);
        // vout: amount, key
        size += n_out * (6 + 32);
        size += self.extra_size as u64;
        // rct type
        size += 1;

        if self.proof.uses_bulletproof() {
            let log_padded = log2_ceil(self.outputs);
            let fixed = if self.proof.uses_bulletproof_plus() { 6 } else { 9 };
            size += (2 * (6 + log_padded) + fixed) * 32 + 3;
        } else {
            // Borromean: one proof per output.
            size += (2 * 64 * 32 + 32 + 64 * 32) * n_out;
        }

        if self.proof.uses_clsag() {
            size += n_in * (32 * ring + 64);
        } else {
            size += n_in * (64 * ring + 32);
        }

        if self.view_tags {
            size += n_out;
        }

        // pseudo outs
        size += 32 * n_in;
        // ecdh info
        size += 8 * n_out;
        // out commitments
        size += 32 * n_out;
        // fee
        size += 4;

        size
    }

    /// Estimated weight: size plus the Bulletproof clawback for more than
    /// two outputs.
    pub fn estimate_weight(&self) -> u64 {
        let size = self.estimate_size();
        if self.proof.uses_bulletproof() && self.outputs > 2 {
            size + bulletproof_clawback(self.outputs, self.proof.uses_bulletproof_plus())
        } else {
            size
        }
    }
}

/// Weight clawback for aggregated range proofs over `outputs` outputs.
pub fn bulletproof_clawback(outputs: usize, plus: bool) -> u64 {
    if outputs <= 2 {
        return 0;
    }
    let fixed: u64 = if plus { 6 } else { 9 };
    // Notional size of a 2-output proof, normalized to one output.
    let bp_base = 32 * (fixed + 7 * 2) / 2;
    let log_padded = log2_ceil(outputs).max(2);
    let nlr = 2 * (6 + log_padded);
    let bp_size = 32 * (fixed + nlr);
    (bp_base * (1u64 << log_padded)).saturating_sub(bp_size) * 4 / 5
}

fn log2_ceil(n: usize) -> u64 {
    let mut log = 0u64;
    while (1usize << log) < n {
        log += 1;
    }
    log
}

/// Fee rules for one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    /// Charge per byte of weight rather than per started kB.
    pub per_byte: bool,
    /// Base fee per byte or per kB, before the priority multiplier.
    pub base_fee: u64,
    pub quantization_mask: u64,
    pub priority: FeePriority,
    /// Per-priority per-byte fees quoted by the daemon, lowest first.
    #[serde(default)]
    pub tiered_fees: Vec<u64>,
}

impl FeePolicy {
    /// Policy from the fork rules and the daemon's quote.
    pub fn for_fork(rules: &ForkRules, base_fee: u64, quantization_mask: u64) -> Self {
        Self {
            per_byte: rules.per_byte_fee,
            base_fee,
            quantization_mask: quantization_mask.max(1),
            priority: FeePriority::default(),
            tiered_fees: Vec::new(),
        }
    }

    /// Policy using the built-in network minimums, without a daemon quote.
    pub fn default_for_fork(rules: &ForkRules) -> Self {
        if rules.per_byte_fee {
            Self::for_fork(rules, FEE_PER_BYTE, FEE_QUANTIZATION_MASK)
        } else {
            Self::for_fork(rules, FEE_PER_KB, 1)
        }
    }

    pub fn with_priority(mut self, priority: FeePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tiered_fees(mut self, fees: Vec<u64>) -> Self {
        self.tiered_fees = fees;
        self
    }

    /// Fee rate after applying the priority.
    pub fn rate(&self) -> Result<u64, TxError> {
        if self.per_byte && self.tiered_fees.len() >= 4 {
            return Ok(self.tiered_fees[self.priority.tier()]);
        }
        self.base_fee
            .checked_mul(self.priority.multiplier())
            .ok_or(TxError::Overflow("fee rate"))
    }

    /// Fee for a transaction of `weight` (per-byte) or `size` (per-kB) bytes.
    pub fn fee_for(&self, weight: u64, size: u64) -> Result<u64, TxError> {
        let rate = self.rate()?;
        if self.per_byte {
            let raw = weight.checked_mul(rate).ok_or(TxError::Overflow("fee"))?;
            let mask = self.quantization_mask.max(1);
            let rounded = raw
                .checked_add(mask - 1)
                .ok_or(TxError::Overflow("fee quantization"))?;
            Ok(rounded / mask * mask)
        } else {
            let kb = size.div_ceil(1024);
            kb.checked_mul(rate).ok_or(TxError::Overflow("fee"))
        }
    }

    /// Fee for a transaction of the given shape.
    pub fn estimate(&self, shape: &TxShape) -> Result<u64, TxError> {
        self.fee_for(shape.estimate_weight(), shape.estimate_size())
    }
}

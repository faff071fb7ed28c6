//! Pending spends.
//!
//! A [`PendingSpend`] is a fully constructed transaction together with the
//! data needed to re-derive and re-check it: ordered sources with their rings,
//! the output list in transaction order, commitment masks and the tx key.
//! Pending spends travel between hot wallet, cold signer and multisig peers
//! as versioned JSON.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use shroud_types::{Hash32, KeyImage, TxHash};

use crate::split::SplitStrategy;
use crate::types::{relative_to_absolute, Destination, ProofType, SourceEntry, Transaction};
use crate::TxError;

/// Format version of exported pending spend sets.
pub const PENDING_SET_VERSION: u32 = 1;

/// Everything needed to rebuild and re-verify one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionData {
    /// Sources in transaction input order (key image descending).
    pub sources: Vec<SourceEntry>,
    /// Outputs in transaction order, change and dust included.
    pub outputs: Vec<Destination>,
    /// Commitment mask per output, transaction order.
    pub output_masks: Vec<Hash32>,
    /// Pseudo-output mask per input, transaction order.
    #[serde(default)]
    pub pseudo_masks: Vec<Hash32>,
    /// Destinations as requested, before splitting.
    pub destinations: Vec<Destination>,
    pub change: Option<Destination>,
    /// How `destinations` and `change` became `outputs`.
    pub split: SplitStrategy,
    pub unlock_time: u64,
    #[serde(with = "shroud_types::serde_hex")]
    pub extra: Vec<u8>,
    pub proof: ProofType,
    pub fork_version: u8,
    #[serde(default)]
    pub subaddr_account: u32,
    #[serde(default)]
    pub subaddr_indices: BTreeSet<u32>,
}

/// A built transaction awaiting signatures or commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSpend {
    pub tx: Transaction,
    pub tx_key: Hash32,
    /// Fee paid by the transaction, dust included when it went to the fee.
    pub fee: u64,
    pub dust: u64,
    #[serde(default)]
    pub dust_added_to_fee: bool,
    /// Ledger indices of the spent outputs, transaction input order.
    pub selected_transfers: Vec<usize>,
    pub key_images: Vec<KeyImage>,
    pub construction: ConstructionData,
}

/// Short description of a pending spend for confirmation prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSummary {
    pub tx_hash: TxHash,
    pub input_count: usize,
    pub output_count: usize,
    pub ring_size: usize,
    pub fee: u64,
    pub total_in: u64,
    /// Sent to destinations, change excluded.
    pub total_out: u64,
    pub change: u64,
    pub signed: bool,
}

#[derive(Serialize, Deserialize)]
struct PendingSet {
    version: u32,
    txs: Vec<PendingSpend>,
}

impl PendingSpend {
    pub fn tx_hash(&self) -> TxHash {
        self.tx.hash()
    }

    pub fn is_signed(&self) -> bool {
        self.tx.is_signed()
    }

    pub fn amount_in(&self) -> Result<u64, TxError> {
        self.construction
            .sources
            .iter()
            .try_fold(0u64, |acc, s| acc.checked_add(s.amount))
            .ok_or(TxError::Overflow("input total"))
    }

    pub fn amount_out(&self) -> Result<u64, TxError> {
        self.construction
            .destinations
            .iter()
            .try_fold(0u64, |acc, d| acc.checked_add(d.amount))
            .ok_or(TxError::Overflow("destination total"))
    }

    pub fn change_amount(&self) -> u64 {
        self.construction.change.map_or(0, |c| c.amount)
    }

    /// Ring (absolute global indices) used by each key image.
    pub fn rings(&self) -> Vec<(KeyImage, Vec<u64>)> {
        self.tx
            .prefix
            .inputs
            .iter()
            .map(|input| {
                let ring = relative_to_absolute(&input.key_offsets).unwrap_or_default();
                (input.key_image, ring)
            })
            .collect()
    }

    pub fn summary(&self) -> Result<TxSummary, TxError> {
        Ok(TxSummary {
            tx_hash: self.tx_hash(),
            input_count: self.tx.prefix.inputs.len(),
            output_count: self.tx.prefix.outputs.len(),
            ring_size: self.construction.sources.first().map_or(0, |s| s.ring.len()),
            fee: self.fee,
            total_in: self.amount_in()?,
            total_out: self.amount_out()?,
            change: self.change_amount(),
            signed: self.is_signed(),
        })
    }

    /// Check that the transaction matches its construction data.
    ///
    /// Returns every problem found rather than stopping at the first.
    pub fn verify(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let c = &self.construction;
        let prefix = &self.tx.prefix;

        if prefix.inputs.is_empty() {
            errors.push("transaction has no inputs".to_string());
        }
        if prefix.outputs.is_empty() {
            errors.push("transaction has no outputs".to_string());
        }
        if prefix.inputs.len() != c.sources.len() {
            errors.push(format!(
                "{} inputs but {} sources",
                prefix.inputs.len(),
                c.sources.len()
            ));
        }
        if prefix.outputs.len() != c.outputs.len() || c.outputs.len() != c.output_masks.len() {
            errors.push(format!(
                "{} outputs, {} output destinations, {} masks",
                prefix.outputs.len(),
                c.outputs.len(),
                c.output_masks.len()
            ));
        }
        if prefix.unlock_time != c.unlock_time {
            errors.push("unlock time differs from construction data".to_string());
        }
        if prefix.extra != c.extra {
            errors.push("extra differs from construction data".to_string());
        }
        if self.key_images != self.tx.key_images() {
            errors.push("key image list differs from inputs".to_string());
        }

        for (i, (input, source)) in prefix.inputs.iter().zip(&c.sources).enumerate() {
            if let Err(e) = source.validate() {
                errors.push(format!("source {}: {}", i, e));
            }
            match relative_to_absolute(&input.key_offsets) {
                Some(ring) if ring == source.global_indices() => {}
                _ => errors.push(format!("input {} ring differs from its source", i)),
            }
            if source.key_image != Some(input.key_image) {
                errors.push(format!("input {} key image differs from its source", i));
            }
        }

        if c.proof.is_rct() {
            match &self.tx.rct {
                Some(base) => {
                    if base.fee != self.fee {
                        errors.push(format!("rct fee {} != pending fee {}", base.fee, self.fee));
                    }
                    if base.rct_type != c.proof.rct_type() {
                        errors.push("rct type does not match proof type".to_string());
                    }
                    if base.encrypted_amounts.len() != prefix.outputs.len()
                        || base.out_commitments.len() != prefix.outputs.len()
                    {
                        errors.push("rct output data does not cover every output".to_string());
                    }
                    if base.pseudo_outs.len() != prefix.inputs.len() {
                        errors.push("pseudo outputs do not cover every input".to_string());
                    }
                }
                None => errors.push("RingCT transaction without RingCT data".to_string()),
            }
        } else {
            for (i, (output, dest)) in prefix.outputs.iter().zip(&c.outputs).enumerate() {
                if output.amount != dest.amount {
                    errors.push(format!("output {} amount differs from construction", i));
                }
            }
        }

        let total_in = c
            .sources
            .iter()
            .try_fold(0u64, |acc, s| acc.checked_add(s.amount));
        let total_out = c
            .outputs
            .iter()
            .try_fold(self.fee, |acc, d| acc.checked_add(d.amount));
        match (total_in, total_out) {
            (Some(inp), Some(out)) if inp == out => {}
            (Some(inp), Some(out)) => {
                errors.push(format!("inputs {} do not balance outputs plus fee {}", inp, out))
            }
            _ => errors.push("amount overflow".to_string()),
        }
        if self.amount_out().is_err() {
            errors.push("destination amount overflow".to_string());
        }
        if let Err(e) = self.check_split() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Splitting the destinations and change again must give exactly the
    /// recorded outputs, in any order.
    fn check_split(&self) -> Result<(), String> {
        let c = &self.construction;
        if matches!(c.split, SplitStrategy::PassThrough) != c.proof.is_rct() {
            return Err("split strategy does not fit the proof type".into());
        }
        let split = c
            .split
            .split(&c.destinations, c.change.as_ref())
            .map_err(|e| e.to_string())?;
        if split.dust != self.dust || split.dust_added_to_fee != self.dust_added_to_fee {
            return Err("dust differs from construction".into());
        }
        let mut expected = split.outputs;
        if c.proof.is_rct() && expected.len() == 1 {
            if let Some(change) = c.change {
                expected.push(change);
            }
        }

        let mut remaining = c.outputs.clone();
        for dest in &expected {
            match remaining.iter().position(|o| o == dest) {
                Some(pos) => {
                    remaining.swap_remove(pos);
                }
                None => {
                    return Err(format!(
                        "no output pays {} to a stated destination or change",
                        dest.amount
                    ))
                }
            }
        }
        if !remaining.is_empty() {
            return Err(format!("{} output(s) pay no stated destination", remaining.len()));
        }
        Ok(())
    }
}

/// Serialize pending spends as a versioned JSON set.
pub fn export_pending(txs: &[PendingSpend]) -> Result<String, TxError> {
    let set = PendingSet {
        version: PENDING_SET_VERSION,
        txs: txs.to_vec(),
    };
    Ok(serde_json::to_string(&set)?)
}

/// Parse a pending spend set, checking the version and each entry.
pub fn import_pending(json: &str) -> Result<Vec<PendingSpend>, TxError> {
    let set: PendingSet =
        serde_json::from_str(json).map_err(|e| TxError::Parse(format!("pending set: {}", e)))?;
    if set.version != PENDING_SET_VERSION {
        return Err(TxError::Parse(format!(
            "unsupported pending set version: expected {}, got {}",
            PENDING_SET_VERSION, set.version
        )));
    }
    for (i, tx) in set.txs.iter().enumerate() {
        tx.verify()
            .map_err(|errors| TxError::Invalid(format!("tx {}: {}", i, errors.join("; "))))?;
    }
    Ok(set.txs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_pending, TestCrypto};

    #[test]
    fn test_sample_pending_verifies() {
        let crypto = TestCrypto::new(1);
        let pending = sample_pending(&crypto, &[7_000_000_000_000], 2_000_000_000_000);
        pending.verify().unwrap();
        let summary = pending.summary().unwrap();
        assert_eq!(summary.input_count, 1);
        assert_eq!(summary.total_out, 2_000_000_000_000);
        assert_eq!(summary.total_in, summary.total_out + summary.change + summary.fee);
        assert!(!summary.signed);
    }

    #[test]
    fn test_export_import_preserves_hash() {
        let crypto = TestCrypto::new(2);
        let pending = sample_pending(&crypto, &[5_000_000_000_000, 1_000_000_000_000], 3_000_000_000_000);
        let json = export_pending(std::slice::from_ref(&pending)).unwrap();
        let back = import_pending(&json).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].tx_hash(), pending.tx_hash());
        assert_eq!(back[0], pending);
    }

    #[test]
    fn test_import_rejects_wrong_version() {
        let json = r#"{"version":99,"txs":[]}"#;
        assert!(matches!(import_pending(json), Err(TxError::Parse(_))));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let crypto = TestCrypto::new(3);
        let mut pending = sample_pending(&crypto, &[9_000_000_000_000], 1_000_000_000_000);

        pending.construction.outputs[0].amount += 1;
        let errors = pending.verify().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("balance")));

        let mut pending = sample_pending(&crypto, &[9_000_000_000_000], 1_000_000_000_000);
        pending.tx.prefix.inputs[0].key_offsets[0] += 1;
        let errors = pending.verify().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("ring differs")));
    }

    #[test]
    fn test_verify_links_destinations_to_outputs() {
        let crypto = TestCrypto::new(5);
        let send = 1_000_000_000_000;

        // Stated amount no longer matches any output.
        let mut pending = sample_pending(&crypto, &[9_000_000_000_000], send);
        pending.construction.destinations[0].amount = 3 * send;
        let errors = pending.verify().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("stated destination")));

        // Change claimed for an output that pays the recipient.
        let mut pending = sample_pending(&crypto, &[9_000_000_000_000], send);
        let recipient = pending.construction.destinations[0].address;
        if let Some(change) = pending.construction.change.as_mut() {
            change.address = recipient;
        }
        assert!(pending.verify().is_err());

        // A cleartext split cannot stand in for a RingCT one.
        let mut pending = sample_pending(&crypto, &[9_000_000_000_000], send);
        pending.construction.split = SplitStrategy::Digits {
            dust_threshold: 0,
            dust_policy: crate::split::DustPolicy::AddToFee,
        };
        let errors = pending.verify().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("split strategy")));
    }

    #[test]
    fn test_amount_totals_do_not_overflow() {
        let crypto = TestCrypto::new(6);
        let mut pending = sample_pending(&crypto, &[9_000_000_000_000], 1_000_000_000_000);
        let extra = Destination::new(pending.construction.destinations[0].address, u64::MAX);
        pending.construction.destinations.push(extra);

        assert!(matches!(pending.amount_out(), Err(TxError::Overflow(_))));
        assert!(pending.summary().is_err());
        let errors = pending.verify().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("overflow")));
    }

    #[test]
    fn test_rings_are_absolute() {
        let crypto = TestCrypto::new(4);
        let pending = sample_pending(&crypto, &[9_000_000_000_000], 1_000_000_000_000);
        let rings = pending.rings();
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0].1, pending.construction.sources[0].global_indices());
        assert_eq!(Some(rings[0].0), pending.construction.sources[0].key_image);
    }
}

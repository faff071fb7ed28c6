use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use shroud_tx::{PendingSpend, TxError};
use shroud_types::Hash32;

/// Format version of multisig transaction sets.
pub const MULTISIG_SET_VERSION: u32 = 1;

/// One participant's contribution to an input signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialSignature(#[serde(with = "shroud_types::serde_hex")] pub Vec<u8>);

/// Partials collected for one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPartials {
    /// Prefix hash the partials were made over.
    pub prefix_hash: Hash32,
    /// Per input, partials keyed by signer index.
    pub inputs: Vec<BTreeMap<u32, PartialSignature>>,
}

/// Transactions travelling between multisig participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigTxSet {
    pub version: u32,
    pub txs: Vec<PendingSpend>,
    /// Parallel to `txs`.
    pub partials: Vec<TxPartials>,
    /// Participants that have signed every input of every transaction.
    pub signers: BTreeSet<u32>,
}

impl MultisigTxSet {
    pub fn new(txs: Vec<PendingSpend>) -> Self {
        let partials = txs
            .iter()
            .map(|ptx| TxPartials {
                prefix_hash: ptx.tx.prefix_hash(),
                inputs: vec![BTreeMap::new(); ptx.tx.prefix.inputs.len()],
            })
            .collect();
        Self {
            version: MULTISIG_SET_VERSION,
            txs,
            partials,
            signers: BTreeSet::new(),
        }
    }

    pub fn to_json(&self) -> Result<String, TxError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a set and check its shape.
    pub fn from_json(json: &str) -> Result<Self, TxError> {
        let set: Self = serde_json::from_str(json)
            .map_err(|e| TxError::Parse(format!("multisig tx set: {}", e)))?;
        if set.version != MULTISIG_SET_VERSION {
            return Err(TxError::Parse(format!(
                "unsupported multisig set version: expected {}, got {}",
                MULTISIG_SET_VERSION, set.version
            )));
        }
        if set.partials.len() != set.txs.len() {
            return Err(TxError::Parse("partials do not cover every transaction".into()));
        }
        for (i, (ptx, partials)) in set.txs.iter().zip(&set.partials).enumerate() {
            if partials.prefix_hash != ptx.tx.prefix_hash() {
                return Err(TxError::Invalid(format!("tx {}: partials made over another prefix", i)));
            }
            if partials.inputs.len() != ptx.tx.prefix.inputs.len() {
                return Err(TxError::Invalid(format!("tx {}: partials do not cover every input", i)));
            }
        }
        Ok(set)
    }

    /// Signer indices present on every input of every transaction.
    pub fn complete_signers(&self) -> BTreeSet<u32> {
        let mut inputs = self.partials.iter().flat_map(|p| p.inputs.iter());
        let Some(first) = inputs.next() else {
            return BTreeSet::new();
        };
        let mut signers: BTreeSet<u32> = first.keys().copied().collect();
        for input in inputs {
            signers.retain(|s| input.contains_key(s));
        }
        signers
    }
}

//! Signing strategies.
//!
//! Every strategy exposes the same two steps: export what the signer needs,
//! then import what it produced. A local signer completes during export. A
//! cold signer hands an [`UnsignedTxSet`] to an offline device and takes back
//! a [`SignedTxSet`], which is re-validated against the transactions built
//! here before any signature is adopted.

use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use shroud_types::Hash32;

use crate::builder::{sign_inputs, verify_inputs};
use crate::crypto::TxCrypto;
use crate::pending::PendingSpend;
use crate::types::{relative_to_absolute, Transaction};
use crate::TxError;

/// Format version of unsigned transaction sets.
pub const UNSIGNED_SET_VERSION: u32 = 1;

/// Format version of signed transaction sets.
pub const SIGNED_SET_VERSION: u32 = 1;

/// Progress after importing signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Every transaction carries valid signatures.
    Complete,
    /// More signers are needed.
    Partial { have: usize, need: usize },
}

/// A way of getting pending spends signed.
pub trait SigningStrategy {
    /// Prepare `pending` for signing. Returns the payload to hand to an
    /// external signer, or `None` when signing already completed in place.
    fn export_for_signing(&mut self, pending: &mut [PendingSpend])
        -> Result<Option<String>, TxError>;

    /// Adopt signatures from an external signer's `payload`.
    fn import_signed(
        &mut self,
        pending: &mut [PendingSpend],
        payload: &str,
    ) -> Result<SignatureStatus, TxError>;
}

// ─── Local ──────────────────────────────────────────────────────────────────

/// Signs in process with the wallet's own spend key.
#[derive(Clone)]
pub struct LocalSigner {
    crypto: Arc<dyn TxCrypto>,
}

impl LocalSigner {
    pub fn new(crypto: Arc<dyn TxCrypto>) -> Self {
        Self { crypto }
    }
}

impl SigningStrategy for LocalSigner {
    fn export_for_signing(
        &mut self,
        pending: &mut [PendingSpend],
    ) -> Result<Option<String>, TxError> {
        check_pending(self.crypto.as_ref(), pending)?;
        for ptx in pending.iter_mut() {
            sign_inputs(self.crypto.as_ref(), ptx)?;
            verify_inputs(self.crypto.as_ref(), ptx)?;
            debug!("signed tx {} locally", ptx.tx_hash().short());
        }
        Ok(None)
    }

    fn import_signed(
        &mut self,
        _pending: &mut [PendingSpend],
        _payload: &str,
    ) -> Result<SignatureStatus, TxError> {
        Err(TxError::Signing("local signing has no external payload".into()))
    }
}

// ─── Cold ───────────────────────────────────────────────────────────────────

/// Transactions exported to an offline signer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsignedTxSet {
    pub version: u32,
    pub txs: Vec<PendingSpend>,
}

/// One transaction returned by the offline signer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTx {
    pub prefix_hash: Hash32,
    pub tx: Transaction,
}

/// Transactions returned by the offline signer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTxSet {
    pub version: u32,
    pub txs: Vec<SignedTx>,
}

/// Hot-wallet side of cold signing.
#[derive(Clone)]
pub struct ColdSigner {
    /// Used only to verify the returned signatures.
    crypto: Arc<dyn TxCrypto>,
}

impl ColdSigner {
    pub fn new(crypto: Arc<dyn TxCrypto>) -> Self {
        Self { crypto }
    }
}

impl SigningStrategy for ColdSigner {
    fn export_for_signing(
        &mut self,
        pending: &mut [PendingSpend],
    ) -> Result<Option<String>, TxError> {
        check_pending(self.crypto.as_ref(), pending)?;
        let set = UnsignedTxSet {
            version: UNSIGNED_SET_VERSION,
            txs: pending.to_vec(),
        };
        info!("exporting {} transaction(s) for cold signing", set.txs.len());
        Ok(Some(serde_json::to_string(&set)?))
    }

    fn import_signed(
        &mut self,
        pending: &mut [PendingSpend],
        payload: &str,
    ) -> Result<SignatureStatus, TxError> {
        let set: SignedTxSet = serde_json::from_str(payload)
            .map_err(|e| TxError::Parse(format!("signed tx set: {}", e)))?;
        if set.version != SIGNED_SET_VERSION {
            return Err(TxError::Parse(format!(
                "unsupported signed set version: expected {}, got {}",
                SIGNED_SET_VERSION, set.version
            )));
        }
        if set.txs.len() != pending.len() {
            return Err(TxError::Invalid(format!(
                "signed set holds {} transactions, expected {}",
                set.txs.len(),
                pending.len()
            )));
        }

        // Check everything before touching any pending spend.
        for (i, (ptx, signed)) in pending.iter().zip(&set.txs).enumerate() {
            check_signed_matches(ptx, &signed.tx)
                .map_err(|e| TxError::Invalid(format!("signed tx {}: {}", i, e)))?;
            if signed.prefix_hash != ptx.tx.prefix_hash() {
                return Err(TxError::Invalid(format!("signed tx {}: prefix hash mismatch", i)));
            }
            let mut candidate = ptx.clone();
            candidate.tx.prunable.signatures = signed.tx.prunable.signatures.clone();
            verify_inputs(self.crypto.as_ref(), &candidate)?;
        }

        for (ptx, signed) in pending.iter_mut().zip(set.txs) {
            ptx.tx.prunable.signatures = signed.tx.prunable.signatures;
        }
        info!("imported signatures for {} transaction(s)", pending.len());
        Ok(SignatureStatus::Complete)
    }
}

/// Everything but the signatures must be exactly what was built here.
fn check_signed_matches(ptx: &PendingSpend, signed: &Transaction) -> Result<(), String> {
    if signed.prefix != ptx.tx.prefix {
        return Err("prefix differs from the transaction built".into());
    }
    if signed.rct != ptx.tx.rct {
        return Err("amounts or commitments differ".into());
    }
    if signed.prunable.range_proof != ptx.tx.prunable.range_proof {
        return Err("range proof differs".into());
    }
    for (i, (input, source)) in signed
        .prefix
        .inputs
        .iter()
        .zip(&ptx.construction.sources)
        .enumerate()
    {
        if relative_to_absolute(&input.key_offsets) != Some(source.global_indices()) {
            return Err(format!("ring of input {} differs from construction data", i));
        }
    }
    Ok(())
}

/// Device side of cold signing: check and sign an exported set.
pub fn sign_unsigned_set(crypto: &dyn TxCrypto, payload: &str) -> Result<String, TxError> {
    let set: UnsignedTxSet = serde_json::from_str(payload)
        .map_err(|e| TxError::Parse(format!("unsigned tx set: {}", e)))?;
    if set.version != UNSIGNED_SET_VERSION {
        return Err(TxError::Parse(format!(
            "unsupported unsigned set version: expected {}, got {}",
            UNSIGNED_SET_VERSION, set.version
        )));
    }

    check_pending(crypto, &set.txs)?;
    let mut signed = Vec::with_capacity(set.txs.len());
    for mut ptx in set.txs {
        sign_inputs(crypto, &mut ptx)?;
        signed.push(SignedTx {
            prefix_hash: ptx.tx.prefix_hash(),
            tx: ptx.tx,
        });
    }

    Ok(serde_json::to_string(&SignedTxSet {
        version: SIGNED_SET_VERSION,
        txs: signed,
    })?)
}

/// Re-derive every output from the tx key and its claimed destination.
pub fn check_outputs(crypto: &dyn TxCrypto, ptx: &PendingSpend) -> Result<(), TxError> {
    let c = &ptx.construction;
    if ptx.tx.tx_pub_key() != Some(crypto.tx_public_key(&ptx.tx_key)) {
        return Err(TxError::Invalid("tx public key does not match the tx key".into()));
    }
    for (i, (output, dest)) in ptx.tx.prefix.outputs.iter().zip(&c.outputs).enumerate() {
        let derived = crypto.derive_output(&ptx.tx_key, &dest.address, i as u32, dest.amount);
        if derived.key != output.key {
            return Err(TxError::Invalid(format!(
                "output {} does not pay its stated destination",
                i
            )));
        }
        if let Some(rct) = &ptx.tx.rct {
            let commitment = crypto.commit(dest.amount, &derived.mask);
            if rct.out_commitments.get(i) != Some(&commitment) {
                return Err(TxError::Invalid(format!(
                    "output {} commitment does not match its amount",
                    i
                )));
            }
        }
    }
    Ok(())
}

/// Check pending spends from an untrusted source before signing them:
/// construction data must be consistent and every output must pay what its
/// destination claims.
pub fn check_pending(crypto: &dyn TxCrypto, pending: &[PendingSpend]) -> Result<(), TxError> {
    for (i, ptx) in pending.iter().enumerate() {
        ptx.verify()
            .map_err(|errors| TxError::Invalid(format!("tx {}: {}", i, errors.join("; "))))?;
        check_outputs(crypto, ptx).map_err(|e| match e {
            TxError::Invalid(msg) => TxError::Invalid(format!("tx {}: {}", i, msg)),
            other => other,
        })?;
    }
    Ok(())
}

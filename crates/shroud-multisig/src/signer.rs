use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, warn};
use shroud_tx::{
    check_pending, verify_inputs, PendingSpend, SignatureStatus, SigningStrategy, TxCrypto, TxError,
};

use crate::crypto::MultisigCrypto;
use crate::tx_set::{MultisigTxSet, TxPartials};

/// Coordinating participant of an M-of-N group.
///
/// Holds the collected partials between rounds. Signatures are only written
/// into the pending spends once `threshold` signers have contributed and the
/// combined signatures verify.
pub struct MultisigSigner {
    crypto: Arc<dyn MultisigCrypto>,
    /// Verifies combined signatures.
    tx_crypto: Arc<dyn TxCrypto>,
    threshold: usize,
    set: Option<MultisigTxSet>,
}

impl MultisigSigner {
    pub fn new(crypto: Arc<dyn MultisigCrypto>, tx_crypto: Arc<dyn TxCrypto>, threshold: usize) -> Self {
        Self {
            crypto,
            tx_crypto,
            threshold: threshold.max(1),
            set: None,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Signers whose partials have been collected so far.
    pub fn signers(&self) -> usize {
        self.set.as_ref().map_or(0, |s| s.signers.len())
    }

    /// Current set, for handing to the next cosigner.
    pub fn payload(&self) -> Result<Option<String>, TxError> {
        self.set.as_ref().map(MultisigTxSet::to_json).transpose()
    }

    fn status(&self) -> SignatureStatus {
        let have = self.signers();
        if have >= self.threshold {
            SignatureStatus::Complete
        } else {
            SignatureStatus::Partial {
                have,
                need: self.threshold,
            }
        }
    }

    /// Combine the collected partials and write signatures into `pending`.
    fn finalize(&self, set: &MultisigTxSet, pending: &mut [PendingSpend]) -> Result<(), TxError> {
        let mut signed = Vec::with_capacity(pending.len());
        for (ptx, partials) in pending.iter().zip(&set.partials) {
            let mut candidate = ptx.clone();
            candidate.tx.prunable.signatures = combine_tx(self.crypto.as_ref(), ptx, partials)?;
            verify_inputs(self.tx_crypto.as_ref(), &candidate)?;
            signed.push(candidate.tx.prunable.signatures);
        }
        for (ptx, signatures) in pending.iter_mut().zip(signed) {
            ptx.tx.prunable.signatures = signatures;
        }
        Ok(())
    }
}

impl SigningStrategy for MultisigSigner {
    fn export_for_signing(
        &mut self,
        pending: &mut [PendingSpend],
    ) -> Result<Option<String>, TxError> {
        check_pending(self.tx_crypto.as_ref(), pending)?;
        let mut set = MultisigTxSet::new(pending.to_vec());
        add_own_partials(self.crypto.as_ref(), &mut set)?;
        info!(
            "multisig export: {} transaction(s), {}/{} signers",
            set.txs.len(),
            set.signers.len(),
            self.threshold
        );

        if set.signers.len() >= self.threshold {
            self.finalize(&set, pending)?;
            self.set = Some(set);
            return Ok(None);
        }
        let payload = set.to_json()?;
        self.set = Some(set);
        Ok(Some(payload))
    }

    fn import_signed(
        &mut self,
        pending: &mut [PendingSpend],
        payload: &str,
    ) -> Result<SignatureStatus, TxError> {
        let current = self
            .set
            .as_ref()
            .ok_or_else(|| TxError::Signing("nothing exported for multisig signing".into()))?;
        let incoming = MultisigTxSet::from_json(payload)?;
        if current.txs.len() != pending.len() || incoming.txs.len() != pending.len() {
            return Err(TxError::Invalid(format!(
                "{} transactions given, {} exported, {} in the multisig set",
                pending.len(),
                current.txs.len(),
                incoming.txs.len()
            )));
        }
        for (i, ((ours, exported), theirs)) in pending
            .iter()
            .zip(&current.txs)
            .zip(&incoming.txs)
            .enumerate()
        {
            let prefix_hash = ours.tx.prefix_hash();
            if exported.tx.prefix_hash() != prefix_hash {
                return Err(TxError::Invalid(format!("tx {}: not the transaction exported", i)));
            }
            if theirs.tx.prefix_hash() != prefix_hash {
                return Err(TxError::Invalid(format!("tx {}: prefix differs from ours", i)));
            }
        }

        // Verify every new partial before merging any of them.
        let mut merged = current.clone();
        for (t, (ptx, theirs)) in pending.iter().zip(&incoming.partials).enumerate() {
            let message = ptx.tx.signing_hash();
            let proof = ptx.construction.proof;
            let inputs = theirs
                .inputs
                .iter()
                .zip(&ptx.construction.sources)
                .zip(&ptx.tx.prefix.inputs);
            for (i, ((input_partials, source), input)) in inputs.enumerate() {
                let key_image = &input.key_image;
                for (&signer, partial) in input_partials {
                    if merged.partials[t].inputs[i].contains_key(&signer) {
                        continue;
                    }
                    if !self
                        .crypto
                        .verify_partial(signer, proof, &message, source, key_image, partial)
                    {
                        warn!("rejecting multisig set: bad partial from signer {}", signer);
                        return Err(TxError::Signing(format!(
                            "partial from signer {} for tx {} input {} does not verify",
                            signer, t, i
                        )));
                    }
                    merged.partials[t].inputs[i].insert(signer, partial.clone());
                }
            }
        }
        merged.signers = merged.complete_signers();
        debug!("multisig import: {} signer(s) now", merged.signers.len());

        if merged.signers.len() >= self.threshold {
            self.finalize(&merged, pending)?;
            info!("multisig signatures complete for {} transaction(s)", pending.len());
        }
        self.set = Some(merged);
        Ok(self.status())
    }
}

fn add_own_partials(crypto: &dyn MultisigCrypto, set: &mut MultisigTxSet) -> Result<(), TxError> {
    let me = crypto.signer_index();
    for (ptx, partials) in set.txs.iter().zip(set.partials.iter_mut()) {
        let message = ptx.tx.signing_hash();
        for (i, (input, source)) in ptx
            .tx
            .prefix
            .inputs
            .iter()
            .zip(&ptx.construction.sources)
            .enumerate()
        {
            let partial = crypto.partial_sign(ptx.construction.proof, &message, source, &input.key_image)?;
            partials.inputs[i].insert(me, partial);
        }
    }
    set.signers = set.complete_signers();
    Ok(())
}

fn combine_tx(
    crypto: &dyn MultisigCrypto,
    ptx: &PendingSpend,
    partials: &TxPartials,
) -> Result<Vec<shroud_tx::types::InputSignature>, TxError> {
    let message = ptx.tx.signing_hash();
    let empty = BTreeMap::new();
    ptx.tx
        .prefix
        .inputs
        .iter()
        .zip(&ptx.construction.sources)
        .enumerate()
        .map(|(i, (input, source))| {
            let pseudo_mask = ptx
                .construction
                .pseudo_masks
                .get(i)
                .copied()
                .unwrap_or_default();
            crypto.combine(
                ptx.construction.proof,
                &message,
                source,
                &input.key_image,
                &pseudo_mask,
                partials.inputs.get(i).unwrap_or(&empty),
            )
        })
        .collect()
}

/// Cosigner side: check a set, add this participant's partials and return
/// the updated set. `tx_crypto` re-derives the outputs so nothing is signed
/// that pays anyone but the stated destinations.
pub fn cosign(
    crypto: &dyn MultisigCrypto,
    tx_crypto: &dyn TxCrypto,
    payload: &str,
) -> Result<String, TxError> {
    let mut set = MultisigTxSet::from_json(payload)?;
    check_pending(tx_crypto, &set.txs)?;
    for (i, ptx) in set.txs.iter().enumerate() {
        if ptx.is_signed() {
            return Err(TxError::Invalid(format!("tx {} is already signed", i)));
        }
    }
    if set.signers.contains(&crypto.signer_index()) {
        return Err(TxError::Signing(format!(
            "signer {} has already signed this set",
            crypto.signer_index()
        )));
    }
    add_own_partials(crypto, &mut set)?;
    info!(
        "cosigned {} transaction(s) as signer {}",
        set.txs.len(),
        crypto.signer_index()
    );
    set.to_json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::group;
    use shroud_tx::testing::{sample_pending, TestCrypto};

    const SEND: u64 = 1_000_000_000_000;

    fn setup(threshold: usize) -> (TestCrypto, Vec<crate::testing::TestMultisig>, MultisigSigner) {
        let account = TestCrypto::new(40);
        let members = group(&account, threshold, 3);
        let signer = MultisigSigner::new(
            Arc::new(members[0].clone()),
            Arc::new(account.clone()),
            threshold,
        );
        (account, members, signer)
    }

    #[test]
    fn test_two_of_three_completes_after_one_cosigner() {
        let (account, members, mut signer) = setup(2);
        let mut pending = vec![sample_pending(&account, &[4_000_000_000_000], SEND)];
        let unsigned_hash = pending[0].tx.prefix_hash();

        let payload = signer.export_for_signing(&mut pending).unwrap().unwrap();
        assert!(!pending[0].is_signed());
        assert_eq!(signer.signers(), 1);

        let cosigned = cosign(&members[2], &account, &payload).unwrap();
        let status = signer.import_signed(&mut pending, &cosigned).unwrap();
        assert_eq!(status, SignatureStatus::Complete);
        assert!(pending[0].is_signed());
        assert_eq!(pending[0].tx.prefix_hash(), unsigned_hash);
        verify_inputs(&account, &pending[0]).unwrap();
    }

    #[test]
    fn test_three_of_three_reports_partial() {
        let (account, members, mut signer) = setup(3);
        let mut pending = vec![sample_pending(&account, &[4_000_000_000_000, 1_000_000_000_000], SEND)];

        let payload = signer.export_for_signing(&mut pending).unwrap().unwrap();
        let second = cosign(&members[1], &account, &payload).unwrap();
        let status = signer.import_signed(&mut pending, &second).unwrap();
        assert_eq!(status, SignatureStatus::Partial { have: 2, need: 3 });
        assert!(!pending[0].is_signed());

        let third = cosign(&members[2], &account, &second).unwrap();
        let status = signer.import_signed(&mut pending, &third).unwrap();
        assert_eq!(status, SignatureStatus::Complete);
        assert!(pending[0].is_signed());
    }

    #[test]
    fn test_cosigner_cannot_sign_twice() {
        let (account, members, mut signer) = setup(2);
        let mut pending = vec![sample_pending(&account, &[4_000_000_000_000], SEND)];
        let payload = signer.export_for_signing(&mut pending).unwrap().unwrap();
        assert!(matches!(cosign(&members[0], &account, &payload), Err(TxError::Signing(_))));
    }

    #[test]
    fn test_forged_partial_rejected_without_state_change() {
        let (account, members, mut signer) = setup(2);
        let mut pending = vec![sample_pending(&account, &[4_000_000_000_000], SEND)];
        let payload = signer.export_for_signing(&mut pending).unwrap().unwrap();

        let cosigned = cosign(&members[1], &account, &payload).unwrap();
        let mut forged = MultisigTxSet::from_json(&cosigned).unwrap();
        if let Some(partial) = forged.partials[0].inputs[0].get_mut(&1) {
            partial.0[0] ^= 0xff;
        }
        let result = signer.import_signed(&mut pending, &forged.to_json().unwrap());
        assert!(matches!(result, Err(TxError::Signing(_))));
        assert_eq!(signer.signers(), 1);
        assert!(!pending[0].is_signed());
    }

    #[test]
    fn test_import_rejects_other_transactions() {
        let (account, members, mut signer) = setup(2);
        let mut pending = vec![sample_pending(&account, &[4_000_000_000_000], SEND)];
        signer.export_for_signing(&mut pending).unwrap();

        let mut other = vec![sample_pending(&account, &[4_000_000_000_000], SEND + 1)];
        let mut other_signer = MultisigSigner::new(
            Arc::new(members[1].clone()),
            Arc::new(account.clone()),
            2,
        );
        let foreign = other_signer.export_for_signing(&mut other).unwrap().unwrap();
        let result = signer.import_signed(&mut pending, &foreign);
        assert!(matches!(result, Err(TxError::Invalid(_))));
    }

    #[test]
    fn test_cosigner_rejects_redirected_destination() {
        let (account, members, mut signer) = setup(2);
        let mut pending = vec![sample_pending(&account, &[4_000_000_000_000], SEND)];
        let payload = signer.export_for_signing(&mut pending).unwrap().unwrap();

        // Point both the stated destination and its output at someone else.
        let thief = TestCrypto::new(666).primary();
        let mut set = MultisigTxSet::from_json(&payload).unwrap();
        let c = &mut set.txs[0].construction;
        let paid = c.destinations[0];
        c.destinations[0].address = thief;
        for out in c.outputs.iter_mut().filter(|o| **o == paid) {
            out.address = thief;
        }
        let redirected = set.to_json().unwrap();
        assert!(matches!(
            cosign(&members[2], &account, &redirected),
            Err(TxError::Invalid(_))
        ));

        // Inflating the stated amount alone breaks the link to the outputs.
        let mut set = MultisigTxSet::from_json(&payload).unwrap();
        set.txs[0].construction.destinations[0].amount = u64::MAX;
        let inflated = set.to_json().unwrap();
        assert!(matches!(
            cosign(&members[2], &account, &inflated),
            Err(TxError::Invalid(_))
        ));
    }

    #[test]
    fn test_import_rejects_pending_other_than_exported() {
        let (account, members, mut signer) = setup(2);
        let mut pending = vec![sample_pending(&account, &[4_000_000_000_000], SEND)];
        let payload = signer.export_for_signing(&mut pending).unwrap().unwrap();
        let cosigned = cosign(&members[1], &account, &payload).unwrap();

        let mut two = vec![pending[0].clone(), sample_pending(&account, &[4_000_000_000_000], SEND + 1)];
        assert!(matches!(
            signer.import_signed(&mut two, &cosigned),
            Err(TxError::Invalid(_))
        ));
        let mut other = vec![sample_pending(&account, &[4_000_000_000_000], SEND + 1)];
        assert!(matches!(
            signer.import_signed(&mut other, &cosigned),
            Err(TxError::Invalid(_))
        ));
        assert_eq!(signer.signers(), 1);

        let status = signer.import_signed(&mut pending, &cosigned).unwrap();
        assert_eq!(status, SignatureStatus::Complete);
    }

    #[test]
    fn test_threshold_of_one_signs_during_export() {
        let (account, _members, mut signer) = setup(1);
        let mut pending = vec![sample_pending(&account, &[4_000_000_000_000], SEND)];
        assert!(signer.export_for_signing(&mut pending).unwrap().is_none());
        assert!(pending[0].is_signed());
    }
}

//! Keccak-based multisig participants for tests.
//!
//! Every participant shares one [`TestCrypto`] account standing in for the
//! aggregated group key; partials are hashes bound to the signer index.

use std::collections::BTreeMap;

use shroud_tx::crypto::AccountCrypto;
use shroud_tx::testing::TestCrypto;
use shroud_tx::types::InputSignature;
use shroud_tx::{ProofType, SourceEntry, TxCrypto, TxError};
use shroud_types::{keccak256_parts, Hash32, KeyImage};

use crate::crypto::MultisigCrypto;
use crate::tx_set::PartialSignature;

#[derive(Debug, Clone)]
pub struct TestMultisig {
    index: u32,
    threshold: usize,
    account: TestCrypto,
}

/// `count` participants of a `threshold`-of-`count` group over `account`.
pub fn group(account: &TestCrypto, threshold: usize, count: u32) -> Vec<TestMultisig> {
    (0..count)
        .map(|index| TestMultisig {
            index,
            threshold,
            account: account.clone(),
        })
        .collect()
}

impl TestMultisig {
    fn partial_for(&self, signer: u32, message: &Hash32, key_image: &KeyImage) -> PartialSignature {
        let group_key = self.account.primary().spend_public;
        let digest = keccak256_parts(&[
            b"partial",
            &signer.to_le_bytes(),
            message.as_bytes(),
            key_image.as_bytes(),
            group_key.as_bytes(),
        ]);
        PartialSignature(digest.0.to_vec())
    }
}

impl MultisigCrypto for TestMultisig {
    fn signer_index(&self) -> u32 {
        self.index
    }

    fn partial_sign(
        &self,
        _proof: ProofType,
        message: &Hash32,
        source: &SourceEntry,
        key_image: &KeyImage,
    ) -> Result<PartialSignature, TxError> {
        let expected = self.account.key_image(&source.real_output_key, &source.real_tx_pub_key, 0);
        if expected.as_ref() != Some(key_image) {
            return Err(TxError::Signing("input is not owned by the group".into()));
        }
        Ok(self.partial_for(self.index, message, key_image))
    }

    fn verify_partial(
        &self,
        signer: u32,
        _proof: ProofType,
        message: &Hash32,
        _source: &SourceEntry,
        key_image: &KeyImage,
        partial: &PartialSignature,
    ) -> bool {
        self.partial_for(signer, message, key_image) == *partial
    }

    fn combine(
        &self,
        proof: ProofType,
        message: &Hash32,
        source: &SourceEntry,
        key_image: &KeyImage,
        pseudo_mask: &Hash32,
        partials: &BTreeMap<u32, PartialSignature>,
    ) -> Result<InputSignature, TxError> {
        let valid = partials
            .iter()
            .filter(|&(&signer, partial)| self.partial_for(signer, message, key_image) == *partial)
            .count();
        if valid < self.threshold {
            return Err(TxError::Signing(format!(
                "{} valid partials, {} needed",
                valid, self.threshold
            )));
        }
        self.account.sign_input(proof, message, source, key_image, pseudo_mask)
    }
}

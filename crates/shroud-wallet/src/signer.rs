//! Signing strategy selection.
//!
//! A wallet signs in one of three ways, chosen when the wallet is opened:
//! in process, on an offline device, or by an M-of-N multisig group.

use std::sync::Arc;

use shroud_multisig::{MultisigCrypto, MultisigSigner};
use shroud_tx::{ColdSigner, LocalSigner, PendingSpend, SignatureStatus, SigningStrategy, TxCrypto, TxError};

pub enum Signer {
    Local(LocalSigner),
    Cold(ColdSigner),
    Multisig(MultisigSigner),
}

impl Signer {
    pub fn local(crypto: Arc<dyn TxCrypto>) -> Self {
        Signer::Local(LocalSigner::new(crypto))
    }

    /// `crypto` only verifies the signatures coming back from the device.
    pub fn cold(crypto: Arc<dyn TxCrypto>) -> Self {
        Signer::Cold(ColdSigner::new(crypto))
    }

    pub fn multisig(
        crypto: Arc<dyn MultisigCrypto>,
        tx_crypto: Arc<dyn TxCrypto>,
        threshold: usize,
    ) -> Self {
        Signer::Multisig(MultisigSigner::new(crypto, tx_crypto, threshold))
    }

    fn strategy(&mut self) -> &mut dyn SigningStrategy {
        match self {
            Signer::Local(s) => s,
            Signer::Cold(s) => s,
            Signer::Multisig(s) => s,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Signer::Local(_) => "local",
            Signer::Cold(_) => "cold",
            Signer::Multisig(_) => "multisig",
        }
    }
}

impl SigningStrategy for Signer {
    fn export_for_signing(
        &mut self,
        pending: &mut [PendingSpend],
    ) -> Result<Option<String>, TxError> {
        self.strategy().export_for_signing(pending)
    }

    fn import_signed(
        &mut self,
        pending: &mut [PendingSpend],
        payload: &str,
    ) -> Result<SignatureStatus, TxError> {
        self.strategy().import_signed(pending, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_multisig::cosign;
    use shroud_multisig::testing::group;
    use shroud_tx::sign::sign_unsigned_set;
    use shroud_tx::testing::{sample_pending, TestCrypto};

    const SEND: u64 = 1_000_000_000_000;

    #[test]
    fn test_local_signs_in_place() {
        let crypto = TestCrypto::new(7);
        let mut pending = vec![sample_pending(&crypto, &[5 * SEND], SEND)];
        let mut signer = Signer::local(Arc::new(crypto));
        assert_eq!(signer.kind(), "local");
        assert_eq!(signer.export_for_signing(&mut pending).unwrap(), None);
        assert!(pending[0].is_signed());
        assert!(signer.import_signed(&mut pending, "{}").is_err());
    }

    #[test]
    fn test_cold_round_trip() {
        let crypto = TestCrypto::new(7);
        let mut pending = vec![sample_pending(&crypto, &[5 * SEND], SEND)];
        let mut signer = Signer::cold(Arc::new(crypto.clone()));

        let payload = signer.export_for_signing(&mut pending).unwrap().unwrap();
        assert!(!pending[0].is_signed());
        let signed = sign_unsigned_set(&crypto, &payload).unwrap();
        assert_eq!(
            signer.import_signed(&mut pending, &signed).unwrap(),
            SignatureStatus::Complete
        );
        assert!(pending[0].is_signed());
    }

    #[test]
    fn test_multisig_needs_threshold() {
        let account = TestCrypto::new(40);
        let members = group(&account, 2, 3);
        let mut pending = vec![sample_pending(&account, &[5 * SEND], SEND)];
        let mut signer =
            Signer::multisig(Arc::new(members[0].clone()), Arc::new(account.clone()), 2);

        let payload = signer.export_for_signing(&mut pending).unwrap().unwrap();
        assert!(!pending[0].is_signed());
        let cosigned = cosign(&members[1], &account, &payload).unwrap();
        assert_eq!(
            signer.import_signed(&mut pending, &cosigned).unwrap(),
            SignatureStatus::Complete
        );
        assert!(pending[0].is_signed());
    }
}

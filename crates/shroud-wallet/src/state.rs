//! Everything the sync engine and wallet operations mutate.
//!
//! A [`WalletState`] is cloned before a batch of blocks is applied and the
//! clone replaces the original only when the whole batch succeeded.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use shroud_tx::{PendingSpend, Transaction, TxError};
use shroud_types::{KeyImage, TxHash};

use crate::chain::ChainHistory;
use crate::error::WalletError;
use crate::ledger::{DetachSummary, Ledger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnconfirmedState {
    /// In the pool, or not checked yet.
    Pending,
    /// Missing from chain and pool since `missing_since` (unix seconds).
    PendingNotInPool { missing_since: u64 },
    /// Missing for too long; the inputs were released.
    Failed,
}

/// An outgoing transaction submitted but not seen in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnconfirmedSpend {
    pub txid: TxHash,
    pub tx: Transaction,
    pub amount_in: u64,
    pub amount_out: u64,
    pub change: u64,
    pub fee: u64,
    /// Unix seconds at submission.
    pub timestamp: u64,
    /// Ring used by each key image.
    pub rings: Vec<(KeyImage, Vec<u64>)>,
    pub selected_transfers: Vec<usize>,
    pub subaddr_account: u32,
    pub state: UnconfirmedState,
}

impl UnconfirmedSpend {
    pub fn from_pending(pending: &PendingSpend, timestamp: u64) -> Result<Self, TxError> {
        Ok(Self {
            txid: pending.tx_hash(),
            tx: pending.tx.clone(),
            amount_in: pending.amount_in()?,
            amount_out: pending.amount_out()?,
            change: pending.change_amount(),
            fee: pending.fee,
            timestamp,
            rings: pending.rings(),
            selected_transfers: pending.selected_transfers.clone(),
            subaddr_account: pending.construction.subaddr_account,
            state: UnconfirmedState::Pending,
        })
    }

    pub fn is_failed(&self) -> bool {
        self.state == UnconfirmedState::Failed
    }
}

/// An outgoing transaction found in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedSpend {
    pub txid: TxHash,
    pub amount_in: u64,
    pub amount_out: u64,
    pub change: u64,
    pub fee: u64,
    /// Block timestamp.
    pub timestamp: u64,
    pub rings: Vec<(KeyImage, Vec<u64>)>,
    pub height: u64,
}

/// An incoming output seen in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolPayment {
    pub txid: TxHash,
    pub output_index: u32,
    pub amount: u64,
    pub subaddress: (u32, u32),
    /// Unix seconds when first seen.
    pub seen_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletState {
    pub ledger: Ledger,
    pub chain: ChainHistory,
    #[serde(default)]
    pub unconfirmed: BTreeMap<TxHash, UnconfirmedSpend>,
    #[serde(default)]
    pub confirmed: BTreeMap<TxHash, ConfirmedSpend>,
    #[serde(default)]
    pub pool_payments: Vec<PoolPayment>,
    /// Pool transactions already fetched and scanned.
    #[serde(skip)]
    pub seen_pool: BTreeSet<TxHash>,
}

impl WalletState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every block at `height` and above along with what they did.
    pub fn detach(&mut self, height: u64) -> Result<DetachSummary, WalletError> {
        self.chain.crop(height)?;
        let summary = self.ledger.detach(height)?;
        self.confirmed.retain(|_, spend| spend.height < height);
        Ok(summary)
    }

    /// Unconfirmed spends still expected to confirm.
    pub fn live_unconfirmed(&self) -> impl Iterator<Item = &UnconfirmedSpend> {
        self.unconfirmed.values().filter(|u| !u.is_failed())
    }

    /// Ring used by an outgoing spend with `key_image`.
    pub fn ring_for(&self, key_image: &KeyImage) -> Option<Vec<u64>> {
        let find = |rings: &[(KeyImage, Vec<u64>)]| {
            rings
                .iter()
                .find(|(ki, _)| ki == key_image)
                .map(|(_, ring)| ring.clone())
        };
        self.unconfirmed
            .values()
            .find_map(|u| find(&u.rings))
            .or_else(|| self.confirmed.values().find_map(|c| find(&c.rings)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_types::Hash32;

    use crate::ledger::TransferRecord;

    fn state_with_blocks(n: u64) -> WalletState {
        let mut state = WalletState::new();
        for h in 0..n {
            state.chain.push(Hash32([h as u8 + 1; 32]));
        }
        state
    }

    #[test]
    fn test_detach_drops_confirmed_spends() {
        let mut state = state_with_blocks(10);
        let mut record = TransferRecord::new(Hash32([1; 32]), 0, 4);
        record.amount = 50;
        state.ledger.record_output(record).unwrap();
        state.ledger.mark_spent(0, 8).unwrap();
        for (txid, height) in [(Hash32([7; 32]), 6), (Hash32([8; 32]), 8)] {
            state.confirmed.insert(
                txid,
                ConfirmedSpend {
                    txid,
                    amount_in: 50,
                    amount_out: 40,
                    change: 0,
                    fee: 10,
                    timestamp: 0,
                    rings: vec![(Hash32([9; 32]), vec![1, 2, 3])],
                    height,
                },
            );
        }

        state.detach(7).unwrap();
        assert_eq!(state.chain.size(), 7);
        assert!(!state.ledger.get(0).unwrap().is_spent());
        assert_eq!(state.confirmed.len(), 1);
        assert!(state.confirmed.contains_key(&Hash32([7; 32])));
        assert_eq!(state.ring_for(&Hash32([9; 32])), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_detach_below_trim_fails() {
        let mut state = state_with_blocks(10);
        state.chain.trim(5);
        assert!(matches!(state.detach(3), Err(WalletError::Consistency(_))));
    }

    #[test]
    fn test_snapshot_roundtrip_skips_seen_pool() {
        let mut state = state_with_blocks(3);
        state.seen_pool.insert(Hash32([5; 32]));
        let json = serde_json::to_string(&state).unwrap();
        let back: WalletState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.chain, state.chain);
        assert!(back.seen_pool.is_empty());
    }
}

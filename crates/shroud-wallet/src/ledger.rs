//! Owned-output ledger.
//!
//! Records live in an append-only arena; lookups go through indexes that are
//! rebuilt on load. Every change made while applying a block is logged per
//! height so a reorg can detach blocks by replaying the log backwards.

use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use shroud_types::consensus::{is_unlock_time_reached, meets_spendable_age, MINED_MONEY_UNLOCK_WINDOW};
use shroud_types::{Hash32, KeyImage, PublicKey, TxHash};

use crate::error::WalletError;

/// An output owned by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub block_height: u64,
    pub txid: TxHash,
    pub internal_output_index: u32,
    pub global_output_index: u64,
    pub amount: u64,
    pub mask: Hash32,
    pub output_key: PublicKey,
    pub tx_pub_key: PublicKey,
    pub key_image: Option<KeyImage>,
    /// Key image is only partially known (multisig, pending peers).
    #[serde(default)]
    pub key_image_partial: bool,
    spent: bool,
    spent_height: u64,
    #[serde(default)]
    pub frozen: bool,
    /// `(major, minor)` subaddress that received the output.
    pub subaddress: (u32, u32),
    pub rct: bool,
    pub unlock_time: u64,
    pub coinbase: bool,
    /// `(height, txid)` of scanned transactions using this output in a ring.
    #[serde(default)]
    pub uses: Vec<(u64, TxHash)>,
}

impl TransferRecord {
    /// An unspent record for output `internal_output_index` of `txid`.
    pub fn new(txid: TxHash, internal_output_index: u32, block_height: u64) -> Self {
        Self {
            block_height,
            txid,
            internal_output_index,
            global_output_index: 0,
            amount: 0,
            mask: Hash32::ZERO,
            output_key: Hash32::ZERO,
            tx_pub_key: Hash32::ZERO,
            key_image: None,
            key_image_partial: false,
            spent: false,
            spent_height: 0,
            frozen: false,
            subaddress: (0, 0),
            rct: true,
            unlock_time: 0,
            coinbase: false,
            uses: Vec::new(),
        }
    }

    pub fn is_spent(&self) -> bool {
        self.spent
    }

    /// Height of the spending block; zero while the spend is unconfirmed.
    pub fn spent_height(&self) -> u64 {
        self.spent_height
    }

    /// Key image usable for spending.
    pub fn spendable_key_image(&self) -> Option<KeyImage> {
        self.key_image.filter(|_| !self.key_image_partial)
    }

    /// Whether the output may be spent with the chain at `chain_size` blocks.
    pub fn is_unlocked(&self, chain_size: u64, now: u64, spendable_age: u64) -> bool {
        if !meets_spendable_age(self.block_height, chain_size, spendable_age) {
            return false;
        }
        if self.coinbase && !meets_spendable_age(self.block_height, chain_size, MINED_MONEY_UNLOCK_WINDOW) {
            return false;
        }
        is_unlock_time_reached(self.unlock_time, chain_size, now)
    }
}

/// A reversible change made while applying a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum UndoOp {
    /// A record was appended at `index`.
    Received { index: usize },
    /// The record at `index` was marked spent.
    Spent { index: usize },
    /// A use was appended to the record at `index`.
    Used { index: usize },
}

/// Counts of what a detach reverted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetachSummary {
    pub removed: usize,
    pub unspent: usize,
    pub uses: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerData {
    transfers: Vec<TransferRecord>,
    #[serde(default)]
    undo: BTreeMap<u64, Vec<UndoOp>>,
}

/// Arena of owned outputs with lookup indexes and a per-height undo log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "LedgerData", into = "LedgerData")]
pub struct Ledger {
    transfers: Vec<TransferRecord>,
    undo: BTreeMap<u64, Vec<UndoOp>>,
    by_key_image: HashMap<KeyImage, usize>,
    by_output: HashMap<(TxHash, u32), usize>,
    by_global_index: HashMap<u64, usize>,
}

impl From<LedgerData> for Ledger {
    fn from(data: LedgerData) -> Self {
        let mut ledger = Ledger {
            transfers: data.transfers,
            undo: data.undo,
            ..Ledger::default()
        };
        ledger.rebuild_indexes();
        ledger
    }
}

impl From<Ledger> for LedgerData {
    fn from(ledger: Ledger) -> Self {
        LedgerData {
            transfers: ledger.transfers,
            undo: ledger.undo,
        }
    }
}

impl PartialEq for Ledger {
    fn eq(&self, other: &Self) -> bool {
        self.transfers == other.transfers
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TransferRecord> {
        self.transfers.get(index)
    }

    pub fn transfers(&self) -> &[TransferRecord] {
        &self.transfers
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &TransferRecord)> {
        self.transfers.iter().enumerate()
    }

    fn record_mut(&mut self, index: usize) -> Result<&mut TransferRecord, WalletError> {
        self.transfers
            .get_mut(index)
            .ok_or_else(|| WalletError::MalformedInput(format!("no transfer at index {}", index)))
    }

    fn log(&mut self, height: u64, op: UndoOp) {
        self.undo.entry(height).or_default().push(op);
    }

    fn rebuild_indexes(&mut self) {
        self.by_key_image.clear();
        self.by_output.clear();
        self.by_global_index.clear();
        for (i, t) in self.transfers.iter().enumerate() {
            if let Some(ki) = t.key_image {
                self.by_key_image.insert(ki, i);
            }
            self.by_output.insert((t.txid, t.internal_output_index), i);
            self.by_global_index.insert(t.global_output_index, i);
        }
    }

    /// Append a record found in the block at `record.block_height`.
    ///
    /// Returns `None` when a record with the same key image already exists;
    /// the duplicate is not recorded.
    pub fn record_output(&mut self, record: TransferRecord) -> Result<Option<usize>, WalletError> {
        let key = (record.txid, record.internal_output_index);
        if self.by_output.contains_key(&key) {
            return Err(WalletError::Consistency(format!(
                "output {}:{} recorded twice",
                record.txid, record.internal_output_index
            )));
        }
        if let Some(ki) = record.key_image {
            if let Some(&existing) = self.by_key_image.get(&ki) {
                warn!(
                    "output {}:{} reuses key image {} of transfer {}; ignored",
                    record.txid,
                    record.internal_output_index,
                    ki.short(),
                    existing
                );
                return Ok(None);
            }
        }

        let index = self.transfers.len();
        if let Some(ki) = record.key_image {
            self.by_key_image.insert(ki, index);
        }
        self.by_output.insert(key, index);
        self.by_global_index.insert(record.global_output_index, index);
        let height = record.block_height;
        debug!(
            "received {} at height {} (transfer {})",
            record.amount, height, index
        );
        self.transfers.push(record);
        self.log(height, UndoOp::Received { index });
        Ok(Some(index))
    }

    /// Mark a record spent by the block at `height`.
    pub fn mark_spent(&mut self, index: usize, height: u64) -> Result<(), WalletError> {
        let record = self.record_mut(index)?;
        if record.spent && record.spent_height != 0 {
            return Err(WalletError::Consistency(format!(
                "transfer {} already spent at height {}",
                index, record.spent_height
            )));
        }
        record.spent = true;
        record.spent_height = height;
        self.log(height, UndoOp::Spent { index });
        Ok(())
    }

    /// Mark a record spent by a transaction that is not in a block yet.
    pub fn mark_spent_pending(&mut self, index: usize) -> Result<(), WalletError> {
        let record = self.record_mut(index)?;
        if !record.spent {
            record.spent = true;
            record.spent_height = 0;
        }
        Ok(())
    }

    pub fn mark_unspent(&mut self, index: usize) -> Result<(), WalletError> {
        let record = self.record_mut(index)?;
        record.spent = false;
        record.spent_height = 0;
        Ok(())
    }

    pub fn freeze(&mut self, index: usize) -> Result<(), WalletError> {
        self.record_mut(index)?.frozen = true;
        Ok(())
    }

    pub fn thaw(&mut self, index: usize) -> Result<(), WalletError> {
        self.record_mut(index)?.frozen = false;
        Ok(())
    }

    pub fn is_frozen(&self, index: usize) -> Result<bool, WalletError> {
        self.transfers
            .get(index)
            .map(|t| t.frozen)
            .ok_or_else(|| WalletError::MalformedInput(format!("no transfer at index {}", index)))
    }

    pub fn find_by_key_image(&self, key_image: &KeyImage) -> Option<usize> {
        self.by_key_image.get(key_image).copied()
    }

    pub fn find_by_output(&self, txid: &TxHash, internal_output_index: u32) -> Option<usize> {
        self.by_output.get(&(*txid, internal_output_index)).copied()
    }

    pub fn find_by_global_index(&self, global_index: u64) -> Option<usize> {
        self.by_global_index.get(&global_index).copied()
    }

    /// Note that the record appeared in a ring of `txid` at `height`.
    pub fn add_use(&mut self, index: usize, height: u64, txid: TxHash) -> Result<(), WalletError> {
        self.record_mut(index)?.uses.push((height, txid));
        self.log(height, UndoOp::Used { index });
        Ok(())
    }

    /// Set the key image of a record, for imported or completed images.
    pub fn set_key_image(
        &mut self,
        index: usize,
        key_image: KeyImage,
        partial: bool,
    ) -> Result<(), WalletError> {
        if let Some(&other) = self.by_key_image.get(&key_image) {
            if other != index {
                return Err(WalletError::MalformedInput(format!(
                    "key image {} already belongs to transfer {}",
                    key_image.short(),
                    other
                )));
            }
        }
        let record = self.record_mut(index)?;
        let previous = record.key_image.replace(key_image);
        record.key_image_partial = partial;
        if let Some(old) = previous.filter(|old| *old != key_image) {
            self.by_key_image.remove(&old);
        }
        self.by_key_image.insert(key_image, index);
        Ok(())
    }

    /// Revert every logged change made at `height` or above.
    pub fn detach(&mut self, height: u64) -> Result<DetachSummary, WalletError> {
        let detached = self.undo.split_off(&height);
        let mut summary = DetachSummary::default();
        for op in detached.into_values().rev().flat_map(|ops| ops.into_iter().rev()) {
            match op {
                UndoOp::Received { index } => {
                    if index + 1 != self.transfers.len() {
                        return Err(WalletError::Consistency(format!(
                            "undo log out of order: transfer {} is not the newest",
                            index
                        )));
                    }
                    if let Some(record) = self.transfers.pop() {
                        if let Some(ki) = record.key_image {
                            self.by_key_image.remove(&ki);
                        }
                        self.by_output.remove(&(record.txid, record.internal_output_index));
                        self.by_global_index.remove(&record.global_output_index);
                    }
                    summary.removed += 1;
                }
                UndoOp::Spent { index } => {
                    self.mark_unspent(index)?;
                    summary.unspent += 1;
                }
                UndoOp::Used { index } => {
                    self.record_mut(index)?.uses.pop();
                    summary.uses += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Drop undo entries below `height`; blocks there can no longer detach.
    pub fn forget_undo_below(&mut self, height: u64) {
        self.undo = self.undo.split_off(&height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tx: u8, idx: u32, height: u64, amount: u64, gi: u64) -> TransferRecord {
        let mut r = TransferRecord::new(Hash32([tx; 32]), idx, height);
        r.amount = amount;
        r.global_output_index = gi;
        let mut ki = [tx.wrapping_add(100); 32];
        ki[1] = idx as u8;
        r.key_image = Some(Hash32(ki));
        r
    }

    #[test]
    fn test_record_and_lookup() {
        let mut ledger = Ledger::new();
        let i = ledger.record_output(record(1, 0, 10, 500, 70)).unwrap().unwrap();
        let j = ledger.record_output(record(1, 1, 10, 600, 71)).unwrap().unwrap();
        assert_eq!((i, j), (0, 1));
        assert_eq!(ledger.find_by_output(&Hash32([1; 32]), 1), Some(1));
        assert_eq!(ledger.find_by_global_index(70), Some(0));
        let ki = ledger.get(1).unwrap().key_image.unwrap();
        assert_eq!(ledger.find_by_key_image(&ki), Some(1));
    }

    #[test]
    fn test_duplicate_output_is_inconsistent() {
        let mut ledger = Ledger::new();
        ledger.record_output(record(1, 0, 10, 500, 70)).unwrap();
        assert!(matches!(
            ledger.record_output(record(1, 0, 10, 500, 70)),
            Err(WalletError::Consistency(_))
        ));
    }

    #[test]
    fn test_duplicate_key_image_is_ignored() {
        let mut ledger = Ledger::new();
        ledger.record_output(record(1, 0, 10, 500, 70)).unwrap();
        let mut dup = record(2, 0, 11, 900, 80);
        dup.key_image = ledger.get(0).unwrap().key_image;
        assert_eq!(ledger.record_output(dup).unwrap(), None);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_spent_flag_and_height_move_together() {
        let mut ledger = Ledger::new();
        ledger.record_output(record(1, 0, 10, 500, 70)).unwrap();
        ledger.mark_spent(0, 20).unwrap();
        let r = ledger.get(0).unwrap();
        assert!(r.is_spent());
        assert_eq!(r.spent_height(), 20);
        assert!(matches!(ledger.mark_spent(0, 21), Err(WalletError::Consistency(_))));

        ledger.mark_unspent(0).unwrap();
        let r = ledger.get(0).unwrap();
        assert!(!r.is_spent());
        assert_eq!(r.spent_height(), 0);
    }

    #[test]
    fn test_pending_spend_then_confirmation() {
        let mut ledger = Ledger::new();
        ledger.record_output(record(1, 0, 10, 500, 70)).unwrap();
        ledger.mark_spent_pending(0).unwrap();
        assert!(ledger.get(0).unwrap().is_spent());
        assert_eq!(ledger.get(0).unwrap().spent_height(), 0);
        ledger.mark_spent(0, 15).unwrap();
        assert_eq!(ledger.get(0).unwrap().spent_height(), 15);
    }

    #[test]
    fn test_detach_reverts_in_reverse() {
        let mut ledger = Ledger::new();
        ledger.record_output(record(1, 0, 10, 500, 70)).unwrap();
        let before = ledger.clone();

        ledger.record_output(record(2, 0, 12, 300, 90)).unwrap();
        ledger.mark_spent(0, 12).unwrap();
        ledger.add_use(0, 12, Hash32([9; 32])).unwrap();
        ledger.record_output(record(3, 0, 13, 100, 95)).unwrap();

        let summary = ledger.detach(12).unwrap();
        assert_eq!(summary, DetachSummary { removed: 2, unspent: 1, uses: 1 });
        assert_eq!(ledger, before);
        assert_eq!(ledger.find_by_global_index(90), None);
        assert_eq!(ledger.find_by_output(&Hash32([3; 32]), 0), None);
        assert!(ledger.get(0).unwrap().uses.is_empty());

        // Nothing left to revert at that height.
        assert_eq!(ledger.detach(12).unwrap(), DetachSummary::default());
    }

    #[test]
    fn test_freeze_survives_detach() {
        let mut ledger = Ledger::new();
        ledger.record_output(record(1, 0, 10, 500, 70)).unwrap();
        ledger.freeze(0).unwrap();
        ledger.detach(11).unwrap();
        assert!(ledger.is_frozen(0).unwrap());
        ledger.thaw(0).unwrap();
        assert!(!ledger.is_frozen(0).unwrap());
        assert!(ledger.freeze(5).is_err());
    }

    #[test]
    fn test_set_key_image_reindexes() {
        let mut ledger = Ledger::new();
        let mut r = record(1, 0, 10, 500, 70);
        r.key_image = None;
        ledger.record_output(r).unwrap();
        ledger.record_output(record(2, 0, 10, 500, 71)).unwrap();

        let ki = Hash32([0x55; 32]);
        ledger.set_key_image(0, ki, true).unwrap();
        assert_eq!(ledger.find_by_key_image(&ki), Some(0));
        assert_eq!(ledger.get(0).unwrap().spendable_key_image(), None);
        ledger.set_key_image(0, ki, false).unwrap();
        assert_eq!(ledger.get(0).unwrap().spendable_key_image(), Some(ki));

        let taken = ledger.get(1).unwrap().key_image.unwrap();
        assert!(matches!(
            ledger.set_key_image(0, taken, false),
            Err(WalletError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_serde_rebuilds_indexes() {
        let mut ledger = Ledger::new();
        ledger.record_output(record(1, 0, 10, 500, 70)).unwrap();
        ledger.record_output(record(2, 3, 11, 700, 77)).unwrap();
        ledger.mark_spent(0, 11).unwrap();

        let json = serde_json::to_string(&ledger).unwrap();
        let mut back: Ledger = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ledger);
        assert_eq!(back.find_by_output(&Hash32([2; 32]), 3), Some(1));
        assert_eq!(back.find_by_global_index(77), Some(1));

        // The undo log survives too.
        back.detach(11).unwrap();
        assert_eq!(back.len(), 1);
        assert!(!back.get(0).unwrap().is_spent());
    }

    #[test]
    fn test_unlock_rules() {
        let mut r = record(1, 0, 100, 5, 1);
        assert!(!r.is_unlocked(109, 0, 10));
        assert!(r.is_unlocked(110, 0, 10));

        r.coinbase = true;
        assert!(!r.is_unlocked(110, 0, 10));
        assert!(r.is_unlocked(160, 0, 10));

        r.coinbase = false;
        r.unlock_time = 200;
        assert!(!r.is_unlocked(150, 0, 10));
        assert!(r.is_unlocked(200, 0, 10));

        r.unlock_time = 1_700_000_000;
        assert!(!r.is_unlocked(200, 1_600_000_000, 10));
        assert!(r.is_unlocked(200, 1_700_000_000, 10));
    }
}

//! Chain history: the block hashes the wallet has synchronized.
//!
//! Entries below `offset` have been trimmed away; the genesis hash is kept
//! separately so the history can still anchor a daemon request.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use shroud_types::BlockHash;

use crate::error::WalletError;

/// Hashes one by one from the tip before spacing grows exponentially.
const SHORT_HISTORY_LINEAR: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHistory {
    offset: u64,
    genesis: Option<BlockHash>,
    blocks: VecDeque<BlockHash>,
}

impl ChainHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Height of the next block, trimmed entries included.
    pub fn size(&self) -> u64 {
        self.offset + self.blocks.len() as u64
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of hashes held locally.
    pub fn local_len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// First hash ever pushed.
    pub fn genesis(&self) -> Option<BlockHash> {
        self.genesis
    }

    /// Hash at `height`, if held locally.
    pub fn get(&self, height: u64) -> Option<&BlockHash> {
        let local = height.checked_sub(self.offset)?;
        self.blocks.get(usize::try_from(local).ok()?)
    }

    /// Height and hash of the tip.
    pub fn top(&self) -> Option<(u64, BlockHash)> {
        self.blocks.back().map(|h| (self.size() - 1, *h))
    }

    pub fn push(&mut self, hash: BlockHash) {
        if self.size() == 0 {
            self.genesis = Some(hash);
        }
        self.blocks.push_back(hash);
    }

    /// Drop every block at or above `height`.
    pub fn crop(&mut self, height: u64) -> Result<(), WalletError> {
        if height >= self.size() {
            return Ok(());
        }
        if height < self.offset || (height == self.offset && self.offset > 0) {
            return Err(WalletError::Consistency(format!(
                "cannot detach at height {}: history trimmed up to {}",
                height, self.offset
            )));
        }
        self.blocks.truncate((height - self.offset) as usize);
        if self.size() == 0 {
            self.genesis = None;
        }
        Ok(())
    }

    /// Forget local hashes below `height`, always keeping the tip.
    ///
    /// Returns the number of hashes dropped.
    pub fn trim(&mut self, height: u64) -> usize {
        let wanted = height.saturating_sub(self.offset) as usize;
        let count = wanted.min(self.blocks.len().saturating_sub(1));
        self.blocks.drain(..count);
        self.offset += count as u64;
        count
    }

    /// Put back the hash just below the trimmed region.
    pub fn refill(&mut self, hash: BlockHash) -> Result<(), WalletError> {
        if self.offset == 0 {
            return Err(WalletError::Consistency("nothing trimmed to refill".into()));
        }
        self.offset -= 1;
        if self.offset == 0 && self.genesis != Some(hash) {
            self.offset = 1;
            return Err(WalletError::Consistency("refill hash differs from genesis".into()));
        }
        self.blocks.push_front(hash);
        Ok(())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Sparse list of known hashes, newest first, for locating the common
    /// ancestor with a daemon.
    ///
    /// The last ten blocks are listed one by one, then with doubling gaps,
    /// then the oldest local block, then genesis when the history is trimmed.
    pub fn short_history(&self) -> Vec<BlockHash> {
        let sz = self.blocks.len();
        let mut ids = Vec::new();
        if sz == 0 {
            ids.extend(self.genesis);
            return ids;
        }

        let mut back = 1usize;
        let mut step = 1usize;
        let mut i = 0usize;
        while back < sz {
            ids.push(self.blocks[sz - back]);
            if i < SHORT_HISTORY_LINEAR {
                back += 1;
            } else {
                step *= 2;
                back += step;
            }
            i += 1;
        }
        ids.push(self.blocks[0]);
        if self.offset > 0 {
            ids.extend(self.genesis);
        }
        ids
    }
}

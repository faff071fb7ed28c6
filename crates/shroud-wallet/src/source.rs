//! The chain source seam.
//!
//! The wallet reads the chain and submits transactions only through
//! [`ChainSource`]. [`crate::daemon_source::DaemonSource`] implements it over
//! the daemon RPC; tests drive the engine with an in-memory chain.

use std::future::Future;

use serde::{Deserialize, Serialize};
use shroud_tx::{RingMember, Transaction};
use shroud_types::{BlockHash, KeyImage, TxHash};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be reached or is busy; retry later.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// The source refused a request, such as a submitted transaction.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The source answered with something that cannot be used.
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[cfg(feature = "transport")]
impl From<shroud_rpc::RpcError> for SourceError {
    fn from(e: shroud_rpc::RpcError) -> Self {
        use shroud_rpc::RpcError;

        if e.is_transient() {
            return SourceError::Unavailable(e.to_string());
        }
        match e {
            RpcError::Json(_) | RpcError::NoResult { .. } => SourceError::Malformed(e.to_string()),
            RpcError::Rpc { .. } | RpcError::Status { .. } => SourceError::Rejected(e.to_string()),
            other => SourceError::Unavailable(other.to_string()),
        }
    }
}

/// A transaction as found in a block or the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTx {
    pub hash: TxHash,
    pub tx: Transaction,
    /// Global index of each output; empty for pool transactions.
    #[serde(default)]
    pub output_indices: Vec<u64>,
    #[serde(default)]
    pub coinbase: bool,
}

/// One block with its transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub height: u64,
    pub hash: BlockHash,
    pub prev_hash: BlockHash,
    pub timestamp: u64,
    pub miner_tx: ChainTx,
    pub txs: Vec<ChainTx>,
}

/// Block hashes from the common ancestor onwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashesResponse {
    /// Height of `hashes[0]`, the newest block both sides agree on.
    pub start_height: u64,
    pub hashes: Vec<BlockHash>,
    /// Chain size on the source.
    pub current_height: u64,
}

/// Blocks from the common ancestor onwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocksResponse {
    /// Height of `blocks[0]`, the newest block both sides agree on.
    pub start_height: u64,
    pub blocks: Vec<BlockEntry>,
    /// Chain size on the source.
    pub current_height: u64,
}

/// Cumulative RingCT output counts per block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDistribution {
    pub start_height: u64,
    /// `offsets[i]` counts RingCT outputs up to and including block
    /// `start_height + i`.
    pub offsets: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpentStatus {
    Unspent,
    InChain,
    InPool,
}

impl SpentStatus {
    pub fn is_spent(&self) -> bool {
        !matches!(self, SpentStatus::Unspent)
    }
}

/// Per-byte fee quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeQuote {
    pub fee: u64,
    pub quantization_mask: u64,
    /// Per-priority fees, lowest first, when the source provides them.
    pub fees: Vec<u64>,
}

/// Read access to a chain and a way to submit transactions.
///
/// `short_history` is newest first, as produced by
/// [`crate::chain::ChainHistory::short_history`]. The source answers from
/// the newest hash it knows, or from `start_height` when it knows none.
pub trait ChainSource: Send + Sync {
    fn get_hashes(
        &self,
        short_history: &[BlockHash],
        start_height: u64,
    ) -> impl Future<Output = Result<HashesResponse, SourceError>> + Send;

    /// At most `max` blocks, starting at the common ancestor.
    fn get_blocks(
        &self,
        short_history: &[BlockHash],
        start_height: u64,
        max: u64,
    ) -> impl Future<Output = Result<BlocksResponse, SourceError>> + Send;

    fn get_pool_hashes(&self) -> impl Future<Output = Result<Vec<TxHash>, SourceError>> + Send;

    /// Bodies of pool transactions; hashes no longer in the pool are left out.
    fn get_pool_txs(
        &self,
        hashes: &[TxHash],
    ) -> impl Future<Output = Result<Vec<ChainTx>, SourceError>> + Send;

    fn get_output_distribution(
        &self,
    ) -> impl Future<Output = Result<OutputDistribution, SourceError>> + Send;

    /// Keys and commitments of the outputs at `indices`, in order.
    fn get_outs(
        &self,
        indices: &[u64],
    ) -> impl Future<Output = Result<Vec<RingMember>, SourceError>> + Send;

    fn key_images_spent(
        &self,
        images: &[KeyImage],
    ) -> impl Future<Output = Result<Vec<SpentStatus>, SourceError>> + Send;

    fn submit_transaction(
        &self,
        tx: &Transaction,
    ) -> impl Future<Output = Result<(), SourceError>> + Send;

    fn fee_estimate(&self) -> impl Future<Output = Result<FeeQuote, SourceError>> + Send;

    /// Fork version in force for the next block.
    fn fork_version(&self) -> impl Future<Output = Result<u8, SourceError>> + Send;
}

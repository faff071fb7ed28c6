//! In-memory chain for driving the wallet engine.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use shroud_tx::testing::TestCrypto;
use shroud_tx::types::{RctBase, TX_EXTRA_TAG_PUBKEY, TX_VERSION_RCT};
use shroud_tx::{AccountAddress, RingMember, Transaction, TxCrypto, TxOutput, TxPrefix};
use shroud_types::consensus::{COIN, MINED_MONEY_UNLOCK_WINDOW};
use shroud_types::{keccak256_parts, BlockHash, Hash32, KeyImage, Network, TxHash};
use shroud_wallet::{
    BlockEntry, BlocksResponse, ChainSource, ChainTx, FeeQuote, HashesResponse,
    OutputDistribution, SourceError, SpentStatus, WalletConfig,
};

/// Block timestamp of height 0.
pub const GENESIS_TIME: u64 = 1_700_000_000;
pub const BLOCK_TIME: u64 = 120;
pub const MINER_REWARD: u64 = 600 * COIN;

struct ChainData {
    blocks: Vec<BlockEntry>,
    /// Every output by global index.
    outputs: Vec<RingMember>,
    pool: Vec<ChainTx>,
    /// Distinguishes the blocks of competing branches.
    branch: u64,
    tx_counter: u64,
    fork_version: u8,
    fee: FeeQuote,
    /// Calls to fail with `Unavailable` before answering again.
    failures: u32,
    /// Added to every `get_blocks` answer.
    delay: Duration,
    submitted: Vec<TxHash>,
}

/// A shared in-memory chain. Clones see the same blocks.
#[derive(Clone)]
pub struct MockChain {
    data: Arc<Mutex<ChainData>>,
    miner: TestCrypto,
}

impl MockChain {
    /// A chain holding `blocks` empty blocks.
    pub fn new(blocks: u64) -> Self {
        let chain = Self {
            data: Arc::new(Mutex::new(ChainData {
                blocks: Vec::new(),
                outputs: Vec::new(),
                pool: Vec::new(),
                branch: 0,
                tx_counter: 0,
                fork_version: 16,
                fee: FeeQuote {
                    fee: 20_000,
                    quantization_mask: 10_000,
                    fees: Vec::new(),
                },
                failures: 0,
                delay: Duration::ZERO,
                submitted: Vec::new(),
            })),
            miner: TestCrypto::new(0x6d696e6572),
        };
        chain.mine_empty(blocks);
        chain
    }

    fn data(&self) -> MutexGuard<'_, ChainData> {
        self.data.lock().expect("chain lock poisoned")
    }

    pub fn height(&self) -> u64 {
        self.data().blocks.len() as u64
    }

    pub fn block_hash(&self, height: u64) -> BlockHash {
        self.data().blocks[height as usize].hash
    }

    pub fn pool_len(&self) -> usize {
        self.data().pool.len()
    }

    pub fn submitted(&self) -> Vec<TxHash> {
        self.data().submitted.clone()
    }

    pub fn fail_next(&self, calls: u32) {
        self.data().failures = calls;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.data().delay = delay;
    }

    pub fn set_fee(&self, fee: u64) {
        self.data().fee.fee = fee;
    }

    /// A transaction paying `amounts` to `to`, funded from outside the chain.
    pub fn funding_tx(&self, to: &AccountAddress, amounts: &[u64]) -> Transaction {
        let counter = {
            let mut data = self.data();
            data.tx_counter += 1;
            data.tx_counter
        };
        let tx_key = keccak256_parts(&[b"funding-key", &counter.to_le_bytes()]);
        let derived: Vec<_> = amounts
            .iter()
            .enumerate()
            .map(|(i, &a)| self.miner.derive_output(&tx_key, to, i as u32, a))
            .collect();
        Transaction {
            prefix: TxPrefix {
                version: TX_VERSION_RCT,
                unlock_time: 0,
                inputs: Vec::new(),
                outputs: derived
                    .iter()
                    .map(|d| TxOutput { amount: 0, key: d.key, view_tag: Some(d.view_tag) })
                    .collect(),
                extra: tx_extra(&self.miner.tx_public_key(&tx_key)),
            },
            rct: Some(RctBase {
                rct_type: 6,
                fee: 0,
                encrypted_amounts: derived.iter().map(|d| d.encrypted_amount).collect(),
                out_commitments: amounts
                    .iter()
                    .zip(&derived)
                    .map(|(&a, d)| self.miner.commit(a, &d.mask))
                    .collect(),
                pseudo_outs: Vec::new(),
            }),
            prunable: Default::default(),
        }
    }

    fn miner_tx(&self, height: u64, branch: u64) -> Transaction {
        let tx_key = keccak256_parts(&[b"miner-key", &height.to_le_bytes(), &branch.to_le_bytes()]);
        let address = self.miner.primary();
        let outputs = (0..2u32)
            .map(|i| {
                let d = self.miner.derive_output(&tx_key, &address, i, MINER_REWARD / 2);
                TxOutput { amount: MINER_REWARD / 2, key: d.key, view_tag: Some(d.view_tag) }
            })
            .collect();
        Transaction {
            prefix: TxPrefix {
                version: TX_VERSION_RCT,
                unlock_time: height + MINED_MONEY_UNLOCK_WINDOW,
                inputs: Vec::new(),
                outputs,
                extra: tx_extra(&self.miner.tx_public_key(&tx_key)),
            },
            rct: None,
            prunable: Default::default(),
        }
    }

    fn push_block(&self, data: &mut ChainData, txs: Vec<Transaction>) {
        let height = data.blocks.len() as u64;
        let prev_hash = data.blocks.last().map(|b| b.hash).unwrap_or(Hash32::ZERO);
        let hash = keccak256_parts(&[
            b"block",
            &height.to_le_bytes(),
            prev_hash.as_bytes(),
            &data.branch.to_le_bytes(),
        ]);
        let miner_tx = self.miner_tx(height, data.branch);
        let miner_tx = index_outputs(&self.miner, data, miner_tx, true);
        let txs = txs
            .into_iter()
            .map(|tx| index_outputs(&self.miner, data, tx, false))
            .collect();
        data.blocks.push(BlockEntry {
            height,
            hash,
            prev_hash,
            timestamp: GENESIS_TIME + height * BLOCK_TIME,
            miner_tx,
            txs,
        });
    }

    pub fn mine(&self, txs: Vec<Transaction>) -> u64 {
        let mut data = self.data();
        let mined: HashSet<TxHash> = txs.iter().map(Transaction::hash).collect();
        data.pool.retain(|p| !mined.contains(&p.hash));
        self.push_block(&mut data, txs);
        data.blocks.len() as u64 - 1
    }

    pub fn mine_empty(&self, count: u64) {
        let mut data = self.data();
        for _ in 0..count {
            self.push_block(&mut data, Vec::new());
        }
    }

    /// Mine every pool transaction into one block.
    pub fn mine_pool(&self) -> u64 {
        let mut data = self.data();
        let txs = std::mem::take(&mut data.pool).into_iter().map(|p| p.tx).collect();
        self.push_block(&mut data, txs);
        data.blocks.len() as u64 - 1
    }

    /// Drop every block from `height` on; later blocks form a new branch.
    pub fn reorg(&self, height: u64) {
        let mut data = self.data();
        data.blocks.truncate(height as usize);
        data.branch += 1;
        let kept: u64 = data
            .blocks
            .iter()
            .flat_map(|b| std::iter::once(&b.miner_tx).chain(&b.txs))
            .map(|t| t.tx.prefix.outputs.len() as u64)
            .sum();
        data.outputs.truncate(kept as usize);
    }

    /// Remove a transaction from the pool without mining it.
    pub fn drop_from_pool(&self, txid: &TxHash) {
        self.data().pool.retain(|p| p.hash != *txid);
    }

    /// Put a transaction straight into the pool.
    pub fn add_to_pool(&self, tx: Transaction) -> TxHash {
        let hash = tx.hash();
        self.data().pool.push(ChainTx { hash, tx, output_indices: Vec::new(), coinbase: false });
        hash
    }

    fn take_failure(&self) -> Result<(), SourceError> {
        let mut data = self.data();
        if data.failures > 0 {
            data.failures -= 1;
            return Err(SourceError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    fn ancestor(data: &ChainData, short_history: &[BlockHash], start_height: u64) -> u64 {
        short_history
            .iter()
            .find_map(|h| data.blocks.iter().position(|b| b.hash == *h))
            .map_or(start_height, |p| p as u64)
    }

    fn chain_key_images(data: &ChainData) -> HashSet<KeyImage> {
        data.blocks
            .iter()
            .flat_map(|b| &b.txs)
            .flat_map(|t| t.tx.key_images())
            .collect()
    }
}

fn tx_extra(tx_pub: &Hash32) -> Vec<u8> {
    let mut extra = vec![TX_EXTRA_TAG_PUBKEY];
    extra.extend_from_slice(tx_pub.as_bytes());
    extra
}

fn index_outputs(crypto: &TestCrypto, data: &mut ChainData, tx: Transaction, coinbase: bool) -> ChainTx {
    let mut output_indices = Vec::with_capacity(tx.prefix.outputs.len());
    for (i, output) in tx.prefix.outputs.iter().enumerate() {
        let global_index = data.outputs.len() as u64;
        let commitment = match &tx.rct {
            Some(rct) => rct.out_commitments.get(i).copied().unwrap_or_default(),
            None => crypto.commit(output.amount, &Hash32::ZERO),
        };
        data.outputs.push(RingMember { global_index, key: output.key, commitment });
        output_indices.push(global_index);
    }
    ChainTx { hash: tx.hash(), tx, output_indices, coinbase }
}

impl ChainSource for MockChain {
    async fn get_hashes(&self, short_history: &[BlockHash], start_height: u64) -> Result<HashesResponse, SourceError> {
        self.take_failure()?;
        let data = self.data();
        let start = Self::ancestor(&data, short_history, start_height);
        Ok(HashesResponse {
            start_height: start,
            hashes: data.blocks.iter().skip(start as usize).map(|b| b.hash).collect(),
            current_height: data.blocks.len() as u64,
        })
    }

    async fn get_blocks(
        &self,
        short_history: &[BlockHash],
        start_height: u64,
        max: u64,
    ) -> Result<BlocksResponse, SourceError> {
        self.take_failure()?;
        let delay = self.data().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let data = self.data();
        let start = Self::ancestor(&data, short_history, start_height);
        Ok(BlocksResponse {
            start_height: start,
            blocks: data
                .blocks
                .iter()
                .skip(start as usize)
                .take(max as usize + 1)
                .cloned()
                .collect(),
            current_height: data.blocks.len() as u64,
        })
    }

    async fn get_pool_hashes(&self) -> Result<Vec<TxHash>, SourceError> {
        Ok(self.data().pool.iter().map(|p| p.hash).collect())
    }

    async fn get_pool_txs(&self, hashes: &[TxHash]) -> Result<Vec<ChainTx>, SourceError> {
        Ok(self
            .data()
            .pool
            .iter()
            .filter(|p| hashes.contains(&p.hash))
            .cloned()
            .collect())
    }

    async fn get_output_distribution(&self) -> Result<OutputDistribution, SourceError> {
        let data = self.data();
        let mut total = 0u64;
        let offsets = data
            .blocks
            .iter()
            .map(|b| {
                total += std::iter::once(&b.miner_tx)
                    .chain(&b.txs)
                    .map(|t| t.output_indices.len() as u64)
                    .sum::<u64>();
                total
            })
            .collect();
        Ok(OutputDistribution { start_height: 0, offsets })
    }

    async fn get_outs(&self, indices: &[u64]) -> Result<Vec<RingMember>, SourceError> {
        let data = self.data();
        indices
            .iter()
            .map(|&i| {
                data.outputs
                    .get(i as usize)
                    .copied()
                    .ok_or_else(|| SourceError::Malformed(format!("no output {}", i)))
            })
            .collect()
    }

    async fn key_images_spent(&self, images: &[KeyImage]) -> Result<Vec<SpentStatus>, SourceError> {
        let data = self.data();
        let in_chain = Self::chain_key_images(&data);
        let in_pool: HashSet<KeyImage> = data.pool.iter().flat_map(|p| p.tx.key_images()).collect();
        Ok(images
            .iter()
            .map(|ki| {
                if in_chain.contains(ki) {
                    SpentStatus::InChain
                } else if in_pool.contains(ki) {
                    SpentStatus::InPool
                } else {
                    SpentStatus::Unspent
                }
            })
            .collect())
    }

    async fn submit_transaction(&self, tx: &Transaction) -> Result<(), SourceError> {
        let mut data = self.data();
        let in_chain = Self::chain_key_images(&data);
        let in_pool: HashSet<KeyImage> = data.pool.iter().flat_map(|p| p.tx.key_images()).collect();
        if tx.key_images().iter().any(|ki| in_chain.contains(ki) || in_pool.contains(ki)) {
            return Err(SourceError::Rejected("double spend".into()));
        }
        let hash = tx.hash();
        data.pool.push(ChainTx { hash, tx: tx.clone(), output_indices: Vec::new(), coinbase: false });
        data.submitted.push(hash);
        Ok(())
    }

    async fn fee_estimate(&self) -> Result<FeeQuote, SourceError> {
        Ok(self.data().fee.clone())
    }

    async fn fork_version(&self) -> Result<u8, SourceError> {
        Ok(self.data().fork_version)
    }
}

/// Configuration for tests: testnet, default confirmations.
pub fn test_config() -> WalletConfig {
    WalletConfig {
        refresh_retries: 3,
        ..WalletConfig::for_network(Network::Testnet)
    }
}

/// A wall clock the test moves by hand.
#[derive(Clone, Default)]
pub struct TestClock(Arc<AtomicU64>);

impl TestClock {
    pub fn at(now: u64) -> Self {
        Self(Arc::new(AtomicU64::new(now)))
    }

    pub fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

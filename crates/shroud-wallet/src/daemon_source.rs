//! [`ChainSource`] over the daemon RPC.
//!
//! The daemon has no short-history endpoint, so the common ancestor is found
//! by looking up the short history hashes newest first until one is on the
//! main chain. Blocks come from `get_block` plus `/get_transactions` with
//! `decode_as_json`, whose transaction JSON is parsed here.

use log::{debug, warn};
use serde_json::Value;
use shroud_rpc::daemon::OutputRequest;
use shroud_rpc::{DaemonRpc, RpcConfig};
use shroud_tx::types::RctBase;
use shroud_tx::{RingMember, Transaction, TxInput, TxOutput, TxPrefix};
use shroud_types::{BlockHash, Hash32, KeyImage, TxHash};

use crate::source::{
    BlockEntry, BlocksResponse, ChainSource, ChainTx, FeeQuote, HashesResponse,
    OutputDistribution, SourceError, SpentStatus,
};

/// Hashes returned per `get_hashes` call.
const HASHES_PER_REQUEST: u64 = 1_000;

/// Blocks of grace asked for in fee estimates.
const FEE_GRACE_BLOCKS: u64 = 10;

pub struct DaemonSource {
    rpc: DaemonRpc,
}

impl DaemonSource {
    pub fn new(rpc: DaemonRpc) -> Self {
        Self { rpc }
    }

    pub fn connect(config: RpcConfig) -> Result<Self, SourceError> {
        Ok(Self::new(DaemonRpc::with_config(config)?))
    }

    pub fn rpc(&self) -> &DaemonRpc {
        &self.rpc
    }

    /// Height of the newest short history entry on the daemon's main chain.
    async fn common_ancestor(&self, short_history: &[BlockHash]) -> Result<Option<u64>, SourceError> {
        for hash in short_history {
            match self.rpc.get_block_header_by_hash(&hash.to_hex()).await {
                Ok(header) if !header.orphan_status => return Ok(Some(header.height)),
                Ok(_) => debug!("block {} is on a side chain", hash.short()),
                Err(e) if e.is_transient() => return Err(e.into()),
                Err(e) => debug!("block {} unknown to the daemon: {}", hash.short(), e),
            }
        }
        Ok(None)
    }

    /// First height to return: the common ancestor, or `start_height` when
    /// the history is empty or shares nothing with the daemon.
    async fn first_height(&self, short_history: &[BlockHash], start_height: u64) -> Result<u64, SourceError> {
        match self.common_ancestor(short_history).await? {
            Some(height) => Ok(height),
            None => {
                if !short_history.is_empty() {
                    warn!("no common block with the daemon, starting at {}", start_height);
                }
                Ok(start_height)
            }
        }
    }

    async fn fetch_txs(&self, hashes: &[String], coinbase_first: bool) -> Result<Vec<ChainTx>, SourceError> {
        let entries = self.rpc.get_transactions(hashes).await?;
        if entries.len() != hashes.len() {
            return Err(SourceError::Malformed(format!(
                "asked for {} transactions, got {}",
                hashes.len(),
                entries.len()
            )));
        }
        entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                let json = entry.as_json.ok_or_else(|| {
                    SourceError::Malformed(format!("transaction {} not decoded", entry.tx_hash))
                })?;
                let value: Value = serde_json::from_str(&json)
                    .map_err(|e| SourceError::Malformed(format!("tx {}: {}", entry.tx_hash, e)))?;
                Ok(ChainTx {
                    hash: parse_hash(&entry.tx_hash)?,
                    tx: parse_daemon_tx(&value)?,
                    output_indices: entry.output_indices,
                    coinbase: coinbase_first && i == 0,
                })
            })
            .collect()
    }
}

impl ChainSource for DaemonSource {
    async fn get_hashes(&self, short_history: &[BlockHash], start_height: u64) -> Result<HashesResponse, SourceError> {
        let current_height = self.rpc.get_height().await?;
        let first = self.first_height(short_history, start_height).await?;
        if first >= current_height {
            return Ok(HashesResponse { start_height: first, hashes: Vec::new(), current_height });
        }
        let last = (first + HASHES_PER_REQUEST).min(current_height) - 1;
        let headers = self.rpc.get_block_headers_range(first, last).await?;
        let hashes = headers
            .iter()
            .map(|h| parse_hash(&h.hash))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(HashesResponse { start_height: first, hashes, current_height })
    }

    async fn get_blocks(
        &self,
        short_history: &[BlockHash],
        start_height: u64,
        max: u64,
    ) -> Result<BlocksResponse, SourceError> {
        let current_height = self.rpc.get_height().await?;
        let first = self.first_height(short_history, start_height).await?;
        // One extra for the ancestor itself.
        let end = first.saturating_add(max.max(1)).saturating_add(1).min(current_height);

        let mut blocks = Vec::new();
        for height in first..end {
            let block = self.rpc.get_block(height).await?;
            let header = &block.block_header;
            let mut hashes = Vec::with_capacity(block.tx_hashes.len() + 1);
            let miner_hash = header
                .miner_tx_hash
                .clone()
                .unwrap_or_else(|| block.miner_tx_hash.clone());
            hashes.push(miner_hash);
            hashes.extend(block.tx_hashes.iter().cloned());

            let mut txs = self.fetch_txs(&hashes, true).await?.into_iter();
            let miner_tx = txs
                .next()
                .ok_or_else(|| SourceError::Malformed(format!("block {} has no miner tx", height)))?;
            blocks.push(BlockEntry {
                height: header.height,
                hash: parse_hash(&header.hash)?,
                prev_hash: parse_hash(&header.prev_hash)?,
                timestamp: header.timestamp,
                miner_tx,
                txs: txs.collect(),
            });
        }
        debug!("fetched blocks {}..{} of {}", first, end, current_height);
        Ok(BlocksResponse { start_height: first, blocks, current_height })
    }

    async fn get_pool_hashes(&self) -> Result<Vec<TxHash>, SourceError> {
        self.rpc
            .get_transaction_pool_hashes()
            .await?
            .iter()
            .map(|h| parse_hash(h))
            .collect()
    }

    async fn get_pool_txs(&self, hashes: &[TxHash]) -> Result<Vec<ChainTx>, SourceError> {
        let hex: Vec<String> = hashes.iter().map(Hash32::to_hex).collect();
        self.fetch_txs(&hex, false).await
    }

    async fn get_output_distribution(&self) -> Result<OutputDistribution, SourceError> {
        let dists = self.rpc.get_output_distribution(&[0], 0, 0, true).await?;
        let dist = dists
            .into_iter()
            .find(|d| d.amount == 0)
            .ok_or_else(|| SourceError::Malformed("no RingCT output distribution".into()))?;
        Ok(OutputDistribution {
            start_height: dist.start_height,
            offsets: dist.distribution,
        })
    }

    async fn get_outs(&self, indices: &[u64]) -> Result<Vec<RingMember>, SourceError> {
        let requests: Vec<OutputRequest> = indices
            .iter()
            .map(|&index| OutputRequest { amount: 0, index })
            .collect();
        let outs = self.rpc.get_outs(&requests, false).await?;
        if outs.len() != indices.len() {
            return Err(SourceError::Malformed(format!(
                "asked for {} outputs, got {}",
                indices.len(),
                outs.len()
            )));
        }
        indices
            .iter()
            .zip(outs)
            .map(|(&global_index, out)| {
                Ok(RingMember {
                    global_index,
                    key: parse_hash(&out.key)?,
                    commitment: parse_hash(&out.mask)?,
                })
            })
            .collect()
    }

    async fn key_images_spent(&self, images: &[KeyImage]) -> Result<Vec<SpentStatus>, SourceError> {
        let hex: Vec<String> = images.iter().map(Hash32::to_hex).collect();
        let result = self.rpc.is_key_image_spent(&hex).await?;
        result
            .spent_status
            .iter()
            .map(|s| match s {
                0 => Ok(SpentStatus::Unspent),
                1 => Ok(SpentStatus::InChain),
                2 => Ok(SpentStatus::InPool),
                other => Err(SourceError::Malformed(format!("unknown spent status {}", other))),
            })
            .collect()
    }

    async fn submit_transaction(&self, tx: &Transaction) -> Result<(), SourceError> {
        let result = self
            .rpc
            .send_raw_transaction(&hex::encode(tx.to_bytes()), false)
            .await?;
        if result.status != "OK" {
            return Err(SourceError::Rejected(result.rejection_reasons()));
        }
        Ok(())
    }

    async fn fee_estimate(&self) -> Result<FeeQuote, SourceError> {
        let estimate = self.rpc.get_fee_estimate(FEE_GRACE_BLOCKS).await?;
        Ok(FeeQuote {
            fee: estimate.fee,
            quantization_mask: estimate.quantization_mask,
            fees: estimate.fees,
        })
    }

    async fn fork_version(&self) -> Result<u8, SourceError> {
        Ok(self.rpc.hard_fork_info().await?.version)
    }
}

// ─── Daemon transaction JSON ────────────────────────────────────────────────

fn malformed(what: &str) -> SourceError {
    SourceError::Malformed(format!("daemon tx json: {}", what))
}

fn parse_hash(hex: &str) -> Result<Hash32, SourceError> {
    Hash32::from_hex(hex).map_err(|e| SourceError::Malformed(format!("bad hash {:?}: {}", hex, e)))
}

fn field_u64(value: &Value, key: &str) -> Result<u64, SourceError> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed(&format!("missing {}", key)))
}

fn parse_input(vin: &Value) -> Result<Option<TxInput>, SourceError> {
    if vin.get("gen").is_some() {
        return Ok(None);
    }
    let key = vin.get("key").ok_or_else(|| malformed("input is neither gen nor key"))?;
    let key_offsets = key
        .get("key_offsets")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing key_offsets"))?
        .iter()
        .map(|v| v.as_u64().ok_or_else(|| malformed("bad key offset")))
        .collect::<Result<Vec<_>, _>>()?;
    let key_image = key
        .get("k_image")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing k_image"))?;
    Ok(Some(TxInput {
        amount: field_u64(key, "amount")?,
        key_offsets,
        key_image: parse_hash(key_image)?,
    }))
}

fn parse_output(vout: &Value) -> Result<TxOutput, SourceError> {
    let target = vout.get("target").ok_or_else(|| malformed("output without target"))?;
    let (key, view_tag) = if let Some(tagged) = target.get("tagged_key") {
        let key = tagged
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("tagged output without key"))?;
        let tag = tagged
            .get("view_tag")
            .and_then(Value::as_str)
            .and_then(|s| hex::decode(s).ok())
            .and_then(|b| b.first().copied())
            .ok_or_else(|| malformed("bad view tag"))?;
        (key, Some(tag))
    } else {
        let key = target
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("output without key"))?;
        (key, None)
    };
    Ok(TxOutput {
        amount: field_u64(vout, "amount")?,
        key: parse_hash(key)?,
        view_tag,
    })
}

fn parse_rct(rct: &Value) -> Result<Option<RctBase>, SourceError> {
    let rct_type = field_u64(rct, "type")?;
    if rct_type == 0 {
        return Ok(None);
    }
    let encrypted_amounts = rct
        .get("ecdhInfo")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing ecdhInfo"))?
        .iter()
        .map(|e| {
            let bytes = e
                .get("amount")
                .and_then(Value::as_str)
                .and_then(|s| hex::decode(s).ok())
                .filter(|b| b.len() >= 8)
                .ok_or_else(|| malformed("bad encrypted amount"))?;
            let mut le = [0u8; 8];
            le.copy_from_slice(&bytes[..8]);
            Ok(u64::from_le_bytes(le))
        })
        .collect::<Result<Vec<_>, SourceError>>()?;
    let out_commitments = rct
        .get("outPk")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing outPk"))?
        .iter()
        .map(|v| v.as_str().ok_or_else(|| malformed("bad outPk")).and_then(parse_hash))
        .collect::<Result<Vec<_>, _>>()?;
    let pseudo_outs = rct
        .get("pseudoOuts")
        .and_then(Value::as_array)
        .map(|outs| {
            outs.iter()
                .map(|v| v.as_str().ok_or_else(|| malformed("bad pseudoOut")).and_then(parse_hash))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?
        .unwrap_or_default();
    Ok(Some(RctBase {
        rct_type: rct_type as u8,
        fee: rct.get("txnFee").and_then(Value::as_u64).unwrap_or(0),
        encrypted_amounts,
        out_commitments,
        pseudo_outs,
    }))
}

/// Parse a transaction as decoded by `/get_transactions`.
///
/// Signatures are not carried over; scanning does not need them.
pub fn parse_daemon_tx(json: &Value) -> Result<Transaction, SourceError> {
    let version = field_u64(json, "version")?;
    let inputs = json
        .get("vin")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing vin"))?
        .iter()
        .filter_map(|vin| parse_input(vin).transpose())
        .collect::<Result<Vec<_>, _>>()?;
    let outputs = json
        .get("vout")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing vout"))?
        .iter()
        .map(parse_output)
        .collect::<Result<Vec<_>, _>>()?;
    let extra = json
        .get("extra")
        .and_then(Value::as_array)
        .map(|bytes| {
            bytes
                .iter()
                .map(|b| {
                    b.as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or_else(|| malformed("bad extra byte"))
                })
                .collect::<Result<Vec<u8>, _>>()
        })
        .transpose()?
        .unwrap_or_default();
    let rct = match json.get("rct_signatures") {
        Some(rct) => parse_rct(rct)?,
        None => None,
    };

    Ok(Transaction {
        prefix: TxPrefix {
            version: u8::try_from(version).map_err(|_| malformed("version out of range"))?,
            unlock_time: field_u64(json, "unlock_time")?,
            inputs,
            outputs,
            extra,
        },
        rct,
        prunable: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hex32(b: u8) -> String {
        hex::encode([b; 32])
    }

    #[test]
    fn test_parse_coinbase() {
        let mut extra = vec![1u64];
        extra.extend(std::iter::repeat(7).take(32));
        let tx = json!({
            "version": 2,
            "unlock_time": 160,
            "vin": [{"gen": {"height": 100}}],
            "vout": [{"amount": 600, "target": {"tagged_key": {"key": hex32(3), "view_tag": "a5"}}}],
            "extra": extra,
            "rct_signatures": {"type": 0}
        });
        let parsed = parse_daemon_tx(&tx).unwrap();
        assert!(parsed.prefix.inputs.is_empty());
        assert_eq!(parsed.prefix.unlock_time, 160);
        assert_eq!(parsed.prefix.outputs[0].amount, 600);
        assert_eq!(parsed.prefix.outputs[0].view_tag, Some(0xa5));
        assert_eq!(parsed.tx_pub_key(), Some(Hash32([7; 32])));
        assert!(parsed.rct.is_none());
    }

    #[test]
    fn test_parse_rct_spend() {
        let tx = json!({
            "version": 2,
            "unlock_time": 0,
            "vin": [{"key": {"amount": 0, "key_offsets": [5, 3, 9], "k_image": hex32(9)}}],
            "vout": [
                {"amount": 0, "target": {"key": hex32(1)}},
                {"amount": 0, "target": {"key": hex32(2)}}
            ],
            "extra": [],
            "rct_signatures": {
                "type": 6,
                "txnFee": 30000,
                "ecdhInfo": [{"amount": "0100000000000000"}, {"amount": "0200000000000000"}],
                "outPk": [hex32(4), hex32(5)]
            }
        });
        let parsed = parse_daemon_tx(&tx).unwrap();
        assert_eq!(parsed.prefix.inputs[0].key_image, Hash32([9; 32]));
        assert_eq!(parsed.prefix.inputs[0].key_offsets, vec![5, 3, 9]);
        assert_eq!(parsed.fee(), 30000);
        let rct = parsed.rct.unwrap();
        assert_eq!(rct.encrypted_amounts, vec![1, 2]);
        assert_eq!(rct.out_commitments[1], Hash32([5; 32]));
    }

    #[test]
    fn test_parse_rejects_missing_key_image() {
        let tx = json!({
            "version": 2,
            "unlock_time": 0,
            "vin": [{"key": {"amount": 0, "key_offsets": [1]}}],
            "vout": [],
            "extra": []
        });
        assert!(matches!(parse_daemon_tx(&tx), Err(SourceError::Malformed(_))));
    }
}

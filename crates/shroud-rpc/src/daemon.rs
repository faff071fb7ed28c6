//! Daemon RPC client.
//!
//! Typed async methods for the daemon endpoints a wallet needs: chain
//! height and fork info, block headers and bodies, transactions and the
//! pool, ring-member lookups, the output distribution, key image status,
//! fee estimates and transaction submission.

use crate::client::{RpcClient, RpcConfig};
use crate::error::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Response Types
// =============================================================================

/// Block header from RPC.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    pub major_version: u8,
    #[serde(default)]
    pub minor_version: u8,
    pub timestamp: u64,
    pub prev_hash: String,
    pub height: u64,
    pub hash: String,
    #[serde(default)]
    pub num_txes: u64,
    #[serde(default)]
    pub miner_tx_hash: Option<String>,
    /// Set for blocks on a side chain.
    #[serde(default)]
    pub orphan_status: bool,
}

/// Full block response from `get_block`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockResult {
    pub block_header: BlockHeader,
    #[serde(default)]
    pub miner_tx_hash: String,
    #[serde(default)]
    pub tx_hashes: Vec<String>,
    /// Block JSON, including the decoded miner transaction.
    #[serde(default)]
    pub json: String,
    pub status: String,
}

/// Transaction entry from `/get_transactions`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionEntry {
    #[serde(default)]
    pub tx_hash: String,
    #[serde(default)]
    pub as_json: Option<String>,
    #[serde(default)]
    pub block_height: u64,
    #[serde(default)]
    pub block_timestamp: u64,
    #[serde(default)]
    pub in_pool: bool,
    #[serde(default)]
    pub double_spend_seen: bool,
    #[serde(default)]
    pub output_indices: Vec<u64>,
}

/// Output request for `/get_outs`.
#[derive(Debug, Clone, Serialize)]
pub struct OutputRequest {
    pub amount: u64,
    pub index: u64,
}

/// Output info from `/get_outs`.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputInfo {
    pub key: String,
    pub mask: String,
    pub unlocked: bool,
    pub height: u64,
    #[serde(default)]
    pub txid: Option<String>,
}

/// Output distribution entry.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputDistribution {
    pub amount: u64,
    #[serde(default)]
    pub start_height: u64,
    pub distribution: Vec<u64>,
    #[serde(default)]
    pub base: u64,
}

/// Fee estimate response.
#[derive(Debug, Clone, Deserialize)]
pub struct FeeEstimate {
    pub fee: u64,
    #[serde(default)]
    pub quantization_mask: u64,
    #[serde(default)]
    pub fees: Vec<u64>,
    pub status: String,
}

/// Key image spent status.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyImageSpentStatus {
    pub spent_status: Vec<u8>,
    pub status: String,
}

/// Send raw transaction response.
#[derive(Debug, Clone, Deserialize)]
pub struct SendRawTxResult {
    pub status: String,
    #[serde(default)]
    pub double_spend: bool,
    #[serde(default)]
    pub fee_too_low: bool,
    #[serde(default)]
    pub invalid_input: bool,
    #[serde(default)]
    pub invalid_output: bool,
    #[serde(default)]
    pub too_big: bool,
    #[serde(default)]
    pub overspend: bool,
    #[serde(default)]
    pub not_relayed: bool,
    #[serde(default)]
    pub sanity_check_failed: bool,
    #[serde(default)]
    pub reason: String,
}

impl SendRawTxResult {
    /// Comma-separated rejection flags, for error messages.
    pub fn rejection_reasons(&self) -> String {
        let flags = [
            (self.double_spend, "double spend"),
            (self.fee_too_low, "fee too low"),
            (self.invalid_input, "invalid input"),
            (self.invalid_output, "invalid output"),
            (self.too_big, "too big"),
            (self.overspend, "overspend"),
            (self.not_relayed, "not relayed"),
            (self.sanity_check_failed, "sanity check failed"),
        ];
        let mut reasons: Vec<&str> = flags
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, name)| *name)
            .collect();
        if !self.reason.is_empty() {
            reasons.push(&self.reason);
        }
        reasons.join(", ")
    }
}

/// Hard fork info.
#[derive(Debug, Clone, Deserialize)]
pub struct HardForkInfo {
    pub version: u8,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub earliest_height: u64,
    pub status: String,
}

// =============================================================================
// DaemonRpc
// =============================================================================

/// Async RPC client for the daemon.
pub struct DaemonRpc {
    client: RpcClient,
}

impl DaemonRpc {
    /// Create a daemon RPC client connected to the given URL.
    pub fn new(url: &str) -> Result<Self, RpcError> {
        Ok(Self {
            client: RpcClient::new(url)?,
        })
    }

    /// Create with full configuration.
    pub fn with_config(config: RpcConfig) -> Result<Self, RpcError> {
        Ok(Self {
            client: RpcClient::with_config(config)?,
        })
    }

    /// Get the underlying RPC client for custom calls.
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    // =========================================================================
    // Network Information
    // =========================================================================

    /// Get current blockchain height.
    pub async fn get_height(&self) -> Result<u64, RpcError> {
        let val = self.client.post("/get_height", &serde_json::json!({})).await?;
        check_status(&val, "get_height")?;
        val.get("height")
            .and_then(|v| v.as_u64())
            .ok_or(RpcError::NoResult { context: "get_height".into() })
    }

    /// Get hard fork info.
    pub async fn hard_fork_info(&self) -> Result<HardForkInfo, RpcError> {
        let val = self.client.call("hard_fork_info", serde_json::json!({})).await?;
        check_status(&val, "hard_fork_info")?;
        Ok(serde_json::from_value(val)?)
    }

    // =========================================================================
    // Block Operations
    // =========================================================================

    /// Get block headers for an inclusive height range.
    pub async fn get_block_headers_range(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> Result<Vec<BlockHeader>, RpcError> {
        let val = self
            .client
            .call(
                "get_block_headers_range",
                serde_json::json!({
                    "start_height": start_height,
                    "end_height": end_height,
                }),
            )
            .await?;
        check_status(&val, "get_block_headers_range")?;
        let headers = val.get("headers").ok_or(RpcError::NoResult { context: "get_block_headers_range".into() })?;
        Ok(serde_json::from_value(headers.clone())?)
    }

    /// Get the header of a block by hash.
    pub async fn get_block_header_by_hash(&self, hash: &str) -> Result<BlockHeader, RpcError> {
        let val = self
            .client
            .call("get_block_header_by_hash", serde_json::json!({"hash": hash}))
            .await?;
        check_status(&val, "get_block_header_by_hash")?;
        let header = val
            .get("block_header")
            .ok_or(RpcError::NoResult { context: "get_block_header_by_hash".into() })?;
        Ok(serde_json::from_value(header.clone())?)
    }

    /// Get a full block by height (header + miner tx hash + tx hashes).
    pub async fn get_block(&self, height: u64) -> Result<BlockResult, RpcError> {
        let val = self
            .client
            .call("get_block", serde_json::json!({"height": height}))
            .await?;
        check_status(&val, "get_block")?;
        Ok(serde_json::from_value(val)?)
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Get transactions by hash, decoded as JSON.
    pub async fn get_transactions(&self, tx_hashes: &[String]) -> Result<Vec<TransactionEntry>, RpcError> {
        if tx_hashes.is_empty() {
            return Ok(Vec::new());
        }
        let val = self
            .client
            .post(
                "/get_transactions",
                &serde_json::json!({
                    "txs_hashes": tx_hashes,
                    "decode_as_json": true,
                }),
            )
            .await?;
        check_status(&val, "get_transactions")?;
        let txs = val.get("txs").ok_or(RpcError::NoResult { context: "get_transactions(txs)".into() })?;
        Ok(serde_json::from_value(txs.clone())?)
    }

    /// Send a raw transaction.
    pub async fn send_raw_transaction(
        &self,
        tx_as_hex: &str,
        do_not_relay: bool,
    ) -> Result<SendRawTxResult, RpcError> {
        let val = self
            .client
            .post(
                "/send_raw_transaction",
                &serde_json::json!({
                    "tx_as_hex": tx_as_hex,
                    "do_not_relay": do_not_relay,
                }),
            )
            .await?;
        Ok(serde_json::from_value(val)?)
    }

    /// Get transaction pool (mempool) hashes.
    pub async fn get_transaction_pool_hashes(&self) -> Result<Vec<String>, RpcError> {
        let val = self
            .client
            .post("/get_transaction_pool_hashes", &serde_json::json!({}))
            .await?;
        check_status(&val, "get_transaction_pool_hashes")?;
        let hashes = val
            .get("tx_hashes")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(hashes)
    }

    /// Check if key images are spent.
    ///
    /// Returns spent status per key image: 0=unspent, 1=spent in chain, 2=spent in pool.
    pub async fn is_key_image_spent(&self, key_images: &[String]) -> Result<KeyImageSpentStatus, RpcError> {
        let val = self
            .client
            .post(
                "/is_key_image_spent",
                &serde_json::json!({ "key_images": key_images }),
            )
            .await?;
        check_status(&val, "is_key_image_spent")?;
        Ok(serde_json::from_value(val)?)
    }

    // =========================================================================
    // Output Operations
    // =========================================================================

    /// Get ring member details by global output index.
    pub async fn get_outs(&self, outputs: &[OutputRequest], get_txid: bool) -> Result<Vec<OutputInfo>, RpcError> {
        let req = serde_json::json!({
            "outputs": outputs,
            "get_txid": get_txid,
        });
        let val = self.client.post("/get_outs", &req).await?;
        check_status(&val, "get_outs")?;
        let outs = val.get("outs").ok_or(RpcError::NoResult { context: "get_outs".into() })?;
        Ok(serde_json::from_value(outs.clone())?)
    }

    /// Get the RingCT output distribution used for decoy selection.
    pub async fn get_output_distribution(
        &self,
        amounts: &[u64],
        from_height: u64,
        to_height: u64,
        cumulative: bool,
    ) -> Result<Vec<OutputDistribution>, RpcError> {
        let params = serde_json::json!({
            "amounts": amounts,
            "from_height": from_height,
            "to_height": to_height,
            "cumulative": cumulative,
            "binary": false,
        });
        let val = self
            .client
            .call("get_output_distribution", params)
            .await?;
        check_status(&val, "get_output_distribution")?;
        let dists = val.get("distributions").ok_or(RpcError::NoResult { context: "get_output_distribution".into() })?;
        Ok(serde_json::from_value(dists.clone())?)
    }

    /// Get the daemon's per-byte fee estimate and quantization mask.
    pub async fn get_fee_estimate(&self, grace_blocks: u64) -> Result<FeeEstimate, RpcError> {
        let val = self
            .client
            .call(
                "get_fee_estimate",
                serde_json::json!({ "grace_blocks": grace_blocks }),
            )
            .await?;
        check_status(&val, "get_fee_estimate")?;
        Ok(serde_json::from_value(val)?)
    }
}

/// Reject responses whose `status` field is present and not `OK`.
fn check_status(val: &Value, context: &str) -> Result<(), RpcError> {
    match val.get("status").and_then(|s| s.as_str()) {
        None | Some("OK") => Ok(()),
        Some(status) => Err(RpcError::Status {
            context: context.to_string(),
            status: status.to_string(),
        }),
    }
}

//! Wallet configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use shroud_types::consensus::{DEFAULT_DUST_THRESHOLD, DEFAULT_TX_SPENDABLE_AGE};
use shroud_types::Network;

use crate::error::WalletError;

/// Tunables of the sync engine, coin selector and transaction builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub network: Network,
    /// Blocks below this height are fetched as hashes only.
    pub refresh_from_height: u64,
    /// Period of the background refresh worker.
    pub refresh_interval: Duration,
    /// Upper bound on blocks applied by one synchronization pass.
    pub max_blocks_per_pass: u64,
    /// Blocks requested per `get_blocks` call.
    pub blocks_per_request: u64,
    /// Attempts per pass before a connectivity error is reported.
    pub refresh_retries: u32,
    /// How long a sent transaction may be missing from chain and pool
    /// before it is marked failed.
    pub pool_stale_after: Duration,
    /// Requested ring size; forks with a fixed ring size override it.
    pub ring_size: usize,
    /// Outputs at or below this amount are dust.
    pub dust_threshold: u64,
    /// Once the remaining need is at or below this, selection prefers the
    /// smallest outputs.
    pub dust_sweep_threshold: u64,
    /// Add one dust output to transactions that have room for it.
    pub sweep_dust: bool,
    /// Blocks before a received output can be spent.
    pub min_confirmations: u64,
    /// Weight cap below the fork's own limit.
    pub max_tx_weight: Option<u64>,
    /// Merge destinations paying the same address.
    pub merge_destinations: bool,
    /// Received outputs below this amount are not recorded.
    pub ignore_outputs_below: u64,
    /// Received outputs above this amount are not recorded.
    pub ignore_outputs_above: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            refresh_from_height: 0,
            refresh_interval: Duration::from_secs(20),
            max_blocks_per_pass: 10_000,
            blocks_per_request: 100,
            refresh_retries: 3,
            pool_stale_after: Duration::from_secs(24 * 3600),
            ring_size: 16,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            dust_sweep_threshold: DEFAULT_DUST_THRESHOLD,
            sweep_dust: false,
            min_confirmations: DEFAULT_TX_SPENDABLE_AGE,
            max_tx_weight: None,
            merge_destinations: false,
            ignore_outputs_below: 0,
            ignore_outputs_above: u64::MAX,
        }
    }
}

impl WalletConfig {
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, WalletError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| WalletError::MalformedInput(format!("wallet config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        if self.blocks_per_request == 0 {
            return Err(WalletError::MalformedInput("blocks_per_request must be positive".into()));
        }
        if self.refresh_retries == 0 {
            return Err(WalletError::MalformedInput("refresh_retries must be positive".into()));
        }
        if self.ring_size == 0 {
            return Err(WalletError::MalformedInput("ring_size must be positive".into()));
        }
        if self.ignore_outputs_below > self.ignore_outputs_above {
            return Err(WalletError::MalformedInput(
                "ignore_outputs_below exceeds ignore_outputs_above".into(),
            ));
        }
        Ok(())
    }

    /// Whether a received amount is inside the tracked range.
    pub fn tracks_amount(&self, amount: u64) -> bool {
        amount >= self.ignore_outputs_below && amount <= self.ignore_outputs_above
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = WalletConfig::from_json(r#"{"network":"Testnet","ring_size":11}"#).unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.ring_size, 11);
        assert_eq!(config.refresh_retries, 3);
        assert_eq!(config.pool_stale_after, Duration::from_secs(86_400));
    }

    #[test]
    fn test_rejects_inverted_amount_range() {
        let json = r#"{"ignore_outputs_below":10,"ignore_outputs_above":5}"#;
        assert!(matches!(
            WalletConfig::from_json(json),
            Err(WalletError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_tracks_amount() {
        let config = WalletConfig {
            ignore_outputs_below: 100,
            ignore_outputs_above: 1_000,
            ..WalletConfig::default()
        };
        assert!(!config.tracks_amount(99));
        assert!(config.tracks_amount(100));
        assert!(config.tracks_amount(1_000));
        assert!(!config.tracks_amount(1_001));
    }
}

//! Wallet state persistence.
//!
//! A [`WalletSnapshot`] is versioned JSON. Fields added after version 1
//! carry `#[serde(default)]` so older files keep loading. Writes go to a
//! temporary sibling first and are renamed into place.

use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use shroud_types::Network;

use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::source::ChainSource;
use crate::state::WalletState;
use crate::wallet::Wallet;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub version: u32,
    pub network: Network,
    #[serde(default)]
    pub refresh_from_height: u64,
    pub state: WalletState,
}

impl WalletSnapshot {
    pub fn new(config: &WalletConfig, state: WalletState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            network: config.network,
            refresh_from_height: config.refresh_from_height,
            state,
        }
    }

    pub fn to_json(&self) -> Result<String, WalletError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, WalletError> {
        let snapshot: Self = serde_json::from_str(json)?;
        if snapshot.version == 0 || snapshot.version > SNAPSHOT_VERSION {
            return Err(WalletError::Snapshot(format!(
                "unsupported snapshot version {} (max {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(snapshot)
    }

    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        let json = self.to_json()?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        info!(
            "saved wallet snapshot to {} ({} transfers, height {})",
            path.display(),
            self.state.ledger.len(),
            self.state.chain.size()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let json = fs::read_to_string(path)?;
        let snapshot = Self::from_json(&json)?;
        debug!(
            "loaded wallet snapshot from {}: height {}",
            path.display(),
            snapshot.state.chain.size()
        );
        Ok(snapshot)
    }

    /// Check that the snapshot belongs to the wallet's network.
    pub fn check_network(&self, config: &WalletConfig) -> Result<(), WalletError> {
        if self.network != config.network {
            return Err(WalletError::Snapshot(format!(
                "snapshot is for {:?}, wallet is on {:?}",
                self.network, config.network
            )));
        }
        Ok(())
    }
}

impl<S: ChainSource> Wallet<S> {
    pub async fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot::new(self.config(), self.state().await)
    }

    /// Replace the state with a saved one for the same network.
    pub fn restore(self, snapshot: WalletSnapshot) -> Result<Self, WalletError> {
        snapshot.check_network(self.config())?;
        Ok(self.with_state(snapshot.state))
    }
}

//! Wallet error types.

use shroud_tx::TxError;
use thiserror::Error;

use crate::source::SourceError;

#[derive(Debug, Error)]
pub enum WalletError {
    /// Daemon unreachable or busy. Retried by the refresh worker.
    #[error("daemon connectivity: {0}")]
    Connectivity(String),

    /// Local state cannot be reconciled with the chain; a rescan is required.
    #[error("chain consistency: {0}")]
    Consistency(String),

    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { available: u64, requested: u64 },

    #[error("not enough decoys: requested {requested}, available {available}")]
    InsufficientDecoys { requested: usize, available: u64 },

    /// Bad data from a daemon, signer, peer or caller.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("consensus rule violated: {0}")]
    ConsensusRule(String),

    #[error("transaction error: {0}")]
    Tx(TxError),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl WalletError {
    /// Whether a later attempt against the same daemon could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, WalletError::Connectivity(_))
    }
}

impl From<TxError> for WalletError {
    fn from(e: TxError) -> Self {
        match e {
            TxError::InsufficientDecoys { requested, available } => {
                WalletError::InsufficientDecoys { requested, available }
            }
            TxError::InsufficientInputs { need, have } => WalletError::InsufficientFunds {
                available: have,
                requested: need,
            },
            TxError::NoDestinations => WalletError::ConsensusRule("no destinations".into()),
            TxError::ZeroAmount { index } => {
                WalletError::ConsensusRule(format!("destination {} has a zero amount", index))
            }
            other => WalletError::Tx(other),
        }
    }
}

impl From<SourceError> for WalletError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Unavailable(msg) => WalletError::Connectivity(msg),
            SourceError::Rejected(msg) => WalletError::ConsensusRule(msg),
            SourceError::Malformed(msg) => WalletError::MalformedInput(msg),
        }
    }
}

#[cfg(feature = "transport")]
impl From<shroud_rpc::RpcError> for WalletError {
    fn from(e: shroud_rpc::RpcError) -> Self {
        WalletError::from(SourceError::from(e))
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        WalletError::Snapshot(e.to_string())
    }
}

impl From<std::io::Error> for WalletError {
    fn from(e: std::io::Error) -> Self {
        WalletError::Snapshot(e.to_string())
    }
}

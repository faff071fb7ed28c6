//! Shroud wallet engine.
//!
//! Keeps the ledger of owned outputs in step with the chain (fast hash-only
//! sync, block scanning, reorg repair, pool tracking), selects coins and
//! creates transactions, and hands them to a signing strategy. The chain is
//! reached through [`ChainSource`]; with the `transport` feature
//! [`DaemonSource`] implements it over the daemon RPC.

pub mod chain;
pub mod config;
pub mod error;
pub mod ledger;
pub mod refresh;
pub mod scanner;
pub mod selection;
pub mod signer;
pub mod snapshot;
pub mod source;
pub mod state;
pub mod sync;
pub mod wallet;

#[cfg(feature = "transport")]
pub mod daemon_source;

pub use chain::ChainHistory;
pub use config::WalletConfig;
pub use error::WalletError;
pub use ledger::{Ledger, TransferRecord};
pub use refresh::{PauseControl, PauseGuard, RefreshWorker, StopFlag};
pub use scanner::{FoundOutput, ScanContext};
pub use selection::{Candidate, SelectionPolicy};
pub use signer::Signer;
pub use snapshot::{WalletSnapshot, SNAPSHOT_VERSION};
pub use source::{
    BlockEntry, BlocksResponse, ChainSource, ChainTx, FeeQuote, HashesResponse,
    OutputDistribution, SourceError, SpentStatus,
};
pub use state::{UnconfirmedSpend, UnconfirmedState, WalletState};
pub use sync::{SyncEngine, SyncOutcome, SyncRequest};
pub use wallet::{Balance, KeyImageImport, SignedKeyImage, Wallet};

#[cfg(feature = "transport")]
pub use daemon_source::DaemonSource;

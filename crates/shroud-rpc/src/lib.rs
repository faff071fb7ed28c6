//! Daemon RPC client library.
//!
//! Provides an async HTTP client for the daemon's JSON-RPC interface and
//! plain JSON endpoints, with typed wrappers for the calls a wallet makes.
//!
//! # Example
//!
//! ```ignore
//! use shroud_rpc::DaemonRpc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let daemon = DaemonRpc::new("http://localhost:18081").unwrap();
//!     let height = daemon.get_height().await.unwrap();
//!     println!("Height: {}", height);
//! }
//! ```

pub mod client;
pub mod daemon;
pub mod error;

pub use client::{RpcClient, RpcConfig};
pub use daemon::DaemonRpc;
pub use error::RpcError;

/// Default RPC ports.
pub mod ports {
    pub const DAEMON_MAINNET: u16 = 18081;
    pub const DAEMON_TESTNET: u16 = 28081;
    pub const DAEMON_STAGENET: u16 = 38081;
}

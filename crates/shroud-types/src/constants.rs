//! Network identifiers, hard-fork version numbers, and per-network config.

use serde::{Deserialize, Serialize};

// =============================================================================
// Network Types
// =============================================================================

/// Network type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Stagenet,
}

// =============================================================================
// Hard Fork Versions
// =============================================================================

/// Hard fork versions at which wallet-relevant rules switch on.
pub struct HfVersion;

impl HfVersion {
    pub const MIN_MIXIN_2: u8 = 2;
    pub const RINGCT: u8 = 4;
    pub const MIN_MIXIN_4: u8 = 6;
    pub const MIN_MIXIN_6: u8 = 7;
    pub const PER_BYTE_FEE: u8 = 8;
    pub const BULLETPROOFS: u8 = 8;
    pub const MIN_MIXIN_10: u8 = 8;
    pub const SMALLER_BP: u8 = 10;
    pub const LONG_TERM_BLOCK_WEIGHT: u8 = 10;
    pub const CLSAG: u8 = 13;
    pub const DETERMINISTIC_UNLOCK_TIME: u8 = 13;
    pub const BULLETPROOF_PLUS: u8 = 15;
    pub const VIEW_TAGS: u8 = 15;
    pub const MIN_MIXIN_15: u8 = 15;
    pub const SCALING_2021: u8 = 15;
}

/// Highest fork version this wallet knows the rules for.
pub const LATEST_HF_VERSION: u8 = 16;

// =============================================================================
// Network Configuration
// =============================================================================

/// `(version, activation_height)` pairs in ascending order.
pub type HardForkHeights = &'static [(u8, u64)];

/// Static per-network parameters.
#[derive(Debug)]
pub struct NetworkConfig {
    pub network: Network,
    pub rpc_port: u16,
    pub hard_fork_heights: HardForkHeights,
}

static MAINNET_HF_HEIGHTS: [(u8, u64); 16] = [
    (1, 1),
    (2, 1_009_827),
    (3, 1_141_317),
    (4, 1_220_516),
    (5, 1_288_616),
    (6, 1_400_000),
    (7, 1_546_000),
    (8, 1_685_555),
    (9, 1_686_275),
    (10, 1_788_000),
    (11, 1_788_720),
    (12, 1_978_433),
    (13, 2_210_000),
    (14, 2_210_720),
    (15, 2_688_888),
    (16, 2_689_608),
];

static TESTNET_HF_HEIGHTS: [(u8, u64); 16] = [
    (1, 1),
    (2, 624_634),
    (3, 800_500),
    (4, 801_219),
    (5, 802_660),
    (6, 971_400),
    (7, 1_057_027),
    (8, 1_057_058),
    (9, 1_057_778),
    (10, 1_154_318),
    (11, 1_155_038),
    (12, 1_308_737),
    (13, 1_543_939),
    (14, 1_544_659),
    (15, 1_982_800),
    (16, 1_983_520),
];

static STAGENET_HF_HEIGHTS: [(u8, u64); 16] = [
    (1, 1),
    (2, 32_000),
    (3, 33_000),
    (4, 34_000),
    (5, 35_000),
    (6, 36_000),
    (7, 37_000),
    (8, 176_456),
    (9, 177_176),
    (10, 269_000),
    (11, 269_720),
    (12, 454_721),
    (13, 675_405),
    (14, 676_125),
    (15, 1_151_000),
    (16, 1_151_720),
];

pub static MAINNET_CONFIG: NetworkConfig = NetworkConfig {
    network: Network::Mainnet,
    rpc_port: 18081,
    hard_fork_heights: &MAINNET_HF_HEIGHTS,
};

pub static TESTNET_CONFIG: NetworkConfig = NetworkConfig {
    network: Network::Testnet,
    rpc_port: 28081,
    hard_fork_heights: &TESTNET_HF_HEIGHTS,
};

pub static STAGENET_CONFIG: NetworkConfig = NetworkConfig {
    network: Network::Stagenet,
    rpc_port: 38081,
    hard_fork_heights: &STAGENET_HF_HEIGHTS,
};

/// Look up the static config for a network.
pub fn network_config(network: Network) -> &'static NetworkConfig {
    match network {
        Network::Mainnet => &MAINNET_CONFIG,
        Network::Testnet => &TESTNET_CONFIG,
        Network::Stagenet => &STAGENET_CONFIG,
    }
}

//! Consensus constants and per-fork rules the wallet must respect.
//!
//! Values follow the reference network configuration. Anything that depends
//! on the fork version goes through [`fork_rules`] so callers never compare
//! raw version numbers.

use crate::constants::{network_config, HfVersion, Network, LATEST_HF_VERSION};

// =============================================================================
// Core Constants
// =============================================================================

/// Atomic units per coin.
pub const COIN: u64 = 1_000_000_000_000;

/// Decimal places shown for amounts.
pub const DISPLAY_DECIMAL_POINT: u32 = 12;

// Block timing
/// Target block time before the second fork (seconds).
pub const DIFFICULTY_TARGET_V1: u64 = 60;

/// Current target block time (seconds).
pub const DIFFICULTY_TARGET_V2: u64 = 120;

// Maturity and unlock
/// Coinbase maturity window (blocks).
pub const MINED_MONEY_UNLOCK_WINDOW: u64 = 60;

/// Default minimum age before an output may be spent (blocks).
pub const DEFAULT_TX_SPENDABLE_AGE: u64 = 10;

/// Allowed delta blocks for height-based unlock times.
pub const LOCKED_TX_ALLOWED_DELTA_BLOCKS: u64 = 1;

/// Allowed delta seconds for timestamp-based unlock times.
pub const LOCKED_TX_ALLOWED_DELTA_SECONDS: u64 = DIFFICULTY_TARGET_V2 * LOCKED_TX_ALLOWED_DELTA_BLOCKS;

/// Unlock times below this value are block heights, above are timestamps.
pub const UNLOCK_TIME_THRESHOLD: u64 = 500_000_000;

// Decoy selection
/// Shape of the spend-age gamma distribution (log-seconds).
pub const DECOY_GAMMA_SHAPE: f64 = 19.28;

/// Scale of the spend-age gamma distribution (log-seconds).
pub const DECOY_GAMMA_SCALE: f64 = 1.0 / 1.61;

/// Window of "recently unlocked" outputs that absorbs too-young gamma draws.
pub const RECENT_SPEND_WINDOW: u64 = 15 * DIFFICULTY_TARGET_V2;

/// Blocks considered when estimating the output production rate.
pub const DECOY_BLOCKS_IN_A_YEAR: u64 = 86_400 * 365 / DIFFICULTY_TARGET_V2;

// Fees
/// Legacy per-kB fee before dynamic fees.
pub const FEE_PER_KB_OLD: u64 = 10_000_000_000;

/// Per-kB fee once RingCT is active.
pub const FEE_PER_KB: u64 = 2_000_000_000;

/// Baseline per-byte fee once per-byte fees are active.
pub const FEE_PER_BYTE: u64 = 20_000;

/// Decimals kept when quantizing per-byte fees.
pub const PER_KB_FEE_QUANTIZATION_DECIMALS: u32 = 8;

/// Fee values are rounded up to a multiple of this mask.
pub const FEE_QUANTIZATION_MASK: u64 =
    10u64.pow(DISPLAY_DECIMAL_POINT - PER_KB_FEE_QUANTIZATION_DECIMALS);

/// Amounts at or below this are dust for legacy digit splitting.
pub const DEFAULT_DUST_THRESHOLD: u64 = 2_000_000_000;

// Transaction limits
/// Maximum outputs aggregated into one Bulletproof/BP+.
pub const BULLETPROOF_MAX_OUTPUTS: usize = 16;

/// Full reward zone from the fifth fork onward (bytes).
pub const BLOCK_GRANTED_FULL_REWARD_ZONE_V5: u64 = 300_000;

/// Full reward zone between the second and fifth forks (bytes).
pub const BLOCK_GRANTED_FULL_REWARD_ZONE_V2: u64 = 60_000;

/// Full reward zone before the second fork (bytes).
pub const BLOCK_GRANTED_FULL_REWARD_ZONE_V1: u64 = 20_000;

/// Space kept free in every block for the coinbase blob.
pub const COINBASE_BLOB_RESERVED_SIZE: u64 = 600;

/// Maximum tx_extra size (bytes).
pub const MAX_TX_EXTRA_SIZE: usize = 1060;

// =============================================================================
// Hard Fork Queries
// =============================================================================

/// Get the hard fork version active at a given block height.
pub fn hf_version_for_height(height: u64, network: Network) -> u8 {
    let config = network_config(network);
    let mut active_version = 1u8;
    for &(version, activation_height) in config.hard_fork_heights {
        if height >= activation_height && version > active_version {
            active_version = version;
        }
    }
    active_version
}

/// Check if a specific hard fork is active at a given height.
pub fn is_hf_active(hf_version: u8, height: u64, network: Network) -> bool {
    hf_version_for_height(height, network) >= hf_version
}

/// Wallet-facing rules in force at one fork version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkRules {
    pub version: u8,
    /// RingCT transactions are allowed.
    pub rct: bool,
    pub bulletproof: bool,
    pub bulletproof_plus: bool,
    pub clsag: bool,
    pub view_tags: bool,
    /// Fees are charged per byte of weight rather than per kB.
    pub per_byte_fee: bool,
    /// Smallest ring the network accepts.
    pub min_ring_size: usize,
    /// When set, rings must be exactly this size.
    pub fixed_ring_size: Option<usize>,
    /// Upper bound on a single transaction's weight.
    pub max_tx_weight: u64,
}

/// Rules for a given fork version. Versions above the latest known one get
/// the latest rules.
pub fn fork_rules(version: u8) -> ForkRules {
    let version = version.clamp(1, LATEST_HF_VERSION);

    let fixed_ring_size = if version >= HfVersion::MIN_MIXIN_15 {
        Some(16)
    } else if version >= HfVersion::MIN_MIXIN_10 {
        Some(11)
    } else {
        None
    };
    let min_ring_size = match fixed_ring_size {
        Some(n) => n,
        None if version >= HfVersion::MIN_MIXIN_6 => 7,
        None if version >= HfVersion::MIN_MIXIN_4 => 5,
        None if version >= HfVersion::MIN_MIXIN_2 => 3,
        None => 1,
    };

    let full_reward_zone = if version >= 5 {
        BLOCK_GRANTED_FULL_REWARD_ZONE_V5
    } else if version >= 2 {
        BLOCK_GRANTED_FULL_REWARD_ZONE_V2
    } else {
        BLOCK_GRANTED_FULL_REWARD_ZONE_V1
    };
    let max_tx_weight = if version >= HfVersion::PER_BYTE_FEE {
        full_reward_zone / 2 - COINBASE_BLOB_RESERVED_SIZE
    } else {
        full_reward_zone - COINBASE_BLOB_RESERVED_SIZE
    };

    ForkRules {
        version,
        rct: version >= HfVersion::RINGCT,
        bulletproof: version >= HfVersion::BULLETPROOFS,
        bulletproof_plus: version >= HfVersion::BULLETPROOF_PLUS,
        clsag: version >= HfVersion::CLSAG,
        view_tags: version >= HfVersion::VIEW_TAGS,
        per_byte_fee: version >= HfVersion::PER_BYTE_FEE,
        min_ring_size,
        fixed_ring_size,
        max_tx_weight,
    }
}

impl ForkRules {
    /// Ring size to use when the caller asked for `requested`.
    pub fn effective_ring_size(&self, requested: usize) -> usize {
        match self.fixed_ring_size {
            Some(n) => n,
            None => requested.max(self.min_ring_size),
        }
    }
}

// =============================================================================
// Unlock Time Validation
// =============================================================================

/// Check whether an unlock time has passed.
///
/// `chain_height` is the number of blocks in the chain (the next block's
/// height); `now` is the current unix time.
pub fn is_unlock_time_reached(unlock_time: u64, chain_height: u64, now: u64) -> bool {
    if unlock_time == 0 {
        return true;
    }

    if unlock_time < UNLOCK_TIME_THRESHOLD {
        // Block height based unlock
        chain_height.saturating_sub(1) + LOCKED_TX_ALLOWED_DELTA_BLOCKS >= unlock_time
    } else {
        // Timestamp based unlock
        now + LOCKED_TX_ALLOWED_DELTA_SECONDS >= unlock_time
    }
}

/// Check if an output found at `output_height` has aged enough to be spent.
pub fn meets_spendable_age(output_height: u64, chain_height: u64, spendable_age: u64) -> bool {
    output_height.saturating_add(spendable_age) <= chain_height
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hf_version_mainnet() {
        assert_eq!(hf_version_for_height(0, Network::Mainnet), 1);
        assert_eq!(hf_version_for_height(1_220_516, Network::Mainnet), 4);
        assert_eq!(hf_version_for_height(1_685_554, Network::Mainnet), 7);
        assert_eq!(hf_version_for_height(1_685_555, Network::Mainnet), 8);
        assert_eq!(hf_version_for_height(3_000_000, Network::Mainnet), 16);
    }

    #[test]
    fn test_is_hf_active() {
        assert!(is_hf_active(HfVersion::CLSAG, 2_300_000, Network::Mainnet));
        assert!(!is_hf_active(HfVersion::VIEW_TAGS, 2_300_000, Network::Mainnet));
    }

    #[test]
    fn test_fork_rules_ring_sizes() {
        assert_eq!(fork_rules(1).min_ring_size, 1);
        assert_eq!(fork_rules(6).min_ring_size, 5);
        assert_eq!(fork_rules(7).min_ring_size, 7);
        assert_eq!(fork_rules(8).fixed_ring_size, Some(11));
        assert_eq!(fork_rules(16).fixed_ring_size, Some(16));
        assert_eq!(fork_rules(7).effective_ring_size(3), 7);
        assert_eq!(fork_rules(7).effective_ring_size(9), 9);
        assert_eq!(fork_rules(15).effective_ring_size(3), 16);
    }

    #[test]
    fn test_fork_rules_proofs() {
        let v3 = fork_rules(3);
        assert!(!v3.rct);
        let v4 = fork_rules(4);
        assert!(v4.rct && !v4.bulletproof);
        let v13 = fork_rules(13);
        assert!(v13.clsag && v13.bulletproof && !v13.bulletproof_plus);
        let v16 = fork_rules(16);
        assert!(v16.bulletproof_plus && v16.view_tags && v16.per_byte_fee);
        // Unknown future versions inherit the latest rules.
        assert_eq!(fork_rules(200).version, LATEST_HF_VERSION);
    }

    #[test]
    fn test_max_tx_weight() {
        assert_eq!(fork_rules(16).max_tx_weight, 149_400);
        assert_eq!(fork_rules(4).max_tx_weight, 59_400);
    }

    #[test]
    fn test_unlock_time_height() {
        assert!(is_unlock_time_reached(0, 10, 0));
        assert!(is_unlock_time_reached(100, 100, 0));
        assert!(!is_unlock_time_reached(102, 100, 0));
    }

    #[test]
    fn test_unlock_time_timestamp() {
        let t = 1_700_000_000;
        assert!(is_unlock_time_reached(t, 0, t));
        assert!(is_unlock_time_reached(t + 100, 0, t));
        assert!(!is_unlock_time_reached(t + 1000, 0, t));
    }

    #[test]
    fn test_spendable_age() {
        assert!(!meets_spendable_age(100, 109, DEFAULT_TX_SPENDABLE_AGE));
        assert!(meets_spendable_age(100, 110, DEFAULT_TX_SPENDABLE_AGE));
    }

    #[test]
    fn test_quantization_mask() {
        assert_eq!(FEE_QUANTIZATION_MASK, 10_000);
    }
}

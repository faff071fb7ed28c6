//! Amount splitting.
//!
//! Two concerns live here: dividing a set of destinations across several
//! transactions ([`split_amounts`]), and turning destinations plus change into
//! the concrete output list of one transaction ([`SplitStrategy`]).

use serde::{Deserialize, Serialize};

use crate::types::{AccountAddress, Destination};
use crate::TxError;

/// What to do with change digits at or below the dust threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DustPolicy {
    /// Leave the dust unassigned so it is paid as fee.
    AddToFee,
    /// Send the dust to a dedicated address.
    SendTo(AccountAddress),
}

/// How destinations and change become transaction outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitStrategy {
    /// One output per destination; used for RingCT, where amounts are hidden.
    PassThrough,
    /// One output per non-zero decimal digit; used for cleartext amounts.
    Digits { dust_threshold: u64, dust_policy: DustPolicy },
}

/// Outputs of one transaction after splitting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitOutputs {
    /// Payment and change outputs, in destination order, change last.
    pub outputs: Vec<Destination>,
    /// Total change dust removed from the outputs.
    pub dust: u64,
    /// Dust was left for the fee rather than sent to a dust address.
    pub dust_added_to_fee: bool,
}

impl SplitStrategy {
    /// Choose the strategy for a transaction's proof type.
    pub fn for_rct(rct: bool, dust_threshold: u64, dust_policy: DustPolicy) -> Self {
        if rct {
            SplitStrategy::PassThrough
        } else {
            SplitStrategy::Digits { dust_threshold, dust_policy }
        }
    }

    pub fn split(
        &self,
        destinations: &[Destination],
        change: Option<&Destination>,
    ) -> Result<SplitOutputs, TxError> {
        match *self {
            SplitStrategy::PassThrough => {
                let mut outputs = destinations.to_vec();
                if let Some(change) = change {
                    if change.amount > 0 {
                        outputs.push(*change);
                    }
                }
                Ok(SplitOutputs { outputs, dust: 0, dust_added_to_fee: false })
            }
            SplitStrategy::Digits { dust_threshold, dust_policy } => {
                let mut outputs = Vec::new();
                for dest in destinations {
                    decompose_amount_into_digits(dest.amount, 0, |chunk| {
                        outputs.push(Destination::new(dest.address, chunk));
                    });
                }

                let mut dust_chunks = Vec::new();
                if let Some(change) = change {
                    decompose_amount_into_digits(change.amount, 0, |chunk| {
                        if chunk <= dust_threshold {
                            dust_chunks.push(chunk);
                        } else {
                            outputs.push(Destination::new(change.address, chunk));
                        }
                    });
                }

                let mut dust = 0u64;
                for chunk in dust_chunks {
                    dust = dust.checked_add(chunk).ok_or(TxError::Overflow("dust"))?;
                }

                let dust_added_to_fee = match dust_policy {
                    DustPolicy::AddToFee => dust > 0,
                    DustPolicy::SendTo(address) => {
                        if dust > 0 {
                            outputs.push(Destination::new(address, dust));
                        }
                        false
                    }
                };
                Ok(SplitOutputs { outputs, dust, dust_added_to_fee })
            }
        }
    }
}

/// Break `amount` into its non-zero decimal digits times their order.
///
/// Low digits whose running sum stays within `dust_threshold` are merged into
/// a single dust chunk, emitted before the first regular chunk.
pub fn decompose_amount_into_digits<F: FnMut(u64)>(
    mut amount: u64,
    dust_threshold: u64,
    mut emit: F,
) {
    let mut dust = 0u64;
    let mut dust_emitted = false;
    let mut order = 1u64;
    while amount != 0 {
        let chunk = (amount % 10) * order;
        amount /= 10;
        order = order.saturating_mul(10);

        if dust.saturating_add(chunk) <= dust_threshold {
            dust += chunk;
        } else {
            if !dust_emitted && dust != 0 {
                emit(dust);
                dust_emitted = true;
            }
            if chunk != 0 {
                emit(chunk);
            }
        }
    }
    if !dust_emitted && dust != 0 {
        emit(dust);
    }
}

/// Divide every destination's amount across `num_splits` transactions.
///
/// Each part gets `amount / num_splits`; the last part also gets the
/// remainder. Parts that would be zero are left out.
pub fn split_amounts(destinations: &[Destination], num_splits: usize) -> Vec<Vec<Destination>> {
    if num_splits <= 1 {
        return vec![destinations.to_vec()];
    }
    let n = num_splits as u64;
    (0..num_splits)
        .map(|i| {
            destinations
                .iter()
                .filter_map(|dest| {
                    let mut amount = dest.amount / n;
                    if i + 1 == num_splits {
                        amount += dest.amount % n;
                    }
                    (amount > 0).then(|| Destination::new(dest.address, amount))
                })
                .collect()
        })
        .collect()
}

/// Merge destinations paying the same address, keeping first-seen order.
pub fn merge_destinations(destinations: &[Destination]) -> Result<Vec<Destination>, TxError> {
    let mut merged: Vec<Destination> = Vec::with_capacity(destinations.len());
    for dest in destinations {
        match merged.iter_mut().find(|d| d.address == dest.address) {
            Some(existing) => {
                existing.amount = existing
                    .amount
                    .checked_add(dest.amount)
                    .ok_or(TxError::Overflow("destination merge"))?;
            }
            None => merged.push(*dest),
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_types::Hash32;

    fn addr(b: u8) -> AccountAddress {
        AccountAddress {
            spend_public: Hash32([b; 32]),
            view_public: Hash32([b.wrapping_add(1); 32]),
            is_subaddress: false,
        }
    }

    fn digits(amount: u64, threshold: u64) -> Vec<u64> {
        let mut out = Vec::new();
        decompose_amount_into_digits(amount, threshold, |c| out.push(c));
        out
    }

    #[test]
    fn test_decompose_digits() {
        assert_eq!(digits(0, 0), Vec::<u64>::new());
        assert_eq!(digits(1234, 0), vec![4, 30, 200, 1000]);
        assert_eq!(digits(1000, 0), vec![1000]);
        assert_eq!(digits(u64::MAX, 0).iter().sum::<u64>(), u64::MAX);
    }

    #[test]
    fn test_decompose_merges_dust() {
        // 4 + 30 fit under 50; 200 does not.
        assert_eq!(digits(1234, 50), vec![34, 200, 1000]);
        // Everything is dust.
        assert_eq!(digits(1234, 10_000), vec![1234]);
    }

    #[test]
    fn test_split_amounts_conserves() {
        let amounts = [3u64, 5, 7, 11, 51, 101, 500_000_000_000_000];
        let dests: Vec<Destination> = amounts
            .iter()
            .enumerate()
            .map(|(i, &a)| Destination::new(addr(i as u8), a))
            .collect();

        let parts = split_amounts(&dests, 2);
        assert_eq!(parts.len(), 2);
        for (i, dest) in dests.iter().enumerate() {
            let total: u64 = parts
                .iter()
                .flat_map(|p| p.iter())
                .filter(|d| d.address == addr(i as u8))
                .map(|d| d.amount)
                .sum();
            assert_eq!(total, dest.amount);
        }
        assert_eq!(parts[0][0].amount, 1);
        assert_eq!(parts[1][0].amount, 2);
        assert_eq!(parts[0][6].amount, 250_000_000_000_000);
        assert_eq!(parts[1][6].amount, 250_000_000_000_000);
    }

    #[test]
    fn test_split_amounts_drops_zero_parts() {
        let dests = vec![Destination::new(addr(1), 1), Destination::new(addr(2), 9)];
        let parts = split_amounts(&dests, 3);
        assert_eq!(parts[0], vec![Destination::new(addr(2), 3)]);
        assert_eq!(parts[1], vec![Destination::new(addr(2), 3)]);
        assert_eq!(
            parts[2],
            vec![Destination::new(addr(1), 1), Destination::new(addr(2), 3)]
        );
        assert_eq!(split_amounts(&dests, 1), vec![dests.clone()]);
    }

    #[test]
    fn test_pass_through_appends_change() {
        let dests = vec![Destination::new(addr(1), 700)];
        let change = Destination::new(addr(9), 300);
        let out = SplitStrategy::PassThrough.split(&dests, Some(&change)).unwrap();
        assert_eq!(out.outputs, vec![dests[0], change]);
        assert_eq!(out.dust, 0);
    }

    #[test]
    fn test_digit_split_dust_to_fee() {
        let dests = vec![Destination::new(addr(1), 1234)];
        let change = Destination::new(addr(9), 4321);
        let strategy = SplitStrategy::Digits {
            dust_threshold: 50,
            dust_policy: DustPolicy::AddToFee,
        };
        let out = strategy.split(&dests, Some(&change)).unwrap();
        let amounts: Vec<u64> = out.outputs.iter().map(|d| d.amount).collect();
        assert_eq!(amounts, vec![4, 30, 200, 1000, 300, 4000]);
        assert_eq!(out.dust, 21);
        assert!(out.dust_added_to_fee);
    }

    #[test]
    fn test_digit_split_dust_to_address() {
        let dests = vec![Destination::new(addr(1), 10)];
        let change = Destination::new(addr(9), 125);
        let strategy = SplitStrategy::Digits {
            dust_threshold: 20,
            dust_policy: DustPolicy::SendTo(addr(7)),
        };
        let out = strategy.split(&dests, Some(&change)).unwrap();
        assert_eq!(
            out.outputs,
            vec![
                Destination::new(addr(1), 10),
                Destination::new(addr(9), 100),
                Destination::new(addr(7), 25),
            ]
        );
        assert!(!out.dust_added_to_fee);
        let total: u64 = out.outputs.iter().map(|d| d.amount).sum();
        assert_eq!(total, 135);
    }

    #[test]
    fn test_merge_destinations() {
        let dests = vec![
            Destination::new(addr(1), 5),
            Destination::new(addr(2), 6),
            Destination::new(addr(1), 7),
        ];
        let merged = merge_destinations(&dests).unwrap();
        assert_eq!(merged, vec![Destination::new(addr(1), 12), Destination::new(addr(2), 6)]);

        let overflow = vec![Destination::new(addr(1), u64::MAX), Destination::new(addr(1), 1)];
        assert!(merge_destinations(&overflow).is_err());
    }
}

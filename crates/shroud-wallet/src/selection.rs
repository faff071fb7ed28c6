//! Coin selection.
//!
//! Picks owned outputs to cover an amount while keeping the selected set as
//! unrelated as possible: outputs from the same transaction or nearby blocks
//! are likely to be linked by an observer when spent together. Selection is
//! deterministic; ties go to the lowest ledger index.

use shroud_types::TxHash;

use crate::error::WalletError;
use crate::ledger::TransferRecord;

/// Blocks within which two outputs still count as slightly related.
const NEARBY_BLOCKS: u64 = 10;

/// A spendable output offered to the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Ledger arena index.
    pub index: usize,
    pub amount: u64,
    pub block_height: u64,
    pub txid: TxHash,
    pub rct: bool,
}

impl Candidate {
    pub fn from_record(index: usize, record: &TransferRecord) -> Self {
        Self {
            index,
            amount: record.amount,
            block_height: record.block_height,
            txid: record.txid,
            rct: record.rct,
        }
    }
}

/// Selection tunables taken from the wallet config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPolicy {
    /// Legacy outputs at or below this are dust.
    pub dust_threshold: u64,
    /// Once the remaining need is at or below this, prefer small outputs.
    pub dust_sweep_threshold: u64,
    /// Add one dust output to the selection.
    pub sweep_dust: bool,
}

/// Outputs chosen by the selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionResult {
    /// Ledger indices in pick order.
    pub selected: Vec<usize>,
    pub total: u64,
}

/// How likely two outputs are to be linked when spent together, in `[0, 1]`.
pub fn relatedness(a: &Candidate, b: &Candidate) -> f32 {
    if a.txid == b.txid {
        return 1.0;
    }
    match a.block_height.abs_diff(b.block_height) {
        0 => 0.9,
        1 => 0.8,
        d if d < NEARBY_BLOCKS => 0.2,
        _ => 0.0,
    }
}

fn is_dust(c: &Candidate, policy: &SelectionPolicy) -> bool {
    !c.rct && c.amount <= policy.dust_threshold
}

fn max_relatedness(c: &Candidate, selected: &[Candidate]) -> f32 {
    selected
        .iter()
        .map(|s| relatedness(c, s))
        .fold(0.0, f32::max)
}

/// Remove and return the best next output from `pool`.
///
/// The best output has the least maximum relatedness to `selected`; among
/// those the largest (or, with `smallest`, the smallest) amount wins, then
/// the lowest index.
fn pop_best_value(pool: &mut Vec<Candidate>, selected: &[Candidate], smallest: bool) -> Option<Candidate> {
    let best = pool
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            let by_relatedness = max_relatedness(a, selected).total_cmp(&max_relatedness(b, selected));
            let by_amount = if smallest {
                a.amount.cmp(&b.amount)
            } else {
                b.amount.cmp(&a.amount)
            };
            by_relatedness
                .then(by_amount)
                .then(a.index.cmp(&b.index))
        })
        .map(|(pos, _)| pos)?;
    Some(pool.swap_remove(best))
}

fn saturating_total<'a>(candidates: impl Iterator<Item = &'a Candidate>) -> u64 {
    candidates.fold(0u64, |acc, c| acc.saturating_add(c.amount))
}

/// Select outputs covering `needed`.
///
/// RingCT outputs are used first; legacy outputs join only when RingCT
/// alone cannot cover the need. Legacy dust is only ever added as a single
/// extra input under `sweep_dust`.
pub fn select_transfers(
    needed: u64,
    candidates: &[Candidate],
    policy: &SelectionPolicy,
) -> Result<SelectionResult, WalletError> {
    let mut unique: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for c in candidates {
        if !unique.iter().any(|u| u.index == c.index) {
            unique.push(*c);
        }
    }

    let (dust, usable): (Vec<Candidate>, Vec<Candidate>) =
        unique.into_iter().partition(|c| is_dust(c, policy));
    let (rct, legacy): (Vec<Candidate>, Vec<Candidate>) = usable.into_iter().partition(|c| c.rct);

    let mut dust_pick = None;
    if policy.sweep_dust {
        dust_pick = dust.iter().min_by_key(|c| (c.amount, c.index)).copied();
    }

    let available = saturating_total(rct.iter().chain(&legacy).chain(dust_pick.iter()));
    if available < needed {
        return Err(WalletError::InsufficientFunds { available, requested: needed });
    }

    let mut selected: Vec<Candidate> = Vec::new();
    let mut remaining = needed;
    if let Some(d) = dust_pick {
        remaining = remaining.saturating_sub(d.amount);
    }
    for mut pool in [rct, legacy] {
        while remaining > 0 {
            let smallest = remaining <= policy.dust_sweep_threshold;
            let Some(pick) = pop_best_value(&mut pool, &selected, smallest) else {
                break;
            };
            remaining = remaining.saturating_sub(pick.amount);
            selected.push(pick);
        }
    }
    if let Some(d) = dust_pick {
        selected.push(d);
    }

    Ok(SelectionResult {
        total: saturating_total(selected.iter()),
        selected: selected.into_iter().map(|c| c.index).collect(),
    })
}

/// Cheap first choice before general selection: a single RingCT output
/// covering `needed`, or else the least related RingCT pair covering it.
pub fn pick_preferred_inputs(needed: u64, candidates: &[Candidate]) -> Option<SelectionResult> {
    let mut rct: Vec<&Candidate> = candidates.iter().filter(|c| c.rct).collect();
    rct.sort_by_key(|c| c.index);
    rct.dedup_by_key(|c| c.index);

    if let Some(single) = rct.iter().find(|c| c.amount >= needed) {
        return Some(SelectionResult {
            selected: vec![single.index],
            total: single.amount,
        });
    }

    let mut best: Option<(f32, &Candidate, &Candidate)> = None;
    for (i, a) in rct.iter().enumerate() {
        for b in &rct[i + 1..] {
            if a.amount.saturating_add(b.amount) < needed {
                continue;
            }
            let r = relatedness(a, b);
            if best.map_or(true, |(best_r, _, _)| r < best_r) {
                best = Some((r, a, b));
            }
        }
    }
    best.map(|(_, a, b)| SelectionResult {
        selected: vec![a.index, b.index],
        total: a.amount.saturating_add(b.amount),
    })
}

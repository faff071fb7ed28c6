//! Output scanning and block application.
//!
//! [`scan_transaction`] recognises owned outputs through [`AccountCrypto`];
//! [`process_block`] applies a block to a [`WalletState`]: new records,
//! confirmed spends and ring uses, all logged for undo at the block height.

use log::{debug, info};
use shroud_tx::crypto::{AccountCrypto, ScanAmount};
use shroud_tx::types::{relative_to_absolute, TX_VERSION_RCT};
use shroud_tx::Transaction;
use shroud_types::{Hash32, KeyImage, PublicKey};

use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::ledger::TransferRecord;
use crate::source::{BlockEntry, ChainTx};
use crate::state::{ConfirmedSpend, WalletState};

/// Account keys and policy needed while scanning.
#[derive(Clone, Copy)]
pub struct ScanContext<'a> {
    pub account: &'a dyn AccountCrypto,
    pub config: &'a WalletConfig,
}

/// An owned output found in a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundOutput {
    pub output_index: u32,
    pub amount: u64,
    pub mask: Hash32,
    pub key_image: Option<KeyImage>,
    pub subaddress: (u32, u32),
    pub output_key: PublicKey,
}

/// Scan a transaction's outputs for owned ones inside the tracked range.
pub fn scan_transaction(ctx: &ScanContext<'_>, tx: &Transaction) -> Vec<FoundOutput> {
    let Some(tx_pub_key) = tx.tx_pub_key() else {
        return Vec::new();
    };
    let mut found = Vec::new();
    for (i, output) in tx.prefix.outputs.iter().enumerate() {
        let index = i as u32;
        let amount = match &tx.rct {
            Some(base) => match base.encrypted_amounts.get(i) {
                Some(&encrypted) => ScanAmount::Encrypted(encrypted),
                None => continue,
            },
            None => ScanAmount::Clear(output.amount),
        };
        let Some(received) =
            ctx.account
                .scan_output(&tx_pub_key, index, &output.key, output.view_tag, amount)
        else {
            continue;
        };
        if !ctx.config.tracks_amount(received.amount) {
            debug!(
                "ignoring output {} of amount {} outside the tracked range",
                index, received.amount
            );
            continue;
        }
        found.push(FoundOutput {
            output_index: index,
            amount: received.amount,
            mask: received.mask,
            key_image: ctx.account.key_image(&output.key, &tx_pub_key, index),
            subaddress: received.subaddress,
            output_key: output.key,
        });
    }
    found
}

/// What applying one transaction changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxEffect {
    pub received: u64,
    pub spent: u64,
}

/// Apply a confirmed transaction at `height`.
pub fn process_tx(
    state: &mut WalletState,
    ctx: &ScanContext<'_>,
    chain_tx: &ChainTx,
    height: u64,
    timestamp: u64,
) -> Result<TxEffect, WalletError> {
    let tx = &chain_tx.tx;
    let txid = chain_tx.hash;
    let mut effect = TxEffect::default();

    // Outputs.
    let found = scan_transaction(ctx, tx);
    if !found.is_empty() && chain_tx.output_indices.len() != tx.prefix.outputs.len() {
        return Err(WalletError::MalformedInput(format!(
            "tx {} has {} outputs but {} global indices",
            txid,
            tx.prefix.outputs.len(),
            chain_tx.output_indices.len()
        )));
    }
    let tx_pub_key = tx.tx_pub_key().unwrap_or(Hash32::ZERO);
    for output in found {
        let mut record = TransferRecord::new(txid, output.output_index, height);
        record.global_output_index = chain_tx.output_indices[output.output_index as usize];
        record.amount = output.amount;
        record.mask = output.mask;
        record.output_key = output.output_key;
        record.tx_pub_key = tx_pub_key;
        record.key_image = output.key_image;
        record.subaddress = output.subaddress;
        record.rct = tx.prefix.version >= TX_VERSION_RCT;
        record.unlock_time = tx.prefix.unlock_time;
        record.coinbase = chain_tx.coinbase;
        if state.ledger.record_output(record)?.is_some() {
            effect.received = effect.received.saturating_add(output.amount);
        }
    }

    // Inputs: our key images are spends, our global indices are ring uses.
    let mut rings = Vec::with_capacity(tx.prefix.inputs.len());
    for input in &tx.prefix.inputs {
        let ring = relative_to_absolute(&input.key_offsets).ok_or_else(|| {
            WalletError::MalformedInput(format!("tx {} has overflowing ring offsets", txid))
        })?;
        if let Some(index) = state.ledger.find_by_key_image(&input.key_image) {
            state.ledger.mark_spent(index, height)?;
            let amount = state.ledger.get(index).map_or(0, |t| t.amount);
            effect.spent = effect.spent.saturating_add(amount);
        }
        for &global_index in &ring {
            if let Some(index) = state.ledger.find_by_global_index(global_index) {
                state.ledger.add_use(index, height, txid)?;
            }
        }
        rings.push((input.key_image, ring));
    }

    if effect.spent > 0 {
        let fee = tx.fee();
        let amount_out = effect
            .spent
            .saturating_sub(effect.received)
            .saturating_sub(fee);
        if state.unconfirmed.remove(&txid).is_some() {
            info!("outgoing tx {} confirmed at height {}", txid.short(), height);
        }
        state.confirmed.insert(
            txid,
            ConfirmedSpend {
                txid,
                amount_in: effect.spent,
                amount_out,
                change: effect.received,
                fee,
                timestamp,
                rings,
                height,
            },
        );
    }
    state.pool_payments.retain(|p| p.txid != txid);
    state.seen_pool.remove(&txid);

    Ok(effect)
}

/// Apply a block on top of the chain history.
pub fn process_block(
    state: &mut WalletState,
    ctx: &ScanContext<'_>,
    block: &BlockEntry,
) -> Result<TxEffect, WalletError> {
    let mut total = TxEffect::default();
    for chain_tx in std::iter::once(&block.miner_tx).chain(&block.txs) {
        let effect = process_tx(state, ctx, chain_tx, block.height, block.timestamp)?;
        total.received = total.received.saturating_add(effect.received);
        total.spent = total.spent.saturating_add(effect.spent);
    }
    state.chain.push(block.hash);
    if total.received > 0 || total.spent > 0 {
        debug!(
            "block {}: received {}, spent {}",
            block.height, total.received, total.spent
        );
    }
    Ok(total)
}

//! Blockchain synchronization engine.
//!
//! Pulls hashes (below the refresh height) or full blocks from a
//! [`ChainSource`], matches them against the chain history, repairs reorgs
//! through the ledger's undo log, and tracks the pool for outgoing and
//! incoming transactions. Each fetched batch is applied to a staged copy of
//! the state that replaces the live one only when the batch succeeded.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use shroud_types::BlockHash;

use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::refresh::StopFlag;
use crate::scanner::{self, ScanContext};
use crate::source::{BlocksResponse, ChainSource, HashesResponse, SourceError};
use crate::state::{PoolPayment, UnconfirmedState, WalletState};

/// Delay between attempts of a failed fetch, multiplied by the attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Hashes kept below the refresh height after a fast sync.
const FAST_SYNC_KEEP: u64 = 10;

/// Parameters of one synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    /// Blocks below this height are fetched as hashes only.
    pub start_height: u64,
    pub allow_pool_check: bool,
    /// Skip pool transactions fetched by an earlier pass.
    pub allow_incremental: bool,
    /// Upper bound on blocks applied by this pass.
    pub max_blocks: u64,
}

impl SyncRequest {
    pub fn from_config(config: &WalletConfig) -> Self {
        Self {
            start_height: config.refresh_from_height,
            allow_pool_check: true,
            allow_incremental: true,
            max_blocks: config.max_blocks_per_pass,
        }
    }
}

/// Result of a synchronization pass. Progress made before an error is kept.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    /// Blocks (or hashes, in fast mode) appended to the chain history.
    pub blocks_fetched: u64,
    pub received_money: bool,
    pub error: Option<WalletError>,
}

impl SyncOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// The error, if any, or the outcome itself.
    pub fn into_result(mut self) -> Result<Self, WalletError> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

/// What to do with an entry of a daemon response.
enum Attach {
    /// Already in the history.
    Known,
    /// Extends the history (after any reorg repair).
    Append,
}

/// Result of applying one batch to a staged state.
#[derive(Debug, Default)]
struct BatchResult {
    added: u64,
    received: bool,
    detached: bool,
    cancelled: bool,
}

/// One synchronization engine per pass.
pub struct SyncEngine<'a, S> {
    source: &'a S,
    scan: ScanContext<'a>,
    stop: &'a StopFlag,
    /// Unix seconds, for pool staleness.
    now: u64,
}

impl<'a, S: ChainSource> SyncEngine<'a, S> {
    pub fn new(source: &'a S, scan: ScanContext<'a>, stop: &'a StopFlag, now: u64) -> Self {
        Self { source, scan, stop, now }
    }

    fn config(&self) -> &WalletConfig {
        self.scan.config
    }

    /// Bring `state` up to the source's tip.
    pub async fn synchronize(&self, state: &mut WalletState, request: SyncRequest) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        info!(
            "refresh from height {} (start {}, max {} blocks)",
            state.chain.size(),
            request.start_height,
            request.max_blocks
        );

        if state.chain.size() < request.start_height {
            match self.fast_sync(state, request.start_height).await {
                Ok(added) => outcome.blocks_fetched += added,
                Err(e) => {
                    outcome.error = Some(e);
                    return outcome;
                }
            }
        }

        if let Err(e) = self.pull_blocks(state, &request, &mut outcome).await {
            outcome.error = Some(e);
        }

        if outcome.error.is_none() && request.allow_pool_check {
            if let Err(e) = self.sync_pool(state, request.allow_incremental).await {
                warn!("pool sync failed: {}", e);
                outcome.error = Some(e);
            }
        }

        match &outcome.error {
            None => info!(
                "refresh done at height {}: {} blocks, received money: {}",
                state.chain.size(),
                outcome.blocks_fetched,
                outcome.received_money
            ),
            Some(e) => warn!(
                "refresh stopped at height {} after {} blocks: {}",
                state.chain.size(),
                outcome.blocks_fetched,
                e
            ),
        }
        outcome
    }

    /// Run `fetch` up to `refresh_retries` times while it fails transiently.
    async fn retry<T, F, Fut>(&self, what: &str, mut fetch: F) -> Result<T, WalletError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let attempts = self.config().refresh_retries.max(1);
        let mut attempt = 1;
        loop {
            match fetch().await {
                Ok(value) => return Ok(value),
                Err(SourceError::Unavailable(msg)) if attempt < attempts => {
                    warn!("{} failed (attempt {}/{}): {}", what, attempt, attempts, msg);
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Decide how the entry at `height` fits the staged history, repairing
    /// a reorg when it replaces a known block.
    fn attach_point(
        &self,
        staged: &mut WalletState,
        first: bool,
        height: u64,
        hash: &BlockHash,
        result: &mut BatchResult,
    ) -> Result<Attach, WalletError> {
        if height == 0 {
            if let Some(genesis) = staged.chain.genesis() {
                if genesis != *hash {
                    return Err(WalletError::Consistency(format!(
                        "genesis mismatch: have {}, source has {}",
                        genesis, hash
                    )));
                }
                return Ok(Attach::Known);
            }
        }
        if height < staged.chain.offset() {
            return Ok(Attach::Known);
        }
        if let Some(known) = staged.chain.get(height) {
            if known == hash {
                return Ok(Attach::Known);
            }
            if first {
                return Err(WalletError::MalformedInput(format!(
                    "response splits from our chain at its first block ({})",
                    height
                )));
            }
            warn!(
                "reorg at height {}: replacing {} with {}",
                height,
                known.short(),
                hash.short()
            );
            let summary = staged.detach(height)?;
            debug!(
                "detached {} transfers, {} spends, {} uses",
                summary.removed, summary.unspent, summary.uses
            );
            result.detached = true;
        }
        if height != staged.chain.size() {
            return Err(WalletError::MalformedInput(format!(
                "gap in response: block {} does not follow height {}",
                height,
                staged.chain.size()
            )));
        }
        Ok(Attach::Append)
    }

    /// Fetch hashes only, up to `stop_height`.
    async fn fast_sync(&self, state: &mut WalletState, stop_height: u64) -> Result<u64, WalletError> {
        let mut added = 0;
        while state.chain.size() < stop_height {
            if self.stop.is_stopped() {
                return Err(WalletError::Cancelled);
            }
            let history = state.chain.short_history();
            let start = state.chain.size();
            let response: HashesResponse = self
                .retry("get_hashes", || self.source.get_hashes(&history, start))
                .await?;

            let mut staged = state.clone();
            let mut result = BatchResult::default();
            for (i, hash) in response.hashes.iter().enumerate() {
                let height = response.start_height + i as u64;
                if height >= stop_height {
                    break;
                }
                if let Attach::Append = self.attach_point(&mut staged, i == 0, height, hash, &mut result)? {
                    staged.chain.push(*hash);
                    result.added += 1;
                }
            }
            *state = staged;
            added += result.added;
            debug!("fast sync: {} hashes, chain at {}", result.added, state.chain.size());
            if result.added == 0 {
                break;
            }
        }

        let trimmed = state.chain.trim(stop_height.saturating_sub(FAST_SYNC_KEEP));
        if trimmed > 0 {
            state.ledger.forget_undo_below(state.chain.offset());
            debug!("trimmed {} hashes below height {}", trimmed, state.chain.offset());
        }
        Ok(added)
    }

    /// Fetch and apply full blocks until the tip, the block budget or a stop.
    async fn pull_blocks(
        &self,
        state: &mut WalletState,
        request: &SyncRequest,
        outcome: &mut SyncOutcome,
    ) -> Result<(), WalletError> {
        let mut applied = 0u64;
        loop {
            if applied >= request.max_blocks {
                debug!("block budget of {} reached", request.max_blocks);
                return Ok(());
            }
            if self.stop.is_stopped() {
                return Err(WalletError::Cancelled);
            }
            let history = state.chain.short_history();
            let start = state.chain.size();
            let max = self
                .config()
                .blocks_per_request
                .min(request.max_blocks - applied);
            let response: BlocksResponse = self
                .retry("get_blocks", || self.source.get_blocks(&history, start, max))
                .await?;

            let mut staged = state.clone();
            let result = self.apply_blocks(&mut staged, &response)?;
            *state = staged;
            applied += result.added;
            outcome.blocks_fetched += result.added;
            outcome.received_money |= result.received;
            if result.cancelled {
                return Err(WalletError::Cancelled);
            }
            if state.chain.size() >= response.current_height {
                return Ok(());
            }
            if result.added == 0 && !result.detached {
                return Err(WalletError::MalformedInput(format!(
                    "source reports height {} but sent nothing past {}",
                    response.current_height,
                    state.chain.size()
                )));
            }
        }
    }

    fn apply_blocks(
        &self,
        staged: &mut WalletState,
        response: &BlocksResponse,
    ) -> Result<BatchResult, WalletError> {
        let mut result = BatchResult::default();
        for (i, block) in response.blocks.iter().enumerate() {
            let height = response.start_height + i as u64;
            if block.height != height {
                return Err(WalletError::MalformedInput(format!(
                    "block at position {} claims height {}, expected {}",
                    i, block.height, height
                )));
            }
            if self.stop.is_stopped() {
                result.cancelled = true;
                break;
            }
            if let Attach::Known = self.attach_point(staged, i == 0, height, &block.hash, &mut result)? {
                continue;
            }
            if let Some((_, top)) = staged.chain.top() {
                if block.prev_hash != top {
                    return Err(WalletError::MalformedInput(format!(
                        "block {} does not build on {}",
                        height,
                        top.short()
                    )));
                }
            }
            let effect = scanner::process_block(staged, &self.scan, block)?;
            result.added += 1;
            result.received |= effect.received > 0;
        }
        Ok(result)
    }

    /// Reconcile unconfirmed spends and incoming payments with the pool.
    async fn sync_pool(&self, state: &mut WalletState, allow_incremental: bool) -> Result<(), WalletError> {
        let pool: HashSet<_> = self
            .retry("get_pool_hashes", || self.source.get_pool_hashes())
            .await?
            .into_iter()
            .collect();

        let stale_after = self.config().pool_stale_after.as_secs();
        let mut released = Vec::new();
        for spend in state.unconfirmed.values_mut() {
            if pool.contains(&spend.txid) {
                spend.state = UnconfirmedState::Pending;
                continue;
            }
            match spend.state {
                UnconfirmedState::Pending => {
                    warn!("tx {} is no longer in the pool", spend.txid.short());
                    spend.state = UnconfirmedState::PendingNotInPool { missing_since: self.now };
                }
                UnconfirmedState::PendingNotInPool { missing_since }
                    if self.now.saturating_sub(missing_since) > stale_after =>
                {
                    warn!(
                        "tx {} missing for over {}s, marking failed",
                        spend.txid.short(),
                        stale_after
                    );
                    spend.state = UnconfirmedState::Failed;
                    released.extend(spend.selected_transfers.iter().copied());
                }
                _ => {}
            }
        }
        for index in released {
            let pending = state
                .ledger
                .get(index)
                .is_some_and(|t| t.is_spent() && t.spent_height() == 0);
            if pending {
                state.ledger.mark_unspent(index)?;
            }
        }

        let before = state.pool_payments.len();
        state.pool_payments.retain(|p| pool.contains(&p.txid));
        if state.pool_payments.len() < before {
            debug!("dropped {} pool payments", before - state.pool_payments.len());
        }
        state.seen_pool.retain(|h| pool.contains(h));

        let wanted: Vec<_> = pool
            .iter()
            .filter(|h| !state.unconfirmed.contains_key(h))
            .filter(|h| !(allow_incremental && state.seen_pool.contains(h)))
            .copied()
            .collect();
        if wanted.is_empty() {
            return Ok(());
        }
        let txs = self
            .retry("get_pool_txs", || self.source.get_pool_txs(&wanted))
            .await?;
        for chain_tx in txs {
            for found in scanner::scan_transaction(&self.scan, &chain_tx.tx) {
                let known = state
                    .pool_payments
                    .iter()
                    .any(|p| p.txid == chain_tx.hash && p.output_index == found.output_index);
                if !known {
                    info!("incoming pool payment of {} in {}", found.amount, chain_tx.hash.short());
                    state.pool_payments.push(PoolPayment {
                        txid: chain_tx.hash,
                        output_index: found.output_index,
                        amount: found.amount,
                        subaddress: found.subaddress,
                        seen_at: self.now,
                    });
                }
            }
            state.seen_pool.insert(chain_tx.hash);
        }
        Ok(())
    }
}

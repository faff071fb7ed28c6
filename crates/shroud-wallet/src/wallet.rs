//! Main Wallet struct.
//!
//! Ties together the chain source, the owned-output ledger, synchronization,
//! coin selection, decoy sampling and transaction construction behind one
//! async API. Every operation that reads or mutates the wallet state takes
//! the refresh lock, so selection never overlaps a reorg repair.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use shroud_tx::crypto::AccountCrypto;
use shroud_tx::fee::{TxShape, DEFAULT_EXTRA_SIZE};
use shroud_tx::split::{merge_destinations, split_amounts};
use shroud_tx::{
    check_outputs, verify_inputs, AccountAddress, Destination, DustPolicy, FeePolicy, FeePriority,
    GammaPicker, PendingSpend, ProofType, RingMember, SourceEntry, TransactionBuilder, TxCrypto, TxError,
};
use shroud_types::{fork_rules, ForkRules, KeyImage, TxHash};
use tokio::sync::Mutex;

use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::ledger::TransferRecord;
use crate::refresh::{PauseControl, StopFlag};
use crate::scanner::ScanContext;
use crate::selection::{pick_preferred_inputs, select_transfers, Candidate, SelectionPolicy};
use crate::source::ChainSource;
use crate::state::{UnconfirmedSpend, WalletState};
use crate::sync::{SyncEngine, SyncOutcome, SyncRequest};

/// Most transactions one payment is split into.
const MAX_SPLITS: usize = 32;

/// Selection and build attempts per transaction while the fee settles.
const MAX_FEE_ROUNDS: usize = 8;

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Balance of one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    /// Unspent outputs, frozen and locked ones included, plus change of
    /// pending outgoing transactions.
    pub total: u64,
    /// Outputs spendable right now.
    pub unlocked: u64,
}

/// A key image with its ownership proof, as exchanged with a view-only wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedKeyImage {
    pub key_image: KeyImage,
    #[serde(with = "shroud_types::serde_hex")]
    pub proof: Vec<u8>,
}

/// Result of a key image import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyImageImport {
    /// Amount of imported outputs the chain or pool has seen spent.
    pub spent: u64,
    pub unspent: u64,
}

/// Parameters shared by every transaction of one `create_transaction` call.
struct BuildPlan<'a> {
    rules: ForkRules,
    policy: FeePolicy,
    ring_size: usize,
    picker: &'a GammaPicker,
    account: u32,
    change: AccountAddress,
}

impl BuildPlan<'_> {
    fn shape(&self, inputs: usize, destinations: usize) -> TxShape {
        TxShape {
            inputs: inputs.max(1),
            outputs: (destinations + 1).max(2),
            ring_size: self.ring_size,
            extra_size: DEFAULT_EXTRA_SIZE,
            proof: ProofType::for_fork(&self.rules),
            view_tags: self.rules.view_tags,
        }
    }
}

/// High-level wallet over a chain source.
pub struct Wallet<S> {
    source: S,
    tx_crypto: Arc<dyn TxCrypto>,
    account: Arc<dyn AccountCrypto>,
    config: WalletConfig,
    /// The refresh lock.
    state: Mutex<WalletState>,
    stop: StopFlag,
    pause: PauseControl,
    clock: Clock,
}

impl<S: ChainSource> Wallet<S> {
    /// Create an empty wallet. `crypto` holds the account keys.
    pub fn new<C>(source: S, crypto: Arc<C>, config: WalletConfig) -> Result<Self, WalletError>
    where
        C: TxCrypto + AccountCrypto + 'static,
    {
        config.validate()?;
        Ok(Self {
            source,
            tx_crypto: crypto.clone(),
            account: crypto,
            config,
            state: Mutex::new(WalletState::new()),
            stop: StopFlag::new(),
            pause: PauseControl::default(),
            clock: Arc::new(unix_now),
        })
    }

    /// Start from a previously saved state.
    pub fn with_state(mut self, state: WalletState) -> Self {
        self.state = Mutex::new(state);
        self
    }

    /// Replace the wall clock (unix seconds).
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn address(&self, major: u32, minor: u32) -> AccountAddress {
        self.account.address(major, minor)
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn pause_control(&self) -> &PauseControl {
        &self.pause
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }

    /// Copy of the current state, for persistence.
    pub async fn state(&self) -> WalletState {
        self.state.lock().await.clone()
    }

    /// Chain history size: the height of the next block to scan.
    pub async fn height(&self) -> u64 {
        self.state.lock().await.chain.size()
    }

    pub async fn transfers(&self) -> Vec<TransferRecord> {
        self.state.lock().await.ledger.transfers().to_vec()
    }

    /// Ring used by an outgoing spend of `key_image`.
    pub async fn ring_for(&self, key_image: &KeyImage) -> Option<Vec<u64>> {
        self.state.lock().await.ring_for(key_image)
    }

    // ── Synchronization ──────────────────────────────────────────────────

    async fn run_sync(&self, request: SyncRequest, reset_stop: bool) -> SyncOutcome {
        let mut state = self.state.lock().await;
        // Only once the lock is held, so a stop aimed at a running pass
        // still reaches it.
        if reset_stop {
            self.stop.reset();
        }
        let scan = ScanContext {
            account: self.account.as_ref(),
            config: &self.config,
        };
        SyncEngine::new(&self.source, scan, &self.stop, self.now())
            .synchronize(&mut state, request)
            .await
    }

    /// Synchronize, fetching only hashes below `start_height`. The
    /// background worker is paused for the duration.
    pub async fn sync(&self, start_height: u64) -> SyncOutcome {
        let _pause = self.pause.pause();
        let request = SyncRequest {
            start_height,
            ..SyncRequest::from_config(&self.config)
        };
        self.run_sync(request, true).await
    }

    /// Synchronize from the configured refresh height.
    pub async fn refresh(&self) -> SyncOutcome {
        self.sync(self.config.refresh_from_height).await
    }

    /// One pass of the background worker.
    pub(crate) async fn background_refresh(&self) -> SyncOutcome {
        self.run_sync(SyncRequest::from_config(&self.config), false).await
    }

    /// Abort a running synchronization at the next block.
    pub fn stop(&self) {
        self.stop.stop();
    }

    // ── Balance ──────────────────────────────────────────────────────────

    pub async fn balance(&self, account: u32) -> Balance {
        let state = self.state.lock().await;
        let chain_size = state.chain.size();
        let now = self.now();
        let mut balance = Balance::default();
        for (_, t) in state.ledger.iter() {
            if t.is_spent() || t.subaddress.0 != account {
                continue;
            }
            balance.total = balance.total.saturating_add(t.amount);
            if !t.frozen && t.is_unlocked(chain_size, now, self.config.min_confirmations) {
                balance.unlocked = balance.unlocked.saturating_add(t.amount);
            }
        }
        for spend in state.live_unconfirmed() {
            if spend.subaddr_account == account {
                balance.total = balance.total.saturating_add(spend.change);
            }
        }
        balance
    }

    // ── Transaction creation ─────────────────────────────────────────────

    fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            dust_threshold: self.config.dust_threshold,
            dust_sweep_threshold: self.config.dust_sweep_threshold,
            sweep_dust: self.config.sweep_dust,
        }
    }

    async fn rules(&self) -> Result<ForkRules, WalletError> {
        let mut rules = fork_rules(self.source.fork_version().await?);
        if let Some(cap) = self.config.max_tx_weight {
            rules.max_tx_weight = rules.max_tx_weight.min(cap);
        }
        Ok(rules)
    }

    async fn fee_policy(&self, rules: &ForkRules, priority: FeePriority) -> Result<FeePolicy, WalletError> {
        let quote = self.source.fee_estimate().await?;
        Ok(FeePolicy::for_fork(rules, quote.fee, quote.quantization_mask)
            .with_priority(priority)
            .with_tiered_fees(quote.fees))
    }

    /// Fee of a transaction with the given number of inputs and destinations.
    pub async fn estimate_fee(
        &self,
        inputs: usize,
        destinations: usize,
        priority: FeePriority,
    ) -> Result<u64, WalletError> {
        let rules = self.rules().await?;
        let policy = self.fee_policy(&rules, priority).await?;
        let shape = TxShape {
            inputs: inputs.max(1),
            outputs: (destinations + 1).max(2),
            ring_size: rules.effective_ring_size(self.config.ring_size),
            extra_size: DEFAULT_EXTRA_SIZE,
            proof: ProofType::for_fork(&rules),
            view_tags: rules.view_tags,
        };
        Ok(policy.estimate(&shape)?)
    }

    fn prepare_destinations(&self, destinations: &[Destination]) -> Result<Vec<Destination>, WalletError> {
        if destinations.is_empty() {
            return Err(WalletError::ConsensusRule("no destinations".into()));
        }
        if let Some(index) = destinations.iter().position(|d| d.amount == 0) {
            return Err(WalletError::ConsensusRule(format!(
                "destination {} has a zero amount",
                index
            )));
        }
        if self.config.merge_destinations {
            Ok(merge_destinations(destinations)?)
        } else {
            Ok(destinations.to_vec())
        }
    }

    /// Outputs of `account` that may be spent now.
    fn candidates(
        &self,
        state: &WalletState,
        account: u32,
        subaddr_indices: &BTreeSet<u32>,
        now: u64,
    ) -> Vec<Candidate> {
        let chain_size = state.chain.size();
        state
            .ledger
            .iter()
            .filter(|(_, t)| {
                !t.is_spent()
                    && !t.frozen
                    && t.spendable_key_image().is_some()
                    && t.subaddress.0 == account
                    && (subaddr_indices.is_empty() || subaddr_indices.contains(&t.subaddress.1))
                    && self.config.tracks_amount(t.amount)
                    && t.is_unlocked(chain_size, now, self.config.min_confirmations)
            })
            .map(|(i, t)| Candidate::from_record(i, t))
            .collect()
    }

    /// Build unsigned transactions paying `destinations` from `account`.
    ///
    /// When one transaction would be too big, the payment is split into more
    /// transactions, up to a fixed limit. Sign the result with a
    /// [`crate::Signer`] before [`Wallet::commit`].
    pub async fn create_transaction(
        &self,
        destinations: &[Destination],
        priority: FeePriority,
        account: u32,
        subaddr_indices: &BTreeSet<u32>,
    ) -> Result<Vec<PendingSpend>, WalletError> {
        let destinations = self.prepare_destinations(destinations)?;
        let state = self.state.lock().await;
        let now = self.now();

        let rules = self.rules().await?;
        let policy = self.fee_policy(&rules, priority).await?;
        let distribution = self.source.get_output_distribution().await?;
        let picker = GammaPicker::new(distribution.offsets)?;
        let plan = BuildPlan {
            rules,
            policy,
            ring_size: rules.effective_ring_size(self.config.ring_size),
            picker: &picker,
            account,
            change: self.account.address(account, 0),
        };
        let candidates = self.candidates(&state, account, subaddr_indices, now);
        debug!(
            "creating transaction: {} destination(s), {} candidate output(s), ring size {}",
            destinations.len(),
            candidates.len(),
            plan.ring_size
        );

        let mut rng = StdRng::from_entropy();
        for num_tx in 1..=MAX_SPLITS {
            let parts = split_amounts(&destinations, num_tx);
            match self
                .build_parts(&state, &plan, &parts, candidates.clone(), &mut rng)
                .await
            {
                Ok(txs) => {
                    info!(
                        "created {} transaction(s), fees {:?}",
                        txs.len(),
                        txs.iter().map(|t| t.fee).collect::<Vec<_>>()
                    );
                    return Ok(txs);
                }
                Err(WalletError::Tx(TxError::TooBig { .. } | TxError::TooManyOutputs { .. })) => {
                    debug!("{} transaction(s) do not fit, splitting further", num_tx);
                }
                Err(e) => return Err(e),
            }
        }
        Err(WalletError::ConsensusRule(format!(
            "payment does not fit in {} transactions",
            MAX_SPLITS
        )))
    }

    async fn build_parts(
        &self,
        state: &WalletState,
        plan: &BuildPlan<'_>,
        parts: &[Vec<Destination>],
        mut pool: Vec<Candidate>,
        rng: &mut StdRng,
    ) -> Result<Vec<PendingSpend>, WalletError> {
        let mut built = Vec::with_capacity(parts.len());
        for part in parts.iter().filter(|p| !p.is_empty()) {
            let pending = self.build_one(state, plan, part, &pool, rng).await?;
            pool.retain(|c| !pending.selected_transfers.contains(&c.index));
            built.push(pending);
        }
        Ok(built)
    }

    /// Select inputs and build one transaction, raising the fee target
    /// until the selection covers what the builder charges.
    async fn build_one(
        &self,
        state: &WalletState,
        plan: &BuildPlan<'_>,
        part: &[Destination],
        pool: &[Candidate],
        rng: &mut StdRng,
    ) -> Result<PendingSpend, WalletError> {
        let part_total = part
            .iter()
            .try_fold(0u64, |acc, d| acc.checked_add(d.amount))
            .ok_or(TxError::Overflow("destination total"))?;
        let selection_policy = self.selection_policy();
        let mut fee = plan.policy.estimate(&plan.shape(1, part.len()))?;

        for round in 0..MAX_FEE_ROUNDS {
            let needed = part_total
                .checked_add(fee)
                .ok_or(TxError::Overflow("amount plus fee"))?;
            let preferred = if pool.len() > 1 {
                pick_preferred_inputs(needed, pool)
            } else {
                None
            };
            let selection = match preferred {
                Some(selection) => selection,
                None => select_transfers(needed, pool, &selection_policy)?,
            };

            let estimate = plan.policy.estimate(&plan.shape(selection.selected.len(), part.len()))?;
            if selection.total < part_total.saturating_add(estimate) {
                debug!("round {}: fee target {} -> {}", round, fee, estimate);
                fee = estimate;
                continue;
            }

            let sources = self.ring_sources(state, plan, &selection.selected, rng).await?;
            let minors: BTreeSet<u32> = selection
                .selected
                .iter()
                .filter_map(|&i| state.ledger.get(i))
                .map(|t| t.subaddress.1)
                .collect();
            let built = TransactionBuilder::new(self.tx_crypto.as_ref(), plan.rules)
                .add_sources(sources)
                .add_destinations(part)
                .set_change_address(plan.change)
                .set_fee_policy(plan.policy.clone())
                .set_dust(self.config.dust_threshold, DustPolicy::AddToFee)
                .set_subaddr(plan.account, minors)
                .build(rng);
            match built {
                Ok(pending) => return Ok(pending),
                Err(TxError::InsufficientInputs { need, .. }) => {
                    let next = need.saturating_sub(part_total).max(fee.saturating_add(1));
                    debug!("round {}: builder needs {}, fee target {} -> {}", round, need, fee, next);
                    fee = next;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(WalletError::InsufficientFunds {
            available: pool.iter().fold(0u64, |acc, c| acc.saturating_add(c.amount)),
            requested: part_total.saturating_add(fee),
        })
    }

    /// Hide each selected output in a ring of decoys fetched from the source.
    async fn ring_sources(
        &self,
        state: &WalletState,
        plan: &BuildPlan<'_>,
        selected: &[usize],
        rng: &mut StdRng,
    ) -> Result<Vec<SourceEntry>, WalletError> {
        let mut rings = Vec::with_capacity(selected.len());
        let mut wanted = Vec::with_capacity(selected.len() * plan.ring_size);
        for &index in selected {
            let record = state.ledger.get(index).ok_or_else(|| {
                WalletError::Consistency(format!("selected transfer {} is missing", index))
            })?;
            let (ring, real_position) =
                plan.picker
                    .build_ring(record.global_output_index, plan.ring_size, rng)?;
            debug!(
                "ring for transfer {} (global {}): {:?}",
                index, record.global_output_index, ring
            );
            wanted.extend_from_slice(&ring);
            rings.push((index, record, ring, real_position));
        }

        let members = self.source.get_outs(&wanted).await?;
        if members.len() != wanted.len() {
            return Err(WalletError::MalformedInput(format!(
                "asked for {} ring members, got {}",
                wanted.len(),
                members.len()
            )));
        }

        let mut members = members.into_iter();
        let mut sources = Vec::with_capacity(rings.len());
        for (index, record, ring, real_position) in rings {
            let ring_members: Vec<RingMember> = members.by_ref().take(ring.len()).collect();
            if !ring_members.iter().map(|m| m.global_index).eq(ring.iter().copied()) {
                return Err(WalletError::MalformedInput(
                    "ring members do not match the requested indices".into(),
                ));
            }
            if ring_members.get(real_position).map(|m| m.key) != Some(record.output_key) {
                return Err(WalletError::MalformedInput(format!(
                    "source returned a different key for output {}",
                    record.global_output_index
                )));
            }
            sources.push(SourceEntry {
                ring: ring_members,
                real_position,
                real_output_key: record.output_key,
                real_tx_pub_key: record.tx_pub_key,
                real_output_in_tx_index: record.internal_output_index,
                amount: record.amount,
                mask: record.mask,
                rct: record.rct,
                key_image: record.spendable_key_image(),
                transfer_index: index,
            });
        }
        Ok(sources)
    }

    // ── Commit ───────────────────────────────────────────────────────────

    /// Submit a signed transaction and mark its inputs spent.
    pub async fn commit(&self, pending: &PendingSpend) -> Result<TxHash, WalletError> {
        if !pending.is_signed() {
            return Err(WalletError::MalformedInput("transaction is not signed".into()));
        }
        pending
            .verify()
            .map_err(|errors| WalletError::MalformedInput(errors.join("; ")))?;
        check_outputs(self.tx_crypto.as_ref(), pending)?;
        verify_inputs(self.tx_crypto.as_ref(), pending)?;
        let spend = UnconfirmedSpend::from_pending(pending, self.now())?;

        let mut state = self.state.lock().await;
        if pending.selected_transfers.len() != pending.key_images.len() {
            return Err(WalletError::MalformedInput(
                "selected transfers and key images differ in number".into(),
            ));
        }
        for (&index, key_image) in pending.selected_transfers.iter().zip(&pending.key_images) {
            let record = state.ledger.get(index).ok_or_else(|| {
                WalletError::MalformedInput(format!("no transfer at index {}", index))
            })?;
            if record.is_spent() {
                return Err(WalletError::MalformedInput(format!(
                    "transfer {} is already spent",
                    index
                )));
            }
            if record.spendable_key_image() != Some(*key_image) {
                return Err(WalletError::MalformedInput(format!(
                    "key image of input {} does not match transfer {}",
                    key_image.short(),
                    index
                )));
            }
        }

        let txid = pending.tx_hash();
        self.source.submit_transaction(&pending.tx).await?;
        for &index in &pending.selected_transfers {
            state.ledger.mark_spent_pending(index)?;
        }
        info!(
            "committed tx {}: sent {}, fee {}, change {}",
            txid, spend.amount_out, spend.fee, spend.change
        );
        state.unconfirmed.insert(txid, spend);
        Ok(txid)
    }

    // ── Freezing ─────────────────────────────────────────────────────────

    /// Keep the output with `key_image` out of selection and the unlocked
    /// balance.
    pub async fn freeze(&self, key_image: &KeyImage) -> Result<(), WalletError> {
        let mut state = self.state.lock().await;
        let index = find_transfer(&state, key_image)?;
        state.ledger.freeze(index)?;
        debug!("froze transfer {} ({})", index, key_image.short());
        Ok(())
    }

    pub async fn thaw(&self, key_image: &KeyImage) -> Result<(), WalletError> {
        let mut state = self.state.lock().await;
        let index = find_transfer(&state, key_image)?;
        state.ledger.thaw(index)?;
        debug!("thawed transfer {} ({})", index, key_image.short());
        Ok(())
    }

    pub async fn is_frozen(&self, key_image: &KeyImage) -> Result<bool, WalletError> {
        let state = self.state.lock().await;
        state.ledger.is_frozen(find_transfer(&state, key_image)?)
    }

    // ── Key images ───────────────────────────────────────────────────────

    /// Key images with ownership proofs for every transfer from `offset`.
    pub async fn export_key_images(&self, offset: usize) -> Result<Vec<SignedKeyImage>, WalletError> {
        let state = self.state.lock().await;
        let transfers = state.ledger.transfers();
        if offset > transfers.len() {
            return Err(WalletError::MalformedInput(format!(
                "offset {} past {} transfers",
                offset,
                transfers.len()
            )));
        }
        let mut exported = Vec::with_capacity(transfers.len() - offset);
        for (i, t) in transfers.iter().enumerate().skip(offset) {
            let key_image = t.spendable_key_image().ok_or_else(|| {
                WalletError::MalformedInput(format!("transfer {} has no known key image", i))
            })?;
            let proof = self.account.key_image_proof(&key_image, &t.output_key)?;
            exported.push(SignedKeyImage { key_image, proof });
        }
        info!("exported {} key image(s) from offset {}", exported.len(), offset);
        Ok(exported)
    }

    /// Import key images for the transfers starting at `offset`.
    ///
    /// Every proof is checked before anything changes; one bad proof rejects
    /// the whole batch. Spent status comes from the chain source.
    pub async fn import_key_images(
        &self,
        offset: usize,
        signed: &[SignedKeyImage],
    ) -> Result<KeyImageImport, WalletError> {
        let mut state = self.state.lock().await;
        let len = state.ledger.len();
        if offset.checked_add(signed.len()).map_or(true, |end| end > len) {
            return Err(WalletError::MalformedInput(format!(
                "{} key images from offset {} exceed {} transfers",
                signed.len(),
                offset,
                len
            )));
        }
        for (i, ski) in signed.iter().enumerate() {
            let index = offset + i;
            let output_key = state.ledger.get(index).map(|t| t.output_key).unwrap_or_default();
            if !self
                .account
                .verify_key_image_proof(&ski.key_image, &output_key, &ski.proof)
            {
                warn!("key image proof for transfer {} does not verify", index);
                return Err(WalletError::MalformedInput(format!(
                    "key image proof for transfer {} is invalid",
                    index
                )));
            }
        }

        let images: Vec<KeyImage> = signed.iter().map(|s| s.key_image).collect();
        let statuses = self.source.key_images_spent(&images).await?;
        if statuses.len() != images.len() {
            return Err(WalletError::MalformedInput(format!(
                "spent status for {} of {} key images",
                statuses.len(),
                images.len()
            )));
        }

        let mut ledger = state.ledger.clone();
        let mut result = KeyImageImport::default();
        for (i, (key_image, status)) in images.iter().zip(&statuses).enumerate() {
            let index = offset + i;
            ledger.set_key_image(index, *key_image, false)?;
            let (spent, spent_height, amount) = ledger
                .get(index)
                .map(|t| (t.is_spent(), t.spent_height(), t.amount))
                .unwrap_or_default();
            if status.is_spent() {
                if !spent {
                    ledger.mark_spent_pending(index)?;
                }
                result.spent = result.spent.saturating_add(amount);
            } else {
                if spent && spent_height == 0 {
                    ledger.mark_unspent(index)?;
                }
                result.unspent = result.unspent.saturating_add(amount);
            }
        }
        state.ledger = ledger;
        info!(
            "imported {} key image(s): spent {}, unspent {}",
            images.len(),
            result.spent,
            result.unspent
        );
        Ok(result)
    }
}

fn find_transfer(state: &WalletState, key_image: &KeyImage) -> Result<usize, WalletError> {
    state
        .ledger
        .find_by_key_image(key_image)
        .ok_or_else(|| {
            WalletError::MalformedInput(format!("no transfer with key image {}", key_image.short()))
        })
}

//! Slot machine engine.
//!
//! Orchestrates the full spin lifecycle: validate, enqueue, submit the
//! transaction, wait for the claim block, claim the outcome, verify it
//! against the provably-fair derivation, and settle into the store while
//! emitting events at each transition.
//!
//! The engine is a cheap-clone handle; every network-touching step runs in
//! spawned tasks, so `spin` returns the spin id as soon as the spin is
//! queued. Multiple spins may be in flight at once and may settle out of
//! order; each pipeline only ever touches its own queue entry.

use crate::adapter::ChainAdapter;
use crate::errors::{ErrorCode, GameError};
use crate::evaluator::{derive_grid, evaluate, total_payout};
use crate::events::{EventBus, EventKind, SpinEvent, Subscription};
use crate::store::{GameState, GameStateStore, StateWatcher};
use crate::types::config::SlotMachineConfig;
use crate::types::spin::{
    BalanceUpdate, BetSelection, QueuedSpin, SpinOutcome, SpinPhase, SpinResult, SubmitReceipt,
    WinThresholds,
};
use crate::utils::block_wait::{BlockWait, wait_for_block};
use crate::validation::{validate_balance, validate_bet};
use kanau::processor::Processor;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tunables of one engine instance.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Delay between chain-height polls while waiting for the claim block.
    pub block_poll_interval: Duration,
    /// Delay between background balance polls.
    pub balance_poll_interval: Duration,
    /// Give up on a spin whose claim block is not reached within this
    /// window. `None` waits indefinitely, matching the claim protocol.
    pub claim_timeout: Option<Duration>,
    /// Ratio boundaries for classifying win magnitude.
    pub win_thresholds: WinThresholds,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            block_poll_interval: Duration::from_secs(1),
            balance_poll_interval: Duration::from_secs(5),
            claim_timeout: None,
            win_thresholds: WinThresholds::default(),
        }
    }
}

/// Unit of work for the spin pipeline: one queued spin to drive to a
/// terminal phase.
#[derive(Debug, Clone, Copy)]
pub struct SpinTicket {
    pub spin_id: Uuid,
}

struct EngineInner<A> {
    adapter: A,
    wallet: String,
    settings: EngineSettings,
    store: GameStateStore,
    bus: EventBus,
    config: RwLock<Option<SlotMachineConfig>>,
    /// Spin ids currently owned by a pipeline task.
    processing: Mutex<HashSet<Uuid>>,
    shutdown_tx: watch::Sender<bool>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

/// The slot machine engine. Cheap to clone; all clones share one session.
pub struct SlotEngine<A> {
    inner: Arc<EngineInner<A>>,
}

impl<A> Clone for SlotEngine<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Removes the pipeline-ownership marker when the pipeline ends, normally
/// or not.
struct ProcessingGuard<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        lock_set(self.set).remove(&self.id);
    }
}

fn lock_set(set: &Mutex<HashSet<Uuid>>) -> MutexGuard<'_, HashSet<Uuid>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock_poller(
    slot: &Mutex<Option<JoinHandle<()>>>,
) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<A: ChainAdapter + 'static> SlotEngine<A> {
    /// Build an engine around an adapter and a wallet address.
    ///
    /// The adapter is a required parameter; the caller decides whether it is
    /// a real chain client, the sandbox or a test double.
    pub fn new(adapter: A, wallet: impl Into<String>, settings: EngineSettings) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(EngineInner {
                adapter,
                wallet: wallet.into(),
                settings,
                store: GameStateStore::new(),
                bus: EventBus::new(),
                config: RwLock::new(None),
                processing: Mutex::new(HashSet::new()),
                shutdown_tx,
                poller: Mutex::new(None),
            }),
        }
    }

    /// Prepare the session: connect the adapter, fetch and validate the
    /// machine configuration, fetch the initial balance and start the
    /// background balance poller. Idempotent.
    pub async fn initialize(&self) -> Result<(), GameError> {
        {
            let config = self.inner.config.read().await;
            if config.is_some() {
                debug!("engine already initialized");
                return Ok(());
            }
        }

        self.inner.adapter.initialize().await.map_err(GameError::from)?;

        let config = self
            .inner
            .adapter
            .contract_config()
            .await
            .map_err(GameError::from)?;
        config
            .validate()
            .map_err(|e| GameError::contract(e.to_string()))?;

        let balance = self
            .inner
            .adapter
            .balance(&self.inner.wallet)
            .await
            .map_err(GameError::from)?;
        self.inner.store.set_balance(balance).await;

        *self.inner.config.write().await = Some(config);
        self.spawn_balance_poller();

        info!(wallet = %self.inner.wallet, balance, "slot engine initialized");
        Ok(())
    }

    /// Queue one spin and return its id.
    ///
    /// Validation failures surface here synchronously and leave no trace in
    /// the queue; everything after enqueueing happens in a spawned pipeline
    /// task whose progress is visible through events and the store.
    pub async fn spin(&self, bet_per_line: u64, paylines: u32) -> Result<Uuid, GameError> {
        let config = self
            .config_snapshot()
            .await
            .ok_or_else(GameError::not_initialized)?;

        let shape = validate_bet(bet_per_line, paylines, &config);
        if !shape.is_valid() {
            return Err(GameError::invalid_bet(shape.summary()));
        }
        for warning in &shape.warnings {
            debug!(warning = %warning, "bet accepted with warning");
        }

        let state = self.inner.store.snapshot().await;
        let funds = validate_balance(bet_per_line, paylines, state.balance, state.reserved_balance);
        if !funds.is_valid() {
            return Err(GameError::insufficient_balance(funds.summary()));
        }

        // Overflow was excluded by validate_bet.
        let total_bet = bet_per_line.saturating_mul(paylines as u64);
        let spin = QueuedSpin::new(bet_per_line, paylines, total_bet);
        let id = spin.id;

        self.inner.store.add_spin(spin).await;
        self.inner
            .store
            .set_bet(BetSelection {
                bet_per_line,
                paylines,
            })
            .await;
        self.inner.store.set_spinning(Some(id)).await;
        self.inner.store.clear_error().await;
        self.inner.bus.emit(&SpinEvent::Queued {
            spin_id: id,
            total_bet,
            paylines,
        });
        info!(spin_id = %id, bet_per_line, paylines, total_bet, "spin queued");

        let engine = self.clone();
        tokio::spawn(async move {
            let _ = engine.process(SpinTicket { spin_id: id }).await;
        });

        Ok(id)
    }

    /// Spin repeatedly with the currently recorded bet.
    ///
    /// Each settled spin triggers the next one until the round counter runs
    /// out or a spin fails. Returns the id of the first spin.
    pub async fn start_auto_spin(&self, rounds: u32) -> Result<Uuid, GameError> {
        if rounds == 0 {
            return Err(GameError::invalid_bet("auto-spin requires at least one round"));
        }
        let bet = self.inner.store.snapshot().await.current_bet;
        if bet.bet_per_line == 0 || bet.paylines == 0 {
            return Err(GameError::invalid_bet("no bet recorded for auto-spin"));
        }

        self.inner.store.start_auto_spin(rounds).await;
        self.inner.store.decrement_auto_spin().await;
        match self.spin(bet.bet_per_line, bet.paylines).await {
            Ok(id) => Ok(id),
            Err(error) => {
                self.inner.store.stop_auto_spin().await;
                Err(error)
            }
        }
    }

    /// Stop chaining further auto-spins. In-flight spins settle normally.
    pub async fn stop_auto_spin(&self) {
        self.inner.store.stop_auto_spin().await;
    }

    /// Record the bet the next auto-spin round will use.
    pub async fn set_bet(&self, bet_per_line: u64, paylines: u32) {
        self.inner
            .store
            .set_bet(BetSelection {
                bet_per_line,
                paylines,
            })
            .await;
    }

    /// Wipe the session state and pipeline markers.
    ///
    /// This abandons rather than cancels: in-flight adapter calls are not
    /// aborted, but their pipelines find their queue entry gone at the next
    /// store update and stop silently.
    pub async fn reset(&self) {
        self.inner.store.reset().await;
        lock_set(&self.inner.processing).clear();
        info!("engine state reset");
    }

    /// Stop the background balance poller.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        let handle = lock_poller(&self.inner.poller).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("slot engine shut down");
    }

    // -- Read side ----------------------------------------------------------

    pub async fn state(&self) -> GameState {
        self.inner.store.snapshot().await
    }

    pub async fn config(&self) -> Option<SlotMachineConfig> {
        self.config_snapshot().await
    }

    pub async fn balance(&self) -> u64 {
        self.inner.store.balance().await
    }

    pub async fn pending_spins(&self) -> Vec<QueuedSpin> {
        self.inner.store.pending_spins().await
    }

    /// The store handle, for callers that want direct snapshots.
    pub fn store(&self) -> GameStateStore {
        self.inner.store.clone()
    }

    /// The event bus, for subscriptions beyond the named ones below.
    pub fn events(&self) -> EventBus {
        self.inner.bus.clone()
    }

    // -- Subscriptions ------------------------------------------------------

    pub fn on_spin_start(
        &self,
        handler: impl Fn(&SpinEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.bus.on(EventKind::Queued, handler)
    }

    pub fn on_spin_submitted(
        &self,
        handler: impl Fn(&SpinEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.bus.on(EventKind::Submitted, handler)
    }

    pub fn on_outcome(
        &self,
        handler: impl Fn(&SpinEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.bus.on(EventKind::Completed, handler)
    }

    pub fn on_balance_update(
        &self,
        handler: impl Fn(&SpinEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.bus.on(EventKind::BalanceUpdated, handler)
    }

    pub fn on_error(
        &self,
        handler: impl Fn(&SpinEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.bus.on(EventKind::Failed, handler)
    }

    /// Await-based state change notifications; dropping the watcher
    /// unsubscribes.
    pub fn on_state_change(&self) -> StateWatcher {
        self.inner.store.subscribe()
    }

    // -- Pipeline -----------------------------------------------------------

    async fn config_snapshot(&self) -> Option<SlotMachineConfig> {
        self.inner.config.read().await.clone()
    }

    /// Drive one queued spin to a terminal phase.
    async fn drive(&self, id: Uuid) -> Result<(), GameError> {
        let config = self
            .config_snapshot()
            .await
            .ok_or_else(GameError::not_initialized)?;
        let Some(spin) = self.inner.store.spin(id).await else {
            debug!(spin_id = %id, "spin not in queue, abandoning pipeline");
            return Ok(());
        };

        // Submit.
        if !self
            .inner
            .store
            .update_spin(id, |s| s.phase = SpinPhase::Submitting)
            .await
        {
            return Ok(());
        }
        debug!(spin_id = %id, "submitting spin transaction");
        let receipt = match self
            .inner
            .adapter
            .submit_spin(spin.bet_per_line, spin.paylines, &self.inner.wallet)
            .await
        {
            Ok(receipt) => receipt,
            Err(error) => return Err(self.record_failure(id, error.into(), false).await),
        };
        if receipt.claim_block < receipt.submit_block {
            let error = GameError::contract(format!(
                "claim block {} precedes submit block {}",
                receipt.claim_block, receipt.submit_block
            ));
            return Err(self.record_failure(id, error, false).await);
        }
        if !self
            .inner
            .store
            .update_spin(id, |s| {
                s.phase = SpinPhase::Waiting {
                    receipt: receipt.clone(),
                }
            })
            .await
        {
            debug!(spin_id = %id, "spin abandoned after submit");
            return Ok(());
        }
        self.inner.store.set_waiting_for_outcome(true).await;
        self.inner.bus.emit(&SpinEvent::Submitted {
            spin_id: id,
            tx_id: receipt.tx_id.clone(),
            submit_block: receipt.submit_block,
            claim_block: receipt.claim_block,
        });
        info!(
            spin_id = %id,
            tx_id = %receipt.tx_id,
            claim_block = receipt.claim_block,
            "spin submitted"
        );

        // Wait for the claim block.
        let wait = BlockWait {
            poll_interval: self.inner.settings.block_poll_interval,
            timeout: self.inner.settings.claim_timeout,
        };
        if let Err(error) = wait_for_block(&self.inner.adapter, receipt.claim_block, &wait).await {
            let expired = error.code == ErrorCode::Timeout;
            return Err(self.record_failure(id, error, expired).await);
        }

        // Claim.
        if !self
            .inner
            .store
            .update_spin(id, |s| {
                s.phase = SpinPhase::Claiming {
                    receipt: receipt.clone(),
                }
            })
            .await
        {
            return Ok(());
        }
        debug!(spin_id = %id, bet_key = %receipt.bet_key, "claiming outcome");
        let outcome = match self.inner.adapter.claim_spin(&receipt.bet_key).await {
            Ok(outcome) => outcome,
            Err(error) => return Err(self.record_failure(id, error.into(), false).await),
        };
        if let Err(error) = verify_outcome(&spin, &receipt, &outcome, &config) {
            return Err(self.record_failure(id, error, false).await);
        }

        // Settle.
        let winnings = outcome.total_payout;
        if !self
            .inner
            .store
            .update_spin(id, |s| {
                s.phase = SpinPhase::Completed {
                    receipt: receipt.clone(),
                    outcome: outcome.clone(),
                    winnings,
                }
            })
            .await
        {
            debug!(spin_id = %id, "spin abandoned before settlement");
            return Ok(());
        }
        self.inner.bus.emit(&SpinEvent::Claimed {
            spin_id: id,
            outcome: outcome.clone(),
        });
        self.settle(&spin, outcome).await;
        Ok(())
    }

    async fn settle(&self, spin: &QueuedSpin, outcome: SpinOutcome) {
        self.inner.store.set_visible_grid(outcome.grid).await;

        let winnings = outcome.total_payout;
        let win_level = self
            .inner
            .settings
            .win_thresholds
            .classify(winnings, spin.total_bet);
        let result = SpinResult {
            spin_id: spin.id,
            total_bet: spin.total_bet,
            winnings,
            net_profit: winnings as i64 - spin.total_bet as i64,
            is_win: winnings > 0,
            win_level,
            outcome,
        };

        self.inner.store.set_waiting_for_outcome(false).await;
        self.inner.store.set_spinning(None).await;
        info!(
            spin_id = %spin.id,
            winnings,
            net_profit = result.net_profit,
            "spin completed"
        );

        self.inner.bus.emit(&SpinEvent::Completed {
            result: result.clone(),
        });
        if result.is_win {
            self.inner.bus.emit(&SpinEvent::WinTier {
                spin_id: spin.id,
                level: result.win_level,
                payout: winnings,
            });
        }

        // Reflect this spin's effect right away instead of waiting for the
        // balance poller's next tick.
        match self.inner.adapter.balance(&self.inner.wallet).await {
            Ok(balance) => self.publish_balance(balance).await,
            Err(error) => warn!(error = %error, "balance refresh after settlement failed"),
        }

        self.continue_auto_spin().await;
    }

    async fn continue_auto_spin(&self) {
        let state = self.inner.store.snapshot().await;
        if !state.auto_spin.active || state.auto_spin.remaining == 0 {
            return;
        }
        let bet = state.current_bet;
        self.inner.store.decrement_auto_spin().await;
        if let Err(error) = self.spin(bet.bet_per_line, bet.paylines).await {
            warn!(error = %error, "auto-spin halted");
            self.inner.store.stop_auto_spin().await;
            self.inner.bus.emit(&SpinEvent::Failed {
                spin_id: None,
                error,
            });
        }
    }

    /// Mark a spin failed (or expired), clear the session flags and emit the
    /// failure. Returns the error for the pipeline's own result.
    async fn record_failure(&self, id: Uuid, error: GameError, expired: bool) -> GameError {
        let phase = if expired {
            SpinPhase::Expired {
                error: error.clone(),
            }
        } else {
            SpinPhase::Failed {
                error: error.clone(),
            }
        };
        let updated = self.inner.store.update_spin(id, |s| s.phase = phase).await;
        if !updated {
            debug!(spin_id = %id, "spin vanished before its failure could be recorded");
            return error;
        }

        warn!(
            spin_id = %id,
            code = %error.code,
            recoverable = error.recoverable,
            error = %error.message,
            "spin failed"
        );
        self.inner.store.set_waiting_for_outcome(false).await;
        self.inner.store.set_spinning(None).await;
        self.inner.store.set_error(error.clone()).await;
        // A failed round ends any auto-spin run.
        self.inner.store.stop_auto_spin().await;
        self.inner.bus.emit(&SpinEvent::Failed {
            spin_id: Some(id),
            error: error.clone(),
        });
        error
    }

    async fn publish_balance(&self, current: u64) {
        let state = self.inner.store.snapshot().await;
        if state.balance == current {
            return;
        }
        let delta = current as i64 - state.balance as i64;
        self.inner.store.set_balance(current).await;

        let reserved = state.reserved_balance;
        let update = BalanceUpdate {
            current,
            reserved,
            available: current.saturating_sub(reserved),
            delta,
            last_updated: OffsetDateTime::now_utc(),
        };
        debug!(current, reserved, delta, "balance updated");
        self.inner.bus.emit(&SpinEvent::BalanceUpdated(update));
    }

    fn spawn_balance_poller(&self) {
        let mut slot = lock_poller(&self.inner.poller);
        if slot.is_some() {
            return;
        }

        let engine = self.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let interval = self.inner.settings.balance_poll_interval;
        let handle = tokio::spawn(async move {
            debug!("balance poller started");
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }

                    _ = tokio::time::sleep(interval) => {
                        match engine.inner.adapter.balance(&engine.inner.wallet).await {
                            Ok(balance) => engine.publish_balance(balance).await,
                            // Polling is best effort; the next tick retries.
                            Err(error) => warn!(error = %error, "balance poll failed"),
                        }
                    }
                }
            }
            debug!("balance poller stopped");
        });
        *slot = Some(handle);
    }
}

impl<A: ChainAdapter + 'static> Processor<SpinTicket> for SlotEngine<A> {
    type Output = ();
    type Error = GameError;

    async fn process(&self, ticket: SpinTicket) -> Result<(), GameError> {
        {
            let mut processing = lock_set(&self.inner.processing);
            if !processing.insert(ticket.spin_id) {
                debug!(spin_id = %ticket.spin_id, "spin already in the pipeline, ignoring");
                return Ok(());
            }
        }
        let _guard = ProcessingGuard {
            set: &self.inner.processing,
            id: ticket.spin_id,
        };
        self.drive(ticket.spin_id).await
    }
}

/// Check a claimed outcome against the local provably-fair reconstruction.
fn verify_outcome(
    spin: &QueuedSpin,
    receipt: &SubmitReceipt,
    outcome: &SpinOutcome,
    config: &SlotMachineConfig,
) -> Result<(), GameError> {
    if outcome.bet_key != receipt.bet_key {
        return Err(GameError::contract(format!(
            "outcome bet key {} does not match receipt {}",
            outcome.bet_key, receipt.bet_key
        )));
    }

    let line_sum = total_payout(&outcome.winning_lines);
    if line_sum != outcome.total_payout {
        return Err(GameError::contract(format!(
            "winning lines sum to {line_sum}, outcome claims {}",
            outcome.total_payout
        )));
    }

    let grid = derive_grid(&outcome.block_seed, &outcome.bet_key, &config.reels);
    if grid != outcome.grid {
        return Err(GameError::contract(
            "outcome grid does not match the seed derivation",
        ));
    }

    let Some(active) = config.paylines.get(..spin.paylines as usize) else {
        return Err(GameError::contract(format!(
            "spin activates {} paylines, machine has {}",
            spin.paylines,
            config.paylines.len()
        )));
    };
    let lines = evaluate(&grid, active, &config.paytable, spin.bet_per_line);
    let local_payout = total_payout(&lines);
    if local_payout != outcome.total_payout {
        return Err(GameError::contract(format!(
            "local evaluation pays {local_payout}, outcome claims {}",
            outcome.total_payout
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests;

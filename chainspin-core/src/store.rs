//! Session state store.
//!
//! Single source of truth for an active session. All mutation goes through
//! named operations; every operation that touches the spin queue recomputes
//! the reserved balance from the full queue as its final step. A versioned
//! watch channel notifies subscribers of changes, so observers never poll.
//!
//! The store is a cheap-clone handle; construct one per engine instance.
//! There is deliberately no process-wide singleton, so several engines (or
//! test cases) never collide.

use crate::errors::GameError;
use crate::types::SymbolGrid;
use crate::types::spin::{AutoSpin, BetSelection, QueuedSpin};
use crate::validation::reserved_balance;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, watch};
use uuid::Uuid;

/// Snapshot of the session state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameState {
    pub is_spinning: bool,
    pub current_spin_id: Option<Uuid>,
    pub waiting_for_outcome: bool,
    /// All known spins, in insertion order.
    pub spin_queue: Vec<QueuedSpin>,
    pub visible_grid: SymbolGrid,
    /// Wallet balance as last reported by the chain, micro-units.
    pub balance: u64,
    /// Balance committed to unsettled spins, recomputed from the queue.
    pub reserved_balance: u64,
    pub current_bet: BetSelection,
    pub auto_spin: AutoSpin,
    pub last_error: Option<GameError>,
}

impl GameState {
    /// `balance - reserved`, never negative.
    pub fn available_balance(&self) -> u64 {
        self.balance.saturating_sub(self.reserved_balance)
    }
}

struct StoreInner {
    state: RwLock<GameState>,
    version: AtomicU64,
    version_tx: watch::Sender<u64>,
}

/// Cheap-clone handle to the shared session state.
pub struct GameStateStore {
    inner: Arc<StoreInner>,
}

impl Clone for GameStateStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for GameStateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives notifications when the store changes.
///
/// Dropping the watcher is how a subscriber unsubscribes.
pub struct StateWatcher {
    version_rx: watch::Receiver<u64>,
}

impl StateWatcher {
    /// Wait until the store is mutated again.
    ///
    /// Returns `Err` only when the store has been dropped.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.version_rx.changed().await
    }
}

impl GameStateStore {
    pub fn new() -> Self {
        let (version_tx, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(GameState::default()),
                version: AtomicU64::new(0),
                version_tx,
            }),
        }
    }

    /// Clone of the current state.
    pub async fn snapshot(&self) -> GameState {
        self.inner.state.read().await.clone()
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> StateWatcher {
        StateWatcher {
            version_rx: self.inner.version_tx.subscribe(),
        }
    }

    /// Run one atomic mutation and notify watchers.
    async fn mutate<R>(&self, op: impl FnOnce(&mut GameState) -> R) -> R {
        let mut state = self.inner.state.write().await;
        let result = op(&mut state);
        // Release the write guard before notifying so watchers can read
        // immediately.
        drop(state);
        let version = self.inner.version.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.inner.version_tx.send(version);
        result
    }

    // -- Spin queue ---------------------------------------------------------

    /// Append a spin and recompute the reserved balance.
    pub async fn add_spin(&self, spin: QueuedSpin) {
        self.mutate(|state| {
            state.spin_queue.push(spin);
            state.reserved_balance = reserved_balance(&state.spin_queue);
        })
        .await
    }

    /// Mutate the spin with the given id. Other entries are untouched.
    ///
    /// Returns false when no spin with that id exists (e.g. after a reset),
    /// in which case nothing changes.
    pub async fn update_spin(&self, id: Uuid, op: impl FnOnce(&mut QueuedSpin)) -> bool {
        self.mutate(|state| {
            let Some(spin) = state.spin_queue.iter_mut().find(|spin| spin.id == id) else {
                return false;
            };
            op(spin);
            state.reserved_balance = reserved_balance(&state.spin_queue);
            true
        })
        .await
    }

    /// Remove one spin from the queue.
    pub async fn remove_spin(&self, id: Uuid) -> Option<QueuedSpin> {
        self.mutate(|state| {
            let index = state.spin_queue.iter().position(|spin| spin.id == id)?;
            let spin = state.spin_queue.remove(index);
            state.reserved_balance = reserved_balance(&state.spin_queue);
            Some(spin)
        })
        .await
    }

    /// Drop every terminal spin from the queue.
    pub async fn cleanup_settled(&self) -> usize {
        self.mutate(|state| {
            let before = state.spin_queue.len();
            state.spin_queue.retain(|spin| !spin.is_terminal());
            state.reserved_balance = reserved_balance(&state.spin_queue);
            before - state.spin_queue.len()
        })
        .await
    }

    /// Clone of one queued spin.
    pub async fn spin(&self, id: Uuid) -> Option<QueuedSpin> {
        self.inner
            .state
            .read()
            .await
            .spin_queue
            .iter()
            .find(|spin| spin.id == id)
            .cloned()
    }

    /// All non-terminal spins, in queue order.
    pub async fn pending_spins(&self) -> Vec<QueuedSpin> {
        self.inner
            .state
            .read()
            .await
            .spin_queue
            .iter()
            .filter(|spin| !spin.is_terminal())
            .cloned()
            .collect()
    }

    // -- Balances and flags -------------------------------------------------

    pub async fn set_balance(&self, balance: u64) {
        self.mutate(|state| state.balance = balance).await
    }

    pub async fn balance(&self) -> u64 {
        self.inner.state.read().await.balance
    }

    pub async fn reserved(&self) -> u64 {
        self.inner.state.read().await.reserved_balance
    }

    pub async fn set_bet(&self, bet: BetSelection) {
        self.mutate(|state| state.current_bet = bet).await
    }

    /// Set or clear the spinning flag together with the current spin id.
    pub async fn set_spinning(&self, current: Option<Uuid>) {
        self.mutate(|state| {
            state.is_spinning = current.is_some();
            state.current_spin_id = current;
        })
        .await
    }

    pub async fn set_waiting_for_outcome(&self, waiting: bool) {
        self.mutate(|state| state.waiting_for_outcome = waiting).await
    }

    pub async fn set_visible_grid(&self, grid: SymbolGrid) {
        self.mutate(|state| state.visible_grid = grid).await
    }

    pub async fn set_error(&self, error: GameError) {
        self.mutate(|state| state.last_error = Some(error)).await
    }

    pub async fn clear_error(&self) {
        self.mutate(|state| state.last_error = None).await
    }

    // -- Auto-spin ----------------------------------------------------------

    pub async fn start_auto_spin(&self, rounds: u32) {
        self.mutate(|state| {
            state.auto_spin = AutoSpin {
                active: rounds > 0,
                remaining: rounds,
            };
        })
        .await
    }

    pub async fn stop_auto_spin(&self) {
        self.mutate(|state| state.auto_spin = AutoSpin::default()).await
    }

    /// Consume one auto-spin round; deactivates when the counter reaches
    /// zero. Returns the remaining rounds.
    pub async fn decrement_auto_spin(&self) -> u32 {
        self.mutate(|state| {
            state.auto_spin.remaining = state.auto_spin.remaining.saturating_sub(1);
            if state.auto_spin.remaining == 0 {
                state.auto_spin.active = false;
            }
            state.auto_spin.remaining
        })
        .await
    }

    /// Restore the exact initial state.
    pub async fn reset(&self) {
        self.mutate(|state| *state = GameState::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::spin::SpinPhase;
    use crate::validation::reserved_balance;

    fn spin(total_bet: u64) -> QueuedSpin {
        QueuedSpin::new(total_bet, 1, total_bet)
    }

    #[tokio::test]
    async fn reserved_balance_tracks_queue_changes() {
        let store = GameStateStore::new();
        let first = spin(5_000_000);
        let second = spin(2_000_000);
        let first_id = first.id;
        let second_id = second.id;

        store.add_spin(first).await;
        store.add_spin(second).await;
        assert_eq!(store.reserved().await, 7_000_000);

        store
            .update_spin(first_id, |spin| {
                spin.phase = SpinPhase::Failed {
                    error: GameError::transaction("rejected"),
                };
            })
            .await;
        assert_eq!(store.reserved().await, 2_000_000);

        store.remove_spin(second_id).await;
        assert_eq!(store.reserved().await, 0);

        // Invariant: always equal to a fresh recomputation.
        let state = store.snapshot().await;
        assert_eq!(state.reserved_balance, reserved_balance(&state.spin_queue));
    }

    #[tokio::test]
    async fn update_is_keyed_and_leaves_other_spins_alone() {
        let store = GameStateStore::new();
        let first = spin(1_000_000);
        let second = spin(2_000_000);
        let second_id = second.id;

        store.add_spin(first.clone()).await;
        store.add_spin(second).await;

        let updated = store
            .update_spin(second_id, |spin| spin.phase = SpinPhase::Submitting)
            .await;
        assert!(updated);

        let state = store.snapshot().await;
        assert_eq!(state.spin_queue[0], first);
        assert_eq!(state.spin_queue[1].phase, SpinPhase::Submitting);

        let missing = store
            .update_spin(Uuid::new_v4(), |spin| spin.phase = SpinPhase::Submitting)
            .await;
        assert!(!missing);
    }

    #[tokio::test]
    async fn cleanup_removes_only_terminal_spins() {
        let store = GameStateStore::new();
        let live = spin(1_000_000);
        let done = spin(2_000_000);
        let done_id = done.id;

        store.add_spin(live.clone()).await;
        store.add_spin(done).await;
        store
            .update_spin(done_id, |spin| {
                spin.phase = SpinPhase::Failed {
                    error: GameError::transaction("rejected"),
                };
            })
            .await;

        assert_eq!(store.cleanup_settled().await, 1);
        let state = store.snapshot().await;
        assert_eq!(state.spin_queue.len(), 1);
        assert_eq!(state.spin_queue[0].id, live.id);
    }

    #[tokio::test]
    async fn reset_restores_the_initial_state() {
        let store = GameStateStore::new();
        store.set_balance(42_000_000).await;
        store.add_spin(spin(1_000_000)).await;
        store.set_spinning(Some(Uuid::new_v4())).await;
        store.set_waiting_for_outcome(true).await;
        store.set_bet(BetSelection {
            bet_per_line: 1_000_000,
            paylines: 5,
        })
        .await;
        store.start_auto_spin(10).await;
        store.set_error(GameError::unknown("boom")).await;

        store.reset().await;
        assert_eq!(store.snapshot().await, GameState::default());
    }

    #[tokio::test]
    async fn auto_spin_counter() {
        let store = GameStateStore::new();
        store.start_auto_spin(2).await;
        assert!(store.snapshot().await.auto_spin.active);

        assert_eq!(store.decrement_auto_spin().await, 1);
        assert!(store.snapshot().await.auto_spin.active);

        assert_eq!(store.decrement_auto_spin().await, 0);
        assert!(!store.snapshot().await.auto_spin.active);
    }

    #[tokio::test]
    async fn watcher_sees_mutations() {
        let store = GameStateStore::new();
        let mut watcher = store.subscribe();
        store.set_balance(1).await;
        assert!(watcher.changed().await.is_ok());
    }
}

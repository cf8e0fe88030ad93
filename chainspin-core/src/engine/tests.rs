#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::*;
use crate::adapter::AdapterError;
use crate::errors::ErrorCode;
use crate::types::REEL_LENGTH;
use crate::types::config::{Paytable, PayoutSchedule, ReelSet, ReelStrip};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Symbol every mock reel strip is filled with, so spins win whenever the
/// paytable pays it.
const LUCKY: u8 = 7;

fn winning_paytable() -> Paytable {
    let mut table = HashMap::new();
    table.insert(
        LUCKY,
        PayoutSchedule {
            three: 5,
            four: 10,
            five: 20,
        },
    );
    Paytable(table)
}

fn mock_config(paytable: Paytable) -> SlotMachineConfig {
    let strips: [ReelStrip; 5] = std::array::from_fn(|_| ReelStrip(vec![LUCKY; REEL_LENGTH]));
    let paylines = (0..10).map(|i| [(i % 3) as u8; 5]).collect();
    SlotMachineConfig {
        contract: "mock-slot".to_string(),
        chain_id: 31_337,
        rtp_target: 0.95,
        house_edge: 0.05,
        min_bet: 100_000,
        max_bet: 10_000_000,
        max_paylines: 10,
        reels: ReelSet(strips),
        paylines,
        paytable,
    }
}

#[derive(Clone)]
struct MockBet {
    bet_per_line: u64,
    paylines: u32,
    claim_block: u64,
}

struct MockInner {
    config: SlotMachineConfig,
    height: AtomicU64,
    balance: AtomicU64,
    blocks_ahead: AtomicU64,
    fail_submit: AtomicBool,
    fail_claim: AtomicBool,
    tamper_payout: AtomicBool,
    counter: AtomicU64,
    bets: Mutex<HashMap<String, MockBet>>,
}

/// Scripted chain double: deterministic outcomes, manual block production,
/// toggleable failures.
#[derive(Clone)]
struct MockChain {
    inner: Arc<MockInner>,
}

impl MockChain {
    fn new(config: SlotMachineConfig) -> Self {
        Self {
            inner: Arc::new(MockInner {
                config,
                height: AtomicU64::new(100),
                balance: AtomicU64::new(50_000_000),
                blocks_ahead: AtomicU64::new(0),
                fail_submit: AtomicBool::new(false),
                fail_claim: AtomicBool::new(false),
                tamper_payout: AtomicBool::new(false),
                counter: AtomicU64::new(0),
                bets: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn advance(&self, blocks: u64) {
        self.inner.height.fetch_add(blocks, Ordering::SeqCst);
    }

    fn set_blocks_ahead(&self, blocks: u64) {
        self.inner.blocks_ahead.store(blocks, Ordering::SeqCst);
    }

    fn set_balance(&self, balance: u64) {
        self.inner.balance.store(balance, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ChainAdapter for MockChain {
    async fn initialize(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn submit_spin(
        &self,
        bet_per_line: u64,
        paylines: u32,
        _wallet: &str,
    ) -> Result<SubmitReceipt, AdapterError> {
        if self.inner.fail_submit.load(Ordering::SeqCst) {
            return Err(AdapterError::Api {
                message: "submit rejected".to_string(),
            });
        }

        let total_bet = bet_per_line * paylines as u64;
        self.inner.balance.fetch_sub(total_bet, Ordering::SeqCst);

        let n = self.inner.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let bet_key = format!("{n:016x}");
        let submit_block = self.inner.height.load(Ordering::SeqCst);
        let claim_block = submit_block + self.inner.blocks_ahead.load(Ordering::SeqCst);
        self.inner.bets.lock().unwrap().insert(
            bet_key.clone(),
            MockBet {
                bet_per_line,
                paylines,
                claim_block,
            },
        );
        Ok(SubmitReceipt {
            bet_key,
            tx_id: format!("0x{n:08x}"),
            submit_block,
            claim_block,
        })
    }

    async fn claim_spin(&self, bet_key: &str) -> Result<SpinOutcome, AdapterError> {
        if self.inner.fail_claim.load(Ordering::SeqCst) {
            return Err(AdapterError::Api {
                message: "claim rejected".to_string(),
            });
        }

        let bet = self
            .inner
            .bets
            .lock()
            .unwrap()
            .get(bet_key)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownBetKey(bet_key.to_string()))?;

        let current = self.inner.height.load(Ordering::SeqCst);
        if current < bet.claim_block {
            return Err(AdapterError::NotReady {
                claim_block: bet.claim_block,
                current,
            });
        }

        let block_seed = format!("{:016x}", bet.claim_block.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        let grid = derive_grid(&block_seed, bet_key, &self.inner.config.reels);
        let lines = evaluate(
            &grid,
            &self.inner.config.paylines[..bet.paylines as usize],
            &self.inner.config.paytable,
            bet.bet_per_line,
        );
        let mut payout = total_payout(&lines);
        self.inner.balance.fetch_add(payout, Ordering::SeqCst);
        if self.inner.tamper_payout.load(Ordering::SeqCst) {
            payout += 1_000_000;
        }

        Ok(SpinOutcome {
            grid,
            winning_lines: lines,
            total_payout: payout,
            block_number: bet.claim_block,
            block_seed,
            bet_key: bet_key.to_string(),
        })
    }

    async fn balance(&self, _address: &str) -> Result<u64, AdapterError> {
        Ok(self.inner.balance.load(Ordering::SeqCst))
    }

    async fn current_block(&self) -> Result<u64, AdapterError> {
        Ok(self.inner.height.load(Ordering::SeqCst))
    }

    async fn contract_config(&self) -> Result<SlotMachineConfig, AdapterError> {
        Ok(self.inner.config.clone())
    }
}

fn fast_settings() -> EngineSettings {
    EngineSettings {
        block_poll_interval: Duration::from_millis(5),
        // Keep the poller quiet unless a test wants it.
        balance_poll_interval: Duration::from_secs(60),
        claim_timeout: None,
        win_thresholds: WinThresholds::default(),
    }
}

fn engine_with(chain: MockChain, settings: EngineSettings) -> SlotEngine<MockChain> {
    SlotEngine::new(chain, "wallet-1", settings)
}

fn collect_events(
    engine: &SlotEngine<MockChain>,
) -> (Subscription, mpsc::UnboundedReceiver<SpinEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = engine.events().on_any(move |event| {
        let _ = tx.send(event.clone());
    });
    (subscription, rx)
}

async fn wait_terminal(engine: &SlotEngine<MockChain>, id: Uuid) -> QueuedSpin {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(spin) = engine.store().spin(id).await {
                if spin.is_terminal() {
                    return spin;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("spin did not reach a terminal phase in time")
}

async fn wait_for(mut condition: impl AsyncFnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}

#[tokio::test]
async fn spin_before_initialize_fails_fast() {
    let engine = engine_with(MockChain::new(mock_config(winning_paytable())), fast_settings());

    let error = engine.spin(1_000_000, 5).await.unwrap_err();
    assert_eq!(error.code, ErrorCode::NotInitialized);
    assert!(!error.recoverable);
    assert!(engine.state().await.spin_queue.is_empty());
}

#[tokio::test]
async fn invalid_bets_are_rejected_synchronously() {
    let engine = engine_with(MockChain::new(mock_config(winning_paytable())), fast_settings());
    engine.initialize().await.unwrap();

    let below_min = engine.spin(99_999, 1).await.unwrap_err();
    assert_eq!(below_min.code, ErrorCode::InvalidBet);

    let too_many_lines = engine.spin(1_000_000, 11).await.unwrap_err();
    assert_eq!(too_many_lines.code, ErrorCode::InvalidBet);

    // Nothing was enqueued and nothing reserved.
    let state = engine.state().await;
    assert!(state.spin_queue.is_empty());
    assert_eq!(state.reserved_balance, 0);
    assert!(!state.is_spinning);
}

#[tokio::test]
async fn bet_beyond_available_balance_is_rejected() {
    let chain = MockChain::new(mock_config(winning_paytable()));
    chain.set_balance(10_000_000);
    let engine = engine_with(chain, fast_settings());
    engine.initialize().await.unwrap();

    // 10 lines at 2 each need 20, only 10 available.
    let error = engine.spin(2_000_000, 10).await.unwrap_err();
    assert_eq!(error.code, ErrorCode::InsufficientBalance);
    assert!(error.recoverable);
}

#[tokio::test]
async fn winning_spin_settles_end_to_end() {
    let chain = MockChain::new(mock_config(winning_paytable()));
    let engine = engine_with(chain.clone(), fast_settings());
    engine.initialize().await.unwrap();
    let (subscription, mut events) = collect_events(&engine);

    let id = engine.spin(1_000_000, 5).await.unwrap();
    let spin = wait_terminal(&engine, id).await;

    // All strips show the paying symbol, so every active line pays five of
    // a kind: 5 lines x 1_000_000 x 20.
    match &spin.phase {
        SpinPhase::Completed { winnings, outcome, .. } => {
            assert_eq!(*winnings, 100_000_000);
            assert_eq!(outcome.winning_lines.len(), 5);
            assert_eq!(total_payout(&outcome.winning_lines), outcome.total_payout);
        }
        other => panic!("expected Completed, got {other:?}"),
    }

    // Event order: queued, submitted, claimed, completed, win tier, balance.
    let mut kinds = Vec::new();
    while kinds.last() != Some(&EventKind::BalanceUpdated) {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event stream stalled")
            .expect("event stream closed");
        kinds.push(event.kind());
    }
    assert_eq!(
        kinds,
        vec![
            EventKind::Queued,
            EventKind::Submitted,
            EventKind::Claimed,
            EventKind::Completed,
            EventKind::WinTier,
            EventKind::BalanceUpdated,
        ]
    );

    // 50 initial - 5 bet + 100 payout.
    let state = engine.state().await;
    assert_eq!(state.balance, 145_000_000);
    assert_eq!(state.reserved_balance, 0);
    assert!(!state.is_spinning);
    assert!(!state.waiting_for_outcome);
    assert_eq!(state.visible_grid.symbol(0, 0), LUCKY);

    subscription.unsubscribe();
}

#[tokio::test]
async fn losing_spin_completes_without_win_tier() {
    // No paytable entries: every spin completes with zero winnings.
    let chain = MockChain::new(mock_config(Paytable::default()));
    let engine = engine_with(chain, fast_settings());
    engine.initialize().await.unwrap();
    let (subscription, mut events) = collect_events(&engine);

    let id = engine.spin(1_000_000, 5).await.unwrap();
    let spin = wait_terminal(&engine, id).await;
    match &spin.phase {
        SpinPhase::Completed { winnings, .. } => assert_eq!(*winnings, 0),
        other => panic!("expected Completed, got {other:?}"),
    }

    let mut kinds = Vec::new();
    while kinds.last() != Some(&EventKind::BalanceUpdated) {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event stream stalled")
            .expect("event stream closed");
        if let SpinEvent::Completed { result } = &event {
            assert_eq!(result.net_profit, -5_000_000);
            assert!(!result.is_win);
        }
        kinds.push(event.kind());
    }
    assert!(!kinds.contains(&EventKind::WinTier));

    assert_eq!(engine.balance().await, 45_000_000);
    subscription.unsubscribe();
}

#[tokio::test]
async fn submit_failure_marks_the_spin_failed() {
    let chain = MockChain::new(mock_config(winning_paytable()));
    chain.inner.fail_submit.store(true, Ordering::SeqCst);
    let engine = engine_with(chain, fast_settings());
    engine.initialize().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = engine.on_error(move |event| {
        let _ = tx.send(event.clone());
    });

    let id = engine.spin(1_000_000, 5).await.unwrap();
    let spin = wait_terminal(&engine, id).await;
    match &spin.phase {
        SpinPhase::Failed { error } => {
            assert_eq!(error.code, ErrorCode::TransactionFailed);
            assert!(error.recoverable);
        }
        other => panic!("expected Failed, got {other:?}"),
    }

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        SpinEvent::Failed { spin_id, error } => {
            assert_eq!(spin_id, Some(id));
            assert!(error.recoverable);
        }
        other => panic!("expected Failed event, got {other:?}"),
    }

    let state = engine.state().await;
    assert!(!state.is_spinning);
    assert!(!state.waiting_for_outcome);
    assert!(state.last_error.is_some());
    // The failed spin no longer reserves balance.
    assert_eq!(state.reserved_balance, 0);

    subscription.unsubscribe();
}

#[tokio::test]
async fn claim_failure_takes_the_same_path_as_submit_failure() {
    let chain = MockChain::new(mock_config(winning_paytable()));
    chain.inner.fail_claim.store(true, Ordering::SeqCst);
    let engine = engine_with(chain, fast_settings());
    engine.initialize().await.unwrap();

    let id = engine.spin(1_000_000, 1).await.unwrap();
    let spin = wait_terminal(&engine, id).await;
    match &spin.phase {
        SpinPhase::Failed { error } => assert_eq!(error.code, ErrorCode::TransactionFailed),
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(engine.state().await.reserved_balance, 0);
}

#[tokio::test]
async fn tampered_outcome_fails_verification() {
    let chain = MockChain::new(mock_config(winning_paytable()));
    chain.inner.tamper_payout.store(true, Ordering::SeqCst);
    let engine = engine_with(chain, fast_settings());
    engine.initialize().await.unwrap();

    let id = engine.spin(1_000_000, 5).await.unwrap();
    let spin = wait_terminal(&engine, id).await;
    match &spin.phase {
        SpinPhase::Failed { error } => {
            assert_eq!(error.code, ErrorCode::ContractError);
            assert!(!error.recoverable);
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn claim_window_timeout_expires_the_spin() {
    let chain = MockChain::new(mock_config(winning_paytable()));
    chain.set_blocks_ahead(1_000);
    let mut settings = fast_settings();
    settings.block_poll_interval = Duration::from_millis(10);
    settings.claim_timeout = Some(Duration::from_millis(50));
    let engine = engine_with(chain, settings);
    engine.initialize().await.unwrap();

    let id = engine.spin(1_000_000, 1).await.unwrap();
    let spin = wait_terminal(&engine, id).await;
    match &spin.phase {
        SpinPhase::Expired { error } => assert_eq!(error.code, ErrorCode::Timeout),
        other => panic!("expected Expired, got {other:?}"),
    }
    assert_eq!(engine.state().await.reserved_balance, 0);
}

#[tokio::test]
async fn concurrent_spins_have_independent_lifecycles() {
    let chain = MockChain::new(mock_config(winning_paytable()));
    chain.set_blocks_ahead(2);
    let engine = engine_with(chain.clone(), fast_settings());
    engine.initialize().await.unwrap();

    let first = engine.spin(1_000_000, 1).await.unwrap();
    let second = engine.spin(2_000_000, 1).await.unwrap();
    assert_ne!(first, second);

    // Both sit in the queue reserving their bets until the chain advances.
    let state = engine.state().await;
    assert_eq!(state.spin_queue.len(), 2);
    assert_eq!(state.reserved_balance, 3_000_000);

    chain.advance(2);
    let first_spin = wait_terminal(&engine, first).await;
    let second_spin = wait_terminal(&engine, second).await;
    assert!(matches!(first_spin.phase, SpinPhase::Completed { .. }));
    assert!(matches!(second_spin.phase, SpinPhase::Completed { .. }));
    assert_eq!(engine.state().await.reserved_balance, 0);
}

#[tokio::test]
async fn spins_may_settle_out_of_order() {
    let chain = MockChain::new(mock_config(winning_paytable()));
    chain.set_blocks_ahead(5);
    let engine = engine_with(chain.clone(), fast_settings());
    engine.initialize().await.unwrap();

    let slow = engine.spin(1_000_000, 1).await.unwrap();
    // Wait until the slow spin is past submit so its claim block is fixed.
    wait_for(async || {
        matches!(
            engine.store().spin(slow).await.map(|s| s.phase),
            Some(SpinPhase::Waiting { .. })
        )
    })
    .await;

    chain.set_blocks_ahead(0);
    let fast = engine.spin(1_000_000, 1).await.unwrap();
    let fast_spin = wait_terminal(&engine, fast).await;
    assert!(matches!(fast_spin.phase, SpinPhase::Completed { .. }));

    // The earlier spin is still waiting for its block.
    let slow_state = engine.store().spin(slow).await.unwrap();
    assert!(!slow_state.is_terminal());

    chain.advance(5);
    let slow_spin = wait_terminal(&engine, slow).await;
    assert!(matches!(slow_spin.phase, SpinPhase::Completed { .. }));
}

#[tokio::test]
async fn reentrant_processing_of_one_spin_is_ignored() {
    let chain = MockChain::new(mock_config(winning_paytable()));
    let engine = engine_with(chain, fast_settings());
    engine.initialize().await.unwrap();

    let spin = QueuedSpin::new(1_000_000, 1, 1_000_000);
    let id = spin.id;
    engine.store().add_spin(spin).await;

    // Simulate a pipeline already owning the spin.
    lock_set(&engine.inner.processing).insert(id);
    engine.process(SpinTicket { spin_id: id }).await.unwrap();
    let untouched = engine.store().spin(id).await.unwrap();
    assert_eq!(untouched.phase, SpinPhase::Pending);

    // Marker released: processing drives the spin to completion.
    lock_set(&engine.inner.processing).remove(&id);
    engine.process(SpinTicket { spin_id: id }).await.unwrap();
    let spin = engine.store().spin(id).await.unwrap();
    assert!(matches!(spin.phase, SpinPhase::Completed { .. }));
}

#[tokio::test]
async fn reset_abandons_in_flight_spins() {
    let chain = MockChain::new(mock_config(winning_paytable()));
    chain.set_blocks_ahead(50);
    let engine = engine_with(chain.clone(), fast_settings());
    engine.initialize().await.unwrap();

    let id = engine.spin(1_000_000, 1).await.unwrap();
    wait_for(async || {
        matches!(
            engine.store().spin(id).await.map(|s| s.phase),
            Some(SpinPhase::Waiting { .. })
        )
    })
    .await;

    engine.reset().await;
    assert_eq!(engine.state().await, GameState::default());

    // Let the abandoned pipeline reach its claim step; it must not
    // resurrect the spin or touch the fresh state.
    chain.advance(50);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.state().await, GameState::default());
    wait_for(async || lock_set(&engine.inner.processing).is_empty()).await;

    // The engine stays usable after a reset.
    engine.store().set_balance(10_000_000).await;
    chain.set_blocks_ahead(0);
    let next = engine.spin(1_000_000, 1).await.unwrap();
    let spin = wait_terminal(&engine, next).await;
    assert!(matches!(spin.phase, SpinPhase::Completed { .. }));
}

#[tokio::test]
async fn auto_spin_chains_the_configured_rounds() {
    let chain = MockChain::new(mock_config(winning_paytable()));
    let engine = engine_with(chain, fast_settings());
    engine.initialize().await.unwrap();

    engine.set_bet(1_000_000, 2).await;
    engine.start_auto_spin(3).await.unwrap();

    wait_for(async || {
        let state = engine.state().await;
        state.spin_queue.len() == 3 && state.spin_queue.iter().all(|s| s.is_terminal())
    })
    .await;

    let state = engine.state().await;
    assert!(
        state
            .spin_queue
            .iter()
            .all(|s| matches!(s.phase, SpinPhase::Completed { .. }))
    );
    assert!(!state.auto_spin.active);
    assert_eq!(state.auto_spin.remaining, 0);
}

#[tokio::test]
async fn balance_poller_reports_external_changes() {
    let chain = MockChain::new(mock_config(winning_paytable()));
    let mut settings = fast_settings();
    settings.balance_poll_interval = Duration::from_millis(20);
    let engine = engine_with(chain.clone(), settings);
    engine.initialize().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = engine.on_balance_update(move |event| {
        let _ = tx.send(event.clone());
    });

    chain.set_balance(60_000_000);
    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        SpinEvent::BalanceUpdated(update) => {
            assert_eq!(update.current, 60_000_000);
            assert_eq!(update.delta, 10_000_000);
            assert_eq!(update.available, 60_000_000);
        }
        other => panic!("expected BalanceUpdated, got {other:?}"),
    }
    assert_eq!(engine.balance().await, 60_000_000);

    subscription.unsubscribe();
    engine.shutdown().await;
}

//! Simulated chain for driving the slot engine without a network.
//!
//! `SandboxChain` implements the engine's adapter boundary on top of an
//! in-memory ledger: blocks are produced manually (`mine_blocks`) or by a
//! background mining task, bets debit the wallet at submission, and claimed
//! outcomes are derived with the same provably-fair reconstruction the
//! engine verifies against. Fault toggles let tests script submit and claim
//! failures.

use chainspin_core::adapter::{AdapterError, ChainAdapter};
use chainspin_core::evaluator::{derive_grid, evaluate, total_payout};
use chainspin_core::types::config::{
    Paytable, PayoutSchedule, ReelSet, ReelStrip, SlotMachineConfig,
};
use chainspin_core::types::spin::{SpinOutcome, SubmitReceipt};
use chainspin_core::types::{MICROS_PER_TOKEN, REEL_LENGTH, SymbolId};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ring::digest::{SHA256, digest};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::trace;

// Default machine symbols, ordered from most to least frequent.
const CHERRY: SymbolId = 0;
const LEMON: SymbolId = 1;
const ORANGE: SymbolId = 2;
const PLUM: SymbolId = 3;
const BELL: SymbolId = 4;
const STAR: SymbolId = 5;
const SEVEN: SymbolId = 6;
const DIAMOND: SymbolId = 7;

/// Tunables of the simulated chain.
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    /// Seed for bet-key generation and the block-seed salt. Equal seeds
    /// reproduce identical sessions.
    pub seed: u64,
    /// How many blocks after submission an outcome becomes claimable.
    pub blocks_until_claim: u64,
    /// Block production interval of the mining task.
    pub block_interval: Duration,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            seed: 0x5107_5EED,
            blocks_until_claim: 2,
            block_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingBet {
    wallet: String,
    bet_per_line: u64,
    paylines: u32,
    total_bet: u64,
    claim_block: u64,
    claimed: bool,
}

struct Ledger {
    height: u64,
    balances: HashMap<String, u64>,
    bets: HashMap<String, PendingBet>,
    rng: StdRng,
    tx_counter: u64,
}

struct Faults {
    fail_submit: std::sync::atomic::AtomicBool,
    fail_claim: std::sync::atomic::AtomicBool,
}

struct SandboxInner {
    config: SlotMachineConfig,
    settings: SandboxSettings,
    ledger: RwLock<Ledger>,
    faults: Faults,
    miner: Mutex<Option<JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
}

/// Cheap-clone handle to one simulated chain.
pub struct SandboxChain {
    inner: Arc<SandboxInner>,
}

impl Clone for SandboxChain {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl SandboxChain {
    pub fn new(config: SlotMachineConfig, settings: SandboxSettings) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let rng = StdRng::seed_from_u64(settings.seed);
        Self {
            inner: Arc::new(SandboxInner {
                config,
                settings,
                ledger: RwLock::new(Ledger {
                    height: 1,
                    balances: HashMap::new(),
                    bets: HashMap::new(),
                    rng,
                    tx_counter: 0,
                }),
                faults: Faults {
                    fail_submit: std::sync::atomic::AtomicBool::new(false),
                    fail_claim: std::sync::atomic::AtomicBool::new(false),
                },
                miner: Mutex::new(None),
                stop_tx,
            }),
        }
    }

    /// A sandbox running the default demo machine.
    pub fn with_default_machine(settings: SandboxSettings) -> Self {
        Self::new(Self::default_config(), settings)
    }

    /// The default demo machine: 8 weighted symbols, 10 paylines.
    pub fn default_config() -> SlotMachineConfig {
        // Symbol weights per strip; they sum to exactly one strip length.
        let weights: [(SymbolId, usize); 8] = [
            (CHERRY, 20),
            (LEMON, 18),
            (ORANGE, 16),
            (PLUM, 14),
            (BELL, 12),
            (STAR, 10),
            (SEVEN, 6),
            (DIAMOND, 4),
        ];
        let base: Vec<SymbolId> = weights
            .iter()
            .flat_map(|&(symbol, count)| std::iter::repeat_n(symbol, count))
            .collect();
        debug_assert_eq!(base.len(), REEL_LENGTH);

        // Rotate each strip so the reels stop independently.
        let strips: [ReelStrip; 5] = std::array::from_fn(|reel| {
            ReelStrip(
                (0..REEL_LENGTH)
                    .map(|i| base[(i + reel * 13) % REEL_LENGTH])
                    .collect(),
            )
        });

        let paylines = vec![
            [1, 1, 1, 1, 1],
            [0, 0, 0, 0, 0],
            [2, 2, 2, 2, 2],
            [0, 1, 2, 1, 0],
            [2, 1, 0, 1, 2],
            [0, 0, 1, 2, 2],
            [2, 2, 1, 0, 0],
            [1, 0, 1, 2, 1],
            [1, 2, 1, 0, 1],
            [0, 1, 1, 1, 2],
        ];

        let mut paytable = HashMap::new();
        paytable.insert(CHERRY, PayoutSchedule { three: 2, four: 8, five: 25 });
        paytable.insert(LEMON, PayoutSchedule { three: 3, four: 10, five: 40 });
        paytable.insert(ORANGE, PayoutSchedule { three: 4, four: 15, five: 60 });
        paytable.insert(PLUM, PayoutSchedule { three: 5, four: 20, five: 80 });
        paytable.insert(BELL, PayoutSchedule { three: 8, four: 40, five: 150 });
        paytable.insert(STAR, PayoutSchedule { three: 15, four: 75, five: 300 });
        paytable.insert(SEVEN, PayoutSchedule { three: 30, four: 150, five: 600 });
        paytable.insert(
            DIAMOND,
            PayoutSchedule {
                three: 50,
                four: 250,
                five: 1000,
            },
        );

        SlotMachineConfig {
            contract: "sandbox-slot-v1".to_string(),
            chain_id: 31_337,
            rtp_target: 0.95,
            house_edge: 0.05,
            min_bet: MICROS_PER_TOKEN / 10,
            max_bet: 10 * MICROS_PER_TOKEN,
            max_paylines: 10,
            reels: ReelSet(strips),
            paylines,
            paytable: Paytable(paytable),
        }
    }

    /// Credit a wallet on the simulated ledger.
    pub async fn fund(&self, address: &str, amount: u64) {
        let mut ledger = self.inner.ledger.write().await;
        *ledger.balances.entry(address.to_string()).or_insert(0) += amount;
    }

    /// Advance the chain. Returns the new height.
    pub async fn mine_blocks(&self, blocks: u64) -> u64 {
        let mut ledger = self.inner.ledger.write().await;
        ledger.height += blocks;
        ledger.height
    }

    /// Start producing one block per configured interval.
    pub fn start_mining(&self) {
        let mut slot = lock_miner(&self.inner.miner);
        if slot.is_some() {
            return;
        }
        let _ = self.inner.stop_tx.send(false);

        let chain = self.clone();
        let mut stop_rx = self.inner.stop_tx.subscribe();
        let interval = self.inner.settings.block_interval;
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }

                    _ = tokio::time::sleep(interval) => {
                        let height = chain.mine_blocks(1).await;
                        trace!(height, "sandbox mined a block");
                    }
                }
            }
        }));
    }

    /// Stop the mining task, if running.
    pub async fn stop_mining(&self) {
        let _ = self.inner.stop_tx.send(true);
        let handle = lock_miner(&self.inner.miner).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Make every `submit_spin` call fail while set.
    pub fn set_submit_fault(&self, fail: bool) {
        self.inner
            .faults
            .fail_submit
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Make every `claim_spin` call fail while set.
    pub fn set_claim_fault(&self, fail: bool) {
        self.inner
            .faults
            .fail_claim
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Chain randomness for one block: a digest over the contract identity,
    /// the height and the sandbox seed, hex encoded.
    fn block_seed(&self, height: u64) -> String {
        let preimage = format!(
            "{}:{}:{}:{}",
            self.inner.config.contract, self.inner.config.chain_id, height, self.inner.settings.seed
        );
        hex_encode(digest(&SHA256, preimage.as_bytes()).as_ref())
    }
}

#[async_trait]
impl ChainAdapter for SandboxChain {
    async fn initialize(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn submit_spin(
        &self,
        bet_per_line: u64,
        paylines: u32,
        wallet: &str,
    ) -> Result<SubmitReceipt, AdapterError> {
        if self
            .inner
            .faults
            .fail_submit
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(AdapterError::Api {
                message: "sandbox fault: submit rejected".to_string(),
            });
        }
        if paylines == 0 || paylines > self.inner.config.max_paylines {
            return Err(AdapterError::Api {
                message: format!("contract rejected payline count {paylines}"),
            });
        }

        let total_bet = bet_per_line
            .checked_mul(paylines as u64)
            .ok_or_else(|| AdapterError::Api {
                message: "bet overflows".to_string(),
            })?;

        let mut ledger = self.inner.ledger.write().await;
        let balance = ledger.balances.get(wallet).copied().unwrap_or(0);
        if balance < total_bet {
            return Err(AdapterError::Api {
                message: format!("insufficient on-chain funds: {balance} < {total_bet}"),
            });
        }
        ledger.balances.insert(wallet.to_string(), balance - total_bet);

        let key: u128 = ledger.rng.random();
        let bet_key = format!("{key:032x}");
        ledger.tx_counter += 1;
        let tx_id = format!("0x{:016x}", ledger.tx_counter);
        let submit_block = ledger.height;
        let claim_block = submit_block + self.inner.settings.blocks_until_claim;

        ledger.bets.insert(
            bet_key.clone(),
            PendingBet {
                wallet: wallet.to_string(),
                bet_per_line,
                paylines,
                total_bet,
                claim_block,
                claimed: false,
            },
        );

        trace!(bet_key = %bet_key, tx_id = %tx_id, claim_block, "sandbox accepted bet");
        Ok(SubmitReceipt {
            bet_key,
            tx_id,
            submit_block,
            claim_block,
        })
    }

    async fn claim_spin(&self, bet_key: &str) -> Result<SpinOutcome, AdapterError> {
        if self
            .inner
            .faults
            .fail_claim
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(AdapterError::Api {
                message: "sandbox fault: claim rejected".to_string(),
            });
        }

        let mut ledger = self.inner.ledger.write().await;
        let bet = ledger
            .bets
            .get(bet_key)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownBetKey(bet_key.to_string()))?;

        if ledger.height < bet.claim_block {
            return Err(AdapterError::NotReady {
                claim_block: bet.claim_block,
                current: ledger.height,
            });
        }

        let config = &self.inner.config;
        let block_seed = self.block_seed(bet.claim_block);
        let grid = derive_grid(&block_seed, bet_key, &config.reels);
        let active = config
            .paylines
            .get(..bet.paylines as usize)
            .ok_or_else(|| AdapterError::Api {
                message: format!("contract has no {} paylines", bet.paylines),
            })?;
        let winning_lines = evaluate(&grid, active, &config.paytable, bet.bet_per_line);
        let payout = total_payout(&winning_lines);

        // Credit only on the first claim; repeated claims return the same
        // outcome without paying twice.
        if !bet.claimed {
            *ledger.balances.entry(bet.wallet.clone()).or_insert(0) += payout;
            if let Some(stored) = ledger.bets.get_mut(bet_key) {
                stored.claimed = true;
            }
        }

        Ok(SpinOutcome {
            grid,
            winning_lines,
            total_payout: payout,
            block_number: bet.claim_block,
            block_seed,
            bet_key: bet_key.to_string(),
        })
    }

    async fn balance(&self, address: &str) -> Result<u64, AdapterError> {
        let ledger = self.inner.ledger.read().await;
        Ok(ledger.balances.get(address).copied().unwrap_or(0))
    }

    async fn current_block(&self) -> Result<u64, AdapterError> {
        Ok(self.inner.ledger.read().await.height)
    }

    async fn contract_config(&self) -> Result<SlotMachineConfig, AdapterError> {
        Ok(self.inner.config.clone())
    }
}

fn lock_miner(
    slot: &Mutex<Option<JoinHandle<()>>>,
) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(
        String::with_capacity(bytes.len() * 2),
        |mut out, byte| {
            use std::fmt::Write;
            let _ = write!(out, "{byte:02x}");
            out
        },
    )
}

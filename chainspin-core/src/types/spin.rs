//! Spin lifecycle types.
//!
//! A spin moves `Pending -> Submitting -> Waiting -> Claiming -> Completed`,
//! with `Failed` reachable from every non-terminal phase and `Expired` set
//! when a configured claim-window deadline passes. Data that only exists in
//! some phases (the submit receipt, the outcome, the error) lives inside the
//! corresponding variant so an inconsistent record cannot be constructed.

use super::config::PaylinePattern;
use super::{SymbolGrid, SymbolId};
use crate::errors::GameError;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// What the chain returned when a spin transaction was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Opaque handle used to claim the outcome later.
    pub bet_key: String,
    /// Transaction id of the submitted bet.
    pub tx_id: String,
    /// Block the bet was included in.
    pub submit_block: u64,
    /// First block at which the outcome becomes retrievable.
    pub claim_block: u64,
}

/// One matched payline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinningLine {
    /// Index of the payline within the machine's pattern list.
    pub payline_index: u32,
    /// The row-per-reel pattern that was read.
    pub pattern: PaylinePattern,
    /// Symbol that matched.
    pub symbol: SymbolId,
    /// Length of the unbroken run starting at reel 0 (3..=5).
    pub match_count: u8,
    /// Payout in micro-units.
    pub payout: u64,
}

/// The settled result of a spin as read from the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpinOutcome {
    pub grid: SymbolGrid,
    pub winning_lines: Vec<WinningLine>,
    /// Sum of all winning-line payouts, micro-units.
    pub total_payout: u64,
    /// Block the outcome was settled in.
    pub block_number: u64,
    /// Chain-provided randomness the grid derives from, hex.
    pub block_seed: String,
    /// The bet key this outcome belongs to, hex.
    pub bet_key: String,
}

/// Phase of a spin's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpinPhase {
    /// Queued, not yet handed to the chain.
    Pending,
    /// Submit transaction in flight.
    Submitting,
    /// Accepted on chain, waiting for the claim block.
    Waiting { receipt: SubmitReceipt },
    /// Claim call in flight.
    Claiming { receipt: SubmitReceipt },
    /// Settled with an outcome.
    Completed {
        receipt: SubmitReceipt,
        outcome: SpinOutcome,
        winnings: u64,
    },
    /// Failed at submit, claim or verification.
    Failed { error: GameError },
    /// Claim window deadline passed before the claim block was reached.
    Expired { error: GameError },
}

impl SpinPhase {
    /// Terminal phases no longer reserve balance and are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SpinPhase::Completed { .. } | SpinPhase::Failed { .. } | SpinPhase::Expired { .. }
        )
    }

    /// The submit receipt, if this phase carries one.
    pub fn receipt(&self) -> Option<&SubmitReceipt> {
        match self {
            SpinPhase::Waiting { receipt }
            | SpinPhase::Claiming { receipt }
            | SpinPhase::Completed { receipt, .. } => Some(receipt),
            _ => None,
        }
    }

    /// Short phase name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            SpinPhase::Pending => "pending",
            SpinPhase::Submitting => "submitting",
            SpinPhase::Waiting { .. } => "waiting",
            SpinPhase::Claiming { .. } => "claiming",
            SpinPhase::Completed { .. } => "completed",
            SpinPhase::Failed { .. } => "failed",
            SpinPhase::Expired { .. } => "expired",
        }
    }
}

/// One queued play request. Owned by the store; mutated only through the
/// store's named operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedSpin {
    pub id: Uuid,
    pub phase: SpinPhase,
    /// Bet per activated payline, micro-units.
    pub bet_per_line: u64,
    /// Number of activated paylines.
    pub paylines: u32,
    /// `bet_per_line * paylines`, fixed at creation.
    pub total_bet: u64,
    pub created_at: OffsetDateTime,
}

impl QueuedSpin {
    pub fn new(bet_per_line: u64, paylines: u32, total_bet: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            phase: SpinPhase::Pending,
            bet_per_line,
            paylines,
            total_bet,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// The bet currently dialed in on the machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetSelection {
    pub bet_per_line: u64,
    pub paylines: u32,
}

/// Auto-spin bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoSpin {
    pub active: bool,
    pub remaining: u32,
}

/// Win magnitude relative to the total bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WinLevel {
    None,
    Small,
    Medium,
    Big,
    Jackpot,
}

/// Ratio boundaries (payout / total bet) separating the win levels.
///
/// These are an explicit configuration knob; nothing in the evaluator
/// implies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinThresholds {
    /// Wins at or above this multiple of the bet are at least Medium.
    pub medium: u32,
    /// Wins at or above this multiple of the bet are at least Big.
    pub big: u32,
    /// Wins at or above this multiple of the bet are Jackpot.
    pub jackpot: u32,
}

impl Default for WinThresholds {
    fn default() -> Self {
        Self {
            medium: 2,
            big: 10,
            jackpot: 50,
        }
    }
}

impl WinThresholds {
    /// Classify a payout against the bet that produced it.
    pub fn classify(&self, payout: u64, total_bet: u64) -> WinLevel {
        if payout == 0 || total_bet == 0 {
            return WinLevel::None;
        }
        let ratio = payout / total_bet;
        if ratio >= self.jackpot as u64 {
            WinLevel::Jackpot
        } else if ratio >= self.big as u64 {
            WinLevel::Big
        } else if ratio >= self.medium as u64 {
            WinLevel::Medium
        } else {
            WinLevel::Small
        }
    }
}

/// Settlement summary computed when a spin completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpinResult {
    pub spin_id: Uuid,
    pub total_bet: u64,
    pub winnings: u64,
    /// `winnings - total_bet`, may be negative.
    pub net_profit: i64,
    pub is_win: bool,
    pub win_level: WinLevel,
    pub outcome: SpinOutcome,
}

/// Payload of a balance-updated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    /// Wallet balance as reported by the chain, micro-units.
    pub current: u64,
    /// Balance committed to unsettled spins.
    pub reserved: u64,
    /// `current - reserved`, saturating at zero.
    pub available: u64,
    /// Change against the previously known balance.
    pub delta: i64,
    pub last_updated: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win_level_classification() {
        let thresholds = WinThresholds::default();
        assert_eq!(thresholds.classify(0, 5_000_000), WinLevel::None);
        assert_eq!(thresholds.classify(1_000_000, 5_000_000), WinLevel::Small);
        assert_eq!(thresholds.classify(10_000_000, 5_000_000), WinLevel::Medium);
        assert_eq!(thresholds.classify(50_000_000, 5_000_000), WinLevel::Big);
        assert_eq!(
            thresholds.classify(250_000_000, 5_000_000),
            WinLevel::Jackpot
        );
    }

    #[test]
    fn terminal_phases() {
        assert!(!SpinPhase::Pending.is_terminal());
        assert!(!SpinPhase::Submitting.is_terminal());
        assert!(
            SpinPhase::Failed {
                error: GameError::unknown("x"),
            }
            .is_terminal()
        );
        assert!(
            SpinPhase::Expired {
                error: GameError::timeout("x"),
            }
            .is_terminal()
        );
    }
}

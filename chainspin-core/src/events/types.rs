//! Event type definitions for the spin lifecycle.
//!
//! Events are ephemeral notifications; the store remains the source of
//! truth. Subscribers that miss an event can always reconcile from a state
//! snapshot.

use crate::errors::GameError;
use crate::types::spin::{BalanceUpdate, SpinOutcome, SpinResult, WinLevel};
use uuid::Uuid;

/// Discriminant used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Queued,
    Submitted,
    Claimed,
    Completed,
    WinTier,
    Failed,
    BalanceUpdated,
}

/// Everything the engine announces over the bus.
#[derive(Debug, Clone)]
pub enum SpinEvent {
    /// A spin entered the queue.
    Queued {
        spin_id: Uuid,
        total_bet: u64,
        paylines: u32,
    },
    /// The spin transaction was accepted on chain.
    Submitted {
        spin_id: Uuid,
        tx_id: String,
        submit_block: u64,
        claim_block: u64,
    },
    /// The outcome was claimed and verified.
    Claimed {
        spin_id: Uuid,
        outcome: SpinOutcome,
    },
    /// The spin settled; the store reflects the result.
    Completed { result: SpinResult },
    /// A winning spin's magnitude, emitted after `Completed`.
    WinTier {
        spin_id: Uuid,
        level: WinLevel,
        payout: u64,
    },
    /// A spin failed or expired, or a non-spin error surfaced.
    Failed {
        spin_id: Option<Uuid>,
        error: GameError,
    },
    /// The wallet balance changed.
    BalanceUpdated(BalanceUpdate),
}

impl SpinEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SpinEvent::Queued { .. } => EventKind::Queued,
            SpinEvent::Submitted { .. } => EventKind::Submitted,
            SpinEvent::Claimed { .. } => EventKind::Claimed,
            SpinEvent::Completed { .. } => EventKind::Completed,
            SpinEvent::WinTier { .. } => EventKind::WinTier,
            SpinEvent::Failed { .. } => EventKind::Failed,
            SpinEvent::BalanceUpdated(_) => EventKind::BalanceUpdated,
        }
    }
}

//! Bet and balance validation.
//!
//! Pure helpers used by the engine before a spin is allowed into the queue.
//! Reports collect every violation rather than stopping at the first, so a
//! caller can surface as much or as little as it wants.

use crate::types::config::SlotMachineConfig;
use crate::types::spin::QueuedSpin;

/// Outcome of a validation pass. Valid when no errors were recorded;
/// warnings never block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: String) {
        self.errors.push(message);
    }

    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    /// All errors joined into one line, for error messages.
    pub fn summary(&self) -> String {
        self.errors.join("; ")
    }
}

/// Check the shape of a bet against the machine configuration.
pub fn validate_bet(
    bet_per_line: u64,
    paylines: u32,
    config: &SlotMachineConfig,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    if bet_per_line < config.min_bet {
        report.error(format!(
            "bet {bet_per_line} is below the table minimum {}",
            config.min_bet
        ));
    }
    if bet_per_line > config.max_bet {
        report.error(format!(
            "bet {bet_per_line} is above the table maximum {}",
            config.max_bet
        ));
    }
    if paylines == 0 {
        report.error("at least one payline must be active".to_string());
    }
    if paylines > config.max_paylines {
        report.error(format!(
            "{paylines} paylines requested, the machine has {}",
            config.max_paylines
        ));
    }
    if bet_per_line.checked_mul(paylines as u64).is_none() {
        report.error(format!(
            "total bet overflows: {bet_per_line} x {paylines}"
        ));
    }
    if bet_per_line == config.max_bet {
        report.warn("bet is at the table maximum".to_string());
    }

    report
}

/// Check that the available balance covers the bet.
///
/// Available balance is `balance - reserved`, never treated as negative.
pub fn validate_balance(
    bet_per_line: u64,
    paylines: u32,
    balance: u64,
    reserved: u64,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    let total_bet = bet_per_line.saturating_mul(paylines as u64);
    let available = balance.saturating_sub(reserved);

    if available < total_bet {
        report.error(format!(
            "insufficient available balance: need {total_bet}, have {available} \
             ({reserved} reserved of {balance})"
        ));
    }

    report
}

/// Balance committed to unsettled spins.
///
/// Recomputed from the whole queue on every queue change; never patched
/// incrementally, so missed transitions cannot make it drift.
pub fn reserved_balance(queue: &[QueuedSpin]) -> u64 {
    queue
        .iter()
        .filter(|spin| !spin.is_terminal())
        .fold(0, |sum, spin| sum.saturating_add(spin.total_bet))
}

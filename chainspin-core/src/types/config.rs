//! Machine configuration as published by the slot contract.
//!
//! Fetched once per session through the chain adapter and treated as
//! immutable afterwards. The reel strips, payline patterns and paytable in
//! here are the only inputs (besides the block seed and bet key) needed to
//! reconstruct and score an outcome off-chain.

use super::{REEL_COUNT, REEL_LENGTH, SymbolId, VISIBLE_ROWS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// A payline pattern: one row index per reel.
pub type PaylinePattern = [u8; REEL_COUNT];

/// Errors produced by [`SlotMachineConfig::validate`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("min bet {min} exceeds max bet {max}")]
    BetRange { min: u64, max: u64 },

    #[error("max paylines must be at least 1")]
    NoPaylines,

    #[error("max paylines {max_paylines} exceeds the {patterns} configured patterns")]
    TooFewPatterns { max_paylines: u32, patterns: usize },

    #[error("payline {index} references row {row}, grid has {rows} rows")]
    BadRowIndex { index: usize, row: u8, rows: usize },

    #[error("reel {index} has {len} positions, expected {expected}")]
    BadStripLength {
        index: usize,
        len: usize,
        expected: usize,
    },
}

/// One reel strip: the ordered symbols the reel can stop on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelStrip(pub Vec<SymbolId>);

impl ReelStrip {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Symbol at a strip position, wrapping past the end.
    pub fn symbol_at(&self, position: usize) -> SymbolId {
        self.0[position % self.0.len()]
    }
}

/// The five reel strips of the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelSet(pub [ReelStrip; REEL_COUNT]);

impl ReelSet {
    pub fn strip(&self, reel: usize) -> &ReelStrip {
        &self.0[reel]
    }
}

/// Payout multipliers for 3, 4 and 5 of a kind of one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSchedule {
    pub three: u64,
    pub four: u64,
    pub five: u64,
}

impl PayoutSchedule {
    /// Multiplier for an unbroken run of the given length, 0 if unpaid.
    pub fn multiplier(&self, run: u8) -> u64 {
        match run {
            3 => self.three,
            4 => self.four,
            5 => self.five,
            _ => 0,
        }
    }
}

/// Symbol -> match-count -> multiplier table.
///
/// Symbols absent from the table pay nothing regardless of run length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paytable(pub HashMap<SymbolId, PayoutSchedule>);

impl Paytable {
    pub fn multiplier(&self, symbol: SymbolId, run: u8) -> u64 {
        self.0.get(&symbol).map_or(0, |s| s.multiplier(run))
    }
}

/// Immutable machine configuration published by the slot contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotMachineConfig {
    /// Contract identity this configuration was read from.
    pub contract: String,
    /// Chain the contract is deployed on.
    pub chain_id: u64,
    /// Advertised return-to-player target, informational only.
    pub rtp_target: f64,
    /// Advertised house edge, informational only.
    pub house_edge: f64,
    /// Smallest allowed bet per line, micro-units.
    pub min_bet: u64,
    /// Largest allowed bet per line, micro-units.
    pub max_bet: u64,
    /// Largest number of paylines a single spin may activate.
    pub max_paylines: u32,
    pub reels: ReelSet,
    pub paylines: Vec<PaylinePattern>,
    pub paytable: Paytable,
}

impl SlotMachineConfig {
    /// Check the structural invariants of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_bet > self.max_bet {
            return Err(ConfigError::BetRange {
                min: self.min_bet,
                max: self.max_bet,
            });
        }
        if self.max_paylines == 0 {
            return Err(ConfigError::NoPaylines);
        }
        if self.max_paylines as usize > self.paylines.len() {
            return Err(ConfigError::TooFewPatterns {
                max_paylines: self.max_paylines,
                patterns: self.paylines.len(),
            });
        }
        for (index, pattern) in self.paylines.iter().enumerate() {
            if let Some(&row) = pattern.iter().find(|&&row| row as usize >= VISIBLE_ROWS) {
                return Err(ConfigError::BadRowIndex {
                    index,
                    row,
                    rows: VISIBLE_ROWS,
                });
            }
        }
        for (index, strip) in self.reels.0.iter().enumerate() {
            if strip.len() != REEL_LENGTH {
                return Err(ConfigError::BadStripLength {
                    index,
                    len: strip.len(),
                    expected: REEL_LENGTH,
                });
            }
        }
        Ok(())
    }
}

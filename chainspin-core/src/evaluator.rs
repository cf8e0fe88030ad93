//! Payline evaluation and provably-fair grid derivation.
//!
//! Everything in this module is a pure function of its inputs. Given the
//! block seed, the bet key and the machine's reel strips, anyone can rebuild
//! the exact grid the chain settled and re-score it, which is what the
//! engine does before accepting a claimed outcome.

use crate::types::config::{Paytable, PaylinePattern, ReelSet};
use crate::types::spin::WinningLine;
use crate::types::{MIN_MATCH, REEL_COUNT, SymbolGrid, VISIBLE_ROWS};
use ring::digest::{SHA256, digest};

/// Deterministically rebuild the visible grid from the chain's randomness.
///
/// The SHA-256 digest of `"<seed>:<key>"` is split into one 4-byte word per
/// reel; each word picks the strip position the reel stopped on, and the
/// three visible rows are that position and the two below it, wrapping
/// around the strip.
pub fn derive_grid(block_seed: &str, bet_key: &str, reels: &ReelSet) -> SymbolGrid {
    let preimage = format!("{block_seed}:{bet_key}");
    let hash = digest(&SHA256, preimage.as_bytes());
    let bytes = hash.as_ref();

    let mut grid = SymbolGrid::default();
    for reel in 0..REEL_COUNT {
        let strip = reels.strip(reel);
        let offset = reel * 4;
        let word = u32::from_be_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]);
        let stop = word as usize % strip.len();
        for row in 0..VISIBLE_ROWS {
            grid.0[reel][row] = strip.symbol_at(stop + row);
        }
    }
    grid
}

/// Score the grid against the given payline patterns.
///
/// A run starts at reel 0 and counts consecutive reels showing the reel-0
/// symbol; it must be unbroken. Runs of at least [`MIN_MATCH`] with a
/// non-zero paytable multiplier produce a [`WinningLine`] paying
/// `bet_per_line * multiplier`. Overlapping paylines are scored
/// independently.
pub fn evaluate(
    grid: &SymbolGrid,
    patterns: &[PaylinePattern],
    paytable: &Paytable,
    bet_per_line: u64,
) -> Vec<WinningLine> {
    let mut lines = Vec::new();
    for (index, pattern) in patterns.iter().enumerate() {
        let symbol = grid.symbol(0, pattern[0]);
        let mut run: u8 = 1;
        for reel in 1..REEL_COUNT {
            if grid.symbol(reel, pattern[reel]) == symbol {
                run += 1;
            } else {
                break;
            }
        }
        if run < MIN_MATCH {
            continue;
        }
        let multiplier = paytable.multiplier(symbol, run);
        if multiplier == 0 {
            continue;
        }
        lines.push(WinningLine {
            payline_index: index as u32,
            pattern: *pattern,
            symbol,
            match_count: run,
            payout: bet_per_line.saturating_mul(multiplier),
        });
    }
    lines
}

/// Sum of all line payouts, micro-units.
pub fn total_payout(lines: &[WinningLine]) -> u64 {
    lines.iter().fold(0, |sum, line| sum.saturating_add(line.payout))
}

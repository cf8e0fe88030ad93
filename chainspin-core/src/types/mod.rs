pub mod config;
pub mod spin;

use serde::{Deserialize, Serialize};

/// Identifier of a reel symbol. The paytable and reel strips give it meaning.
pub type SymbolId = u8;

/// Number of reels on the machine.
pub const REEL_COUNT: usize = 5;

/// Number of visible rows per reel.
pub const VISIBLE_ROWS: usize = 3;

/// Number of symbol positions on a reel strip.
pub const REEL_LENGTH: usize = 100;

/// Shortest unbroken run that can win a payline.
pub const MIN_MATCH: u8 = 3;

/// Micro-units per whole token. All monetary amounts in the engine are
/// integers in micro-units; floating point never touches payout math.
pub const MICROS_PER_TOKEN: u64 = 1_000_000;

/// The visible 5x3 symbol window, indexed as `[reel][row]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolGrid(pub [[SymbolId; VISIBLE_ROWS]; REEL_COUNT]);

impl SymbolGrid {
    /// Symbol at the given reel and row.
    pub fn symbol(&self, reel: usize, row: u8) -> SymbolId {
        self.0[reel][row as usize]
    }

    /// The three visible symbols of one reel, top to bottom.
    pub fn reel(&self, reel: usize) -> [SymbolId; VISIBLE_ROWS] {
        self.0[reel]
    }
}

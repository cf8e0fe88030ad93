//! TOML file configuration for the demo session.
//!
//! Every section and field is optional; omitted values fall back to the
//! defaults below, so an empty (or absent) file runs a sensible demo.

use chainspin_core::types::MICROS_PER_TOKEN;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// The player wallet the demo drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_address")]
    pub address: String,
    /// Funds credited to the wallet before the session, micro-units.
    #[serde(default = "default_funding")]
    pub funding: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            funding: default_funding(),
        }
    }
}

/// How many spins to run and with what bet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_spins")]
    pub spins: u32,
    /// Bet per payline, micro-units.
    #[serde(default = "default_bet")]
    pub bet_per_line: u64,
    #[serde(default = "default_paylines")]
    pub paylines: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            spins: default_spins(),
            bet_per_line: default_bet(),
            paylines: default_paylines(),
        }
    }
}

/// Simulated chain parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_blocks_until_claim")]
    pub blocks_until_claim: u64,
    #[serde(default = "default_block_interval_ms")]
    pub block_interval_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            blocks_until_claim: default_blocks_until_claim(),
            block_interval_ms: default_block_interval_ms(),
        }
    }
}

fn default_address() -> String {
    "demo-player".to_string()
}

fn default_funding() -> u64 {
    100 * MICROS_PER_TOKEN
}

fn default_spins() -> u32 {
    5
}

fn default_bet() -> u64 {
    MICROS_PER_TOKEN
}

fn default_paylines() -> u32 {
    5
}

fn default_seed() -> u64 {
    0x5107_5EED
}

fn default_blocks_until_claim() -> u64 {
    2
}

fn default_block_interval_ms() -> u64 {
    400
}

impl FileConfig {
    /// Load the file if it exists; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[wallet]
address = "alice"
funding = 250000000

[session]
spins = 12
bet_per_line = 500000
paylines = 3

[sandbox]
seed = 7
blocks_until_claim = 4
block_interval_ms = 100
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.wallet.address, "alice");
        assert_eq!(config.wallet.funding, 250_000_000);
        assert_eq!(config.session.spins, 12);
        assert_eq!(config.session.bet_per_line, 500_000);
        assert_eq!(config.sandbox.seed, 7);
        assert_eq!(config.sandbox.blocks_until_claim, 4);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config.wallet.address, "demo-player");
        assert_eq!(config.session.spins, 5);
        assert_eq!(config.session.bet_per_line, MICROS_PER_TOKEN);
        assert_eq!(config.sandbox.blocks_until_claim, 2);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: FileConfig = toml::from_str("[session]\nspins = 2\n").unwrap();
        assert_eq!(config.session.spins, 2);
        assert_eq!(config.session.paylines, 5);
        assert_eq!(config.wallet.address, "demo-player");
    }
}

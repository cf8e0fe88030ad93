//! Chain adapter boundary.
//!
//! The engine only ever talks to the chain through [`ChainAdapter`]. A
//! production implementation wraps an RPC endpoint ([`rpc::RpcAdapter`]);
//! the sandbox crate ships a simulated chain; tests script their own
//! doubles. Transaction signing lives behind this boundary and is none of
//! the engine's business.

pub mod rpc;

use crate::errors::{ErrorCode, GameError};
use crate::types::config::SlotMachineConfig;
use crate::types::spin::{SpinOutcome, SubmitReceipt};
use async_trait::async_trait;
use thiserror::Error;

/// Errors crossing the adapter boundary.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Transport-level failure talking to the chain.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The chain answered but rejected the request.
    #[error("chain error: {message}")]
    Api { message: String },

    /// The chain answered with something we could not interpret.
    #[error("malformed response: {0}")]
    Parse(String),

    /// Claim attempted before the claim block was reached.
    #[error("outcome not ready until block {claim_block}, current block is {current}")]
    NotReady { claim_block: u64, current: u64 },

    /// Claim attempted with a key the chain does not know.
    #[error("unknown bet key: {0}")]
    UnknownBetKey(String),
}

impl From<AdapterError> for GameError {
    fn from(error: AdapterError) -> Self {
        match &error {
            AdapterError::Transport(_) => {
                GameError::new(ErrorCode::NetworkError, error.to_string(), true)
            }
            AdapterError::Api { .. } | AdapterError::NotReady { .. } => {
                GameError::new(ErrorCode::TransactionFailed, error.to_string(), true)
            }
            AdapterError::Parse(_) => {
                GameError::new(ErrorCode::Unknown, error.to_string(), false)
            }
            AdapterError::UnknownBetKey(_) => {
                GameError::new(ErrorCode::ContractError, error.to_string(), false)
            }
        }
    }
}

/// What any chain implementation must provide to drive spins.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Prepare the underlying client. Fails when preconditions such as
    /// connectivity are unmet.
    async fn initialize(&self) -> Result<(), AdapterError>;

    /// Submit a spin transaction. The returned receipt carries the opaque
    /// bet key used to claim the outcome once `claim_block` is reached.
    async fn submit_spin(
        &self,
        bet_per_line: u64,
        paylines: u32,
        wallet: &str,
    ) -> Result<SubmitReceipt, AdapterError>;

    /// Claim the outcome for a previously submitted bet. Must return the
    /// same outcome every time once the claim block has passed.
    async fn claim_spin(&self, bet_key: &str) -> Result<SpinOutcome, AdapterError>;

    /// Current wallet balance in micro-units.
    async fn balance(&self, address: &str) -> Result<u64, AdapterError>;

    /// Current chain height.
    async fn current_block(&self) -> Result<u64, AdapterError>;

    /// The machine configuration published by the slot contract.
    async fn contract_config(&self) -> Result<SlotMachineConfig, AdapterError>;
}

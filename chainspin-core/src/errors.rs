//! Error taxonomy surfaced to engine callers and event subscribers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InsufficientBalance,
    InvalidBet,
    NetworkError,
    TransactionFailed,
    ContractError,
    NotInitialized,
    Timeout,
    Unknown,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::InsufficientBalance => "INSUFFICIENT_BALANCE",
            ErrorCode::InvalidBet => "INVALID_BET",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::TransactionFailed => "TRANSACTION_FAILED",
            ErrorCode::ContractError => "CONTRACT_ERROR",
            ErrorCode::NotInitialized => "NOT_INITIALIZED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// An error as carried on failed spins, the store's `last_error` field and
/// failure events. `recoverable` tells the caller whether retrying the same
/// action can reasonably succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct GameError {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
}

impl GameError {
    pub fn new(code: ErrorCode, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            recoverable,
        }
    }

    pub fn not_initialized() -> Self {
        Self::new(
            ErrorCode::NotInitialized,
            "engine is not initialized",
            false,
        )
    }

    pub fn invalid_bet(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidBet, message, true)
    }

    pub fn insufficient_balance(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InsufficientBalance, message, true)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message, true)
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransactionFailed, message, true)
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ContractError, message, false)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message, true)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message, false)
    }
}

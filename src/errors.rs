//! Error types for the duel settlement engine.
//!
//! Request-level errors (`NotFound`, `Full`, `SelfJoin`, `Immutable`,
//! `TooLate`) reject the call without mutating session state.
//! Resolution-level errors (`EntropyUnavailable`, `TransferFailed`) cancel
//! the duel with refunds; none of them are process-fatal.

use crate::escrow::EscrowError;

/// Root error type for all engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session is already full")]
    Full,

    #[error("Player is already in this session")]
    SelfJoin,

    #[error("Player is not part of this session")]
    NotInSession,

    #[error("Pick is already locked for this player")]
    Immutable,

    #[error("Selection deadline has passed")]
    TooLate,

    #[error("Insufficient funds for entry fee")]
    InsufficientFunds,

    #[error("Entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("Escrow transfer failed: {0}")]
    TransferFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<rocksdb::Error> for EngineError {
    fn from(e: rocksdb::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Storage(format!("Record encoding failed: {}", e))
    }
}

impl From<EscrowError> for EngineError {
    fn from(e: EscrowError) -> Self {
        match e {
            EscrowError::InsufficientFunds => EngineError::InsufficientFunds,
            EscrowError::TransferFailed(msg) => EngineError::TransferFailed(msg),
        }
    }
}

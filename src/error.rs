//! Crate-level error type.

use thiserror::Error;

use crate::core::ids::SessionId;
use crate::engine::settlement::SettlementError;
use crate::game::session::SessionError;
use crate::ledger::LedgerError;
use crate::store::StoreError;

/// Errors surfaced by [`crate::engine::Arena`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    /// State machine rejected the operation.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Persistence failed; nothing was committed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Ledger interaction failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Settlement run failed.
    #[error(transparent)]
    Settlement(#[from] SettlementError),

    /// No such session.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// Stake must be positive.
    #[error("invalid stake: {0}")]
    InvalidStake(String),
}

impl ArenaError {
    /// Short machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            ArenaError::Session(e) => match e {
                SessionError::NotAParticipant => "not_a_participant",
                SessionError::WrongPhase { .. } => "wrong_phase",
                SessionError::InvalidReveal { .. } => "invalid_reveal",
                SessionError::AlreadyCommitted => "already_committed",
                SessionError::CommitmentReused => "commitment_reused",
                SessionError::AlreadyRevealed => "already_revealed",
                SessionError::SelfMatch => "self_match",
                SessionError::SeatTaken => "seat_taken",
                SessionError::AlreadyAuthorized => "already_authorized",
                SessionError::InvalidAuthorization => "invalid_authorization",
                SessionError::NoDecisiveOutcome => "no_decisive_outcome",
            },
            ArenaError::Store(e) => match e {
                StoreError::Unavailable(_) => "store_unavailable",
                StoreError::NotFound => "record_not_found",
                StoreError::Duplicate => "record_exists",
                StoreError::Corrupt(_) => "store_corrupt",
            },
            ArenaError::Ledger(_) | ArenaError::Settlement(_) => "settlement_failed",
            ArenaError::SessionNotFound(_) => "session_not_found",
            ArenaError::InvalidStake(_) => "invalid_stake",
        }
    }
}

/// Result alias for arena operations.
pub type ArenaResult<T> = Result<T, ArenaError>;

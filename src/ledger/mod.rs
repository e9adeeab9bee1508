//! Ledger Client
//!
//! Outbound side of settlement: one transaction carries a batch of
//! dual-signed results. The ledger is the final arbiter of duplicates; the
//! engine never assumes a resubmission is safe.

pub mod memory;

use async_trait::async_trait;

use crate::core::ids::{SessionId, TxReference};
use crate::game::session::SettlementBatchItem;

pub use memory::{MemoryLedger, LedgerFault};

/// Ledger errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The ledger refused the transaction.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// One game in the batch failed validation; the whole batch was refused.
    #[error("game {game_id} rejected: {reason}")]
    ItemRejected {
        /// Offending game.
        game_id: SessionId,
        /// Ledger's reason.
        reason: String,
    },

    /// Some games in the batch were already settled on the ledger.
    #[error("{} game(s) already settled", .0.len())]
    DuplicateSettlement(Vec<SessionId>),

    /// The transaction was submitted but did not confirm.
    #[error("confirmation failed: {0}")]
    ConfirmationFailed(String),

    /// No confirmation within the allotted time.
    #[error("timed out waiting for confirmation")]
    Timeout,

    /// Ledger endpoint unreachable.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Settlement ledger contract.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit all items in a single transaction.
    async fn submit_batch(&self, items: &[SettlementBatchItem]) -> Result<TxReference, LedgerError>;

    /// Wait until `tx` is confirmed. Returns the confirmed reference.
    async fn await_confirmation(&self, tx: &TxReference) -> Result<TxReference, LedgerError>;

    /// Transaction that settled a game, if the ledger has one.
    async fn find_settlement(&self, game_id: &SessionId) -> Result<Option<TxReference>, LedgerError>;
}

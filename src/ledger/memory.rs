//! In-memory ledger.
//!
//! Behaves like the settlement contract: verifies both signatures of every
//! item, rejects a batch containing an already-settled game, and records
//! games as settled once the transaction lands. Faults can be queued to
//! drive the batcher's failure paths.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{LedgerClient, LedgerError};
use crate::core::hash::DigestHasher;
use crate::core::ids::{SessionId, TxReference};
use crate::game::authorization::{result_digest, verify_result};
use crate::game::session::SettlementBatchItem;

/// Domain separator for transaction references.
const TX_DOMAIN: &[u8] = b"RPS_ARENA_TX_V1";

/// Fault injected into the next ledger interaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerFault {
    /// `submit_batch` fails with this error; nothing lands.
    FailSubmit(LedgerError),
    /// The transaction lands, but `await_confirmation` reports this error.
    LoseConfirmation(LedgerError),
    /// The transaction reverts: nothing lands, confirmation fails.
    Revert,
}

#[derive(Default)]
struct Inner {
    nonce: u64,
    settled: BTreeMap<SessionId, TxReference>,
    pending: BTreeMap<TxReference, PendingTx>,
    submitted: Vec<Vec<SettlementBatchItem>>,
    faults: VecDeque<LedgerFault>,
}

struct PendingTx {
    games: Vec<SessionId>,
    fault: Option<LedgerFault>,
}

/// Process-local [`LedgerClient`].
pub struct MemoryLedger {
    inner: Mutex<Inner>,
    verify_signatures: bool,
    confirmation_delay: Duration,
}

impl MemoryLedger {
    /// Ledger that verifies signatures and confirms immediately.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            verify_signatures: true,
            confirmation_delay: Duration::ZERO,
        }
    }

    /// Toggle signature verification.
    pub fn with_signature_checks(mut self, enabled: bool) -> Self {
        self.verify_signatures = enabled;
        self
    }

    /// Delay every confirmation.
    pub fn with_confirmation_delay(mut self, delay: Duration) -> Self {
        self.confirmation_delay = delay;
        self
    }

    /// Queue a fault for the next submission.
    pub async fn inject(&self, fault: LedgerFault) {
        self.inner.lock().await.faults.push_back(fault);
    }

    /// Every batch passed to `submit_batch`, including failed ones.
    pub async fn submitted_batches(&self) -> Vec<Vec<SettlementBatchItem>> {
        self.inner.lock().await.submitted.clone()
    }

    /// Number of games recorded as settled.
    pub async fn settled_count(&self) -> usize {
        self.inner.lock().await.settled.len()
    }

    fn check_item(&self, item: &SettlementBatchItem) -> Result<(), LedgerError> {
        if !self.verify_signatures {
            return Ok(());
        }
        let digest = result_digest(&item.game_id, &item.winner, &item.loser, item.stake);
        let winner_ok = verify_result(&item.winner, &digest, &item.signature1)
            || verify_result(&item.winner, &digest, &item.signature2);
        let loser_ok = verify_result(&item.loser, &digest, &item.signature1)
            || verify_result(&item.loser, &digest, &item.signature2);
        if winner_ok && loser_ok {
            Ok(())
        } else {
            Err(LedgerError::ItemRejected {
                game_id: item.game_id,
                reason: "bad signatures".to_string(),
            })
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn submit_batch(&self, items: &[SettlementBatchItem]) -> Result<TxReference, LedgerError> {
        let mut inner = self.inner.lock().await;
        inner.submitted.push(items.to_vec());

        let fault = inner.faults.pop_front();
        if let Some(LedgerFault::FailSubmit(err)) = fault {
            return Err(err);
        }

        if items.is_empty() {
            return Err(LedgerError::Rejected("empty batch".to_string()));
        }
        let duplicates: Vec<_> = items
            .iter()
            .map(|item| item.game_id)
            .filter(|id| inner.settled.contains_key(id))
            .collect();
        if !duplicates.is_empty() {
            return Err(LedgerError::DuplicateSettlement(duplicates));
        }
        for item in items {
            self.check_item(item)?;
        }

        inner.nonce += 1;
        let mut hasher = DigestHasher::new(TX_DOMAIN);
        hasher.update_u64(inner.nonce);
        for item in items {
            hasher.update_bytes(item.game_id.as_bytes());
        }
        let tx = TxReference::new(format!("0x{}", hasher.finalize().to_hex()));

        debug!("Ledger accepted {} with {} item(s)", tx, items.len());
        inner.pending.insert(
            tx.clone(),
            PendingTx {
                games: items.iter().map(|item| item.game_id).collect(),
                fault,
            },
        );
        Ok(tx)
    }

    async fn await_confirmation(&self, tx: &TxReference) -> Result<TxReference, LedgerError> {
        if !self.confirmation_delay.is_zero() {
            tokio::time::sleep(self.confirmation_delay).await;
        }

        let mut inner = self.inner.lock().await;
        let pending = inner
            .pending
            .remove(tx)
            .ok_or_else(|| LedgerError::ConfirmationFailed(format!("unknown transaction {}", tx)))?;

        if pending.fault == Some(LedgerFault::Revert) {
            return Err(LedgerError::ConfirmationFailed(format!("{} reverted", tx)));
        }
        for game in &pending.games {
            inner.settled.insert(*game, tx.clone());
        }
        match pending.fault {
            Some(LedgerFault::LoseConfirmation(err)) => Err(err),
            _ => Ok(tx.clone()),
        }
    }

    async fn find_settlement(&self, game_id: &SessionId) -> Result<Option<TxReference>, LedgerError> {
        Ok(self.inner.lock().await.settled.get(game_id).cloned())
    }
}

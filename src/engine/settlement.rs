//! Settlement Batcher
//!
//! Periodically collects concluded, dual-signed, unsettled sessions, submits
//! them to the ledger in one transaction, waits for confirmation, and only
//! then marks them settled and credits statistics.
//!
//! Runs are single-flight. A failed run leaves every session unsettled so
//! the next run retries the same set. If a previous submission actually
//! landed but its confirmation was lost, the ledger rejects the resubmission
//! as a duplicate and the batcher recovers the original transaction
//! reference instead of submitting again.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::SettlementConfig;
use crate::core::ids::{SessionId, Stake, TxReference};
use crate::game::events::SessionEvent;
use crate::game::session::{GameSession, SettlementBatchItem};
use crate::ledger::{LedgerClient, LedgerError};
use crate::notify::{Notifier, Topic};
use crate::store::{SettlementCommit, Store, StoreError};

/// Settlement errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    /// Ledger rejected the batch or confirmation failed.
    #[error("settlement submission failed: {0}")]
    SubmissionFailed(LedgerError),

    /// Store read or write failed.
    #[error("settlement store error: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of one batcher run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Another run was in flight; nothing was done.
    pub skipped: bool,
    /// Eligible sessions found.
    pub candidates: usize,
    /// Confirmed transaction, if a submission succeeded.
    pub tx: Option<TxReference>,
    /// Sessions newly marked settled by this run.
    pub settled: Vec<SessionId>,
    /// Sessions recovered from an earlier transaction the ledger already had.
    pub reconciled: Vec<SessionId>,
}

/// Periodic batch settler.
pub struct SettlementBatcher {
    store: Arc<dyn Store>,
    ledger: Arc<dyn LedgerClient>,
    notifier: Arc<dyn Notifier>,
    config: SettlementConfig,
    winner_payout_bps: u32,
    in_flight: Mutex<()>,
}

impl SettlementBatcher {
    /// Create a batcher.
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<dyn LedgerClient>,
        notifier: Arc<dyn Notifier>,
        config: SettlementConfig,
        winner_payout_bps: u32,
    ) -> Self {
        Self {
            store,
            ledger,
            notifier,
            config,
            winner_payout_bps,
            in_flight: Mutex::new(()),
        }
    }

    /// Batcher configuration.
    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Run once: select, submit, confirm, record.
    #[instrument(skip(self), name = "settlement_run")]
    pub async fn run_once(&self) -> Result<BatchReport, SettlementError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Settlement run already in flight, skipping");
            return Ok(BatchReport { skipped: true, ..Default::default() });
        };

        let candidates = self.store.settlement_candidates(self.config.max_batch_size).await?;
        let mut report = BatchReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            debug!("No sessions awaiting settlement");
            return Ok(report);
        }

        let mut pending: Vec<GameSession> = candidates;

        // One retry after reconciling duplicates; anything beyond waits for
        // the next run.
        for attempt in 0..2 {
            let items: Vec<SettlementBatchItem> =
                pending.iter().filter_map(GameSession::settlement_item).collect();
            if items.is_empty() {
                break;
            }

            info!("Submitting settlement batch of {} (attempt {})", items.len(), attempt + 1);
            match self.ledger.submit_batch(&items).await {
                Ok(tx) => {
                    let confirmed = self.confirm(&tx).await?;
                    report.settled = self.record(&pending, &confirmed).await?;
                    report.tx = Some(confirmed);
                    break;
                }
                Err(LedgerError::DuplicateSettlement(ids)) if attempt == 0 => {
                    warn!("Ledger already holds {} game(s) from this batch, reconciling", ids.len());
                    report.reconciled = self.reconcile(&pending, &ids).await?;
                    pending.retain(|s| !ids.contains(&s.id));
                }
                Err(LedgerError::ItemRejected { game_id, reason }) => {
                    // Candidates are oldest first, so the same set comes back next run
                    warn!("Ledger rejected game {} ({}); settlement of this batch is blocked until it is fixed",
                        game_id, reason);
                    return Err(SettlementError::SubmissionFailed(LedgerError::ItemRejected { game_id, reason }));
                }
                Err(e) => {
                    warn!("Settlement submission failed: {}", e);
                    return Err(SettlementError::SubmissionFailed(e));
                }
            }
        }

        info!("Settlement run done: {} settled, {} reconciled",
            report.settled.len(), report.reconciled.len());
        Ok(report)
    }

    /// Wait for confirmation within the configured timeout.
    async fn confirm(&self, tx: &TxReference) -> Result<TxReference, SettlementError> {
        let wait = self.ledger.await_confirmation(tx);
        match tokio::time::timeout(self.config.confirmation_timeout, wait).await {
            Ok(Ok(confirmed)) => Ok(confirmed),
            Ok(Err(e)) => {
                warn!("Transaction {} not confirmed: {}", tx, e);
                Err(SettlementError::SubmissionFailed(e))
            }
            Err(_) => {
                warn!("Transaction {} confirmation timed out", tx);
                Err(SettlementError::SubmissionFailed(LedgerError::Timeout))
            }
        }
    }

    /// Mark sessions settled under `tx` and publish.
    async fn record(&self, sessions: &[GameSession], tx: &TxReference) -> Result<Vec<SessionId>, SettlementError> {
        let commits: Vec<SettlementCommit> = sessions
            .iter()
            .filter_map(|s| {
                Some(SettlementCommit {
                    session_id: s.id,
                    winner: s.winner()?.clone(),
                    loser: s.loser()?.clone(),
                    winner_credit: Stake(s.stake.scale_bps(self.winner_payout_bps)),
                })
            })
            .collect();

        let settled = match self.store.commit_settlement(&commits, tx, Utc::now()).await {
            Ok(settled) => settled,
            Err(e) => {
                // Confirmed on the ledger but not recorded: the next run sees
                // a duplicate and reconciles.
                error!("Confirmed {} but failed to record it: {}", tx, e);
                return Err(e.into());
            }
        };

        for id in &settled {
            self.notifier.publish(
                Topic::Session(*id),
                SessionEvent::Settled { session_id: *id, tx_reference: tx.clone() },
            );
        }
        Ok(settled)
    }

    /// Record games the ledger already settled under their original
    /// transactions.
    async fn reconcile(&self, sessions: &[GameSession], ids: &[SessionId]) -> Result<Vec<SessionId>, SettlementError> {
        let mut by_tx: BTreeMap<TxReference, Vec<GameSession>> = BTreeMap::new();
        for session in sessions.iter().filter(|s| ids.contains(&s.id)) {
            match self.ledger.find_settlement(&session.id).await {
                Ok(Some(tx)) => by_tx.entry(tx).or_default().push(session.clone()),
                Ok(None) => warn!("Ledger reported {} as duplicate but has no record", session.id.short()),
                Err(e) => warn!("Could not look up settlement of {}: {}", session.id.short(), e),
            }
        }

        let mut reconciled = Vec::new();
        for (tx, group) in by_tx {
            reconciled.extend(self.record(&group, &tx).await?);
        }
        Ok(reconciled)
    }

    /// Run after `initial_delay`, then every `interval`, until `shutdown`
    /// fires. Failures are logged and retried on the next tick.
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = Instant::now() + self.config.initial_delay;
            let mut ticker = interval_at(start, self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!("Settlement scheduler started (every {:?}, first run in {:?})",
                self.config.interval, self.config.initial_delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!("Settlement run failed: {}", e);
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Settlement scheduler stopping");
                        break;
                    }
                }
            }
        })
    }
}

//! Matchmaking Queue
//!
//! Pairs participants waiting at the same stake. Each stake bucket has its
//! own lock, so two concurrent joiners can never claim the same waiting
//! entry, while different buckets proceed in parallel.
//!
//! A participant waits in at most one bucket: joining a new stake moves
//! them out of any other bucket first. Joins and leaves by the same
//! participant are serialized, always taking the participant lock before
//! any bucket lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::core::ids::{ParticipantId, Stake};
use crate::engine::locks::LockTable;
use crate::engine::registry::SessionRegistry;
use crate::error::{ArenaError, ArenaResult};
use crate::game::events::SessionEvent;
use crate::game::session::GameSession;
use crate::store::{QueueEntry, Store};

/// Result of a queue join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// No compatible opponent; the participant is waiting.
    Queued {
        /// Bucket joined.
        stake: Stake,
        /// Events to publish.
        events: Vec<SessionEvent>,
    },
    /// Paired with the oldest waiting opponent.
    Matched {
        /// The new session, participant in the second slot.
        session: GameSession,
        /// Events to publish.
        events: Vec<SessionEvent>,
    },
}

impl JoinOutcome {
    /// Whether a session was created.
    pub fn is_matched(&self) -> bool {
        matches!(self, JoinOutcome::Matched { .. })
    }

    /// Events produced by the join.
    pub fn events(&self) -> &[SessionEvent] {
        match self {
            JoinOutcome::Queued { events, .. } | JoinOutcome::Matched { events, .. } => events,
        }
    }
}

/// Stake-bucketed matchmaking.
pub struct MatchmakingQueue {
    store: Arc<dyn Store>,
    registry: Arc<SessionRegistry>,
    buckets: LockTable<Stake>,
    participants: LockTable<ParticipantId>,
}

impl MatchmakingQueue {
    /// Create a queue over a store and registry.
    pub fn new(store: Arc<dyn Store>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            store,
            registry,
            buckets: LockTable::new(),
            participants: LockTable::new(),
        }
    }

    /// Join the queue at `stake`.
    pub async fn join(
        &self,
        participant: &ParticipantId,
        stake: Stake,
        now: DateTime<Utc>,
    ) -> ArenaResult<JoinOutcome> {
        if stake.is_zero() {
            return Err(ArenaError::InvalidStake("stake must be positive".into()));
        }

        let lock = self.participants.handle(participant).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.join_serialized(participant, stake, now).await
        };
        self.participants.release(participant, lock).await;
        outcome
    }

    /// Remove every entry the participant owns. Idempotent.
    pub async fn leave(&self, participant: &ParticipantId) -> ArenaResult<Vec<Stake>> {
        let lock = self.participants.handle(participant).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.leave_serialized(participant).await
        };
        self.participants.release(participant, lock).await;
        outcome
    }

    async fn join_serialized(
        &self,
        participant: &ParticipantId,
        stake: Stake,
        now: DateTime<Utc>,
    ) -> ArenaResult<JoinOutcome> {
        // Leave any other bucket first
        for entry in self.store.queue_entries_for(participant).await? {
            if entry.stake != stake {
                self.remove_locked(participant, entry.stake).await?;
            }
        }

        let bucket = self.buckets.handle(&stake).await;
        let outcome = {
            let _guard = bucket.lock().await;
            self.join_bucket(participant, stake, now).await
        };
        self.buckets.release(&stake, bucket).await;
        outcome
    }

    async fn join_bucket(
        &self,
        participant: &ParticipantId,
        stake: Stake,
        now: DateTime<Utc>,
    ) -> ArenaResult<JoinOutcome> {
        let entries = self.store.queue_entries(stake).await?;
        if entries.iter().any(|e| &e.participant == participant) {
            debug!("{} already waiting at {}", participant, stake);
            return Ok(JoinOutcome::Queued { stake, events: Vec::new() });
        }

        let Some(waiting) = entries.into_iter().find(|e| &e.participant != participant) else {
            let entry = QueueEntry {
                participant: participant.clone(),
                stake,
                enqueued_at: now,
            };
            self.store.insert_queue_entry(&entry).await?;
            debug!("{} queued at {}", participant, stake);
            return Ok(JoinOutcome::Queued {
                stake,
                events: vec![SessionEvent::Queued { participant: participant.clone(), stake }],
            });
        };

        self.store.remove_queue_entry(&waiting.participant, stake).await?;
        let created = self
            .registry
            .create_matched(waiting.participant.clone(), participant.clone(), stake, now)
            .await;

        match created {
            Ok((session, events)) => {
                info!("Matched {} with {} at {} -> {}",
                    waiting.participant, participant, stake, session.id.short());
                Ok(JoinOutcome::Matched { session, events })
            }
            Err(e) => {
                // Put the waiting participant back where they were
                if let Err(restore) = self.store.insert_queue_entry(&waiting).await {
                    warn!("Failed to restore queue entry for {}: {}", waiting.participant, restore);
                }
                Err(e)
            }
        }
    }

    async fn leave_serialized(&self, participant: &ParticipantId) -> ArenaResult<Vec<Stake>> {
        let mut left = Vec::new();
        for entry in self.store.queue_entries_for(participant).await? {
            if self.remove_locked(participant, entry.stake).await? {
                left.push(entry.stake);
            }
        }
        if !left.is_empty() {
            debug!("{} left {} bucket(s)", participant, left.len());
        }
        Ok(left)
    }

    /// Entries waiting at a stake, oldest first.
    pub async fn waiting(&self, stake: Stake) -> ArenaResult<Vec<QueueEntry>> {
        Ok(self.store.queue_entries(stake).await?)
    }

    async fn remove_locked(&self, participant: &ParticipantId, stake: Stake) -> ArenaResult<bool> {
        let bucket = self.buckets.handle(&stake).await;
        let removed = {
            let _guard = bucket.lock().await;
            self.store.remove_queue_entry(participant, stake).await
        };
        self.buckets.release(&stake, bucket).await;
        Ok(removed?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::round::Slot;
    use crate::game::session::{SessionRules, SessionStatus};
    use crate::store::MemoryStore;
    use chrono::Duration;
    use proptest::prelude::*;

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::new(s)
    }

    fn queue() -> (Arc<MemoryStore>, MatchmakingQueue) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(SessionRegistry::new(store.clone(), SessionRules::default()));
        (store.clone(), MatchmakingQueue::new(store, registry))
    }

    const ONE: Stake = Stake(1_000_000);

    #[tokio::test]
    async fn test_first_waits_second_matches() {
        let (_, queue) = queue();
        let now = Utc::now();

        let x = queue.join(&pid("0xx"), ONE, now).await.unwrap();
        assert!(!x.is_matched());

        let y = queue.join(&pid("0xy"), ONE, now).await.unwrap();
        let JoinOutcome::Matched { session, .. } = y else {
            panic!("expected a match");
        };
        assert_eq!(session.participant(Slot::First), Some(&pid("0xx")));
        assert_eq!(session.participant(Slot::Second), Some(&pid("0xy")));
        assert_eq!(session.status, SessionStatus::Playing);
        assert!(queue.waiting(ONE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_self_join_never_matches() {
        let (_, queue) = queue();
        let now = Utc::now();
        assert!(!queue.join(&pid("0xx"), ONE, now).await.unwrap().is_matched());
        let again = queue.join(&pid("0xx"), ONE, now).await.unwrap();
        assert!(!again.is_matched());
        assert!(again.events().is_empty());
        assert_eq!(queue.waiting(ONE).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_different_stakes_do_not_match() {
        let (_, queue) = queue();
        let now = Utc::now();
        queue.join(&pid("0xx"), ONE, now).await.unwrap();
        assert!(!queue.join(&pid("0xy"), Stake(2_000_000), now).await.unwrap().is_matched());
    }

    #[tokio::test]
    async fn test_fifo_tie_break() {
        let (store, queue) = queue();
        let now = Utc::now();

        // Seed two waiting entries directly with distinct timestamps
        for (name, offset) in [("0xlate", 5), ("0xearly", 1)] {
            store
                .insert_queue_entry(&QueueEntry {
                    participant: pid(name),
                    stake: ONE,
                    enqueued_at: now + Duration::seconds(offset),
                })
                .await
                .unwrap();
        }

        let JoinOutcome::Matched { session, .. } =
            queue.join(&pid("0xz"), ONE, now + Duration::seconds(10)).await.unwrap()
        else {
            panic!("expected a match");
        };
        assert_eq!(session.participant(Slot::First), Some(&pid("0xearly")));
        assert_eq!(queue.waiting(ONE).await.unwrap()[0].participant, pid("0xlate"));
    }

    #[tokio::test]
    async fn test_join_moves_between_buckets() {
        let (store, queue) = queue();
        let now = Utc::now();
        queue.join(&pid("0xx"), ONE, now).await.unwrap();
        queue.join(&pid("0xx"), Stake(2_000_000), now).await.unwrap();

        let entries = store.queue_entries_for(&pid("0xx")).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].stake, Stake(2_000_000));
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let (_, queue) = queue();
        queue.join(&pid("0xx"), ONE, Utc::now()).await.unwrap();
        assert_eq!(queue.leave(&pid("0xx")).await.unwrap(), vec![ONE]);
        assert!(queue.leave(&pid("0xx")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_stake_rejected() {
        let (_, queue) = queue();
        let result = queue.join(&pid("0xx"), Stake(0), Utc::now()).await;
        assert!(matches!(result, Err(ArenaError::InvalidStake(_))));
    }

    #[tokio::test]
    async fn test_store_outage_leaves_queue_intact() {
        let (store, queue) = queue();
        let now = Utc::now();
        queue.join(&pid("0xx"), ONE, now).await.unwrap();

        store.set_available(false);
        assert!(queue.join(&pid("0xy"), ONE, now).await.is_err());
        store.set_available(true);

        // The failure hit before anything was removed
        assert_eq!(queue.waiting(ONE).await.unwrap()[0].participant, pid("0xx"));
    }

    #[tokio::test]
    async fn test_concurrent_joiners_claim_one_entry() {
        let (store, queue) = queue();
        let queue = Arc::new(queue);
        let now = Utc::now();
        queue.join(&pid("0xwaiting"), ONE, now).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.join(&pid(&format!("0xj{}", i)), ONE, now).await.unwrap().is_matched()
            }));
        }
        let mut matched = 0;
        for handle in handles {
            if handle.await.unwrap() {
                matched += 1;
            }
        }

        // Nine participants total: four pairs, one left waiting
        assert_eq!(matched, 4);
        assert_eq!(store.session_count().await, 4);
        assert_eq!(queue.waiting(ONE).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bucket_locks_dropped_after_leave() {
        let (_, queue) = queue();
        let now = Utc::now();
        for stake in 1..=500 {
            queue.join(&pid("0xx"), Stake(stake), now).await.unwrap();
        }
        assert_eq!(queue.leave(&pid("0xx")).await.unwrap(), vec![Stake(500)]);
        assert_eq!(queue.buckets.len().await, 0);
        assert_eq!(queue.participants.len().await, 0);
    }

    #[tokio::test]
    async fn test_bucket_locks_dropped_after_match() {
        let (_, queue) = queue();
        let now = Utc::now();
        queue.join(&pid("0xx"), ONE, now).await.unwrap();
        assert!(queue.join(&pid("0xy"), ONE, now).await.unwrap().is_matched());
        assert_eq!(queue.buckets.len().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_joins_by_one_participant_keep_one_entry() {
        let (store, queue) = queue();
        let queue = Arc::new(queue);
        let now = Utc::now();

        let mut handles = Vec::new();
        for stake in 1..=16 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.join(&pid("0xx"), Stake(stake), now).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.queue_entries_for(&pid("0xx")).await.unwrap().len(), 1);
    }

    proptest! {
        #[test]
        fn prop_never_self_paired(joins in proptest::collection::vec(0u8..4, 1..30)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let (_, queue) = queue();
                for who in joins {
                    let outcome = queue.join(&pid(&format!("0x{}", who)), ONE, Utc::now()).await.unwrap();
                    if let JoinOutcome::Matched { session, .. } = outcome {
                        assert_ne!(session.participant(Slot::First), session.participant(Slot::Second));
                    }
                }
            });
        }
    }
}

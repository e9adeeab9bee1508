//! In-memory store.
//!
//! Sessions are kept as bincode snapshots so callers never share a mutable
//! session with the store; every read decodes a fresh copy. Availability can
//! be toggled to exercise `StoreUnavailable` paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{ParticipantRecord, QueueEntry, SettlementCommit, Store, StoreError};
use crate::core::ids::{ParticipantId, SessionId, Stake, TxReference};
use crate::game::session::{GameSession, SessionStatus};

#[derive(Default)]
struct Inner {
    participants: BTreeMap<ParticipantId, ParticipantRecord>,
    sessions: BTreeMap<SessionId, Vec<u8>>,
    queue: BTreeMap<Stake, Vec<QueueEntry>>,
}

impl Inner {
    fn decode(&self, id: &SessionId) -> Result<Option<GameSession>, StoreError> {
        self.sessions.get(id).map(|bytes| decode(bytes)).transpose()
    }

    fn decode_all(&self) -> Result<Vec<GameSession>, StoreError> {
        self.sessions.values().map(|bytes| decode(bytes)).collect()
    }
}

fn encode(session: &GameSession) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(session).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<GameSession, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
}

/// Process-local [`Store`].
pub struct MemoryStore {
    inner: RwLock<Inner>,
    available: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`]
    /// (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored sessions.
    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn participant(&self, id: &ParticipantId) -> Result<Option<ParticipantRecord>, StoreError> {
        self.check()?;
        Ok(self.inner.read().await.participants.get(id).cloned())
    }

    async fn ensure_participant(
        &self,
        id: &ParticipantId,
        now: DateTime<Utc>,
    ) -> Result<ParticipantRecord, StoreError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        Ok(inner
            .participants
            .entry(id.clone())
            .or_insert_with(|| ParticipantRecord::new(id.clone(), now))
            .clone())
    }

    async fn leaderboard(&self, limit: usize) -> Result<Vec<ParticipantRecord>, StoreError> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut records: Vec<_> = inner.participants.values().cloned().collect();
        records.sort_by(|a, b| b.wins.cmp(&a.wins).then(b.earnings.cmp(&a.earnings)));
        records.truncate(limit);
        Ok(records)
    }

    async fn insert_session(&self, session: &GameSession) -> Result<(), StoreError> {
        self.check()?;
        let bytes = encode(session)?;
        let mut inner = self.inner.write().await;
        if inner.sessions.contains_key(&session.id) {
            return Err(StoreError::Duplicate);
        }
        inner.sessions.insert(session.id, bytes);
        Ok(())
    }

    async fn save_session(&self, session: &GameSession) -> Result<(), StoreError> {
        self.check()?;
        let bytes = encode(session)?;
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&session.id) {
            Some(slot) => {
                *slot = bytes;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn load_session(&self, id: &SessionId) -> Result<Option<GameSession>, StoreError> {
        self.check()?;
        self.inner.read().await.decode(id)
    }

    async fn sessions_for(
        &self,
        participant: &ParticipantId,
        limit: usize,
    ) -> Result<Vec<GameSession>, StoreError> {
        self.check()?;
        let mut sessions: Vec<_> = self
            .inner
            .read()
            .await
            .decode_all()?
            .into_iter()
            .filter(|s| s.slot_of(participant).is_some())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn active_sessions_for(&self, participant: &ParticipantId) -> Result<Vec<GameSession>, StoreError> {
        self.check()?;
        Ok(self
            .inner
            .read()
            .await
            .decode_all()?
            .into_iter()
            .filter(|s| matches!(s.status, SessionStatus::Lobby | SessionStatus::Playing))
            .filter(|s| s.slot_of(participant).is_some())
            .collect())
    }

    async fn settlement_candidates(&self, limit: usize) -> Result<Vec<GameSession>, StoreError> {
        self.check()?;
        let mut eligible: Vec<_> = self
            .inner
            .read()
            .await
            .decode_all()?
            .into_iter()
            .filter(GameSession::is_settlement_eligible)
            .collect();
        eligible.sort_by_key(|s| s.completed_at);
        eligible.truncate(limit);
        Ok(eligible)
    }

    async fn commit_settlement(
        &self,
        commits: &[SettlementCommit],
        tx: &TxReference,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionId>, StoreError> {
        self.check()?;
        let mut inner = self.inner.write().await;

        // Stage everything first so a decode failure leaves nothing applied.
        let mut sessions = Vec::with_capacity(commits.len());
        let mut participants = inner.participants.clone();
        let mut settled = Vec::new();

        for commit in commits {
            let Some(mut session) = inner.decode(&commit.session_id)? else {
                continue;
            };
            if !session.mark_settled(tx.clone(), now) {
                continue;
            }
            sessions.push((session.id, encode(&session)?));
            settled.push(session.id);

            participants
                .entry(commit.winner.clone())
                .or_insert_with(|| ParticipantRecord::new(commit.winner.clone(), now))
                .record_win(commit.winner_credit);
            participants
                .entry(commit.loser.clone())
                .or_insert_with(|| ParticipantRecord::new(commit.loser.clone(), now))
                .record_loss();
        }

        for (id, bytes) in sessions {
            inner.sessions.insert(id, bytes);
        }
        inner.participants = participants;
        Ok(settled)
    }

    async fn queue_entries(&self, stake: Stake) -> Result<Vec<QueueEntry>, StoreError> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut entries = inner.queue.get(&stake).cloned().unwrap_or_default();
        entries.sort_by_key(|e| e.enqueued_at);
        Ok(entries)
    }

    async fn insert_queue_entry(&self, entry: &QueueEntry) -> Result<bool, StoreError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let bucket = inner.queue.entry(entry.stake).or_default();
        if bucket.iter().any(|e| e.participant == entry.participant) {
            return Ok(false);
        }
        bucket.push(entry.clone());
        Ok(true)
    }

    async fn remove_queue_entry(&self, participant: &ParticipantId, stake: Stake) -> Result<bool, StoreError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let Some(bucket) = inner.queue.get_mut(&stake) else {
            return Ok(false);
        };
        let before = bucket.len();
        bucket.retain(|e| &e.participant != participant);
        let removed = bucket.len() != before;
        if bucket.is_empty() {
            inner.queue.remove(&stake);
        }
        Ok(removed)
    }

    async fn queue_entries_for(&self, participant: &ParticipantId) -> Result<Vec<QueueEntry>, StoreError> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner
            .queue
            .values()
            .flatten()
            .filter(|e| &e.participant == participant)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::new(s)
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let store = MemoryStore::new();
        let (session, _) =
            GameSession::matched(SessionId::new_v4(), pid("0xa"), pid("0xb"), Stake(5), now()).unwrap();

        store.insert_session(&session).await.unwrap();
        assert_eq!(store.load_session(&session.id).await.unwrap(), Some(session.clone()));
        assert_eq!(store.insert_session(&session).await, Err(StoreError::Duplicate));
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_save_unknown_session() {
        let store = MemoryStore::new();
        let session = GameSession::open(SessionId::new_v4(), pid("0xa"), Stake(5), now());
        assert_eq!(store.save_session(&session).await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.ensure_participant(&pid("0xa"), now()).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_available(true);
        assert!(store.ensure_participant(&pid("0xa"), now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_participant_defaults() {
        let store = MemoryStore::new();
        let record = store.ensure_participant(&pid("0xABCDEF1234"), now()).await.unwrap();
        assert_eq!(record.display_name, "Player_abcdef");
        assert_eq!(record.wins, 0);

        // Second call returns the same record
        let again = store.ensure_participant(&pid("0xabcdef1234"), now() + Duration::hours(1)).await.unwrap();
        assert_eq!(again.created_at, now());
    }

    #[tokio::test]
    async fn test_queue_one_entry_per_participant_and_bucket() {
        let store = MemoryStore::new();
        let entry = QueueEntry { participant: pid("0xa"), stake: Stake(1), enqueued_at: now() };

        assert!(store.insert_queue_entry(&entry).await.unwrap());
        assert!(!store.insert_queue_entry(&entry).await.unwrap());

        let other_bucket = QueueEntry { stake: Stake(2), ..entry.clone() };
        assert!(store.insert_queue_entry(&other_bucket).await.unwrap());
        assert_eq!(store.queue_entries_for(&pid("0xa")).await.unwrap().len(), 2);

        assert!(store.remove_queue_entry(&pid("0xa"), Stake(1)).await.unwrap());
        assert!(!store.remove_queue_entry(&pid("0xa"), Stake(1)).await.unwrap());
        assert!(store.queue_entries(Stake(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queue_fifo_order() {
        let store = MemoryStore::new();
        for (i, name) in ["0xc", "0xa", "0xb"].iter().enumerate() {
            let entry = QueueEntry {
                participant: pid(name),
                stake: Stake(1),
                enqueued_at: now() + Duration::seconds(i as i64),
            };
            store.insert_queue_entry(&entry).await.unwrap();
        }
        let order: Vec<_> = store
            .queue_entries(Stake(1))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.participant)
            .collect();
        assert_eq!(order, vec![pid("0xc"), pid("0xa"), pid("0xb")]);
    }

    #[tokio::test]
    async fn test_leaderboard_order() {
        let store = MemoryStore::new();
        for name in ["0xa", "0xb", "0xc"] {
            store.ensure_participant(&pid(name), now()).await.unwrap();
        }
        let commits = vec![SettlementCommit {
            session_id: SessionId::new_v4(),
            winner: pid("0xb"),
            loser: pid("0xa"),
            winner_credit: Stake(10),
        }];
        // Unknown session ids are skipped: no stats change
        let settled = store.commit_settlement(&commits, &TxReference::new("0x1"), now()).await.unwrap();
        assert!(settled.is_empty());
        let board = store.leaderboard(10).await.unwrap();
        assert!(board.iter().all(|r| r.wins == 0));
        assert_eq!(store.leaderboard(2).await.unwrap().len(), 2);
    }

    #[test]
    fn test_record_streaks() {
        let mut record = ParticipantRecord::new(pid("0xa"), now());
        record.record_win(Stake(194));
        record.record_win(Stake(194));
        record.record_loss();
        record.record_win(Stake(194));
        assert_eq!(record.wins, 3);
        assert_eq!(record.losses, 1);
        assert_eq!(record.earnings, Stake(582));
        assert_eq!(record.current_streak, 1);
        assert_eq!(record.best_streak, 2);
    }
}

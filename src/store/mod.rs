//! Persistent Store
//!
//! The store is the system of record for participants, sessions and queue
//! entries. Every mutating engine operation is acknowledged by the store
//! before any event is published.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ids::{ParticipantId, SessionId, Stake, TxReference};
use crate::game::session::GameSession;

pub use memory::MemoryStore;

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backend could not be reached or refused the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Record does not exist.
    #[error("record not found")]
    NotFound,

    /// Record with this key already exists.
    #[error("record already exists")]
    Duplicate,

    /// Stored bytes could not be decoded.
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

/// Participant profile and cumulative statistics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    /// Wallet identifier.
    pub id: ParticipantId,
    /// Display name.
    pub display_name: String,
    /// Settled wins.
    pub wins: u32,
    /// Settled losses.
    pub losses: u32,
    /// Cumulative credited earnings.
    pub earnings: Stake,
    /// Current consecutive settled wins.
    pub current_streak: u32,
    /// Longest streak seen.
    pub best_streak: u32,
    /// First seen.
    pub created_at: DateTime<Utc>,
}

impl ParticipantRecord {
    /// Fresh participant with zeroed stats.
    pub fn new(id: ParticipantId, now: DateTime<Utc>) -> Self {
        Self {
            display_name: id.default_display_name(),
            id,
            wins: 0,
            losses: 0,
            earnings: Stake::default(),
            current_streak: 0,
            best_streak: 0,
            created_at: now,
        }
    }

    /// Apply a settled win.
    pub fn record_win(&mut self, credited: Stake) {
        self.wins += 1;
        self.earnings = Stake(self.earnings.0.saturating_add(credited.0));
        self.current_streak += 1;
        self.best_streak = self.best_streak.max(self.current_streak);
    }

    /// Apply a settled loss.
    pub fn record_loss(&mut self) {
        self.losses += 1;
        self.current_streak = 0;
    }
}

/// A participant waiting for an opponent at a given stake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Waiting participant.
    pub participant: ParticipantId,
    /// Stake bucket.
    pub stake: Stake,
    /// When the entry was created.
    pub enqueued_at: DateTime<Utc>,
}

/// One session to mark settled, with the stats it produces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettlementCommit {
    /// Session being settled.
    pub session_id: SessionId,
    /// Winner of the session.
    pub winner: ParticipantId,
    /// Loser of the session.
    pub loser: ParticipantId,
    /// Amount credited to the winner's earnings.
    pub winner_credit: Stake,
}

/// Durable storage contract.
#[async_trait]
pub trait Store: Send + Sync {
    // Participants

    /// Fetch a participant.
    async fn participant(&self, id: &ParticipantId) -> Result<Option<ParticipantRecord>, StoreError>;

    /// Fetch a participant, creating a zeroed record on first sight.
    async fn ensure_participant(
        &self,
        id: &ParticipantId,
        now: DateTime<Utc>,
    ) -> Result<ParticipantRecord, StoreError>;

    /// Participants ordered by wins then earnings, best first.
    async fn leaderboard(&self, limit: usize) -> Result<Vec<ParticipantRecord>, StoreError>;

    // Sessions

    /// Insert a new session. Fails if the id already exists.
    async fn insert_session(&self, session: &GameSession) -> Result<(), StoreError>;

    /// Overwrite an existing session.
    async fn save_session(&self, session: &GameSession) -> Result<(), StoreError>;

    /// Load a session.
    async fn load_session(&self, id: &SessionId) -> Result<Option<GameSession>, StoreError>;

    /// Sessions a participant took part in, newest first.
    async fn sessions_for(
        &self,
        participant: &ParticipantId,
        limit: usize,
    ) -> Result<Vec<GameSession>, StoreError>;

    /// Lobby or playing sessions a participant occupies.
    async fn active_sessions_for(&self, participant: &ParticipantId) -> Result<Vec<GameSession>, StoreError>;

    /// Concluded, dual-signed, unsettled sessions, oldest completion first.
    async fn settlement_candidates(&self, limit: usize) -> Result<Vec<GameSession>, StoreError>;

    /// Mark sessions settled under `tx` and apply their stats in one atomic
    /// step. Sessions already settled are skipped without touching stats.
    /// Returns the ids that were newly settled.
    async fn commit_settlement(
        &self,
        commits: &[SettlementCommit],
        tx: &TxReference,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionId>, StoreError>;

    // Queue

    /// Entries in a stake bucket, oldest first.
    async fn queue_entries(&self, stake: Stake) -> Result<Vec<QueueEntry>, StoreError>;

    /// Insert an entry. Returns false if the participant already waits in
    /// this bucket.
    async fn insert_queue_entry(&self, entry: &QueueEntry) -> Result<bool, StoreError>;

    /// Remove one participant's entry from one bucket.
    async fn remove_queue_entry(&self, participant: &ParticipantId, stake: Stake) -> Result<bool, StoreError>;

    /// Every entry a participant owns, across buckets.
    async fn queue_entries_for(&self, participant: &ParticipantId) -> Result<Vec<QueueEntry>, StoreError>;
}

//! Session Registry
//!
//! The only place sessions are born. Every mutation runs under a
//! per-session lock: load, apply one state-machine operation, persist,
//! and only then hand the events back for publishing. The in-memory map is
//! a read-through cache of live (lobby or playing) sessions; the store is
//! the system of record.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::core::hash::Digest32;
use crate::core::ids::{ParticipantId, SessionId, Stake};
use crate::engine::locks::LockTable;
use crate::error::{ArenaError, ArenaResult};
use crate::game::authorization::AuthorizationSignature;
use crate::game::events::SessionEvent;
use crate::game::moves::Move;
use crate::game::session::{GameSession, SessionError, SessionRules, SessionStatus};
use crate::store::Store;

/// Session snapshot plus the events a mutation produced.
pub type Applied = (GameSession, Vec<SessionEvent>);

/// Creates, looks up and mutates sessions.
pub struct SessionRegistry {
    store: Arc<dyn Store>,
    rules: SessionRules,
    /// Per-session serialization.
    locks: LockTable<SessionId>,
    /// Live sessions.
    cache: RwLock<BTreeMap<SessionId, GameSession>>,
}

impl SessionRegistry {
    /// Create a registry over a store.
    pub fn new(store: Arc<dyn Store>, rules: SessionRules) -> Self {
        Self {
            store,
            rules,
            locks: LockTable::new(),
            cache: RwLock::new(BTreeMap::new()),
        }
    }

    /// Rules applied to every session.
    pub fn rules(&self) -> &SessionRules {
        &self.rules
    }

    /// Number of cached live sessions.
    pub async fn live_count(&self) -> usize {
        self.cache.read().await.len()
    }

    // -------------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------------

    /// Create a playing session for two paired participants.
    pub async fn create_matched(
        &self,
        first: ParticipantId,
        second: ParticipantId,
        stake: Stake,
        now: DateTime<Utc>,
    ) -> ArenaResult<Applied> {
        let (session, events) = GameSession::matched(SessionId::new_v4(), first, second, stake, now)?;
        self.store.insert_session(&session).await?;
        self.cache.write().await.insert(session.id, session.clone());

        info!("Session {} created ({} vs {}, stake {})",
            session.id.short(),
            session.participants[0].as_ref().map(ParticipantId::as_str).unwrap_or("?"),
            session.participants[1].as_ref().map(ParticipantId::as_str).unwrap_or("?"),
            stake);
        Ok((session, events))
    }

    /// Create a lobby waiting for an opponent.
    pub async fn create_lobby(
        &self,
        creator: ParticipantId,
        stake: Stake,
        now: DateTime<Utc>,
    ) -> ArenaResult<Applied> {
        let session = GameSession::open(SessionId::new_v4(), creator.clone(), stake, now);
        self.store.insert_session(&session).await?;
        self.cache.write().await.insert(session.id, session.clone());

        info!("Lobby {} opened by {} (stake {})", session.id.short(), creator, stake);
        let event = SessionEvent::ChallengeOpened {
            session_id: session.id,
            creator,
            stake,
        };
        Ok((session, vec![event]))
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    /// Current snapshot of a session.
    pub async fn get(&self, id: &SessionId) -> ArenaResult<Option<GameSession>> {
        if let Some(session) = self.cache.read().await.get(id) {
            return Ok(Some(session.clone()));
        }
        Ok(self.store.load_session(id).await?)
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Apply one operation to a session under its lock.
    ///
    /// The snapshot is persisted only if the operation changed it. A failed
    /// operation is persisted only when it still consumed a reveal attempt.
    pub async fn apply<F>(&self, id: &SessionId, op: F) -> ArenaResult<Applied>
    where
        F: FnOnce(&mut GameSession) -> Result<Vec<SessionEvent>, SessionError> + Send,
    {
        let lock = self.locks.handle(id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.apply_locked(id, op).await
        };
        self.locks.release(id, lock).await;

        let (working, events) = outcome?;
        debug!("Session {} -> {:?} ({} event(s))", id.short(), working.status, events.len());
        Ok((working, events))
    }

    async fn apply_locked<F>(&self, id: &SessionId, op: F) -> ArenaResult<Applied>
    where
        F: FnOnce(&mut GameSession) -> Result<Vec<SessionEvent>, SessionError> + Send,
    {
        let original = self.get(id).await?.ok_or(ArenaError::SessionNotFound(*id))?;
        let mut working = original.clone();
        let result = op(&mut working);

        let persist = match &result {
            Ok(_) => true,
            Err(e) => e.records_attempt(),
        };
        if persist && working != original {
            self.store.save_session(&working).await?;
            self.update_cache(&working).await;
        }

        Ok((working, result?))
    }

    /// Seat an opponent in a lobby.
    pub async fn seat(&self, id: &SessionId, participant: ParticipantId) -> ArenaResult<Applied> {
        self.apply(id, move |s| s.seat_opponent(participant)).await
    }

    /// Record a commitment.
    pub async fn commit(&self, id: &SessionId, participant: &ParticipantId, digest: Digest32) -> ArenaResult<Applied> {
        self.apply(id, |s| s.submit_commitment(participant, digest)).await
    }

    /// Record a reveal.
    pub async fn reveal(
        &self,
        id: &SessionId,
        participant: &ParticipantId,
        mv: Move,
        nonce: &str,
        now: DateTime<Utc>,
    ) -> ArenaResult<Applied> {
        let rules = &self.rules;
        self.apply(id, |s| s.submit_reveal(participant, mv, nonce, rules, now)).await
    }

    /// Record a result signature.
    pub async fn authorize(
        &self,
        id: &SessionId,
        participant: &ParticipantId,
        signature: AuthorizationSignature,
    ) -> ArenaResult<Applied> {
        let rules = &self.rules;
        self.apply(id, |s| s.request_authorization(participant, signature, rules)).await
    }

    /// Conclude a live session against `offender`.
    pub async fn forfeit(&self, id: &SessionId, offender: &ParticipantId, now: DateTime<Utc>) -> ArenaResult<Applied> {
        self.apply(id, |s| s.forfeit(offender, now)).await
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn update_cache(&self, session: &GameSession) {
        let mut cache = self.cache.write().await;
        match session.status {
            SessionStatus::Lobby | SessionStatus::Playing => {
                cache.insert(session.id, session.clone());
            }
            SessionStatus::Concluded | SessionStatus::Settled => {
                cache.remove(&session.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::commitment::commit;
    use crate::game::round::RoundPhase;
    use crate::store::{MemoryStore, StoreError};

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::new(s)
    }

    fn registry() -> (Arc<MemoryStore>, SessionRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = SessionRegistry::new(store.clone(), SessionRules::default());
        (store, registry)
    }

    #[tokio::test]
    async fn test_create_matched_persists() {
        let (store, registry) = registry();
        let (session, events) = registry
            .create_matched(pid("0xa"), pid("0xb"), Stake(1), Utc::now())
            .await
            .unwrap();

        assert_eq!(events[0].name(), "matched");
        assert_eq!(store.load_session(&session.id).await.unwrap(), Some(session.clone()));
        assert_eq!(registry.live_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (_, registry) = registry();
        let id = SessionId::new_v4();
        let result = registry.commit(&id, &pid("0xa"), Digest32::new([1; 32])).await;
        assert_eq!(result.unwrap_err(), ArenaError::SessionNotFound(id));
    }

    #[tokio::test]
    async fn test_unknown_ids_leave_no_lock_entries() {
        let (_, registry) = registry();
        for _ in 0..1000 {
            let id = SessionId::new_v4();
            let result = registry.commit(&id, &pid("0xa"), Digest32::new([1; 32])).await;
            assert_eq!(result.unwrap_err(), ArenaError::SessionNotFound(id));
        }
        assert_eq!(registry.locks.len().await, 0);
    }

    #[tokio::test]
    async fn test_lock_entries_released_after_every_outcome() {
        let (store, registry) = registry();
        let (session, _) = registry
            .create_matched(pid("0xa"), pid("0xb"), Stake(1), Utc::now())
            .await
            .unwrap();
        let id = session.id;

        // Success on a live session
        registry.commit(&id, &pid("0xa"), commit(Move::Rock, "n1", &id)).await.unwrap();
        assert_eq!(registry.locks.len().await, 0);

        // Rejected by the state machine
        registry.commit(&id, &pid("0xc"), Digest32::new([2; 32])).await.unwrap_err();
        assert_eq!(registry.locks.len().await, 0);

        // Store outage while loading an uncached session
        store.set_available(false);
        registry.commit(&SessionId::new_v4(), &pid("0xa"), Digest32::new([3; 32])).await.unwrap_err();
        store.set_available(true);
        assert_eq!(registry.locks.len().await, 0);
    }

    #[tokio::test]
    async fn test_rejected_operation_changes_nothing() {
        let (store, registry) = registry();
        let (session, _) = registry
            .create_matched(pid("0xa"), pid("0xb"), Stake(1), Utc::now())
            .await
            .unwrap();

        let result = registry.commit(&session.id, &pid("0xc"), Digest32::new([1; 32])).await;
        assert_eq!(result.unwrap_err(), ArenaError::Session(SessionError::NotAParticipant));
        assert_eq!(store.load_session(&session.id).await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_and_commits_nothing() {
        let (store, registry) = registry();
        let (session, _) = registry
            .create_matched(pid("0xa"), pid("0xb"), Stake(1), Utc::now())
            .await
            .unwrap();

        store.set_available(false);
        let digest = commit(Move::Rock, "n", &session.id);
        let result = registry.commit(&session.id, &pid("0xa"), digest).await;
        assert!(matches!(result, Err(ArenaError::Store(StoreError::Unavailable(_)))));

        store.set_available(true);
        let current = registry.get(&session.id).await.unwrap().unwrap();
        assert!(current.rounds[0].commitments[0].is_none());
    }

    #[tokio::test]
    async fn test_invalid_reveal_attempt_persisted() {
        let (store, registry) = registry();
        let (session, _) = registry
            .create_matched(pid("0xa"), pid("0xb"), Stake(1), Utc::now())
            .await
            .unwrap();
        let id = session.id;

        registry.commit(&id, &pid("0xa"), commit(Move::Rock, "n1", &id)).await.unwrap();
        registry.commit(&id, &pid("0xb"), commit(Move::Paper, "n2", &id)).await.unwrap();

        let err = registry.reveal(&id, &pid("0xa"), Move::Rock, "wrong", Utc::now()).await.unwrap_err();
        assert_eq!(err, ArenaError::Session(SessionError::InvalidReveal { attempts_remaining: Some(2) }));

        let stored = store.load_session(&id).await.unwrap().unwrap();
        assert_eq!(stored.rounds[0].invalid_reveals, [1, 0]);
        assert_eq!(stored.round_phase(), Some(RoundPhase::AwaitingReveals));
    }

    #[tokio::test]
    async fn test_concurrent_commits_both_land() {
        let (_, registry) = registry();
        let registry = Arc::new(registry);
        let (session, _) = registry
            .create_matched(pid("0xa"), pid("0xb"), Stake(1), Utc::now())
            .await
            .unwrap();
        let id = session.id;

        let r1 = registry.clone();
        let r2 = registry.clone();
        let t1 = tokio::spawn(async move {
            r1.commit(&id, &pid("0xa"), commit(Move::Rock, "n1", &id)).await
        });
        let t2 = tokio::spawn(async move {
            r2.commit(&id, &pid("0xb"), commit(Move::Paper, "n2", &id)).await
        });
        let e1 = t1.await.unwrap().unwrap().1;
        let e2 = t2.await.unwrap().unwrap().1;

        // Exactly one of the two saw both commitments and requested reveals
        let requests = e1.iter().chain(e2.iter()).filter(|e| e.name() == "reveal_requested").count();
        assert_eq!(requests, 1);

        let current = registry.get(&id).await.unwrap().unwrap();
        assert_eq!(current.round_phase(), Some(RoundPhase::AwaitingReveals));
    }

    #[tokio::test]
    async fn test_lobby_then_seat() {
        let (_, registry) = registry();
        let (lobby, events) = registry.create_lobby(pid("0xa"), Stake(3), Utc::now()).await.unwrap();
        assert_eq!(events[0].name(), "challenge_opened");
        assert_eq!(lobby.status, SessionStatus::Lobby);

        let err = registry.seat(&lobby.id, pid("0xa")).await.unwrap_err();
        assert_eq!(err, ArenaError::Session(SessionError::SelfMatch));

        let (seated, _) = registry.seat(&lobby.id, pid("0xb")).await.unwrap();
        assert_eq!(seated.status, SessionStatus::Playing);
    }
}

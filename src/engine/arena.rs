//! Arena
//!
//! Entry point for client actions. Routes each action to the queue or the
//! session registry, and publishes the resulting events only after the
//! store has acknowledged the change. Read-side queries go straight to the
//! store so they double as the polling fallback for missed pushes.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::core::hash::Digest32;
use crate::core::ids::{ParticipantId, SessionId, Stake};
use crate::engine::queue::{JoinOutcome, MatchmakingQueue};
use crate::engine::registry::SessionRegistry;
use crate::error::{ArenaError, ArenaResult};
use crate::game::authorization::AuthorizationSignature;
use crate::game::events::SessionEvent;
use crate::game::moves::Move;
use crate::game::session::{GameSession, SessionStatus};
use crate::notify::{Notifier, Topic};
use crate::store::{ParticipantRecord, Store};

/// What to do when a participant drops out of a live session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectAction {
    /// Tell the opponent; leave the session as it is.
    Notify,
    /// Tell the opponent and conclude the session in their favor.
    Forfeit,
}

/// Disconnect handling policy.
///
/// Only consulted for `Playing` sessions. An open challenge (`Lobby`) stays
/// open and acceptable after its creator drops; the creator sees the match
/// on reconnect through `sync`.
pub trait DisconnectPolicy: Send + Sync {
    /// Decide for one playing session.
    fn on_disconnect(&self, session: &GameSession, participant: &ParticipantId) -> DisconnectAction;
}

/// Default policy: notify only.
#[derive(Clone, Copy, Debug, Default)]
pub struct NotifyOnly;

impl DisconnectPolicy for NotifyOnly {
    fn on_disconnect(&self, _session: &GameSession, _participant: &ParticipantId) -> DisconnectAction {
        DisconnectAction::Notify
    }
}

/// Forfeit any playing session on disconnect.
#[derive(Clone, Copy, Debug, Default)]
pub struct ForfeitOnDisconnect;

impl DisconnectPolicy for ForfeitOnDisconnect {
    fn on_disconnect(&self, session: &GameSession, _participant: &ParticipantId) -> DisconnectAction {
        if session.status == SessionStatus::Playing {
            DisconnectAction::Forfeit
        } else {
            DisconnectAction::Notify
        }
    }
}

/// One row of the leaderboard.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LeaderboardEntry {
    /// 1-based rank.
    pub rank: usize,
    /// Participant stats.
    pub participant: ParticipantRecord,
}

/// Client-facing facade over queue, registry and notifier.
pub struct Arena {
    store: Arc<dyn Store>,
    registry: Arc<SessionRegistry>,
    queue: MatchmakingQueue,
    notifier: Arc<dyn Notifier>,
    disconnect_policy: Arc<dyn DisconnectPolicy>,
}

impl Arena {
    /// Wire up an arena.
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, config: &EngineConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(store.clone(), config.session_rules()));
        let queue = MatchmakingQueue::new(store.clone(), registry.clone());
        Self {
            store,
            registry,
            queue,
            notifier,
            disconnect_policy: Arc::new(NotifyOnly),
        }
    }

    /// Replace the disconnect policy.
    pub fn with_disconnect_policy(mut self, policy: Arc<dyn DisconnectPolicy>) -> Self {
        self.disconnect_policy = policy;
        self
    }

    /// Underlying registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    // -------------------------------------------------------------------------
    // Matchmaking
    // -------------------------------------------------------------------------

    /// Join the queue at `stake`.
    pub async fn join_queue(&self, participant: &ParticipantId, stake: Stake) -> ArenaResult<JoinOutcome> {
        let now = Utc::now();
        self.store.ensure_participant(participant, now).await?;
        let outcome = self.queue.join(participant, stake, now).await?;
        self.publish(participant, outcome.events());
        Ok(outcome)
    }

    /// Leave every queue bucket. Idempotent.
    pub async fn leave_queue(&self, participant: &ParticipantId) -> ArenaResult<Vec<Stake>> {
        let left = self.queue.leave(participant).await?;
        if !left.is_empty() {
            self.publish(participant, &[SessionEvent::QueueLeft { participant: participant.clone() }]);
        }
        Ok(left)
    }

    /// Open a private challenge that anyone holding the session id can accept.
    pub async fn open_challenge(&self, creator: &ParticipantId, stake: Stake) -> ArenaResult<GameSession> {
        if stake.is_zero() {
            return Err(ArenaError::InvalidStake("stake must be positive".into()));
        }
        let now = Utc::now();
        self.store.ensure_participant(creator, now).await?;
        let (session, events) = self.registry.create_lobby(creator.clone(), stake, now).await?;
        self.publish(creator, &events);
        Ok(session)
    }

    /// Accept a private challenge.
    pub async fn accept_challenge(&self, id: &SessionId, participant: &ParticipantId) -> ArenaResult<GameSession> {
        self.store.ensure_participant(participant, Utc::now()).await?;
        let (session, events) = self.registry.seat(id, participant.clone()).await?;
        self.publish(participant, &events);
        Ok(session)
    }

    // -------------------------------------------------------------------------
    // Rounds
    // -------------------------------------------------------------------------

    /// Submit a commitment for the current round.
    pub async fn submit_commitment(
        &self,
        id: &SessionId,
        participant: &ParticipantId,
        digest: Digest32,
    ) -> ArenaResult<GameSession> {
        let (session, events) = self.registry.commit(id, participant, digest).await?;
        self.publish(participant, &events);
        Ok(session)
    }

    /// Reveal the committed move.
    pub async fn submit_reveal(
        &self,
        id: &SessionId,
        participant: &ParticipantId,
        mv: Move,
        nonce: &str,
    ) -> ArenaResult<GameSession> {
        let (session, events) = self.registry.reveal(id, participant, mv, nonce, Utc::now()).await?;
        self.publish(participant, &events);
        Ok(session)
    }

    /// Sign the final result.
    pub async fn request_authorization(
        &self,
        id: &SessionId,
        participant: &ParticipantId,
        signature: AuthorizationSignature,
    ) -> ArenaResult<GameSession> {
        let (session, events) = self.registry.authorize(id, participant, signature).await?;
        self.publish(participant, &events);
        Ok(session)
    }

    // -------------------------------------------------------------------------
    // Disconnects
    // -------------------------------------------------------------------------

    /// Handle a dropped connection: leave the queue, then notify (and
    /// possibly forfeit) every live session.
    pub async fn disconnect(&self, participant: &ParticipantId) -> ArenaResult<()> {
        self.leave_queue(participant).await?;

        for session in self.store.active_sessions_for(participant).await? {
            let Some(slot) = session.slot_of(participant) else {
                continue;
            };
            if session.status != SessionStatus::Playing {
                continue;
            }

            self.publish(participant, &[SessionEvent::OpponentDisconnected {
                session_id: session.id,
                participant: participant.clone(),
                slot,
            }]);

            if self.disconnect_policy.on_disconnect(&session, participant) == DisconnectAction::Forfeit {
                match self.registry.forfeit(&session.id, participant, Utc::now()).await {
                    Ok((_, events)) => {
                        info!("{} forfeited {} on disconnect", participant, session.id.short());
                        self.publish(participant, &events);
                    }
                    // Concluded between the read and the lock
                    Err(ArenaError::Session(e)) => debug!("Forfeit skipped: {}", e),
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Authoritative snapshot of a session.
    pub async fn session(&self, id: &SessionId) -> ArenaResult<GameSession> {
        self.registry.get(id).await?.ok_or(ArenaError::SessionNotFound(*id))
    }

    /// Participant profile.
    pub async fn participant(&self, id: &ParticipantId) -> ArenaResult<Option<ParticipantRecord>> {
        Ok(self.store.participant(id).await?)
    }

    /// Sessions a participant played, newest first.
    pub async fn history(&self, id: &ParticipantId, limit: usize) -> ArenaResult<Vec<GameSession>> {
        Ok(self.store.sessions_for(id, limit).await?)
    }

    /// Live sessions a participant occupies.
    pub async fn active_sessions(&self, id: &ParticipantId) -> ArenaResult<Vec<GameSession>> {
        Ok(self.store.active_sessions_for(id).await?)
    }

    /// Top participants by wins, then earnings.
    pub async fn leaderboard(&self, limit: usize) -> ArenaResult<Vec<LeaderboardEntry>> {
        Ok(self
            .store
            .leaderboard(limit)
            .await?
            .into_iter()
            .enumerate()
            .map(|(i, participant)| LeaderboardEntry { rank: i + 1, participant })
            .collect())
    }

    /// Sessions waiting for the next settlement run.
    pub async fn pending_settlements(&self, limit: usize) -> ArenaResult<Vec<GameSession>> {
        Ok(self.store.settlement_candidates(limit).await?)
    }

    fn publish(&self, actor: &ParticipantId, events: &[SessionEvent]) {
        for event in events {
            let topic = Topic::for_event(event, actor);
            debug!("Publishing {} to {}", event.name(), topic);
            self.notifier.publish(topic, event.clone());
        }
    }
}

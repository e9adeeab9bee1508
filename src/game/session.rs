//! Game Session State Machine
//!
//! Owns one game's lifecycle:
//!
//! ```text
//! Lobby ──seat──▶ Playing ──score reaches threshold──▶ Concluded ──ledger──▶ Settled
//!                   │
//!                   └─ per round: AwaitingCommitments ▶ AwaitingReveals ▶ RoundResolved
//! ```
//!
//! Every method is synchronous and takes `now` explicitly, so a session is a
//! plain value: the registry clones it, applies one operation, persists the
//! result, and only then publishes the returned events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::hash::Digest32;
use crate::core::ids::{ParticipantId, SessionId, Stake, TxReference};
use crate::game::authorization::{result_digest, verify_result, AuthorizationSignature};
use crate::game::commitment;
use crate::game::events::SessionEvent;
use crate::game::moves::Move;
use crate::game::round::{resolve_round, Reveal, Round, RoundPhase, RoundWinner, Scoreboard, Slot};

/// Round wins needed to conclude a game.
pub const DEFAULT_WINS_TO_CONCLUDE: u32 = 3;

/// Nominal number of rounds in a game.
pub const DEFAULT_ROUND_CAP: u32 = 5;

/// Session lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting for the second participant.
    Lobby,
    /// Rounds in progress.
    Playing,
    /// Terminal outcome reached, not yet on the ledger.
    Concluded,
    /// Ledger confirmed the settlement.
    Settled,
}

/// What happens when scores are level once `round_cap` rounds are resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy {
    /// Keep issuing rounds until someone reaches the win threshold.
    SuddenDeath,
    /// Conclude as a draw whenever scores are level at or after the cap.
    ForcedDraw,
}

/// Rules applied by the state machine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRules {
    /// Round wins needed to conclude.
    pub wins_to_conclude: u32,
    /// Nominal round count used by the tie policy.
    pub round_cap: u32,
    /// Tie handling past the cap.
    pub tie_policy: TiePolicy,
    /// Failed reveals allowed per participant per round before the round is
    /// forfeited. `None` allows unlimited retries.
    pub max_reveal_attempts: Option<u32>,
    /// Verify result signatures against participant public keys.
    pub verify_authorizations: bool,
}

impl Default for SessionRules {
    fn default() -> Self {
        Self {
            wins_to_conclude: DEFAULT_WINS_TO_CONCLUDE,
            round_cap: DEFAULT_ROUND_CAP,
            tie_policy: TiePolicy::SuddenDeath,
            max_reveal_attempts: Some(3),
            verify_authorizations: true,
        }
    }
}

/// Terminal outcome of a game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOutcome {
    /// A slot won.
    Winner(Slot),
    /// Concluded level under [`TiePolicy::ForcedDraw`].
    Draw,
}

/// Read-only projection of a finished, dual-signed session for the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementBatchItem {
    /// Game identifier.
    pub game_id: SessionId,
    /// Winner wallet.
    pub winner: ParticipantId,
    /// Loser wallet.
    pub loser: ParticipantId,
    /// Stake each side risked.
    pub stake: Stake,
    /// First slot's signature.
    pub signature1: AuthorizationSignature,
    /// Second slot's signature.
    pub signature2: AuthorizationSignature,
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Caller is not one of the two participants.
    #[error("not a participant in this session")]
    NotAParticipant,

    /// Operation not valid in the current state.
    #[error("{operation} not allowed while session is {status:?} (round phase {round_phase:?})")]
    WrongPhase {
        /// Rejected operation.
        operation: &'static str,
        /// Session status at the time.
        status: SessionStatus,
        /// Current round phase, if playing.
        round_phase: Option<RoundPhase>,
    },

    /// Reveal does not match the stored commitment.
    #[error("reveal does not match commitment ({attempts_remaining:?} attempts remaining)")]
    InvalidReveal {
        /// Attempts left before the round is forfeited. `None` = unlimited.
        attempts_remaining: Option<u32>,
    },

    /// A different commitment was already recorded this round.
    #[error("a different commitment is already recorded for this round")]
    AlreadyCommitted,

    /// Digest was already used in this session.
    #[error("commitment digest already used in this session")]
    CommitmentReused,

    /// A different reveal was already recorded this round.
    #[error("a different reveal is already recorded for this round")]
    AlreadyRevealed,

    /// Participant tried to play against themselves.
    #[error("cannot match a participant against themselves")]
    SelfMatch,

    /// Second slot already filled.
    #[error("session already has two participants")]
    SeatTaken,

    /// A different signature was already recorded.
    #[error("a different authorization is already recorded")]
    AlreadyAuthorized,

    /// Signature does not verify over the result digest.
    #[error("authorization signature does not verify")]
    InvalidAuthorization,

    /// Draws have nothing to settle.
    #[error("game has no decisive outcome")]
    NoDecisiveOutcome,
}

impl SessionError {
    /// Whether the failed operation still changed session bookkeeping that
    /// must be persisted (a rejected reveal counts against the attempt limit).
    pub fn records_attempt(&self) -> bool {
        matches!(self, SessionError::InvalidReveal { attempts_remaining: Some(_) })
    }
}

/// A game session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSession {
    /// Unique session identifier.
    pub id: SessionId,
    /// Participants by slot. Second is empty while in `Lobby`.
    pub participants: [Option<ParticipantId>; 2],
    /// Stake each side risks.
    pub stake: Stake,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Rounds in order. The last one is current while playing.
    pub rounds: Vec<Round>,
    /// Cumulative round wins.
    pub score: Scoreboard,
    /// Terminal outcome once concluded.
    pub outcome: Option<GameOutcome>,
    /// Result signatures by slot.
    pub signatures: [Option<AuthorizationSignature>; 2],
    /// Ledger transaction once settled.
    pub settlement_tx: Option<TxReference>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the game concluded.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the ledger confirmed settlement.
    pub settled_at: Option<DateTime<Utc>>,
}

impl GameSession {
    /// Open a session with one participant, waiting in `Lobby`.
    pub fn open(id: SessionId, creator: ParticipantId, stake: Stake, now: DateTime<Utc>) -> Self {
        Self {
            id,
            participants: [Some(creator), None],
            stake,
            status: SessionStatus::Lobby,
            rounds: Vec::new(),
            score: Scoreboard::default(),
            outcome: None,
            signatures: [None, None],
            settlement_tx: None,
            created_at: now,
            completed_at: None,
            settled_at: None,
        }
    }

    /// Create a session for two paired participants, already `Playing`.
    pub fn matched(
        id: SessionId,
        first: ParticipantId,
        second: ParticipantId,
        stake: Stake,
        now: DateTime<Utc>,
    ) -> Result<(Self, Vec<SessionEvent>), SessionError> {
        let mut session = Self::open(id, first, stake, now);
        let events = session.seat_opponent(second)?;
        Ok((session, events))
    }

    /// Fill the second slot and start round 1.
    pub fn seat_opponent(&mut self, participant: ParticipantId) -> Result<Vec<SessionEvent>, SessionError> {
        if self.status != SessionStatus::Lobby {
            return Err(self.wrong_phase("seat_opponent"));
        }
        if self.participants[Slot::Second.index()].is_some() {
            return Err(SessionError::SeatTaken);
        }
        let first = self.participants[Slot::First.index()]
            .clone()
            .ok_or(SessionError::NotAParticipant)?;
        if first == participant {
            return Err(SessionError::SelfMatch);
        }

        self.participants[Slot::Second.index()] = Some(participant.clone());
        self.status = SessionStatus::Playing;
        self.rounds.push(Round::new(1));

        Ok(vec![
            SessionEvent::Matched {
                session_id: self.id,
                first,
                second: participant,
                stake: self.stake,
            },
            SessionEvent::RoundStarted {
                session_id: self.id,
                round: 1,
                score: self.score,
            },
        ])
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Participant in a slot.
    pub fn participant(&self, slot: Slot) -> Option<&ParticipantId> {
        self.participants[slot.index()].as_ref()
    }

    /// Slot occupied by a participant.
    pub fn slot_of(&self, participant: &ParticipantId) -> Option<Slot> {
        Slot::BOTH
            .into_iter()
            .find(|slot| self.participant(*slot) == Some(participant))
    }

    /// Current round, while playing.
    pub fn current_round(&self) -> Option<&Round> {
        match self.status {
            SessionStatus::Playing => self.rounds.last(),
            _ => None,
        }
    }

    /// Current round phase, while playing.
    pub fn round_phase(&self) -> Option<RoundPhase> {
        self.current_round().map(Round::phase)
    }

    /// Winning participant, once concluded with a winner.
    pub fn winner(&self) -> Option<&ParticipantId> {
        match self.outcome {
            Some(GameOutcome::Winner(slot)) => self.participant(slot),
            _ => None,
        }
    }

    /// Losing participant, once concluded with a winner.
    pub fn loser(&self) -> Option<&ParticipantId> {
        match self.outcome {
            Some(GameOutcome::Winner(slot)) => self.participant(slot.opponent()),
            _ => None,
        }
    }

    /// Whether the game has reached a terminal outcome.
    pub fn is_finished(&self) -> bool {
        matches!(self.status, SessionStatus::Concluded | SessionStatus::Settled)
    }

    /// Digest both participants sign, once there is a winner.
    pub fn result_digest(&self) -> Option<Digest32> {
        Some(result_digest(&self.id, self.winner()?, self.loser()?, self.stake))
    }

    /// Concluded with a winner, both signatures present, not yet settled.
    pub fn is_settlement_eligible(&self) -> bool {
        self.status == SessionStatus::Concluded
            && matches!(self.outcome, Some(GameOutcome::Winner(_)))
            && self.signatures.iter().all(Option::is_some)
            && self.settlement_tx.is_none()
    }

    /// Ledger projection, if eligible.
    pub fn settlement_item(&self) -> Option<SettlementBatchItem> {
        if !self.is_settlement_eligible() {
            return None;
        }
        Some(SettlementBatchItem {
            game_id: self.id,
            winner: self.winner()?.clone(),
            loser: self.loser()?.clone(),
            stake: self.stake,
            signature1: self.signatures[0]?,
            signature2: self.signatures[1]?,
        })
    }

    // -------------------------------------------------------------------------
    // Round protocol
    // -------------------------------------------------------------------------

    /// Record a participant's commitment for the current round.
    pub fn submit_commitment(
        &mut self,
        participant: &ParticipantId,
        digest: Digest32,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        let slot = self.slot_of(participant).ok_or(SessionError::NotAParticipant)?;
        if self.status != SessionStatus::Playing {
            return Err(self.wrong_phase("submit_commitment"));
        }

        let used_before = self.digest_used(&digest);
        let round = self.rounds.last_mut().ok_or(SessionError::WrongPhase {
            operation: "submit_commitment",
            status: SessionStatus::Playing,
            round_phase: None,
        })?;

        match round.commitment(slot) {
            Some(existing) if *existing == digest => return Ok(Vec::new()),
            Some(_) => return Err(SessionError::AlreadyCommitted),
            None => {}
        }
        if round.phase() != RoundPhase::AwaitingCommitments {
            return Err(SessionError::WrongPhase {
                operation: "submit_commitment",
                status: SessionStatus::Playing,
                round_phase: Some(round.phase()),
            });
        }
        if used_before {
            return Err(SessionError::CommitmentReused);
        }

        round.commitments[slot.index()] = Some(digest);
        let number = round.number;
        let both = round.phase() == RoundPhase::AwaitingReveals;

        debug!("Session {} round {} commitment from {:?}", self.id.short(), number, slot);

        let mut events = vec![SessionEvent::MoveCommitted {
            session_id: self.id,
            round: number,
            participant: participant.clone(),
        }];
        if both {
            events.push(SessionEvent::RevealRequested { session_id: self.id, round: number });
        }
        Ok(events)
    }

    /// Record a participant's reveal for the current round.
    pub fn submit_reveal(
        &mut self,
        participant: &ParticipantId,
        mv: Move,
        nonce: &str,
        rules: &SessionRules,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        let slot = self.slot_of(participant).ok_or(SessionError::NotAParticipant)?;
        if self.status != SessionStatus::Playing {
            return Err(self.wrong_phase("submit_reveal"));
        }

        let id = self.id;
        let round = self.rounds.last_mut().ok_or(SessionError::WrongPhase {
            operation: "submit_reveal",
            status: SessionStatus::Playing,
            round_phase: None,
        })?;

        if let Some(existing) = round.reveal(slot) {
            return if existing.mv == mv && existing.nonce == nonce {
                Ok(Vec::new())
            } else {
                Err(SessionError::AlreadyRevealed)
            };
        }
        if round.phase() != RoundPhase::AwaitingReveals {
            return Err(SessionError::WrongPhase {
                operation: "submit_reveal",
                status: SessionStatus::Playing,
                round_phase: Some(round.phase()),
            });
        }

        let matches = round
            .commitment(slot)
            .is_some_and(|digest| commitment::verify(digest, mv, nonce, &id));

        let number = round.number;
        let mut events = Vec::new();

        if !matches {
            round.invalid_reveals[slot.index()] += 1;
            let attempts = round.invalid_reveals[slot.index()];

            let Some(max) = rules.max_reveal_attempts else {
                return Err(SessionError::InvalidReveal { attempts_remaining: None });
            };
            if attempts < max {
                return Err(SessionError::InvalidReveal {
                    attempts_remaining: Some(max - attempts),
                });
            }

            debug!("Session {} round {} forfeited by {:?}", id.short(), number, slot);
            round.forfeited_by = Some(slot);
            round.winner = RoundWinner::of(slot.opponent());
            events.push(SessionEvent::RoundForfeited {
                session_id: id,
                round: number,
                offender: participant.clone(),
            });
        } else {
            round.reveals[slot.index()] = Some(Reveal { mv, nonce: nonce.to_string() });
            events.push(SessionEvent::MoveRevealed {
                session_id: id,
                round: number,
                participant: participant.clone(),
                mv,
            });

            match round.both_moves() {
                Some((first, second)) => round.winner = resolve_round(first, second),
                None => return Ok(events),
            }
        }

        let winner = round.winner;
        let first_move = round.revealed_move(Slot::First);
        let second_move = round.revealed_move(Slot::Second);
        self.score.record(winner);

        events.push(SessionEvent::RoundResolved {
            session_id: id,
            round: number,
            first_move,
            second_move,
            winner,
            score: self.score,
        });
        events.extend(self.advance(rules, now));
        Ok(events)
    }

    /// After a resolved round: conclude, or open the next round.
    fn advance(&mut self, rules: &SessionRules, now: DateTime<Utc>) -> Vec<SessionEvent> {
        if let Some(slot) = self.score.leader_at(rules.wins_to_conclude) {
            return self.conclude(GameOutcome::Winner(slot), now);
        }

        let resolved = self.rounds.len() as u32;
        if rules.tie_policy == TiePolicy::ForcedDraw
            && resolved >= rules.round_cap
            && self.score.is_tied()
        {
            return self.conclude(GameOutcome::Draw, now);
        }

        let next = resolved + 1;
        self.rounds.push(Round::new(next));
        vec![SessionEvent::RoundStarted {
            session_id: self.id,
            round: next,
            score: self.score,
        }]
    }

    fn conclude(&mut self, outcome: GameOutcome, now: DateTime<Utc>) -> Vec<SessionEvent> {
        self.status = SessionStatus::Concluded;
        self.outcome = Some(outcome);
        self.completed_at = Some(now);

        debug!("Session {} concluded: {:?} ({}-{})",
            self.id.short(), outcome, self.score.first, self.score.second);

        vec![SessionEvent::GameConcluded {
            session_id: self.id,
            winner: self.winner().cloned(),
            loser: self.loser().cloned(),
            score: self.score,
        }]
    }

    /// Conclude a live game in the opponent's favor.
    ///
    /// Only reached through an explicit disconnect policy.
    pub fn forfeit(
        &mut self,
        offender: &ParticipantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        let slot = self.slot_of(offender).ok_or(SessionError::NotAParticipant)?;
        if self.status != SessionStatus::Playing {
            return Err(self.wrong_phase("forfeit"));
        }
        Ok(self.conclude(GameOutcome::Winner(slot.opponent()), now))
    }

    // -------------------------------------------------------------------------
    // Post-game
    // -------------------------------------------------------------------------

    /// Store a participant's signature over the final result.
    pub fn request_authorization(
        &mut self,
        participant: &ParticipantId,
        signature: AuthorizationSignature,
        rules: &SessionRules,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        let slot = self.slot_of(participant).ok_or(SessionError::NotAParticipant)?;
        if self.status != SessionStatus::Concluded {
            return Err(self.wrong_phase("request_authorization"));
        }
        let digest = self.result_digest().ok_or(SessionError::NoDecisiveOutcome)?;

        match &self.signatures[slot.index()] {
            Some(existing) if *existing == signature => return Ok(Vec::new()),
            Some(_) => return Err(SessionError::AlreadyAuthorized),
            None => {}
        }
        if rules.verify_authorizations && !verify_result(participant, &digest, &signature) {
            return Err(SessionError::InvalidAuthorization);
        }

        self.signatures[slot.index()] = Some(signature);

        let mut events = vec![SessionEvent::ResultAuthorized {
            session_id: self.id,
            participant: participant.clone(),
        }];
        if self.is_settlement_eligible() {
            events.push(SessionEvent::SettlementReady { session_id: self.id });
        }
        Ok(events)
    }

    /// Record ledger confirmation. Returns false if already settled or not
    /// eligible, leaving the session untouched.
    pub fn mark_settled(&mut self, tx: TxReference, now: DateTime<Utc>) -> bool {
        if !self.is_settlement_eligible() {
            return false;
        }
        self.status = SessionStatus::Settled;
        self.settlement_tx = Some(tx);
        self.settled_at = Some(now);
        true
    }

    fn digest_used(&self, digest: &Digest32) -> bool {
        self.rounds
            .iter()
            .flat_map(|round| round.commitments.iter())
            .any(|c| c.as_ref() == Some(digest))
    }

    fn wrong_phase(&self, operation: &'static str) -> SessionError {
        SessionError::WrongPhase {
            operation,
            status: self.status,
            round_phase: self.round_phase(),
        }
    }
}

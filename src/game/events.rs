//! Session Events
//!
//! Every state transition yields events. They are pushed to connected
//! clients after the transition is persisted and are advisory only.

use serde::{Deserialize, Serialize};

use crate::core::ids::{ParticipantId, SessionId, Stake, TxReference};
use crate::game::moves::Move;
use crate::game::round::{RoundWinner, Scoreboard, Slot};

/// A state-change event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Participant is waiting in a stake bucket.
    Queued {
        participant: ParticipantId,
        stake: Stake,
    },

    /// Participant left the queue.
    QueueLeft { participant: ParticipantId },

    /// A private challenge is waiting for an opponent.
    ChallengeOpened {
        session_id: SessionId,
        creator: ParticipantId,
        stake: Stake,
    },

    /// Two participants were paired into a session.
    Matched {
        session_id: SessionId,
        first: ParticipantId,
        second: ParticipantId,
        stake: Stake,
    },

    /// A new round accepts commitments.
    RoundStarted {
        session_id: SessionId,
        round: u32,
        score: Scoreboard,
    },

    /// One participant committed.
    MoveCommitted {
        session_id: SessionId,
        round: u32,
        participant: ParticipantId,
    },

    /// Both committed; reveals are expected.
    RevealRequested { session_id: SessionId, round: u32 },

    /// One participant revealed.
    MoveRevealed {
        session_id: SessionId,
        round: u32,
        participant: ParticipantId,
        #[serde(rename = "move")]
        mv: Move,
    },

    /// A participant ran out of reveal attempts and lost the round.
    RoundForfeited {
        session_id: SessionId,
        round: u32,
        offender: ParticipantId,
    },

    /// Round outcome computed.
    RoundResolved {
        session_id: SessionId,
        round: u32,
        first_move: Option<Move>,
        second_move: Option<Move>,
        winner: RoundWinner,
        score: Scoreboard,
    },

    /// Game reached a terminal outcome. `winner` is `None` for a draw.
    GameConcluded {
        session_id: SessionId,
        winner: Option<ParticipantId>,
        loser: Option<ParticipantId>,
        score: Scoreboard,
    },

    /// One participant signed the result.
    ResultAuthorized {
        session_id: SessionId,
        participant: ParticipantId,
    },

    /// Both signatures present; the game will be picked up by the next batch.
    SettlementReady { session_id: SessionId },

    /// Ledger confirmed the settlement.
    Settled {
        session_id: SessionId,
        tx_reference: TxReference,
    },

    /// A participant dropped while the session was live.
    OpponentDisconnected {
        session_id: SessionId,
        participant: ParticipantId,
        slot: Slot,
    },
}

impl SessionEvent {
    /// Session the event belongs to, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            SessionEvent::Queued { .. } | SessionEvent::QueueLeft { .. } => None,
            SessionEvent::ChallengeOpened { session_id, .. }
            | SessionEvent::Matched { session_id, .. }
            | SessionEvent::RoundStarted { session_id, .. }
            | SessionEvent::MoveCommitted { session_id, .. }
            | SessionEvent::RevealRequested { session_id, .. }
            | SessionEvent::MoveRevealed { session_id, .. }
            | SessionEvent::RoundForfeited { session_id, .. }
            | SessionEvent::RoundResolved { session_id, .. }
            | SessionEvent::GameConcluded { session_id, .. }
            | SessionEvent::ResultAuthorized { session_id, .. }
            | SessionEvent::SettlementReady { session_id }
            | SessionEvent::Settled { session_id, .. }
            | SessionEvent::OpponentDisconnected { session_id, .. } => Some(*session_id),
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Queued { .. } => "queued",
            SessionEvent::QueueLeft { .. } => "queue_left",
            SessionEvent::ChallengeOpened { .. } => "challenge_opened",
            SessionEvent::Matched { .. } => "matched",
            SessionEvent::RoundStarted { .. } => "round_started",
            SessionEvent::MoveCommitted { .. } => "move_committed",
            SessionEvent::RevealRequested { .. } => "reveal_requested",
            SessionEvent::MoveRevealed { .. } => "move_revealed",
            SessionEvent::RoundForfeited { .. } => "round_forfeited",
            SessionEvent::RoundResolved { .. } => "round_resolved",
            SessionEvent::GameConcluded { .. } => "game_concluded",
            SessionEvent::ResultAuthorized { .. } => "result_authorized",
            SessionEvent::SettlementReady { .. } => "settlement_ready",
            SessionEvent::Settled { .. } => "settled",
            SessionEvent::OpponentDisconnected { .. } => "opponent_disconnected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = SessionEvent::MoveRevealed {
            session_id: SessionId::from_bytes([1; 16]),
            round: 2,
            participant: ParticipantId::new("0xabc"),
            mv: Move::Paper,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "move_revealed");
        assert_eq!(json["move"], "paper");
        assert_eq!(json["round"], 2);
    }

    #[test]
    fn test_queue_events_have_no_session() {
        let event = SessionEvent::QueueLeft { participant: ParticipantId::new("a") };
        assert_eq!(event.session_id(), None);
        assert_eq!(event.name(), "queue_left");
    }
}

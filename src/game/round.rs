//! Round Resolution
//!
//! One round = two commitments, then two reveals, then an outcome.
//! The round's phase is derived from which fields are filled in, so it can
//! never disagree with the data it describes.

use serde::{Deserialize, Serialize};

use crate::core::hash::Digest32;
use crate::game::moves::Move;

/// One of the two participant slots in a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// The participant who was waiting (or opened the challenge).
    First,
    /// The participant who joined second.
    Second,
}

impl Slot {
    /// Both slots, in order.
    pub const BOTH: [Slot; 2] = [Slot::First, Slot::Second];

    /// Array index of this slot.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Slot::First => 0,
            Slot::Second => 1,
        }
    }

    /// The other slot.
    #[inline]
    pub const fn opponent(self) -> Slot {
        match self {
            Slot::First => Slot::Second,
            Slot::Second => Slot::First,
        }
    }
}

/// Outcome of a single round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundWinner {
    /// First slot won.
    First,
    /// Second slot won.
    Second,
    /// Identical moves.
    Draw,
    /// Not both reveals recorded yet.
    Pending,
}

impl RoundWinner {
    /// Winner for a slot.
    pub const fn of(slot: Slot) -> Self {
        match slot {
            Slot::First => RoundWinner::First,
            Slot::Second => RoundWinner::Second,
        }
    }

    /// Slot that scored, if any.
    pub const fn slot(self) -> Option<Slot> {
        match self {
            RoundWinner::First => Some(Slot::First),
            RoundWinner::Second => Some(Slot::Second),
            RoundWinner::Draw | RoundWinner::Pending => None,
        }
    }
}

/// Per-round sub-state while a session is playing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Waiting for one or both commitments.
    AwaitingCommitments,
    /// Both committed, waiting for one or both reveals.
    AwaitingReveals,
    /// Winner computed; immutable from here on.
    RoundResolved,
}

/// A verified reveal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reveal {
    /// Revealed move.
    pub mv: Move,
    /// Nonce used in the commitment.
    pub nonce: String,
}

/// A single round record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// 1-based round number.
    pub number: u32,
    /// Commitment digests, indexed by slot.
    pub commitments: [Option<Digest32>; 2],
    /// Verified reveals, indexed by slot.
    pub reveals: [Option<Reveal>; 2],
    /// Rejected reveal attempts, indexed by slot.
    pub invalid_reveals: [u32; 2],
    /// Slot that forfeited this round by exhausting its reveal attempts.
    pub forfeited_by: Option<Slot>,
    /// Computed winner.
    pub winner: RoundWinner,
}

impl Round {
    /// Create an empty round.
    pub fn new(number: u32) -> Self {
        Self {
            number,
            commitments: [None, None],
            reveals: [None, None],
            invalid_reveals: [0, 0],
            forfeited_by: None,
            winner: RoundWinner::Pending,
        }
    }

    /// Current phase, derived from the recorded fields.
    pub fn phase(&self) -> RoundPhase {
        if self.winner != RoundWinner::Pending {
            RoundPhase::RoundResolved
        } else if self.commitments.iter().all(Option::is_some) {
            RoundPhase::AwaitingReveals
        } else {
            RoundPhase::AwaitingCommitments
        }
    }

    /// Commitment recorded for a slot.
    pub fn commitment(&self, slot: Slot) -> Option<&Digest32> {
        self.commitments[slot.index()].as_ref()
    }

    /// Reveal recorded for a slot.
    pub fn reveal(&self, slot: Slot) -> Option<&Reveal> {
        self.reveals[slot.index()].as_ref()
    }

    /// Revealed move for a slot.
    pub fn revealed_move(&self, slot: Slot) -> Option<Move> {
        self.reveal(slot).map(|r| r.mv)
    }

    /// Both moves, once both reveals are in.
    pub fn both_moves(&self) -> Option<(Move, Move)> {
        Some((self.revealed_move(Slot::First)?, self.revealed_move(Slot::Second)?))
    }
}

/// Decide a round from the two revealed moves.
pub fn resolve_round(first: Move, second: Move) -> RoundWinner {
    if first == second {
        RoundWinner::Draw
    } else if first.beats(second) {
        RoundWinner::First
    } else {
        RoundWinner::Second
    }
}

/// Cumulative round wins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scoreboard {
    /// First slot's round wins.
    pub first: u32,
    /// Second slot's round wins.
    pub second: u32,
}

impl Scoreboard {
    /// Score for a slot.
    pub const fn get(&self, slot: Slot) -> u32 {
        match slot {
            Slot::First => self.first,
            Slot::Second => self.second,
        }
    }

    /// Credit a round outcome. Draws and pending rounds change nothing.
    pub fn record(&mut self, winner: RoundWinner) {
        match winner {
            RoundWinner::First => self.first += 1,
            RoundWinner::Second => self.second += 1,
            RoundWinner::Draw | RoundWinner::Pending => {}
        }
    }

    /// Slot that has reached `threshold`, if any.
    pub fn leader_at(&self, threshold: u32) -> Option<Slot> {
        if self.first >= threshold {
            Some(Slot::First)
        } else if self.second >= threshold {
            Some(Slot::Second)
        } else {
            None
        }
    }

    /// Whether the scores are level.
    pub const fn is_tied(&self) -> bool {
        self.first == self.second
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_resolve_table() {
        use Move::*;
        assert_eq!(resolve_round(Rock, Scissors), RoundWinner::First);
        assert_eq!(resolve_round(Scissors, Paper), RoundWinner::First);
        assert_eq!(resolve_round(Paper, Rock), RoundWinner::First);
        assert_eq!(resolve_round(Scissors, Rock), RoundWinner::Second);
        assert_eq!(resolve_round(Paper, Scissors), RoundWinner::Second);
        assert_eq!(resolve_round(Rock, Paper), RoundWinner::Second);
        for m in Move::ALL {
            assert_eq!(resolve_round(m, m), RoundWinner::Draw);
        }
    }

    #[test]
    fn test_round_phase_progression() {
        let mut round = Round::new(1);
        assert_eq!(round.phase(), RoundPhase::AwaitingCommitments);

        round.commitments[0] = Some(Digest32::new([1; 32]));
        assert_eq!(round.phase(), RoundPhase::AwaitingCommitments);

        round.commitments[1] = Some(Digest32::new([2; 32]));
        assert_eq!(round.phase(), RoundPhase::AwaitingReveals);

        round.winner = RoundWinner::Draw;
        assert_eq!(round.phase(), RoundPhase::RoundResolved);
    }

    #[test]
    fn test_scoreboard() {
        let mut score = Scoreboard::default();
        score.record(RoundWinner::First);
        score.record(RoundWinner::Draw);
        score.record(RoundWinner::Second);
        score.record(RoundWinner::First);
        assert_eq!(score, Scoreboard { first: 2, second: 1 });
        assert_eq!(score.leader_at(3), None);
        score.record(RoundWinner::First);
        assert_eq!(score.leader_at(3), Some(Slot::First));
    }

    fn any_move() -> impl Strategy<Value = Move> {
        prop_oneof![Just(Move::Rock), Just(Move::Paper), Just(Move::Scissors)]
    }

    proptest! {
        #[test]
        fn prop_swapping_roles_swaps_winner(a in any_move(), b in any_move()) {
            let forward = resolve_round(a, b);
            let backward = resolve_round(b, a);
            let expected = match forward {
                RoundWinner::First => RoundWinner::Second,
                RoundWinner::Second => RoundWinner::First,
                other => other,
            };
            prop_assert_eq!(backward, expected);
        }

        #[test]
        fn prop_never_pending(a in any_move(), b in any_move()) {
            prop_assert_ne!(resolve_round(a, b), RoundWinner::Pending);
        }
    }
}

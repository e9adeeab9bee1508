//! Move Commitment Codec
//!
//! Commit to a move before the opponent's move is known.
//! Reveal the move and nonce later and verify against the commitment.
//!
//! The digest is `SHA-256("<move>:<nonce>:<game id>")`, the same preimage the
//! browser client builds, so commitments computed client-side verify here.
//! The codec holds no randomness; the nonce is chosen by the committing party
//! and is the only thing hiding the move.

use crate::core::hash::hash_bytes;
use crate::core::hash::Digest32;
use crate::core::ids::SessionId;
use crate::game::moves::Move;

/// Build the commitment preimage.
fn preimage(mv: Move, nonce: &str, game_id: &SessionId) -> String {
    format!("{}:{}:{}", mv.label(), nonce, game_id.to_uuid_string())
}

/// Derive the commitment digest for a move.
pub fn commit(mv: Move, nonce: &str, game_id: &SessionId) -> Digest32 {
    hash_bytes(preimage(mv, nonce, game_id).as_bytes())
}

/// Check a reveal against a previously recorded commitment.
pub fn verify(digest: &Digest32, mv: Move, nonce: &str, game_id: &SessionId) -> bool {
    commit(mv, nonce, game_id) == *digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn game() -> SessionId {
        SessionId::from_bytes([7; 16])
    }

    #[test]
    fn test_commit_deterministic() {
        assert_eq!(commit(Move::Rock, "n1", &game()), commit(Move::Rock, "n1", &game()));
    }

    #[test]
    fn test_matches_client_preimage() {
        let id = game();
        let expected = hash_bytes(format!("paper:abc:{}", id).as_bytes());
        assert_eq!(commit(Move::Paper, "abc", &id), expected);
    }

    #[test]
    fn test_altered_inputs_fail() {
        let id = game();
        let digest = commit(Move::Rock, "nonce", &id);

        assert!(verify(&digest, Move::Rock, "nonce", &id));
        assert!(!verify(&digest, Move::Paper, "nonce", &id));
        assert!(!verify(&digest, Move::Rock, "nonce2", &id));
        assert!(!verify(&digest, Move::Rock, "nonce", &SessionId::from_bytes([8; 16])));
    }

    fn any_move() -> impl Strategy<Value = Move> {
        prop_oneof![Just(Move::Rock), Just(Move::Paper), Just(Move::Scissors)]
    }

    proptest! {
        #[test]
        fn prop_commit_then_verify(mv in any_move(), nonce in "[a-zA-Z0-9]{1,64}", id in any::<[u8; 16]>()) {
            let id = SessionId::from_bytes(id);
            let digest = commit(mv, &nonce, &id);
            prop_assert!(verify(&digest, mv, &nonce, &id));
        }

        #[test]
        fn prop_other_move_fails(mv in any_move(), other in any_move(), nonce in "[a-z0-9]{8,32}") {
            prop_assume!(mv != other);
            let id = game();
            let digest = commit(mv, &nonce, &id);
            prop_assert!(!verify(&digest, other, &nonce, &id));
        }

        #[test]
        fn prop_other_nonce_fails(mv in any_move(), nonce in "[a-z0-9]{8,32}", other in "[a-z0-9]{8,32}") {
            prop_assume!(nonce != other);
            let id = game();
            let digest = commit(mv, &nonce, &id);
            prop_assert!(!verify(&digest, mv, &other, &id));
        }
    }
}

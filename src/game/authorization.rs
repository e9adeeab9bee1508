//! Result Authorization
//!
//! After a game concludes, each participant signs a digest of
//! `(game id, winner, loser, stake)`. The ledger accepts a settlement only
//! when both signatures verify against that same digest.
//!
//! Participants whose identifier is the hex encoding of an Ed25519 public key
//! (`0x` + 64 hex chars) can be verified locally.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::hash::{hash_bytes, Digest32, DigestHasher};
use crate::core::ids::{ParticipantId, SessionId, Stake};

/// Domain separator for result digests.
const RESULT_DOMAIN: &[u8] = b"RPS_ARENA_RESULT_V1";

/// Signature length in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// Digest both participants sign over a finished game.
pub fn result_digest(
    game_id: &SessionId,
    winner: &ParticipantId,
    loser: &ParticipantId,
    stake: Stake,
) -> Digest32 {
    let game_digest = hash_bytes(game_id.to_uuid_string().as_bytes());

    let mut hasher = DigestHasher::new(RESULT_DOMAIN);
    hasher.update_digest(&game_digest);
    hasher.update_str(winner.as_str());
    hasher.update_str(loser.as_str());
    hasher.update_u64(stake.base_units());
    hasher.finalize()
}

/// Fixed-length signature over a [`result_digest`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthorizationSignature(pub [u8; SIGNATURE_LEN]);

impl AuthorizationSignature {
    /// Parse from hex, with or without a `0x` prefix. Rejects any other length.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut out = [0u8; SIGNATURE_LEN];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }

    /// `0x`-prefixed hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for AuthorizationSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthorizationSignature({}..)", hex::encode(&self.0[..4]))
    }
}

impl Serialize for AuthorizationSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AuthorizationSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        AuthorizationSignature::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Participant identifier for an Ed25519 public key.
pub fn participant_for_key(key: &VerifyingKey) -> ParticipantId {
    ParticipantId::new(format!("0x{}", hex::encode(key.as_bytes())))
}

/// Public key encoded in a participant identifier, if it is one.
pub fn verifying_key(participant: &ParticipantId) -> Option<VerifyingKey> {
    let s = participant.as_str();
    let s = s.strip_prefix("0x").unwrap_or(s);
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(s, &mut bytes).ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

/// Sign a result digest.
pub fn sign_result(key: &SigningKey, digest: &Digest32) -> AuthorizationSignature {
    AuthorizationSignature(key.sign(digest.as_bytes()).to_bytes())
}

/// Verify that `signer` produced `signature` over `digest`.
///
/// Returns false when the signer identifier is not a public key.
pub fn verify_result(
    signer: &ParticipantId,
    digest: &Digest32,
    signature: &AuthorizationSignature,
) -> bool {
    let Some(key) = verifying_key(signer) else {
        return false;
    };
    let signature = Signature::from_bytes(&signature.0);
    key.verify(digest.as_bytes(), &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn digest_for(winner: &ParticipantId, loser: &ParticipantId) -> Digest32 {
        result_digest(&SessionId::from_bytes([1; 16]), winner, loser, Stake(1_000_000))
    }

    #[test]
    fn test_digest_binds_every_field() {
        let a = participant_for_key(&key(1).verifying_key());
        let b = participant_for_key(&key(2).verifying_key());
        let id = SessionId::from_bytes([1; 16]);

        let base = result_digest(&id, &a, &b, Stake(1));
        assert_ne!(base, result_digest(&id, &b, &a, Stake(1)));
        assert_ne!(base, result_digest(&id, &a, &b, Stake(2)));
        assert_ne!(base, result_digest(&SessionId::from_bytes([2; 16]), &a, &b, Stake(1)));
    }

    #[test]
    fn test_sign_and_verify() {
        let winner_key = key(1);
        let loser_key = key(2);
        let winner = participant_for_key(&winner_key.verifying_key());
        let loser = participant_for_key(&loser_key.verifying_key());
        let digest = digest_for(&winner, &loser);

        let sig = sign_result(&loser_key, &digest);
        assert!(verify_result(&loser, &digest, &sig));
        assert!(!verify_result(&winner, &digest, &sig));

        let other = digest_for(&loser, &winner);
        assert!(!verify_result(&loser, &other, &sig));
    }

    #[test]
    fn test_opaque_participant_never_verifies() {
        let digest = Digest32::new([3; 32]);
        let sig = sign_result(&key(1), &digest);
        assert!(!verify_result(&ParticipantId::new("0xnotakey"), &digest, &sig));
    }

    #[test]
    fn test_signature_hex_length_enforced() {
        let sig = sign_result(&key(1), &Digest32::new([3; 32]));
        assert_eq!(AuthorizationSignature::from_hex(&sig.to_hex()).unwrap(), sig);
        assert!(AuthorizationSignature::from_hex("0xdeadbeef").is_err());
    }
}

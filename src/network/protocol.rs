//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Messages are JSON, carried in text frames. Binary frames are accepted
//! and must hold the same UTF-8 JSON payload.

use serde::{Deserialize, Serialize};

use crate::core::hash::Digest32;
use crate::core::ids::{ParticipantId, SessionId, Stake};
use crate::engine::arena::LeaderboardEntry;
use crate::error::ArenaError;
use crate::game::authorization::AuthorizationSignature;
use crate::game::moves::Move;
use crate::game::session::GameSession;
use crate::notify::Notification;
use crate::store::ParticipantRecord;

/// Cap on list queries from clients.
pub const MAX_LIST_LIMIT: usize = 100;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Identify the connection. Must come first.
    Auth(AuthRequest),

    /// Join the matchmaking queue at a stake.
    JoinQueue { stake: Stake },

    /// Leave the matchmaking queue.
    LeaveQueue,

    /// Open a private challenge.
    OpenChallenge { stake: Stake },

    /// Accept a private challenge by id.
    AcceptChallenge { session_id: SessionId },

    /// Commit to a move for the current round.
    Commit {
        session_id: SessionId,
        commitment: Digest32,
    },

    /// Reveal the committed move.
    Reveal {
        session_id: SessionId,
        #[serde(rename = "move")]
        mv: Move,
        nonce: String,
    },

    /// Sign the final result.
    SignResult {
        session_id: SessionId,
        signature: AuthorizationSignature,
    },

    /// Request a fresh snapshot of one session, or of every live session
    /// the participant occupies.
    Sync {
        #[serde(default)]
        session_id: Option<SessionId>,
    },

    /// Own profile and stats.
    Profile,

    /// Recent sessions, newest first.
    History {
        #[serde(default = "default_limit")]
        limit: usize,
    },

    /// Top participants.
    Leaderboard {
        #[serde(default = "default_limit")]
        limit: usize,
    },

    /// Ping for latency measurement.
    Ping { timestamp: u64 },
}

fn default_limit() -> usize {
    20
}

/// Authentication request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Claimed participant (wallet address). Trusted only without JWT auth.
    #[serde(default)]
    pub participant: Option<String>,
    /// Bearer token, required when JWT auth is configured.
    #[serde(default)]
    pub token: Option<String>,
    /// Client version for compatibility logging.
    #[serde(default)]
    pub client_version: String,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Waiting in the queue.
    Queued { stake: Stake },

    /// Left these queue buckets.
    QueueLeft { stakes: Vec<Stake> },

    /// Authoritative snapshot of one session.
    Session { session: GameSession },

    /// Snapshots of several sessions.
    Sessions { sessions: Vec<GameSession> },

    /// Pushed state-change event.
    Event(Notification),

    /// Participant profile.
    Profile { participant: Option<ParticipantRecord> },

    /// Leaderboard rows.
    Leaderboard { entries: Vec<LeaderboardEntry> },

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Authentication result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Resolved participant if successful.
    pub participant: Option<ParticipantId>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Transport-level error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            message: message.into(),
        }
    }
}

impl From<&ArenaError> for ServerError {
    fn from(err: &ArenaError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Transport-level error codes. Game errors carry the arena's own codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// Malformed message.
    InvalidInput,
}

impl ErrorCode {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthFailed => "auth_failed",
            ErrorCode::NotAuthenticated => "not_authenticated",
            ErrorCode::InvalidInput => "invalid_input",
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Deserialize from a binary frame holding UTF-8 JSON.
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::SessionEvent;
    use crate::notify::Topic;
    use crate::store::StoreError;

    #[test]
    fn test_client_message_shapes() {
        let msg = ClientMessage::from_json(r#"{"type":"join_queue","stake":1000000}"#).unwrap();
        assert_eq!(msg, ClientMessage::JoinQueue { stake: Stake(1_000_000) });

        let msg = ClientMessage::from_json(r#"{"type":"leave_queue"}"#).unwrap();
        assert_eq!(msg, ClientMessage::LeaveQueue);

        let msg = ClientMessage::from_json(r#"{"type":"sync"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Sync { session_id: None });

        let msg = ClientMessage::from_json(r#"{"type":"leaderboard"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Leaderboard { limit: 20 });
    }

    #[test]
    fn test_reveal_uses_move_key() {
        let id = SessionId::from_bytes([7; 16]);
        let json = ClientMessage::Reveal {
            session_id: id,
            mv: Move::Scissors,
            nonce: "abc".into(),
        }
        .to_json()
        .unwrap();
        assert!(json.contains(r#""move":"scissors""#));
        assert!(json.contains(r#""type":"reveal""#));
    }

    #[test]
    fn test_commit_digest_is_hex() {
        let id = SessionId::from_bytes([1; 16]);
        let digest = Digest32::new([0xab; 32]);
        let json = ClientMessage::Commit { session_id: id, commitment: digest }.to_json().unwrap();
        assert!(json.contains(&"ab".repeat(32)));
        assert_eq!(
            ClientMessage::from_json(&json).unwrap(),
            ClientMessage::Commit { session_id: id, commitment: digest }
        );
    }

    #[test]
    fn test_auth_request_optional_fields() {
        let msg = ClientMessage::from_json(r#"{"type":"auth","participant":"0xABC"}"#).unwrap();
        let ClientMessage::Auth(auth) = msg else {
            panic!("expected auth");
        };
        assert_eq!(auth.participant.as_deref(), Some("0xABC"));
        assert!(auth.token.is_none());
    }

    #[test]
    fn test_binary_frames_carry_json() {
        let bytes = br#"{"type":"ping","timestamp":42}"#;
        assert_eq!(ClientMessage::from_bytes(bytes).unwrap(), ClientMessage::Ping { timestamp: 42 });
        assert!(ClientMessage::from_bytes(&[0xff, 0x00]).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"input","tick":1}"#).is_err());
    }

    #[test]
    fn test_event_envelope() {
        let id = SessionId::from_bytes([2; 16]);
        let msg = ServerMessage::Event(Notification {
            topic: Topic::Session(id),
            event: SessionEvent::SettlementReady { session_id: id },
        });
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"]["event"], "settlement_ready");
        assert_eq!(value["topic"]["kind"], "session");
    }

    #[test]
    fn test_error_codes() {
        let msg = ServerMessage::Error(ServerError::new(ErrorCode::AuthFailed, "Invalid token"));
        assert!(msg.to_json().unwrap().contains("auth_failed"));

        let err = ArenaError::Store(StoreError::Unavailable("down".into()));
        let server_error = ServerError::from(&err);
        assert_eq!(server_error.code, "store_unavailable");
    }
}

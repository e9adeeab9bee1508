//! Network Layer
//!
//! WebSocket server for participant connections.
//! This layer only translates frames; all game rules live in `game/` and
//! all orchestration in `engine/`.

pub mod auth;
pub mod protocol;
pub mod server;

pub use auth::{authenticate, validate_token, AuthConfig, AuthError, TokenClaims};
pub use protocol::{AuthRequest, AuthResult, ClientMessage, ErrorCode, ServerError, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};

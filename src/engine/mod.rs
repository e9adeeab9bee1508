//! Engine
//!
//! Async orchestration around the pure session state machine: matchmaking,
//! the session registry, the client-facing arena facade and the periodic
//! settlement batcher.

pub mod arena;
mod locks;
pub mod queue;
pub mod registry;
pub mod settlement;

pub use arena::{Arena, DisconnectAction, DisconnectPolicy, ForfeitOnDisconnect, LeaderboardEntry, NotifyOnly};
pub use queue::{JoinOutcome, MatchmakingQueue};
pub use registry::SessionRegistry;
pub use settlement::{BatchReport, SettlementBatcher, SettlementError};

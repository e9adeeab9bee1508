//! # RPS Arena Server
//!
//! Staked best-of-five rock-paper-scissors with commit-reveal rounds,
//! stake-bucketed matchmaking, and periodic batched settlement to a ledger.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    RPS ARENA SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Identifiers and hashing                   │
//! │  ├── hash.rs     - SHA-256 digests                           │
//! │  └── ids.rs      - Participant, session, stake, tx ids       │
//! │                                                              │
//! │  game/           - Session state machine (pure, no I/O)      │
//! │  ├── moves.rs    - Moves and the beats relation              │
//! │  ├── commitment.rs - Commit-reveal digests                   │
//! │  ├── round.rs    - Round phases and scoring                  │
//! │  ├── session.rs  - GameSession lifecycle                     │
//! │  ├── authorization.rs - Ed25519 result signatures            │
//! │  └── events.rs   - State-change events                       │
//! │                                                              │
//! │  store/          - Persistence trait + in-memory store       │
//! │  ledger/         - Settlement ledger trait + in-memory ledger│
//! │  notify/         - Best-effort event push                    │
//! │                                                              │
//! │  engine/         - Async orchestration                       │
//! │  ├── registry.rs - Per-session locking and persistence       │
//! │  ├── queue.rs    - Stake-bucketed matchmaking                │
//! │  ├── arena.rs    - Client-facing facade                      │
//! │  └── settlement.rs - Periodic batch settlement               │
//! │                                                              │
//! │  network/        - WebSocket transport and JWT auth          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! The store is the system of record. Every session mutation is persisted
//! before its events are published, and events are advisory: a client that
//! misses one re-syncs from the session snapshot. Settlement updates
//! participant stats only for sessions the ledger newly confirmed, so a
//! retried batch never double-counts.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod game;
pub mod ledger;
pub mod network;
pub mod notify;
pub mod store;

// Re-export commonly used types
pub use config::{ArenaConfig, EngineConfig, SettlementConfig};
pub use core::{Digest32, ParticipantId, SessionId, Stake, TxReference};
pub use engine::{Arena, JoinOutcome, SettlementBatcher};
pub use error::{ArenaError, ArenaResult};
pub use game::{GameSession, Move, SessionEvent};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Game Logic Module
//!
//! Pure game rules. No I/O, no clock reads, no locking.
//!
//! ## Module Structure
//!
//! - `moves`: The three moves and who beats whom
//! - `commitment`: Commit-reveal digests
//! - `round`: Per-round records, resolution and scoring
//! - `session`: Session lifecycle state machine
//! - `authorization`: Result digests and signatures
//! - `events`: State-change events pushed to clients

pub mod moves;
pub mod commitment;
pub mod round;
pub mod session;
pub mod authorization;
pub mod events;

// Re-export key types
pub use moves::Move;
pub use round::{Round, RoundPhase, RoundWinner, Scoreboard, Slot};
pub use session::{
    GameOutcome, GameSession, SessionError, SessionRules, SessionStatus, SettlementBatchItem,
    TiePolicy,
};
pub use authorization::AuthorizationSignature;
pub use events::SessionEvent;

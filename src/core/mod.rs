//! Core primitives.
//!
//! Digests, identifiers and stake amounts shared by every other layer.
//! Nothing here performs I/O or reads the clock.

pub mod hash;
pub mod ids;

// Re-export core types
pub use hash::{Digest32, DigestHasher};
pub use ids::{ParticipantId, SessionId, Stake, TxReference};
